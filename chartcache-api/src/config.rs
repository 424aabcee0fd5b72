//! API Configuration Module
//!
//! CORS, artifact storage and contention settings. Configuration is loaded
//! from environment variables with sensible defaults for development.

use std::path::PathBuf;
use std::time::Duration;

use crate::services::ContentionPolicy;

// ============================================================================
// API CONFIGURATION
// ============================================================================

/// API configuration for CORS, chart storage and deduplication waits.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    // ========================================================================
    // CORS Configuration
    // ========================================================================
    /// Allowed CORS origins (comma-separated in env var).
    /// Empty means allow all origins (dev mode).
    pub cors_origins: Vec<String>,

    /// Whether to allow credentials in CORS requests.
    pub cors_allow_credentials: bool,

    /// Max age for CORS preflight cache in seconds.
    pub cors_max_age_secs: u64,

    // ========================================================================
    // Chart Configuration
    // ========================================================================
    /// Directory that rendered chart artifacts are written under.
    pub chart_dir: PathBuf,

    /// How often a contended request re-checks a PENDING entry.
    pub contention_poll_interval: Duration,

    /// How long a contended request waits before answering "in progress".
    pub contention_max_wait: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            cors_origins: Vec::new(), // Empty = allow all
            cors_allow_credentials: false,
            cors_max_age_secs: 86400,

            chart_dir: PathBuf::from("chart_storage"),
            contention_poll_interval: Duration::from_millis(100),
            contention_max_wait: Duration::from_secs(5),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

impl ApiConfig {
    /// Create ApiConfig from environment variables.
    ///
    /// Environment variables:
    /// - `CHARTCACHE_CORS_ORIGINS`: Comma-separated allowed origins (empty = allow all)
    /// - `CHARTCACHE_CORS_ALLOW_CREDENTIALS`: "true" or "false" (default: false)
    /// - `CHARTCACHE_CORS_MAX_AGE_SECS`: Preflight cache duration (default: 86400)
    /// - `CHARTCACHE_CHART_DIR`: Artifact directory (default: chart_storage)
    /// - `CHARTCACHE_CONTENTION_POLL_MS`: Poll interval while waiting on a claim (default: 100)
    /// - `CHARTCACHE_CONTENTION_MAX_WAIT_MS`: Wait budget, 0 returns immediately (default: 5000)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let cors_origins = std::env::var("CHARTCACHE_CORS_ORIGINS")
            .ok()
            .map(|s| {
                s.split(',')
                    .map(|o| o.trim().to_string())
                    .filter(|o| !o.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let cors_allow_credentials = std::env::var("CHARTCACHE_CORS_ALLOW_CREDENTIALS")
            .ok()
            .map(|s| s.to_lowercase() == "true")
            .unwrap_or(false);

        let cors_max_age_secs =
            env_parse("CHARTCACHE_CORS_MAX_AGE_SECS").unwrap_or(defaults.cors_max_age_secs);

        let chart_dir = std::env::var("CHARTCACHE_CHART_DIR")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.chart_dir);

        let contention_poll_interval = env_parse::<u64>("CHARTCACHE_CONTENTION_POLL_MS")
            .map(Duration::from_millis)
            .unwrap_or(defaults.contention_poll_interval);

        let contention_max_wait = env_parse::<u64>("CHARTCACHE_CONTENTION_MAX_WAIT_MS")
            .map(Duration::from_millis)
            .unwrap_or(defaults.contention_max_wait);

        Self {
            cors_origins,
            cors_allow_credentials,
            cors_max_age_secs,
            chart_dir,
            contention_poll_interval,
            contention_max_wait,
        }
    }

    /// Check if running in production mode (strict CORS).
    pub fn is_production(&self) -> bool {
        !self.cors_origins.is_empty()
    }

    /// Check if a given origin is allowed.
    pub fn is_origin_allowed(&self, origin: &str) -> bool {
        if self.cors_origins.is_empty() {
            return true;
        }

        self.cors_origins.iter().any(|allowed| {
            if allowed == origin {
                return true;
            }
            // Wildcard subdomains: *.example.com
            if let Some(pattern) = allowed.strip_prefix("*.") {
                if let Some(origin_domain) = origin.strip_prefix("https://") {
                    return origin_domain.ends_with(&format!(".{}", pattern));
                }
            }
            false
        })
    }

    /// Wait policy handed to the deduplication coordinator.
    pub fn contention_policy(&self) -> ContentionPolicy {
        ContentionPolicy {
            poll_interval: self.contention_poll_interval,
            max_wait: self.contention_max_wait,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    struct EnvVarGuard {
        key: &'static str,
        prev: Option<String>,
    }

    impl EnvVarGuard {
        fn set(key: &'static str, value: &str) -> Self {
            let prev = std::env::var(key).ok();
            std::env::set_var(key, value);
            Self { key, prev }
        }
    }

    impl Drop for EnvVarGuard {
        fn drop(&mut self) {
            match &self.prev {
                Some(v) => std::env::set_var(self.key, v),
                None => std::env::remove_var(self.key),
            }
        }
    }

    #[test]
    fn test_default_config() {
        let config = ApiConfig::default();
        assert!(config.cors_origins.is_empty());
        assert!(!config.cors_allow_credentials);
        assert_eq!(config.cors_max_age_secs, 86400);
        assert_eq!(config.chart_dir, PathBuf::from("chart_storage"));
        assert_eq!(config.contention_max_wait, Duration::from_secs(5));
    }

    #[test]
    fn test_from_env_overrides() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let _a = EnvVarGuard::set("CHARTCACHE_CORS_ORIGINS", "https://a.example, https://b.example");
        let _b = EnvVarGuard::set("CHARTCACHE_CHART_DIR", "/tmp/charts");
        let _c = EnvVarGuard::set("CHARTCACHE_CONTENTION_POLL_MS", "25");
        let _d = EnvVarGuard::set("CHARTCACHE_CONTENTION_MAX_WAIT_MS", "0");

        let config = ApiConfig::from_env();
        assert_eq!(config.cors_origins.len(), 2);
        assert_eq!(config.chart_dir, PathBuf::from("/tmp/charts"));

        let policy = config.contention_policy();
        assert_eq!(policy.poll_interval, Duration::from_millis(25));
        assert_eq!(policy.max_wait, Duration::ZERO);
    }

    #[test]
    fn test_origin_allowed() {
        let mut config = ApiConfig::default();
        assert!(config.is_origin_allowed("https://anything.com"));

        config.cors_origins = vec![
            "https://charts.example".to_string(),
            "*.example.org".to_string(),
        ];
        assert!(config.is_production());
        assert!(config.is_origin_allowed("https://charts.example"));
        assert!(config.is_origin_allowed("https://app.example.org"));
        assert!(!config.is_origin_allowed("https://evil.com"));
        assert!(!config.is_origin_allowed("https://notexample.org"));
    }
}
