//! Persisted records and response payloads.

use crate::enums::{ChartKind, LedgerOutcome, ResultStatus};
use crate::fingerprint::Fingerprint;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Row id assigned by the store.
pub type EntryId = i64;

/// The `y` of a chart point: a number for bar/line/pie, a category for heatmaps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(untagged)]
pub enum PointValue {
    Number(f64),
    Label(String),
}

/// One data point of a rendered chart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ChartPoint {
    pub x: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<PointValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub share: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub growth: Option<f64>,
}

impl ChartPoint {
    pub fn new(x: impl Into<String>) -> Self {
        Self {
            x: x.into(),
            y: None,
            amount: None,
            share: None,
            growth: None,
        }
    }
}

/// A cache entry: one fingerprint's computation lifecycle and result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct CacheEntry {
    pub id: EntryId,
    pub fingerprint: Fingerprint,
    pub chart_type: ChartKind,
    pub status: ResultStatus,
    /// Set only once the entry is READY.
    pub artifact_ref: Option<String>,
    /// Set only once the entry is READY.
    pub data_points: Option<Vec<ChartPoint>>,
    /// Set only while the entry is FAILED.
    pub failure_reason: Option<String>,
    #[cfg_attr(feature = "openapi", schema(value_type = Object))]
    pub spec_snapshot: Value,
    pub created_by: i64,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub created_at: Timestamp,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub updated_at: Timestamp,
}

impl CacheEntry {
    pub fn is_ready(&self) -> bool {
        self.status == ResultStatus::Ready
    }
}

/// Input for claiming a fresh PENDING entry.
#[derive(Debug, Clone, PartialEq)]
pub struct NewCacheEntry {
    pub fingerprint: Fingerprint,
    pub chart_type: ChartKind,
    pub spec_snapshot: Value,
    pub created_by: i64,
}

/// One inbound request and how it was resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct LedgerEntry {
    pub id: EntryId,
    pub cache_entry_id: EntryId,
    pub chart_type: ChartKind,
    /// The raw request, cosmetic fields included.
    #[cfg_attr(feature = "openapi", schema(value_type = Object))]
    pub params_json: Value,
    pub outcome: LedgerOutcome,
    pub cache_hit: bool,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub created_at: Timestamp,
}

/// Input for appending a ledger row. `cache_hit` is derived from the outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct NewLedgerEntry {
    pub cache_entry_id: EntryId,
    pub chart_type: ChartKind,
    pub params_json: Value,
    pub outcome: LedgerOutcome,
}

/// Successful chart response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ChartOut {
    /// Cache key (fingerprint).
    pub key: String,
    /// Artifact reference.
    pub url: String,
    pub points: Vec<ChartPoint>,
}

impl ChartOut {
    /// Build a response from a READY entry. Returns `None` for any other state.
    pub fn from_entry(entry: &CacheEntry) -> Option<Self> {
        if !entry.is_ready() {
            return None;
        }
        Some(Self {
            key: entry.fingerprint.to_string(),
            url: entry.artifact_ref.clone()?,
            points: entry.data_points.clone().unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn entry(status: ResultStatus) -> CacheEntry {
        let now = Utc::now();
        CacheEntry {
            id: 1,
            fingerprint: Fingerprint::from_stored("a".repeat(64)),
            chart_type: ChartKind::Bar,
            status,
            artifact_ref: Some("/chart_storage/bar/x.json".to_string()),
            data_points: Some(vec![ChartPoint::new("202401")]),
            failure_reason: None,
            spec_snapshot: Value::Null,
            created_by: 0,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_chart_out_requires_ready() {
        assert!(ChartOut::from_entry(&entry(ResultStatus::Pending)).is_none());
        let out = ChartOut::from_entry(&entry(ResultStatus::Ready));
        assert_eq!(
            out.map(|o| o.url),
            Some("/chart_storage/bar/x.json".to_string())
        );
    }

    #[test]
    fn test_point_value_untagged() -> Result<(), serde_json::Error> {
        let p: ChartPoint = serde_json::from_str(r#"{"x":"202401","y":"餐饮","amount":1.5}"#)?;
        assert_eq!(p.y, Some(PointValue::Label("餐饮".to_string())));
        let p: ChartPoint = serde_json::from_str(r#"{"x":"202401","y":2.25}"#)?;
        assert_eq!(p.y, Some(PointValue::Number(2.25)));
        assert_eq!(serde_json::to_string(&ChartPoint::new("a"))?, r#"{"x":"a"}"#);
        Ok(())
    }
}
