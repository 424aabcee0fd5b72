//! Error types for Chartcache operations

use crate::enums::ResultStatus;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Machine-readable code attached to a request validation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationCode {
    HeatmapMissingYAxis,
    PieForbidsYAxis,
    YAxisHeatmapOnly,
    DuplicateAxis,
    SecondaryMetricNotAllowed,
    MissingMetric,
    HeatmapMissingMetric,
    DuplicateMetric,
    InvalidFigsize,
    InvalidTopn,
    InvalidMonth,
    InvalidMonthRange,
}

impl ValidationCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationCode::HeatmapMissingYAxis => "HEATMAP_MISSING_Y_AXIS",
            ValidationCode::PieForbidsYAxis => "PIE_FORBIDS_Y_AXIS",
            ValidationCode::YAxisHeatmapOnly => "Y_AXIS_HEATMAP_ONLY",
            ValidationCode::DuplicateAxis => "DUPLICATE_AXIS",
            ValidationCode::SecondaryMetricNotAllowed => "SECONDARY_METRIC_NOT_ALLOWED",
            ValidationCode::MissingMetric => "MISSING_METRIC",
            ValidationCode::HeatmapMissingMetric => "HEATMAP_MISSING_METRIC",
            ValidationCode::DuplicateMetric => "DUPLICATE_METRIC",
            ValidationCode::InvalidFigsize => "INVALID_FIGSIZE",
            ValidationCode::InvalidTopn => "INVALID_TOPN",
            ValidationCode::InvalidMonth => "INVALID_MONTH",
            ValidationCode::InvalidMonthRange => "INVALID_MONTH_RANGE",
        }
    }
}

impl fmt::Display for ValidationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A chart request failed its shape checks.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message} ({code}, field {field})")]
pub struct ValidationError {
    pub code: ValidationCode,
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new(code: ValidationCode, field: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            field,
            message: message.into(),
        }
    }
}

/// Storage layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Storage connection failed: {reason}")]
    Connection { reason: String },

    #[error("Connection pool exhausted: {reason}")]
    PoolExhausted { reason: String },

    #[error("Query failed: {reason}")]
    Query { reason: String },

    #[error("Cache entry {fingerprint} is not {expected} (transition rejected)")]
    InvalidTransition {
        fingerprint: String,
        expected: ResultStatus,
    },

    #[error("Cache entry not found: {fingerprint}")]
    NotFound { fingerprint: String },

    #[error("Serialization failed: {reason}")]
    Serialization { reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Serialization {
            reason: e.to_string(),
        }
    }
}

/// Errors produced by a chart renderer.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RenderError {
    #[error("No data matched the requested filters")]
    NoData,

    #[error("Invalid render parameters: {reason}")]
    InvalidParams { reason: String },

    #[error("Aggregation query failed: {reason}")]
    Query { reason: String },

    #[error("Artifact write failed: {reason}")]
    Io { reason: String },

    /// The request that held the claim failed; the stored reason is carried along.
    #[error("Concurrent render failed: {reason}")]
    ConcurrentFailure { reason: String },
}

impl From<std::io::Error> for RenderError {
    fn from(e: std::io::Error) -> Self {
        RenderError::Io {
            reason: e.to_string(),
        }
    }
}

/// Master error type for all Chartcache errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChartError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Render error: {0}")]
    Render(#[from] RenderError),
}

/// Result type alias for Chartcache operations.
pub type ChartResult<T> = Result<T, ChartError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chart_error_from_variants() {
        let storage = ChartError::from(StorageError::LockPoisoned);
        assert!(matches!(storage, ChartError::Storage(_)));

        let render = ChartError::from(RenderError::NoData);
        assert!(matches!(render, ChartError::Render(_)));

        let validation = ChartError::from(ValidationError::new(
            ValidationCode::DuplicateAxis,
            "y_axis",
            "y_axis must differ from x_axis",
        ));
        assert!(matches!(validation, ChartError::Validation(_)));
    }

    #[test]
    fn test_validation_code_wire_format() -> Result<(), serde_json::Error> {
        assert_eq!(
            serde_json::to_string(&ValidationCode::HeatmapMissingYAxis)?,
            "\"HEATMAP_MISSING_Y_AXIS\""
        );
        assert_eq!(
            ValidationCode::SecondaryMetricNotAllowed.as_str(),
            "SECONDARY_METRIC_NOT_ALLOWED"
        );
        Ok(())
    }

    #[test]
    fn test_invalid_transition_message() {
        let err = StorageError::InvalidTransition {
            fingerprint: "abc".to_string(),
            expected: ResultStatus::Pending,
        };
        assert_eq!(
            err.to_string(),
            "Cache entry abc is not PENDING (transition rejected)"
        );
    }
}
