//! Error Types for Chartcache API
//!
//! This module defines error handling for the API layer, including:
//! - ApiError struct for structured error responses
//! - ErrorCode enum for categorizing errors
//! - IntoResponse implementation for Axum HTTP responses
//!
//! All errors are serialized as JSON with appropriate HTTP status codes.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chartcache_core::{ChartError, RenderError, StorageError, ValidationCode};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// ERROR CODE ENUM
// ============================================================================

/// Error codes for API responses.
///
/// Each error code maps to a specific HTTP status code and represents
/// a category of error that can occur during API operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // ========================================================================
    // Request Errors (400)
    // ========================================================================
    /// Request contains invalid input data
    InvalidInput,

    /// Field format is incorrect
    InvalidFormat,

    // ========================================================================
    // Chart Validation Errors (422)
    // ========================================================================
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

    // ========================================================================
    // Not Found Errors (404)
    // ========================================================================
    /// Requested cache entry does not exist
    EntryNotFound,

    // ========================================================================
    // Upstream Errors (502)
    // ========================================================================
    /// The chart renderer failed
    RenderFailed,

    // ========================================================================
    // Server Errors (500, 503)
    // ========================================================================
    /// Internal server error
    InternalError,

    /// Database operation failed
    DatabaseError,

    /// Service is temporarily unavailable
    ServiceUnavailable,

    /// Database connection pool exhausted
    ConnectionPoolExhausted,
}

impl ErrorCode {
    /// Get the HTTP status code for this error code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::InvalidInput | ErrorCode::InvalidFormat => StatusCode::BAD_REQUEST,

            ErrorCode::HeatmapMissingYAxis
            | ErrorCode::PieForbidsYAxis
            | ErrorCode::YAxisHeatmapOnly
            | ErrorCode::DuplicateAxis
            | ErrorCode::SecondaryMetricNotAllowed
            | ErrorCode::MissingMetric
            | ErrorCode::HeatmapMissingMetric
            | ErrorCode::DuplicateMetric
            | ErrorCode::InvalidFigsize
            | ErrorCode::InvalidTopn
            | ErrorCode::InvalidMonth
            | ErrorCode::InvalidMonthRange => StatusCode::UNPROCESSABLE_ENTITY,

            ErrorCode::EntryNotFound => StatusCode::NOT_FOUND,

            ErrorCode::RenderFailed => StatusCode::BAD_GATEWAY,

            ErrorCode::ServiceUnavailable | ErrorCode::ConnectionPoolExhausted => {
                StatusCode::SERVICE_UNAVAILABLE
            }

            ErrorCode::InternalError | ErrorCode::DatabaseError => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Get a default message for this error code.
    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorCode::InvalidInput => "Invalid input data",
            ErrorCode::InvalidFormat => "Invalid format",
            ErrorCode::HeatmapMissingYAxis => "heatmap requires y_axis",
            ErrorCode::PieForbidsYAxis => "pie chart must not set y_axis",
            ErrorCode::YAxisHeatmapOnly => "y_axis is only allowed for heatmap",
            ErrorCode::DuplicateAxis => "y_axis must differ from x_axis",
            ErrorCode::SecondaryMetricNotAllowed => "value2 is only allowed for heatmap",
            ErrorCode::MissingMetric => "value is required",
            ErrorCode::HeatmapMissingMetric => "heatmap requires value and value2",
            ErrorCode::DuplicateMetric => "value2 must differ from value",
            ErrorCode::InvalidFigsize => "figsize components must be positive",
            ErrorCode::InvalidTopn => "topn must be a positive integer",
            ErrorCode::InvalidMonth => "month must be YYYYMM",
            ErrorCode::InvalidMonthRange => "end_month must not precede start_month",
            ErrorCode::EntryNotFound => "Cache entry not found",
            ErrorCode::RenderFailed => "Chart rendering failed",
            ErrorCode::InternalError => "Internal server error",
            ErrorCode::DatabaseError => "Database operation failed",
            ErrorCode::ServiceUnavailable => "Service temporarily unavailable",
            ErrorCode::ConnectionPoolExhausted => "Connection pool exhausted",
        }
    }
}

impl From<ValidationCode> for ErrorCode {
    fn from(code: ValidationCode) -> Self {
        match code {
            ValidationCode::HeatmapMissingYAxis => ErrorCode::HeatmapMissingYAxis,
            ValidationCode::PieForbidsYAxis => ErrorCode::PieForbidsYAxis,
            ValidationCode::YAxisHeatmapOnly => ErrorCode::YAxisHeatmapOnly,
            ValidationCode::DuplicateAxis => ErrorCode::DuplicateAxis,
            ValidationCode::SecondaryMetricNotAllowed => ErrorCode::SecondaryMetricNotAllowed,
            ValidationCode::MissingMetric => ErrorCode::MissingMetric,
            ValidationCode::HeatmapMissingMetric => ErrorCode::HeatmapMissingMetric,
            ValidationCode::DuplicateMetric => ErrorCode::DuplicateMetric,
            ValidationCode::InvalidFigsize => ErrorCode::InvalidFigsize,
            ValidationCode::InvalidTopn => ErrorCode::InvalidTopn,
            ValidationCode::InvalidMonth => ErrorCode::InvalidMonth,
            ValidationCode::InvalidMonthRange => ErrorCode::InvalidMonthRange,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ============================================================================
// API ERROR STRUCT
// ============================================================================

/// Structured error response for API operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ApiError {
    /// Error code categorizing the error
    pub code: ErrorCode,

    /// Human-readable error message
    pub message: String,

    /// Request field the error refers to, for validation failures
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl ApiError {
    /// Create a new API error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            field: None,
        }
    }

    /// Create a new API error with the given code, using the default message.
    pub fn from_code(code: ErrorCode) -> Self {
        Self::new(code, code.default_message())
    }

    /// Attach the offending field name.
    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        self.code.status_code()
    }

    // ========================================================================
    // Convenience constructors for common errors
    // ========================================================================

    /// Create an InvalidInput error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    /// Create an InvalidFormat error.
    pub fn invalid_format(field: &str, expected: &str) -> Self {
        Self::new(
            ErrorCode::InvalidFormat,
            format!("Field '{}' has invalid format, expected {}", field, expected),
        )
        .with_field(field)
    }

    /// Create an EntryNotFound error.
    pub fn entry_not_found(key: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::EntryNotFound,
            format!("Cache entry {} not found", key),
        )
    }

    /// Create a RenderFailed error.
    pub fn render_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::RenderFailed, message)
    }

    /// Create an InternalError.
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    /// Create a DatabaseError.
    pub fn database_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::DatabaseError, message)
    }

    /// Create a ServiceUnavailable error.
    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ServiceUnavailable, message)
    }

    /// Create a ConnectionPoolExhausted error.
    pub fn connection_pool_exhausted() -> Self {
        Self::from_code(ErrorCode::ConnectionPoolExhausted)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

// ============================================================================
// AXUM INTEGRATION
// ============================================================================

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(self);
        (status, body).into_response()
    }
}

// ============================================================================
// CONVERSIONS
// ============================================================================

impl From<ChartError> for ApiError {
    fn from(err: ChartError) -> Self {
        match err {
            ChartError::Validation(v) => {
                ApiError::new(ErrorCode::from(v.code), v.message).with_field(v.field)
            }
            ChartError::Render(r) => {
                tracing::warn!(error = %r, "Render failed");
                match r {
                    RenderError::ConcurrentFailure { reason } => ApiError::render_failed(reason),
                    other => ApiError::render_failed(other.to_string()),
                }
            }
            ChartError::Storage(s) => {
                tracing::error!(error = %s, "Storage error");
                match s {
                    StorageError::PoolExhausted { .. } => ApiError::connection_pool_exhausted(),
                    StorageError::Connection { .. } => {
                        ApiError::service_unavailable("Database unavailable")
                    }
                    StorageError::NotFound { fingerprint } => ApiError::entry_not_found(fingerprint),
                    _ => ApiError::database_error("Database operation failed"),
                }
            }
        }
    }
}

/// Convert from tokio_postgres::Error to ApiError.
impl From<tokio_postgres::Error> for ApiError {
    fn from(err: tokio_postgres::Error) -> Self {
        tracing::error!("Database error: {:?}", err);

        // Return a generic database error to avoid leaking internal details
        ApiError::database_error("Database operation failed")
    }
}

/// Convert from deadpool_postgres::PoolError to ApiError.
impl From<deadpool_postgres::PoolError> for ApiError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        tracing::error!("Connection pool error: {:?}", err);

        match err {
            deadpool_postgres::PoolError::Timeout(_) => ApiError::connection_pool_exhausted(),
            deadpool_postgres::PoolError::Closed => {
                ApiError::service_unavailable("Database connection pool is closed")
            }
            _ => ApiError::database_error("Failed to acquire database connection"),
        }
    }
}

/// Convert from serde_json::Error to ApiError.
impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        tracing::error!("JSON serialization error: {:?}", err);
        ApiError::invalid_input(format!("Invalid JSON: {}", err))
    }
}

// ============================================================================
// RESULT TYPE ALIAS
// ============================================================================

/// Result type alias for API operations.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use chartcache_core::ValidationError;

    #[test]
    fn test_error_code_status_mapping() {
        assert_eq!(ErrorCode::InvalidInput.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ErrorCode::PieForbidsYAxis.status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(ErrorCode::EntryNotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(ErrorCode::RenderFailed.status_code(), StatusCode::BAD_GATEWAY);
        assert_eq!(
            ErrorCode::DatabaseError.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ErrorCode::ConnectionPoolExhausted.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_validation_error_conversion() {
        let err = ApiError::from(ChartError::Validation(ValidationError::new(
            ValidationCode::HeatmapMissingYAxis,
            "y_axis",
            "heatmap requires y_axis",
        )));
        assert_eq!(err.code, ErrorCode::HeatmapMissingYAxis);
        assert_eq!(err.field.as_deref(), Some("y_axis"));
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn test_validation_codes_share_wire_names() -> Result<(), serde_json::Error> {
        let codes = [
            ValidationCode::HeatmapMissingYAxis,
            ValidationCode::PieForbidsYAxis,
            ValidationCode::YAxisHeatmapOnly,
            ValidationCode::DuplicateAxis,
            ValidationCode::SecondaryMetricNotAllowed,
            ValidationCode::MissingMetric,
            ValidationCode::HeatmapMissingMetric,
            ValidationCode::DuplicateMetric,
            ValidationCode::InvalidFigsize,
            ValidationCode::InvalidTopn,
            ValidationCode::InvalidMonth,
            ValidationCode::InvalidMonthRange,
        ];
        for code in codes {
            assert_eq!(
                serde_json::to_string(&ErrorCode::from(code))?,
                serde_json::to_string(&code)?
            );
        }
        Ok(())
    }

    #[test]
    fn test_render_and_storage_conversion() {
        let err = ApiError::from(ChartError::Render(RenderError::ConcurrentFailure {
            reason: "no data".to_string(),
        }));
        assert_eq!(err.code, ErrorCode::RenderFailed);
        assert_eq!(err.message, "no data");

        let err = ApiError::from(ChartError::Storage(StorageError::PoolExhausted {
            reason: "timeout".to_string(),
        }));
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);

        let err = ApiError::from(ChartError::Storage(StorageError::LockPoisoned));
        assert_eq!(err.code, ErrorCode::DatabaseError);
    }

    #[test]
    fn test_error_serialization() -> Result<(), serde_json::Error> {
        let err = ApiError::from_code(ErrorCode::InvalidTopn).with_field("topn");
        let json = serde_json::to_value(&err)?;
        assert_eq!(json["code"], "INVALID_TOPN");
        assert_eq!(json["field"], "topn");

        let bare = serde_json::to_value(ApiError::internal_error("x"))?;
        assert!(bare.get("field").is_none());
        Ok(())
    }
}
