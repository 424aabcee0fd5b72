//! OpenAPI Specification for the Chartcache API
//!
//! Generated by utoipa from the route annotations and schema derives.

use utoipa::OpenApi;

use crate::error::{ApiError, ErrorCode};
use crate::routes::chart::{EntryResponse, InProgressResponse, ListEntriesResponse};
use crate::routes::health::{
    CheckResult, EntryCounts, HealthStatus, LivenessReport, ReadinessReport,
};
use crate::routes::meta::MetaOption;
use crate::routes::{chart, health, meta};
use crate::telemetry::metrics;

use chartcache_core::{
    ChartKind, ChartOut, ChartPoint, ChartRequestSpec, Dimension, Filters, LedgerEntry,
    LedgerOutcome, Metric, ParamsFigure, ParamsJson, PointValue, ResultStatus, ValidationCode,
};

/// OpenAPI document for the Chartcache API.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Chartcache API",
        version = "0.1.0",
        description = "Deduplicating chart request service: identical requests are rendered once and served from cache",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "http://localhost:3000", description = "Local Development")
    ),
    tags(
        (name = "Charts", description = "Chart request resolution and cache entries"),
        (name = "Meta", description = "Option lists for request builders"),
        (name = "Health", description = "Liveness and readiness probes"),
        (name = "Observability", description = "Prometheus metrics")
    ),
    paths(
        // === Chart Routes ===
        chart::request_chart,
        chart::get_entry,
        chart::get_ledger,
        chart::list_entries,

        // === Meta Routes ===
        meta::list_columns,
        meta::list_values,
        meta::list_chart_types,
        meta::list_year_months,
        meta::list_industries,
        meta::list_age_levels,

        // === Health Routes ===
        health::ping,
        health::liveness,
        health::readiness,

        // === Observability ===
        metrics::metrics_handler,
    ),
    components(
        schemas(
            // === Error Types ===
            ApiError, ErrorCode, ValidationCode,

            // === Request Types ===
            ChartRequestSpec, ParamsJson, ParamsFigure, Filters,
            ChartKind, Dimension, Metric,

            // === Response Types ===
            ChartOut, ChartPoint, PointValue, InProgressResponse,
            EntryResponse, ListEntriesResponse, ResultStatus,
            LedgerEntry, LedgerOutcome, MetaOption,

            // === Health Types ===
            LivenessReport, ReadinessReport, CheckResult, EntryCounts, HealthStatus,
        )
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_lists_chart_routes() -> Result<(), serde_json::Error> {
        let doc = ApiDoc::openapi();
        let json = serde_json::to_value(&doc)?;
        let paths = &json["paths"];
        assert!(paths.get("/api/request").is_some());
        assert!(paths.get("/api/request/{key}/ledger").is_some());
        assert!(paths.get("/meta/industry").is_some());
        assert!(paths.get("/metrics").is_some());
        Ok(())
    }

    #[test]
    fn test_timestamps_documented_as_date_time() -> Result<(), serde_json::Error> {
        let json = serde_json::to_value(ApiDoc::openapi())?;
        let schemas = &json["components"]["schemas"];
        for (schema, field) in [
            ("EntryResponse", "created_at"),
            ("EntryResponse", "updated_at"),
            ("LedgerEntry", "created_at"),
        ] {
            let prop = &schemas[schema]["properties"][field];
            assert_eq!(prop["type"], "string", "{schema}.{field}");
            assert_eq!(prop["format"], "date-time", "{schema}.{field}");
        }
        Ok(())
    }
}
