//! Metadata Routes
//!
//! Option lists for building chart requests: the closed enums plus the
//! distinct values present in `clean_data`.

use axum::{extract::State, routing::get, Json, Router};
use chartcache_core::{ChartKind, Dimension, Metric};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::db::DbClient;
use crate::error::ApiResult;

/// One selectable option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct MetaOption {
    pub key: String,
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl MetaOption {
    fn plain(value: impl Into<String>) -> Self {
        let value = value.into();
        Self {
            key: value.clone(),
            value,
            label: None,
        }
    }

    fn labelled(key: &str, value: &str, label: &str) -> Self {
        Self {
            key: key.to_string(),
            value: value.to_string(),
            label: Some(label.to_string()),
        }
    }
}

#[derive(Clone)]
pub struct MetaState {
    pub db: DbClient,
}

pub fn column_options() -> Vec<MetaOption> {
    Dimension::ALL
        .iter()
        .map(|d| MetaOption::labelled(d.key(), d.column(), d.label()))
        .collect()
}

pub fn value_options() -> Vec<MetaOption> {
    Metric::ALL
        .iter()
        .map(|m| MetaOption::labelled(m.column(), m.column(), m.label()))
        .collect()
}

pub fn chart_type_options() -> Vec<MetaOption> {
    ChartKind::ALL
        .iter()
        .map(|k| MetaOption::plain(k.as_str()))
        .collect()
}

/// GET /meta/column
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/meta/column",
    tag = "Meta",
    responses((status = 200, description = "Groupable columns", body = Vec<MetaOption>)),
))]
pub async fn list_columns() -> Json<Vec<MetaOption>> {
    Json(column_options())
}

/// GET /meta/value
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/meta/value",
    tag = "Meta",
    responses((status = 200, description = "Aggregatable metrics", body = Vec<MetaOption>)),
))]
pub async fn list_values() -> Json<Vec<MetaOption>> {
    Json(value_options())
}

/// GET /meta/chart_type
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/meta/chart_type",
    tag = "Meta",
    responses((status = 200, description = "Supported chart kinds", body = Vec<MetaOption>)),
))]
pub async fn list_chart_types() -> Json<Vec<MetaOption>> {
    Json(chart_type_options())
}

async fn distinct(state: &MetaState, dimension: Dimension) -> ApiResult<Json<Vec<MetaOption>>> {
    let values = state.db.distinct_values(dimension).await?;
    Ok(Json(values.into_iter().map(MetaOption::plain).collect()))
}

/// GET /meta/year_month
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/meta/year_month",
    tag = "Meta",
    responses(
        (status = 200, description = "Months present in the data", body = Vec<MetaOption>),
        (status = 503, description = "Database unavailable", body = crate::error::ApiError),
    ),
))]
pub async fn list_year_months(State(state): State<Arc<MetaState>>) -> ApiResult<Json<Vec<MetaOption>>> {
    distinct(&state, Dimension::YearMonth).await
}

/// GET /meta/industry
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/meta/industry",
    tag = "Meta",
    responses(
        (status = 200, description = "Industries present in the data", body = Vec<MetaOption>),
        (status = 503, description = "Database unavailable", body = crate::error::ApiError),
    ),
))]
pub async fn list_industries(State(state): State<Arc<MetaState>>) -> ApiResult<Json<Vec<MetaOption>>> {
    distinct(&state, Dimension::Industry).await
}

/// GET /meta/age_level
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/meta/age_level",
    tag = "Meta",
    responses(
        (status = 200, description = "Age brackets present in the data", body = Vec<MetaOption>),
        (status = 503, description = "Database unavailable", body = crate::error::ApiError),
    ),
))]
pub async fn list_age_levels(State(state): State<Arc<MetaState>>) -> ApiResult<Json<Vec<MetaOption>>> {
    distinct(&state, Dimension::AgeLevel).await
}

pub fn create_router(db: DbClient) -> Router {
    let state = Arc::new(MetaState { db });

    Router::new()
        .route("/column", get(list_columns))
        .route("/value", get(list_values))
        .route("/chart_type", get(list_chart_types))
        .route("/year_month", get(list_year_months))
        .route("/industry", get(list_industries))
        .route("/age_level", get(list_age_levels))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_options_use_listing_keys() {
        let columns = column_options();
        assert_eq!(columns.len(), 3);
        assert_eq!(columns[0].key, "year_month");
        assert_eq!(columns[0].value, "ym");
        assert!(columns.iter().all(|c| c.label.is_some()));
    }

    #[test]
    fn test_value_and_chart_type_options() {
        let values: Vec<_> = value_options().into_iter().map(|o| o.value).collect();
        assert_eq!(values, vec!["trans_count", "trans_total"]);

        let kinds = chart_type_options();
        assert_eq!(kinds.len(), 4);
        assert!(kinds.iter().all(|k| k.key == k.value && k.label.is_none()));
    }

    #[test]
    fn test_plain_option_skips_label() -> Result<(), serde_json::Error> {
        let json = serde_json::to_value(MetaOption::plain("202401"))?;
        assert_eq!(json, serde_json::json!({"key": "202401", "value": "202401"}));
        Ok(())
    }
}
