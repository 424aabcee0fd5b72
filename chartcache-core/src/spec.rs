//! Inbound chart request shape and its validation rules.

use crate::enums::{ChartKind, Dimension, Metric};
use crate::error::{ValidationCode, ValidationError};
use serde::{Deserialize, Serialize};

/// Axis and metric selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ParamsJson {
    pub x_axis: Dimension,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y_axis: Option<Dimension>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Metric>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value2: Option<Metric>,
}

/// Presentation-only figure settings. Never part of the fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ParamsFigure {
    #[serde(default = "default_figsize")]
    #[cfg_attr(feature = "openapi", schema(value_type = Vec<f64>))]
    pub figsize: (f64, f64),
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set_xlabel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set_ylabel: Option<String>,
}

fn default_figsize() -> (f64, f64) {
    (10.0, 8.0)
}

impl Default for ParamsFigure {
    fn default() -> Self {
        Self {
            figsize: default_figsize(),
            set_title: None,
            set_xlabel: None,
            set_ylabel: None,
        }
    }
}

/// Row filters applied before aggregation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Filters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_month: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_month: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topn: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub industry: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age_level: Option<String>,
}

/// A user's chart request as received over HTTP.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ChartRequestSpec {
    pub chart_type: ChartKind,
    pub params_json: ParamsJson,
    #[serde(default)]
    pub params_figure: ParamsFigure,
    #[serde(default)]
    pub filters: Filters,
    /// Requester id.
    #[serde(default)]
    pub create_by: i64,
}

impl ChartRequestSpec {
    /// Check the request's shape. The first failing rule wins.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let kind = self.chart_type;
        let p = &self.params_json;

        if kind == ChartKind::Heatmap && p.y_axis.is_none() {
            return Err(ValidationError::new(
                ValidationCode::HeatmapMissingYAxis,
                "y_axis",
                "heatmap requires y_axis",
            ));
        }
        if kind == ChartKind::Pie && p.y_axis.is_some() {
            return Err(ValidationError::new(
                ValidationCode::PieForbidsYAxis,
                "y_axis",
                "pie chart must not set y_axis",
            ));
        }
        if matches!(kind, ChartKind::Bar | ChartKind::Line) && p.y_axis.is_some() {
            return Err(ValidationError::new(
                ValidationCode::YAxisHeatmapOnly,
                "y_axis",
                format!("{} chart must not set y_axis", kind),
            ));
        }
        if p.y_axis == Some(p.x_axis) {
            return Err(ValidationError::new(
                ValidationCode::DuplicateAxis,
                "y_axis",
                "y_axis must differ from x_axis",
            ));
        }
        if kind != ChartKind::Heatmap && p.value2.is_some() {
            return Err(ValidationError::new(
                ValidationCode::SecondaryMetricNotAllowed,
                "value2",
                "value2 is only allowed for heatmap",
            ));
        }

        match kind {
            ChartKind::Bar | ChartKind::Line | ChartKind::Pie => {
                if p.value.is_none() {
                    return Err(ValidationError::new(
                        ValidationCode::MissingMetric,
                        "value",
                        format!("{} chart requires value", kind),
                    ));
                }
            }
            ChartKind::Heatmap => match (p.value, p.value2) {
                (None, _) => {
                    return Err(ValidationError::new(
                        ValidationCode::HeatmapMissingMetric,
                        "value",
                        "heatmap requires value",
                    ));
                }
                (Some(_), None) => {
                    return Err(ValidationError::new(
                        ValidationCode::HeatmapMissingMetric,
                        "value2",
                        "heatmap requires value2",
                    ));
                }
                (Some(a), Some(b)) if a == b => {
                    return Err(ValidationError::new(
                        ValidationCode::DuplicateMetric,
                        "value2",
                        "value2 must differ from value",
                    ));
                }
                _ => {}
            },
        }

        let (w, h) = self.params_figure.figsize;
        if !(w.is_finite() && h.is_finite() && w > 0.0 && h > 0.0) {
            return Err(ValidationError::new(
                ValidationCode::InvalidFigsize,
                "figsize",
                "figsize components must be positive",
            ));
        }

        if self.filters.topn == Some(0) {
            return Err(ValidationError::new(
                ValidationCode::InvalidTopn,
                "topn",
                "topn must be a positive integer",
            ));
        }

        let start = self.filters.start_month.as_deref();
        let end = self.filters.end_month.as_deref();
        if let Some(s) = start {
            check_month("start_month", s)?;
        }
        if let Some(e) = end {
            check_month("end_month", e)?;
        }
        if let (Some(s), Some(e)) = (start, end) {
            // Six-digit YYYYMM compares correctly as a string.
            if s > e {
                return Err(ValidationError::new(
                    ValidationCode::InvalidMonthRange,
                    "end_month",
                    "end_month must not precede start_month",
                ));
            }
        }

        Ok(())
    }

    /// Title to show on the rendered chart, defaulting from the axes.
    pub fn display_title(&self) -> String {
        if let Some(title) = &self.params_figure.set_title {
            return title.clone();
        }
        let p = &self.params_json;
        match (p.value, p.y_axis) {
            (Some(v), Some(y)) => format!("{} by {} and {}", v.label(), p.x_axis.label(), y.label()),
            (Some(v), None) => format!("{} by {}", v.label(), p.x_axis.label()),
            (None, _) => p.x_axis.label().to_string(),
        }
    }
}

fn check_month(field: &'static str, raw: &str) -> Result<(), ValidationError> {
    let bytes = raw.as_bytes();
    let well_formed = bytes.len() == 6 && bytes.iter().all(u8::is_ascii_digit);
    let month_ok = well_formed && matches!(raw[4..].parse::<u8>(), Ok(1..=12));
    if month_ok {
        Ok(())
    } else {
        Err(ValidationError::new(
            ValidationCode::InvalidMonth,
            field,
            format!("{} must be YYYYMM, got {:?}", field, raw),
        ))
    }
}
