//! Renderer seam.

use crate::entities::ChartPoint;
use crate::enums::{ChartKind, Dimension, Metric};
use crate::error::RenderError;
use crate::fingerprint::Fingerprint;
use crate::spec::{ChartRequestSpec, Filters};
use async_trait::async_trait;
use serde::Serialize;

/// Everything a renderer needs to produce one chart.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderRequest {
    pub fingerprint: Fingerprint,
    pub kind: ChartKind,
    pub x_axis: Dimension,
    pub y_axis: Option<Dimension>,
    pub value: Option<Metric>,
    pub value2: Option<Metric>,
    pub filters: Filters,
    pub title: String,
}

impl RenderRequest {
    pub fn from_spec(spec: &ChartRequestSpec, fingerprint: Fingerprint) -> Self {
        let p = &spec.params_json;
        Self {
            fingerprint,
            kind: spec.chart_type,
            x_axis: p.x_axis,
            y_axis: p.y_axis,
            value: p.value,
            value2: p.value2,
            filters: spec.filters.clone(),
            title: spec.display_title(),
        }
    }
}

/// Output of a successful render.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedChart {
    pub artifact_ref: String,
    pub points: Vec<ChartPoint>,
}

/// Computes chart data and persists the artifact.
#[async_trait]
pub trait ChartRenderer: Send + Sync {
    async fn render(&self, request: &RenderRequest) -> Result<RenderedChart, RenderError>;
}
