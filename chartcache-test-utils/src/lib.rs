//! Chartcache Test Utilities
//!
//! Shared test infrastructure for the Chartcache workspace:
//! - Mock renderers that count, fail, or stall
//! - Proptest generators for chart requests
//! - Fixtures for the common request shapes

pub use chartcache_storage::InMemoryStore;

pub use chartcache_core::{
    ChartError, ChartKind, ChartPoint, ChartRenderer, ChartRequestSpec, ChartResult, Dimension,
    Filters, Fingerprint, LedgerOutcome, Metric, ParamsFigure, ParamsJson, PointValue,
    RenderError, RenderRequest, RenderedChart, ResultStatus,
};

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// MOCK RENDERERS
// ============================================================================

/// Renderer that counts invocations and returns a deterministic chart.
///
/// An optional delay keeps the claim open long enough for concurrent callers
/// to pile up behind it.
#[derive(Debug, Clone, Default)]
pub struct CountingRenderer {
    calls: Arc<AtomicUsize>,
    delay: Duration,
}

impl CountingRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            calls: Arc::default(),
            delay,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

/// Artifact reference a mock renderer produces for a request.
pub fn mock_artifact_ref(request: &RenderRequest) -> String {
    format!(
        "/chart_storage/{}/{}.json",
        request.kind,
        request.fingerprint.short()
    )
}

/// Points a mock renderer produces for a request.
pub fn mock_points(request: &RenderRequest) -> Vec<ChartPoint> {
    vec![ChartPoint {
        x: request.x_axis.column().to_string(),
        y: Some(PointValue::Number(1.0)),
        amount: Some(1.0),
        share: Some(1.0),
        growth: None,
    }]
}

#[async_trait]
impl ChartRenderer for CountingRenderer {
    async fn render(&self, request: &RenderRequest) -> Result<RenderedChart, RenderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(RenderedChart {
            artifact_ref: mock_artifact_ref(request),
            points: mock_points(request),
        })
    }
}

/// Renderer that fails its first `failures` calls, then succeeds.
#[derive(Debug, Clone)]
pub struct FlakyRenderer {
    calls: Arc<AtomicUsize>,
    failures: usize,
    error: RenderError,
}

impl FlakyRenderer {
    pub fn new(failures: usize, error: RenderError) -> Self {
        Self {
            calls: Arc::default(),
            failures,
            error,
        }
    }

    /// Renderer that never succeeds.
    pub fn always(error: RenderError) -> Self {
        Self::new(usize::MAX, error)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChartRenderer for FlakyRenderer {
    async fn render(&self, request: &RenderRequest) -> Result<RenderedChart, RenderError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.failures {
            return Err(self.error.clone());
        }
        Ok(RenderedChart {
            artifact_ref: mock_artifact_ref(request),
            points: mock_points(request),
        })
    }
}

/// Renderer that never finishes. Used to abandon a claim mid-render.
#[derive(Debug, Clone, Default)]
pub struct StallingRenderer {
    started: Arc<tokio::sync::Notify>,
}

impl StallingRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves once a render has started.
    pub async fn started(&self) {
        self.started.notified().await
    }
}

#[async_trait]
impl ChartRenderer for StallingRenderer {
    async fn render(&self, _request: &RenderRequest) -> Result<RenderedChart, RenderError> {
        self.started.notify_one();
        std::future::pending::<()>().await;
        Err(RenderError::NoData)
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for chart requests.

    use super::*;
    use proptest::prelude::*;

    pub fn arb_chart_kind() -> impl Strategy<Value = ChartKind> {
        prop::sample::select(ChartKind::ALL.to_vec())
    }

    pub fn arb_dimension() -> impl Strategy<Value = Dimension> {
        prop::sample::select(Dimension::ALL.to_vec())
    }

    pub fn arb_metric() -> impl Strategy<Value = Metric> {
        prop::sample::select(Metric::ALL.to_vec())
    }

    /// A `YYYYMM` month between 2015 and 2030.
    pub fn arb_month() -> impl Strategy<Value = String> {
        (2015u32..=2030, 1u32..=12).prop_map(|(y, m)| format!("{:04}{:02}", y, m))
    }

    pub fn arb_filters() -> impl Strategy<Value = Filters> {
        (
            prop::option::of(arb_month()),
            prop::option::of(arb_month()),
            prop::option::of(1u32..=200),
            prop::option::of(prop::sample::select(vec!["餐饮", "零售", "交通"])),
            prop::option::of(prop::sample::select(vec!["18-25", "26-35", "36-45"])),
        )
            .prop_map(|(a, b, topn, industry, age)| {
                // Order the range so the filters always validate.
                let (start_month, end_month) = match (a, b) {
                    (Some(a), Some(b)) if a > b => (Some(b), Some(a)),
                    other => other,
                };
                Filters {
                    start_month,
                    end_month,
                    topn,
                    industry: industry.map(str::to_string),
                    age_level: age.map(str::to_string),
                }
            })
    }

    pub fn arb_figure() -> impl Strategy<Value = ParamsFigure> {
        (
            0.5f64..40.0,
            0.5f64..40.0,
            prop::option::of("[A-Za-z ]{0,16}"),
            prop::option::of("[A-Za-z ]{0,8}"),
        )
            .prop_map(|(w, h, title, xlabel)| ParamsFigure {
                figsize: (w, h),
                set_title: title,
                set_xlabel: xlabel,
                set_ylabel: None,
            })
    }

    /// A request that passes `ChartRequestSpec::validate`.
    pub fn arb_valid_spec() -> impl Strategy<Value = ChartRequestSpec> {
        (
            arb_chart_kind(),
            prop::sample::subsequence(Dimension::ALL.to_vec(), 2),
            arb_metric(),
            arb_filters(),
            arb_figure(),
            any::<i64>(),
        )
            .prop_map(|(kind, dims, value, filters, figure, by)| {
                let (x, y) = (dims[0], dims[1]);
                let other_metric = if value == Metric::TransCount {
                    Metric::TransTotal
                } else {
                    Metric::TransCount
                };
                let params_json = match kind {
                    ChartKind::Heatmap => ParamsJson {
                        x_axis: x,
                        y_axis: Some(y),
                        value: Some(value),
                        value2: Some(other_metric),
                    },
                    ChartKind::Pie | ChartKind::Bar | ChartKind::Line => ParamsJson {
                        x_axis: x,
                        y_axis: None,
                        value: Some(value),
                        value2: None,
                    },
                };
                ChartRequestSpec {
                    chart_type: kind,
                    params_json,
                    params_figure: figure,
                    filters,
                    create_by: by,
                }
            })
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built requests for common scenarios.

    use super::*;

    /// Bar chart of transaction totals by industry, top 10.
    pub fn bar_spec() -> ChartRequestSpec {
        ChartRequestSpec {
            chart_type: ChartKind::Bar,
            params_json: ParamsJson {
                x_axis: Dimension::Industry,
                y_axis: None,
                value: Some(Metric::TransTotal),
                value2: None,
            },
            params_figure: ParamsFigure::default(),
            filters: Filters {
                topn: Some(10),
                ..Filters::default()
            },
            create_by: 1,
        }
    }

    /// Monthly line chart over 2024.
    pub fn line_spec() -> ChartRequestSpec {
        ChartRequestSpec {
            chart_type: ChartKind::Line,
            params_json: ParamsJson {
                x_axis: Dimension::YearMonth,
                y_axis: None,
                value: Some(Metric::TransCount),
                value2: None,
            },
            params_figure: ParamsFigure::default(),
            filters: Filters {
                start_month: Some("202401".to_string()),
                end_month: Some("202412".to_string()),
                ..Filters::default()
            },
            create_by: 1,
        }
    }

    /// Pie chart of age brackets.
    pub fn pie_spec() -> ChartRequestSpec {
        ChartRequestSpec {
            chart_type: ChartKind::Pie,
            params_json: ParamsJson {
                x_axis: Dimension::AgeLevel,
                y_axis: None,
                value: Some(Metric::TransCount),
                value2: None,
            },
            params_figure: ParamsFigure::default(),
            filters: Filters::default(),
            create_by: 1,
        }
    }

    /// Heatmap of average ticket size by month and industry.
    pub fn heatmap_spec() -> ChartRequestSpec {
        ChartRequestSpec {
            chart_type: ChartKind::Heatmap,
            params_json: ParamsJson {
                x_axis: Dimension::YearMonth,
                y_axis: Some(Dimension::Industry),
                value: Some(Metric::TransTotal),
                value2: Some(Metric::TransCount),
            },
            params_figure: ParamsFigure::default(),
            filters: Filters::default(),
            create_by: 1,
        }
    }

    /// `bar_spec` with different cosmetic fields only.
    pub fn bar_spec_restyled() -> ChartRequestSpec {
        let mut spec = bar_spec();
        spec.create_by = 99;
        spec.params_figure = ParamsFigure {
            figsize: (16.0, 9.0),
            set_title: Some("Spend by industry".to_string()),
            set_xlabel: Some("Industry".to_string()),
            set_ylabel: Some("Amount".to_string()),
        };
        spec
    }
}
