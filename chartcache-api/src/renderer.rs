//! Postgres-backed chart renderer.
//!
//! Runs the aggregation for a request against `clean_data`, turns the rows into
//! chart points and writes them to a JSON artifact under the chart directory.
//! Pixel rendering is left to the client.

use crate::db::DbClient;
use async_trait::async_trait;
use chartcache_core::{
    ChartKind, ChartPoint, ChartRenderer, Metric, PointValue, RenderError, RenderRequest,
    RenderedChart,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio_postgres::types::ToSql;

/// Rows returned when no `topn` filter is given.
pub const DEFAULT_TOPN: u32 = 20;
/// Upper bound on rows per chart.
pub const MAX_TOPN: u32 = 200;
/// Pie slices below this share are folded into one bucket.
pub const PIE_FOLD_THRESHOLD: f64 = 0.10;
/// Label of the folded pie bucket.
pub const PIE_OTHER_LABEL: &str = "其他";
/// Public prefix of artifact references.
pub const ARTIFACT_PREFIX: &str = "/chart_storage";

/// Longest title prefix, in chars, kept in an artifact file name.
pub const MAX_TITLE_CHARS: usize = 64;

// ============================================================================
// QUERY BUILDING
// ============================================================================

/// A bound query parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryParam {
    Text(String),
    Int(i64),
}

impl QueryParam {
    fn as_sql(&self) -> &(dyn ToSql + Sync) {
        match self {
            QueryParam::Text(s) => s,
            QueryParam::Int(n) => n,
        }
    }
}

/// SQL text plus its positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateQuery {
    pub sql: String,
    pub params: Vec<QueryParam>,
}

/// Effective row limit for a request.
pub fn effective_topn(topn: Option<u32>) -> u32 {
    topn.unwrap_or(DEFAULT_TOPN).clamp(1, MAX_TOPN)
}

fn where_clause(req: &RenderRequest, params: &mut Vec<QueryParam>) -> String {
    let f = &req.filters;
    let mut conds = Vec::new();
    let mut push = |cond: &str, value: &String| {
        params.push(QueryParam::Text(value.clone()));
        conds.push(format!("{} ${}", cond, params.len()));
    };
    if let Some(m) = &f.start_month {
        push("ym::TEXT >=", m);
    }
    if let Some(m) = &f.end_month {
        push("ym::TEXT <=", m);
    }
    if let Some(i) = &f.industry {
        push("industry::TEXT =", i);
    }
    if let Some(a) = &f.age_level {
        push("age_level::TEXT =", a);
    }
    if conds.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conds.join(" AND "))
    }
}

/// Build the aggregation for a request. Identifiers come from closed enums;
/// every user-supplied value is a bound parameter.
pub fn build_query(req: &RenderRequest) -> Result<AggregateQuery, RenderError> {
    let value = req.value.ok_or_else(|| RenderError::InvalidParams {
        reason: "value is required".to_string(),
    })?;
    let x = req.x_axis.column();
    let mut params = Vec::new();
    let where_sql = where_clause(req, &mut params);

    let sql = match req.kind {
        ChartKind::Bar | ChartKind::Line => {
            if req.x_axis.is_time() {
                format!(
                    "SELECT {x}::TEXT AS x, SUM({v})::DOUBLE PRECISION AS raw_amount \
                     FROM clean_data {w} GROUP BY {x} ORDER BY x ASC",
                    x = x,
                    v = value.column(),
                    w = where_sql
                )
            } else {
                params.push(QueryParam::Int(i64::from(effective_topn(req.filters.topn))));
                format!(
                    "SELECT {x}::TEXT AS x, SUM({v})::DOUBLE PRECISION AS raw_amount \
                     FROM clean_data {w} GROUP BY {x} ORDER BY raw_amount DESC LIMIT ${n}",
                    x = x,
                    v = value.column(),
                    w = where_sql,
                    n = params.len()
                )
            }
        }
        // Every group is needed for the total; topn is applied after folding.
        ChartKind::Pie => format!(
            "SELECT {x}::TEXT AS x, SUM({v})::DOUBLE PRECISION AS raw_amount \
             FROM clean_data {w} GROUP BY {x} ORDER BY x ASC",
            x = x,
            v = value.column(),
            w = where_sql
        ),
        ChartKind::Heatmap => {
            let y = req.y_axis.ok_or_else(|| RenderError::InvalidParams {
                reason: "heatmap requires y_axis".to_string(),
            })?;
            // The only meaningful ratio is average ticket size.
            if req.value != Some(Metric::TransTotal) || req.value2 != Some(Metric::TransCount) {
                return Err(RenderError::InvalidParams {
                    reason: "heatmap supports value=trans_total, value2=trans_count only"
                        .to_string(),
                });
            }
            format!(
                "SELECT {x}::TEXT AS x, {y}::TEXT AS y, \
                 (SUM(trans_total) / NULLIF(SUM(trans_count), 0))::DOUBLE PRECISION AS ratio \
                 FROM clean_data {w} GROUP BY {x}, {y} ORDER BY {y} ASC, {x} ASC",
                x = x,
                y = y.column(),
                w = where_sql
            )
        }
    };

    Ok(AggregateQuery { sql, params })
}

// ============================================================================
// POINT COMPUTATION
// ============================================================================

fn round_to(v: f64, places: i32) -> f64 {
    let f = 10f64.powi(places);
    (v * f).round() / f
}

/// Bar and line points: scaled amount, share of the total and, on a time
/// axis, period-over-period growth.
pub fn series_points(rows: &[(String, f64)], metric: Metric, time_axis: bool) -> Vec<ChartPoint> {
    let (divisor, _) = metric.scale();
    let amounts: Vec<f64> = rows.iter().map(|(_, raw)| round_to(raw / divisor, 2)).collect();
    let total: f64 = amounts.iter().sum();

    rows.iter()
        .zip(&amounts)
        .enumerate()
        .map(|(i, ((x, _), &amount))| {
            let growth = match (time_axis, i.checked_sub(1).map(|p| amounts[p])) {
                (true, Some(prev)) if prev != 0.0 => Some(round_to((amount - prev) / prev, 4)),
                _ => None,
            };
            ChartPoint {
                x: x.clone(),
                y: Some(PointValue::Number(amount)),
                amount: Some(amount),
                share: (total != 0.0).then(|| round_to(amount / total, 2)),
                growth,
            }
        })
        .collect()
}

/// Pie slices as percentages. Slices under the fold threshold merge into one
/// bucket; the largest `topn` slices are kept.
pub fn pie_points(rows: &[(String, f64)], topn: u32) -> Vec<ChartPoint> {
    let total: f64 = rows.iter().map(|(_, raw)| raw).sum();
    if total == 0.0 {
        return Vec::new();
    }

    let mut slices: Vec<(String, f64)> = Vec::new();
    let mut other = 0.0;
    for (x, raw) in rows {
        let share = raw / total;
        if share < PIE_FOLD_THRESHOLD {
            other += share;
        } else {
            slices.push((x.clone(), share));
        }
    }
    if other > 0.0 {
        slices.push((PIE_OTHER_LABEL.to_string(), other));
    }
    slices.sort_by(|a, b| b.1.total_cmp(&a.1));
    slices.truncate(topn as usize);

    slices
        .into_iter()
        .map(|(x, share)| ChartPoint {
            x,
            y: None,
            amount: Some(round_to(share * 100.0, 2)),
            share: Some(round_to(share, 2)),
            growth: None,
        })
        .collect()
}

/// Heatmap cells: x category, y category and the ratio. Cells whose ratio is
/// undefined (zero denominator) are dropped.
pub fn heatmap_points(rows: &[(String, String, Option<f64>)]) -> Vec<ChartPoint> {
    rows.iter()
        .filter_map(|(x, y, ratio)| {
            ratio.map(|r| ChartPoint {
                x: x.clone(),
                y: Some(PointValue::Label(y.clone())),
                amount: Some(round_to(r, 2)),
                share: None,
                growth: None,
            })
        })
        .collect()
}

// ============================================================================
// ARTIFACTS
// ============================================================================

/// File-system friendly name derived from the title and fingerprint.
pub fn safe_file_name(req: &RenderRequest) -> String {
    // Letters (CJK included), digits, '-' and '_' survive.
    // 64 chars of at most 4 bytes each keeps the name under NAME_MAX.
    let title: String = req
        .title
        .chars()
        .take(MAX_TITLE_CHARS)
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
        .collect();
    let title = title.trim_matches(|c| c == '-' || c == '_');
    if title.is_empty() {
        format!("{}.json", req.fingerprint.short())
    } else {
        format!("{}_{}.json", title, req.fingerprint.short())
    }
}

#[derive(Serialize)]
struct ArtifactBody<'a> {
    key: &'a str,
    chart_type: ChartKind,
    title: &'a str,
    unit: Option<&'static str>,
    points: &'a [ChartPoint],
}

/// Write the points to `<chart_dir>/<kind>/<name>.json` and return the public reference.
pub async fn write_artifact(
    chart_dir: &Path,
    req: &RenderRequest,
    points: &[ChartPoint],
) -> Result<String, RenderError> {
    let kind_dir = chart_dir.join(req.kind.as_str());
    tokio::fs::create_dir_all(&kind_dir).await?;

    let file_name = safe_file_name(req);
    let body = ArtifactBody {
        key: req.fingerprint.as_str(),
        chart_type: req.kind,
        title: &req.title,
        unit: match req.kind {
            ChartKind::Bar | ChartKind::Line => req.value.map(|m| m.scale().1),
            ChartKind::Pie => Some("%"),
            ChartKind::Heatmap => None,
        },
        points,
    };
    let bytes = serde_json::to_vec_pretty(&body).map_err(|e| RenderError::Io {
        reason: e.to_string(),
    })?;
    tokio::fs::write(kind_dir.join(&file_name), bytes).await?;

    Ok(format!("{}/{}/{}", ARTIFACT_PREFIX, req.kind, file_name))
}

// ============================================================================
// RENDERER
// ============================================================================

/// Renderer that aggregates in Postgres and writes JSON artifacts.
#[derive(Clone)]
pub struct PgChartRenderer {
    db: DbClient,
    chart_dir: PathBuf,
}

impl PgChartRenderer {
    pub fn new(db: DbClient, chart_dir: impl Into<PathBuf>) -> Self {
        Self {
            db,
            chart_dir: chart_dir.into(),
        }
    }

    async fn compute_points(&self, req: &RenderRequest) -> Result<Vec<ChartPoint>, RenderError> {
        let query = build_query(req)?;
        let params: Vec<&(dyn ToSql + Sync)> = query.params.iter().map(QueryParam::as_sql).collect();
        let rows = self.db.aggregate(&query.sql, &params).await?;

        let decode = |e: tokio_postgres::Error| RenderError::Query {
            reason: e.to_string(),
        };

        match req.kind {
            ChartKind::Heatmap => {
                let cells = rows
                    .iter()
                    .map(|r| Ok((r.try_get("x")?, r.try_get("y")?, r.try_get("ratio")?)))
                    .collect::<Result<Vec<(String, String, Option<f64>)>, tokio_postgres::Error>>()
                    .map_err(decode)?;
                Ok(heatmap_points(&cells))
            }
            kind => {
                let series = rows
                    .iter()
                    .map(|r| {
                        let x: String = r.try_get("x")?;
                        let raw: Option<f64> = r.try_get("raw_amount")?;
                        Ok((x, raw.unwrap_or(0.0)))
                    })
                    .collect::<Result<Vec<(String, f64)>, tokio_postgres::Error>>()
                    .map_err(decode)?;
                let metric = req.value.ok_or_else(|| RenderError::InvalidParams {
                    reason: "value is required".to_string(),
                })?;
                Ok(if kind == ChartKind::Pie {
                    pie_points(&series, effective_topn(req.filters.topn))
                } else {
                    series_points(&series, metric, req.x_axis.is_time())
                })
            }
        }
    }
}

#[async_trait]
impl ChartRenderer for PgChartRenderer {
    async fn render(&self, req: &RenderRequest) -> Result<RenderedChart, RenderError> {
        let points = self.compute_points(req).await?;
        if points.is_empty() {
            return Err(RenderError::NoData);
        }
        let artifact_ref = write_artifact(&self.chart_dir, req, &points).await?;
        tracing::info!(
            key = %req.fingerprint.short(),
            kind = %req.kind,
            points = points.len(),
            artifact = %artifact_ref,
            "Chart rendered"
        );
        Ok(RenderedChart {
            artifact_ref,
            points,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chartcache_core::{fingerprint, Dimension};
    use chartcache_test_utils::fixtures;

    fn request(spec: &chartcache_core::ChartRequestSpec) -> RenderRequest {
        RenderRequest::from_spec(spec, fingerprint(spec))
    }

    #[test]
    fn test_effective_topn_clamps() {
        assert_eq!(effective_topn(None), 20);
        assert_eq!(effective_topn(Some(0)), 1);
        assert_eq!(effective_topn(Some(500)), 200);
        assert_eq!(effective_topn(Some(7)), 7);
    }

    #[test]
    fn test_bar_query_limits_and_binds() -> Result<(), RenderError> {
        let mut spec = fixtures::bar_spec();
        spec.filters.start_month = Some("202401".to_string());
        spec.filters.age_level = Some("26-35".to_string());
        let q = build_query(&request(&spec))?;

        assert!(q.sql.contains("GROUP BY industry"));
        assert!(q.sql.contains("ORDER BY raw_amount DESC LIMIT $3"));
        assert!(q.sql.contains("ym::TEXT >= $1"));
        assert!(q.sql.contains("age_level::TEXT = $2"));
        assert_eq!(
            q.params,
            vec![
                QueryParam::Text("202401".to_string()),
                QueryParam::Text("26-35".to_string()),
                QueryParam::Int(10),
            ]
        );
        Ok(())
    }

    #[test]
    fn test_time_axis_query_has_no_limit() -> Result<(), RenderError> {
        let q = build_query(&request(&fixtures::line_spec()))?;
        assert!(q.sql.contains("ORDER BY x ASC"));
        assert!(!q.sql.contains("LIMIT"));
        assert_eq!(q.params.len(), 2);
        Ok(())
    }

    #[test]
    fn test_heatmap_query_requires_ticket_size_metrics() -> Result<(), RenderError> {
        let q = build_query(&request(&fixtures::heatmap_spec()))?;
        assert!(q.sql.contains("NULLIF(SUM(trans_count), 0)"));
        assert!(q.sql.contains("GROUP BY ym, industry"));

        let mut spec = fixtures::heatmap_spec();
        spec.params_json.value = Some(Metric::TransCount);
        spec.params_json.value2 = Some(Metric::TransTotal);
        assert!(matches!(
            build_query(&request(&spec)),
            Err(RenderError::InvalidParams { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_series_points_scale_share_growth() {
        let rows = vec![
            ("202401".to_string(), 2_000_000_000.0),
            ("202402".to_string(), 3_000_000_000.0),
        ];
        let points = series_points(&rows, Metric::TransTotal, true);
        assert_eq!(points[0].amount, Some(2.0));
        assert_eq!(points[1].amount, Some(3.0));
        assert_eq!(points[0].share, Some(0.4));
        assert_eq!(points[1].share, Some(0.6));
        assert_eq!(points[0].growth, None);
        assert_eq!(points[1].growth, Some(0.5));

        let flat = series_points(&rows, Metric::TransTotal, false);
        assert!(flat.iter().all(|p| p.growth.is_none()));
    }

    #[test]
    fn test_pie_folds_small_slices() {
        let rows = vec![
            ("A".to_string(), 50.0),
            ("B".to_string(), 40.0),
            ("C".to_string(), 6.0),
            ("D".to_string(), 4.0),
        ];
        let points = pie_points(&rows, 20);
        let labels: Vec<&str> = points.iter().map(|p| p.x.as_str()).collect();
        assert_eq!(labels, vec!["A", "B", PIE_OTHER_LABEL]);
        assert_eq!(points[2].amount, Some(10.0));

        assert_eq!(pie_points(&rows, 1).len(), 1);
        assert!(pie_points(&[], 5).is_empty());
    }

    #[test]
    fn test_heatmap_points_skip_undefined_ratio() {
        let rows = vec![
            ("202401".to_string(), "餐饮".to_string(), Some(123.456)),
            ("202401".to_string(), "零售".to_string(), None),
        ];
        let points = heatmap_points(&rows);
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].y, Some(PointValue::Label("餐饮".to_string())));
        assert_eq!(points[0].amount, Some(123.46));
    }

    #[test]
    fn test_safe_file_name() {
        let mut spec = fixtures::bar_spec();
        spec.params_figure.set_title = Some("消费 / 2024: top?".to_string());
        let req = request(&spec);
        let name = safe_file_name(&req);
        assert!(name.starts_with("消费---2024--top"));
        assert!(name.ends_with(&format!("_{}.json", req.fingerprint.short())));
        assert!(!name.contains('/'));
    }

    #[tokio::test]
    async fn test_long_title_still_writes_artifact() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let mut spec = fixtures::bar_spec();
        spec.params_figure.set_title = Some("信用卡消费分析".repeat(15));
        assert!(spec.validate().is_ok());
        let req = request(&spec);

        let name = safe_file_name(&req);
        assert!(name.len() < 255);
        assert!(name.starts_with(&"信用卡消费分析".repeat(9)));

        let reference = write_artifact(dir.path(), &req, &[ChartPoint::new("餐饮")]).await?;
        assert!(reference.ends_with(&format!("_{}.json", req.fingerprint.short())));
        Ok(())
    }

    #[tokio::test]
    async fn test_write_artifact() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let mut spec = fixtures::pie_spec();
        spec.params_json.x_axis = Dimension::AgeLevel;
        let req = request(&spec);
        let points = vec![ChartPoint::new("26-35")];

        let reference = write_artifact(dir.path(), &req, &points).await?;
        assert!(reference.starts_with("/chart_storage/pie/"));

        let file = reference.rsplit('/').next().unwrap_or_default();
        let body: serde_json::Value =
            serde_json::from_slice(&std::fs::read(dir.path().join("pie").join(file))?)?;
        assert_eq!(body["chart_type"], "pie");
        assert_eq!(body["points"][0]["x"], "26-35");
        Ok(())
    }
}
