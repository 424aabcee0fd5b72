//! Enum types for chart requests and cache lifecycle

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Error when parsing an enum from its database or wire representation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumParseError {
    pub kind: &'static str,
    pub value: String,
}

impl fmt::Display for EnumParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid {}: {}", self.kind, self.value)
    }
}

impl std::error::Error for EnumParseError {}

// ============================================================================
// CHART KIND
// ============================================================================

/// Kind of chart being requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum ChartKind {
    Bar,
    Line,
    Pie,
    Heatmap,
}

impl ChartKind {
    pub const ALL: [ChartKind; 4] = [
        ChartKind::Bar,
        ChartKind::Line,
        ChartKind::Pie,
        ChartKind::Heatmap,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChartKind::Bar => "bar",
            ChartKind::Line => "line",
            ChartKind::Pie => "pie",
            ChartKind::Heatmap => "heatmap",
        }
    }
}

impl fmt::Display for ChartKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChartKind {
    type Err = EnumParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "bar" => Ok(ChartKind::Bar),
            "line" => Ok(ChartKind::Line),
            "pie" => Ok(ChartKind::Pie),
            "heatmap" => Ok(ChartKind::Heatmap),
            _ => Err(EnumParseError {
                kind: "chart kind",
                value: s.to_string(),
            }),
        }
    }
}

// ============================================================================
// AXIS DIMENSIONS AND METRICS
// ============================================================================

/// Grouping column of the transaction table usable as a chart axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub enum Dimension {
    #[serde(rename = "ym")]
    YearMonth,
    #[serde(rename = "industry")]
    Industry,
    #[serde(rename = "age_level")]
    AgeLevel,
}

impl Dimension {
    pub const ALL: [Dimension; 3] = [Dimension::YearMonth, Dimension::Industry, Dimension::AgeLevel];

    /// Column name in the `clean_data` table.
    pub fn column(&self) -> &'static str {
        match self {
            Dimension::YearMonth => "ym",
            Dimension::Industry => "industry",
            Dimension::AgeLevel => "age_level",
        }
    }

    /// Identifier used by option listings.
    pub fn key(&self) -> &'static str {
        match self {
            Dimension::YearMonth => "year_month",
            Dimension::Industry => "industry",
            Dimension::AgeLevel => "age_level",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Dimension::YearMonth => "Year-Month",
            Dimension::Industry => "Industry",
            Dimension::AgeLevel => "Age Bracket",
        }
    }

    pub fn is_time(&self) -> bool {
        matches!(self, Dimension::YearMonth)
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

impl FromStr for Dimension {
    type Err = EnumParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ym" | "year_month" => Ok(Dimension::YearMonth),
            "industry" => Ok(Dimension::Industry),
            "age_level" => Ok(Dimension::AgeLevel),
            _ => Err(EnumParseError {
                kind: "dimension",
                value: s.to_string(),
            }),
        }
    }
}

/// Aggregated value column of the transaction table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    TransCount,
    TransTotal,
}

impl Metric {
    pub const ALL: [Metric; 2] = [Metric::TransCount, Metric::TransTotal];

    pub fn column(&self) -> &'static str {
        match self {
            Metric::TransCount => "trans_count",
            Metric::TransTotal => "trans_total",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Metric::TransCount => "Transactions",
            Metric::TransTotal => "Transaction Amount",
        }
    }

    /// Divisor applied to raw sums and the unit label that goes with it.
    pub fn scale(&self) -> (f64, &'static str) {
        match self {
            Metric::TransCount => (10_000_000.0, "(unit: 10M transactions)"),
            Metric::TransTotal => (1_000_000_000.0, "(unit: 1B currency)"),
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

impl FromStr for Metric {
    type Err = EnumParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "trans_count" => Ok(Metric::TransCount),
            "trans_total" => Ok(Metric::TransTotal),
            _ => Err(EnumParseError {
                kind: "metric",
                value: s.to_string(),
            }),
        }
    }
}

// ============================================================================
// CACHE LIFECYCLE
// ============================================================================

/// Lifecycle state of a cache entry.
///
/// ```text
/// (absent) ── claim ──→ Pending ── finalize_ready ──→ Ready
///                          │
///                   finalize_failed
///                          ↓
///                       Failed ── reclaim ──→ Pending
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultStatus {
    Pending,
    Ready,
    Failed,
}

impl ResultStatus {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            ResultStatus::Pending => "PENDING",
            ResultStatus::Ready => "READY",
            ResultStatus::Failed => "FAILED",
        }
    }

    pub fn from_db_str(s: &str) -> Result<Self, EnumParseError> {
        match s.to_uppercase().as_str() {
            "PENDING" => Ok(ResultStatus::Pending),
            "READY" => Ok(ResultStatus::Ready),
            "FAILED" => Ok(ResultStatus::Failed),
            _ => Err(EnumParseError {
                kind: "result status",
                value: s.to_string(),
            }),
        }
    }

    /// Whether the lifecycle allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: ResultStatus) -> bool {
        matches!(
            (self, next),
            (ResultStatus::Pending, ResultStatus::Ready)
                | (ResultStatus::Pending, ResultStatus::Failed)
                | (ResultStatus::Failed, ResultStatus::Pending)
        )
    }
}

impl fmt::Display for ResultStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_db_str())
    }
}

impl FromStr for ResultStatus {
    type Err = EnumParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

/// How a single inbound request was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerOutcome {
    /// Served from an existing ready entry.
    Hit,
    /// This request claimed the slot and rendered the result.
    Miss,
    /// This request's render (or the render it waited on) failed.
    Failed,
    /// Another request was still computing when the wait expired.
    InProgress,
}

impl LedgerOutcome {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            LedgerOutcome::Hit => "HIT",
            LedgerOutcome::Miss => "MISS",
            LedgerOutcome::Failed => "FAILED",
            LedgerOutcome::InProgress => "IN_PROGRESS",
        }
    }

    pub fn from_db_str(s: &str) -> Result<Self, EnumParseError> {
        match s.to_uppercase().as_str() {
            "HIT" => Ok(LedgerOutcome::Hit),
            "MISS" => Ok(LedgerOutcome::Miss),
            "FAILED" => Ok(LedgerOutcome::Failed),
            "IN_PROGRESS" => Ok(LedgerOutcome::InProgress),
            _ => Err(EnumParseError {
                kind: "ledger outcome",
                value: s.to_string(),
            }),
        }
    }

    pub fn is_cache_hit(&self) -> bool {
        matches!(self, LedgerOutcome::Hit)
    }
}

impl fmt::Display for LedgerOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_db_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chart_kind_roundtrip_str() {
        for kind in ChartKind::ALL {
            assert_eq!(kind.as_str().parse::<ChartKind>(), Ok(kind));
        }
        assert!("scatter".parse::<ChartKind>().is_err());
    }

    #[test]
    fn test_dimension_serializes_as_column_name() -> Result<(), serde_json::Error> {
        assert_eq!(serde_json::to_string(&Dimension::YearMonth)?, "\"ym\"");
        assert_eq!(serde_json::to_string(&Dimension::AgeLevel)?, "\"age_level\"");
        let parsed: Dimension = serde_json::from_str("\"industry\"")?;
        assert_eq!(parsed, Dimension::Industry);
        Ok(())
    }

    #[test]
    fn test_metric_serializes_as_column_name() -> Result<(), serde_json::Error> {
        assert_eq!(serde_json::to_string(&Metric::TransTotal)?, "\"trans_total\"");
        assert_eq!("trans_count".parse::<Metric>(), Ok(Metric::TransCount));
        Ok(())
    }

    #[test]
    fn test_result_status_transitions() {
        assert!(ResultStatus::Pending.can_transition_to(ResultStatus::Ready));
        assert!(ResultStatus::Pending.can_transition_to(ResultStatus::Failed));
        assert!(ResultStatus::Failed.can_transition_to(ResultStatus::Pending));
        assert!(!ResultStatus::Ready.can_transition_to(ResultStatus::Pending));
        assert!(!ResultStatus::Ready.can_transition_to(ResultStatus::Failed));
        assert!(!ResultStatus::Failed.can_transition_to(ResultStatus::Ready));
    }

    #[test]
    fn test_result_status_db_str() {
        assert_eq!(ResultStatus::from_db_str("ready"), Ok(ResultStatus::Ready));
        assert_eq!(ResultStatus::Pending.as_db_str(), "PENDING");
        assert!(ResultStatus::from_db_str("DONE").is_err());
    }

    #[test]
    fn test_ledger_outcome_hit_flag() {
        assert!(LedgerOutcome::Hit.is_cache_hit());
        assert!(!LedgerOutcome::Miss.is_cache_hit());
        assert!(!LedgerOutcome::InProgress.is_cache_hit());
        assert_eq!(
            LedgerOutcome::from_db_str("IN_PROGRESS"),
            Ok(LedgerOutcome::InProgress)
        );
    }
}
