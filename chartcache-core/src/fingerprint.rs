//! Canonical request fingerprints.
//!
//! A fingerprint covers only the fields that change the computed data: chart
//! kind, axes, metrics and filters. Figure settings, titles and the requester
//! id never contribute. The canonical form is a key-sorted JSON object with
//! absent optionals omitted, hashed with SHA-256.

use crate::spec::ChartRequestSpec;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// 64-character lowercase hex SHA-256 of a request's canonical form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }

    /// Accept an externally supplied key (e.g. a URL path segment).
    /// Returns `None` unless it is 64 lowercase hex characters.
    pub fn parse(raw: &str) -> Option<Self> {
        let ok = raw.len() == 64
            && raw
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        ok.then(|| Fingerprint(raw.to_string()))
    }

    /// Short prefix for file names and log lines.
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }

    /// Wrap a value already known to be a fingerprint (e.g. read back from storage).
    pub fn from_stored(raw: String) -> Self {
        Fingerprint(raw)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Fingerprint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Canonical map of the fingerprint-relevant fields.
pub fn canonical_fields(spec: &ChartRequestSpec) -> BTreeMap<&'static str, Value> {
    let p = &spec.params_json;
    let f = &spec.filters;
    let mut map = BTreeMap::new();

    map.insert("chart_type", Value::from(spec.chart_type.as_str()));
    map.insert("x_axis", Value::from(p.x_axis.column()));
    if let Some(y) = p.y_axis {
        map.insert("y_axis", Value::from(y.column()));
    }
    if let Some(v) = p.value {
        map.insert("value", Value::from(v.column()));
    }
    if let Some(v) = p.value2 {
        map.insert("value2", Value::from(v.column()));
    }
    if let Some(m) = &f.start_month {
        map.insert("start_month", Value::from(m.as_str()));
    }
    if let Some(m) = &f.end_month {
        map.insert("end_month", Value::from(m.as_str()));
    }
    if let Some(n) = f.topn {
        map.insert("topn", Value::from(n));
    }
    if let Some(i) = &f.industry {
        map.insert("industry", Value::from(i.as_str()));
    }
    if let Some(a) = &f.age_level {
        map.insert("age_level", Value::from(a.as_str()));
    }
    map
}

/// Normalized fingerprint input, stored alongside the cache entry.
pub fn spec_snapshot(spec: &ChartRequestSpec) -> Value {
    Value::Object(
        canonical_fields(spec)
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect(),
    )
}

/// Compute the fingerprint of a validated request.
pub fn fingerprint(spec: &ChartRequestSpec) -> Fingerprint {
    // A string-keyed map of JSON values always serializes.
    let bytes = serde_json::to_vec(&canonical_fields(spec)).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Fingerprint(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enums::{ChartKind, Dimension, Metric};
    use crate::spec::{Filters, ParamsFigure, ParamsJson};

    fn bar() -> ChartRequestSpec {
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
            create_by: 7,
        }
    }

    #[test]
    fn test_fingerprint_is_hex_sha256() {
        let fp = fingerprint(&bar());
        assert_eq!(fp.as_str().len(), 64);
        assert!(Fingerprint::parse(fp.as_str()).is_some());
    }

    #[test]
    fn test_canonical_bytes_are_sorted_and_compact() -> Result<(), serde_json::Error> {
        let bytes = serde_json::to_string(&canonical_fields(&bar()))?;
        assert_eq!(
            bytes,
            r#"{"chart_type":"bar","topn":10,"value":"trans_total","x_axis":"industry"}"#
        );
        Ok(())
    }

    #[test]
    fn test_cosmetic_fields_ignored() {
        let a = bar();
        let mut b = bar();
        b.create_by = 99;
        b.params_figure.figsize = (4.0, 3.0);
        b.params_figure.set_title = Some("Quarterly".to_string());
        b.params_figure.set_xlabel = Some("x".to_string());
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn test_relevant_fields_change_fingerprint() {
        let base = fingerprint(&bar());

        let mut s = bar();
        s.filters.topn = Some(11);
        assert_ne!(fingerprint(&s), base);

        let mut s = bar();
        s.params_json.value = Some(Metric::TransCount);
        assert_ne!(fingerprint(&s), base);

        let mut s = bar();
        s.chart_type = ChartKind::Line;
        assert_ne!(fingerprint(&s), base);

        let mut s = bar();
        s.filters.industry = Some("餐饮".to_string());
        assert_ne!(fingerprint(&s), base);
    }

    #[test]
    fn test_absent_optional_differs_from_present() {
        let mut s = bar();
        s.filters.topn = None;
        assert_ne!(fingerprint(&s), fingerprint(&bar()));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(Fingerprint::parse("abc").is_none());
        assert!(Fingerprint::parse(&"G".repeat(64)).is_none());
        assert!(Fingerprint::parse(&"A".repeat(64)).is_none());
        assert!(Fingerprint::parse(&"a".repeat(64)).is_some());
    }

    #[test]
    fn test_snapshot_matches_canonical() {
        let snap = spec_snapshot(&bar());
        assert_eq!(snap["chart_type"], "bar");
        assert_eq!(snap["topn"], 10);
        assert!(snap.get("y_axis").is_none());
    }
}
