//! Fuzz target for chart request parsing, validation and fingerprinting.
//!
//! Run with: cargo +nightly fuzz run request_fuzz -- -max_total_time=60

#![no_main]

use chartcache_core::{canonical_fields, fingerprint, ChartRequestSpec, Fingerprint};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(spec) = serde_json::from_slice::<ChartRequestSpec>(data) else {
        return;
    };

    // Validation never panics, whatever the input.
    if spec.validate().is_err() {
        return;
    }

    let key = fingerprint(&spec);
    assert!(Fingerprint::parse(key.as_str()).is_some(), "fingerprint must be 64 lowercase hex");
    assert_eq!(key, fingerprint(&spec.clone()), "fingerprint must be deterministic");

    // Cosmetic fields never reach the canonical form.
    let fields = canonical_fields(&spec);
    assert!(!fields.contains_key("params_figure"));
    assert!(!fields.contains_key("create_by"));

    let mut restyled = spec.clone();
    restyled.create_by = restyled.create_by.wrapping_add(1);
    restyled.params_figure.set_title = Some("restyled".to_string());
    assert_eq!(fingerprint(&restyled), key);
});
