//! Service Layer
//!
//! Request deduplication: fingerprinting, claiming, rendering and the
//! provenance ledger, kept apart from the HTTP handlers.

mod dedup_service;

pub use dedup_service::*;
