//! Chartcache Core - Request and Cache Types
//!
//! Chart request shapes, validation, fingerprinting, persisted record types,
//! the renderer seam and the error taxonomy. No I/O lives here.

pub mod entities;
pub mod enums;
pub mod error;
pub mod fingerprint;
pub mod render;
pub mod spec;

pub use entities::*;
pub use enums::*;
pub use error::*;
pub use fingerprint::{canonical_fields, fingerprint, spec_snapshot, Fingerprint};
pub use render::{ChartRenderer, RenderRequest, RenderedChart};
pub use spec::{ChartRequestSpec, Filters, ParamsFigure, ParamsJson};
