//! Municipal health importer.
//!
//! Reads the facility registry, the professional-to-facility assignments
//! and the census aggregates, reconciles their identifiers, counts distinct
//! professionals per municipality and fully refreshes three tables:
//! `health_facilities`, `municipal_health_totals` and `municipal_demographics`.
//!
//! CRITICAL: a run is deterministic and idempotent.
//! Same extracts = same tables, however many times it runs.

pub mod aggregate;
pub mod config;
pub mod demographics;
pub mod error;
pub mod facilities;
pub mod model;
pub mod normalize;
pub mod pipeline;
pub mod professionals;
pub mod reader;
pub mod report;
pub mod schema;
pub mod store;
pub mod upsert;

pub use config::ImportConfig;
pub use error::{EtlError, PipelineError, Stage};
pub use pipeline::{Pipeline, PipelineState, RunSummary, Sources};
pub use store::Store;
