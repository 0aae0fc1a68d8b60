//! # litreview
//!
//! Reconciliation and enrichment of literature-review bibliographies.
//!
//! Incoming bibliography entries and source search results are matched
//! against a persistent store of canonical records, then missing metadata
//! (DOIs, abstracts, PubMed and arXiv ids, PDF links) is filled in from
//! Crossref, Semantic Scholar, PubMed, arXiv, Unpaywall and Google Scholar.
//!
//! ## Architecture
//!
//! - [`models`]: canonical and candidate records, bibliography fields
//! - [`sources`]: metadata sources behind the [`Source`] trait
//! - [`store`]: SQLite-backed [`RecordStore`] with exact and fuzzy lookup
//! - [`engine`]: the [`ReconciliationEngine`] that imports and enriches records
//! - [`utils`]: record identity, similarity scoring, politeness and HTTP
//! - [`config`]: configuration management
//! - [`ui`]: terminal output

pub mod config;
pub mod engine;
pub mod models;
pub mod sources;
pub mod store;
pub mod ui;
pub mod utils;

// Re-export commonly used types
pub use engine::{EngineError, ReconciliationEngine};
pub use models::{Bibliographic, CandidateRecord, CanonicalRecord};
pub use sources::{Source, SourceRegistry};
pub use store::RecordStore;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
