//! Metadata source plugins with a trait-based architecture.
//!
//! This module defines the [`Source`] trait that every metadata source
//! implements. A source answers two kinds of questions:
//!
//! - **search**: candidates whose title resembles a query title
//! - **fetch_by_id**: the single record behind a source-specific identifier
//!   (a DOI for Crossref, Semantic Scholar and Unpaywall, a PMID for PubMed,
//!   an arXiv id for arXiv, a BibTeX export URL for Google Scholar)
//!
//! Sources only translate between their wire formats and
//! [`CandidateRecord`]s. Deciding whether a candidate is the same work as a
//! stored record is the engine's job.
//!
//! All network calls go through the shared [`HttpClient`](crate::utils::HttpClient),
//! which paces them per source with the politeness governor.
//!
//! # Runtime Source Configuration
//!
//! - `sources.google_scholar_enabled` - Google Scholar scraping is disabled unless set
//! - `sources.semantic_scholar_api_key` - optional key for higher Semantic Scholar limits
//! - `sources.base_urls.<id>` - point a source at a mirror
//!
//! ```toml
//! [sources]
//! google_scholar_enabled = true
//!
//! [sources.base_urls]
//! crossref = "https://api.crossref.org"
//! ```

mod arxiv;
mod crossref;
mod google_scholar;
mod pubmed;
mod registry;
mod semantic;
mod unpaywall;

pub mod mock;

pub use arxiv::ArxivSource;
pub use crossref::CrossRefSource;
pub use google_scholar::{parse_bibtex_entry, GoogleScholarSource};
pub use mock::MockSource;
pub use pubmed::PubMedSource;
pub use registry::{SourceCapabilities, SourceRegistry};
pub use semantic::SemanticScholarSource;
pub use unpaywall::UnpaywallSource;

use crate::models::{CandidateRecord, SearchQuery, SourceType};
use async_trait::async_trait;

/// The Source trait defines the interface for all metadata source plugins.
///
/// # Implementing a New Source
///
/// 1. Create a struct that implements `Source`
/// 2. Implement `id`, `name`, `source_type` and at least one of `search` / `fetch_by_id`
/// 3. Advertise what it supports through `capabilities`
/// 4. Register it with a [`SourceRegistry`]
#[async_trait]
pub trait Source: Send + Sync + std::fmt::Debug {
    /// Unique identifier (e.g. "crossref", "pubmed"); also the pacing key
    fn id(&self) -> &str;

    /// Human-readable name of this source
    fn name(&self) -> &str;

    fn source_type(&self) -> SourceType;

    /// Describe the capabilities of this source
    fn capabilities(&self) -> SourceCapabilities {
        SourceCapabilities::SEARCH
    }

    fn supports_search(&self) -> bool {
        self.capabilities().contains(SourceCapabilities::SEARCH)
    }

    fn supports_lookup(&self) -> bool {
        self.capabilities().contains(SourceCapabilities::LOOKUP)
    }

    /// Candidates matching the query title, in the source's ranking order
    async fn search(&self, _query: &SearchQuery) -> Result<Vec<CandidateRecord>, SourceError> {
        Err(SourceError::NotImplemented)
    }

    /// The record behind a source-specific identifier; `Ok(None)` when the source has none
    async fn fetch_by_id(&self, _id: &str) -> Result<Option<CandidateRecord>, SourceError> {
        Err(SourceError::NotImplemented)
    }

    /// Validate that an identifier is usable with this source
    fn validate_id(&self, id: &str) -> Result<(), SourceError> {
        if id.trim().is_empty() {
            Err(SourceError::InvalidRequest(format!("{}: empty identifier", self.id())))
        } else {
            Ok(())
        }
    }
}

/// Errors that can occur when interacting with a source
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// The requested operation is not implemented for this source
    #[error("Operation not implemented for this source")]
    NotImplemented,

    /// The source is switched off by configuration
    #[error("Source disabled: {0}")]
    Disabled(String),

    /// Network or HTTP error
    #[error("Network error: {0}")]
    Network(String),

    /// Parsing error (XML, JSON, HTML, etc.)
    #[error("Parse error: {0}")]
    Parse(String),

    /// Invalid request parameters
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Rate limit exceeded
    #[error("Rate limit exceeded")]
    RateLimit,

    /// Record not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// API error from the source
    #[error("API error: {0}")]
    Api(String),
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        SourceError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for SourceError {
    fn from(err: serde_json::Error) -> Self {
        SourceError::Parse(format!("JSON: {}", err))
    }
}

impl From<quick_xml::DeError> for SourceError {
    fn from(err: quick_xml::DeError) -> Self {
        SourceError::Parse(format!("XML: {}", err))
    }
}

/// Map a not-found error to `Ok(None)` for identifier lookups
pub(crate) fn found<T>(result: Result<T, SourceError>) -> Result<Option<T>, SourceError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(SourceError::NotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_capabilities() {
        let caps = SourceCapabilities::SEARCH | SourceCapabilities::DOI_LOOKUP;

        assert!(caps.contains(SourceCapabilities::SEARCH));
        assert!(caps.contains(SourceCapabilities::DOI_LOOKUP));
        assert!(!caps.contains(SourceCapabilities::LOOKUP));
    }

    #[test]
    fn test_found_maps_not_found() {
        assert_eq!(found(Ok::<_, SourceError>(1)).unwrap(), Some(1));
        assert_eq!(found::<i32>(Err(SourceError::NotFound("x".into()))).unwrap(), None);
        assert!(found::<i32>(Err(SourceError::RateLimit)).is_err());
    }

    #[tokio::test]
    async fn test_validate_id_rejects_empty() {
        let source = MockSource::new();
        let query = SearchQuery::new("anything");
        assert!(source.search(&query).await.unwrap().is_empty());
        assert!(source.validate_id("").is_err());
    }
}
