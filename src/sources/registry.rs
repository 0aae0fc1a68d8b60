//! Registry for managing metadata source plugins.

use std::collections::HashMap;
use std::sync::Arc;

use super::{
    ArxivSource, CrossRefSource, GoogleScholarSource, PubMedSource, SemanticScholarSource, Source, SourceError,
    UnpaywallSource,
};
use crate::config::Config;
use crate::models::SourceType;
use crate::utils::HttpClient;

bitflags::bitflags! {
    /// Capabilities that a source can support
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SourceCapabilities: u32 {
        /// Title search
        const SEARCH = 1 << 0;
        /// Lookup by the source's own identifier
        const LOOKUP = 1 << 1;
        /// Lookup by DOI
        const DOI_LOOKUP = 1 << 2;
    }
}

/// Registry for all available metadata sources
#[derive(Debug, Clone, Default)]
pub struct SourceRegistry {
    sources: HashMap<String, Arc<dyn Source>>,
}

impl SourceRegistry {
    /// A registry with no sources
    pub fn empty() -> Self {
        Self::default()
    }

    /// Create a registry with all six metadata sources sharing one HTTP client
    pub fn new(client: Arc<HttpClient>, config: &Config) -> Self {
        let mut registry = Self::empty();
        let email = config.identity.email.clone();
        let base_url = |id: &str| config.sources.base_url(id).map(str::to_string);

        let mut crossref = CrossRefSource::new(client.clone()).with_mailto(email.clone());
        if let Some(url) = base_url("crossref") {
            crossref = crossref.with_base_url(url);
        }
        registry.register(Arc::new(crossref));

        let mut pubmed = PubMedSource::new(client.clone()).with_email(email.clone());
        if let Some(url) = base_url("pubmed") {
            pubmed = pubmed.with_base_url(url);
        }
        registry.register(Arc::new(pubmed));

        let mut arxiv = ArxivSource::new(client.clone());
        if let Some(url) = base_url("arxiv") {
            arxiv = arxiv.with_base_url(url);
        }
        registry.register(Arc::new(arxiv));

        let mut semantic =
            SemanticScholarSource::new(client.clone()).with_api_key(config.sources.semantic_scholar_api_key.clone());
        if let Some(url) = base_url("semantic") {
            semantic = semantic.with_base_url(url);
        }
        registry.register(Arc::new(semantic));

        let mut unpaywall = UnpaywallSource::new(client.clone()).with_email(email);
        if let Some(url) = base_url("unpaywall") {
            unpaywall = unpaywall.with_base_url(url);
        }
        registry.register(Arc::new(unpaywall));

        let mut scholar = GoogleScholarSource::new(client).enabled(config.sources.google_scholar_enabled);
        if let Some(url) = base_url("google_scholar") {
            scholar = scholar.with_base_url(url);
        }
        registry.register(Arc::new(scholar));

        registry
    }

    /// Register a new source, replacing any source with the same id
    pub fn register(&mut self, source: Arc<dyn Source>) {
        self.sources.insert(source.id().to_string(), source);
    }

    /// Get a source by ID
    pub fn get(&self, id: &str) -> Option<&Arc<dyn Source>> {
        self.sources.get(id)
    }

    pub fn get_by_type(&self, source_type: &SourceType) -> Option<&Arc<dyn Source>> {
        self.get(source_type.id())
    }

    /// Get a source by ID, returning an error if not found
    pub fn get_required(&self, id: &str) -> Result<&Arc<dyn Source>, SourceError> {
        self.get(id)
            .ok_or_else(|| SourceError::NotFound(format!("Source '{}' not found", id)))
    }

    /// Get all registered sources
    pub fn all(&self) -> impl Iterator<Item = &Arc<dyn Source>> {
        self.sources.values()
    }

    /// Get all source IDs
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.sources.keys().map(|s| s.as_str())
    }

    /// Get sources that support a specific capability
    pub fn with_capability(&self, capability: SourceCapabilities) -> Vec<&Arc<dyn Source>> {
        self.all()
            .filter(|s| s.capabilities().contains(capability))
            .collect()
    }

    /// Get sources that support search
    pub fn searchable(&self) -> Vec<&Arc<dyn Source>> {
        self.with_capability(SourceCapabilities::SEARCH)
    }

    /// Check if a source exists
    pub fn has(&self, id: &str) -> bool {
        self.sources.contains_key(id)
    }

    /// Get the number of registered sources
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::MockSource;
    use crate::utils::PolitenessGovernor;

    fn registry() -> SourceRegistry {
        let client = Arc::new(HttpClient::new(Arc::new(PolitenessGovernor::new())).unwrap());
        SourceRegistry::new(client, &Config::default())
    }

    #[test]
    fn test_registry_basic() {
        let registry = registry();
        assert_eq!(registry.len(), 6);
        assert!(!registry.is_empty());
    }

    #[test]
    fn test_get_source() {
        let registry = registry();
        for id in ["crossref", "pubmed", "arxiv", "semantic", "unpaywall", "google_scholar"] {
            assert!(registry.has(id), "missing {id}");
        }
        assert!(registry.get_by_type(&SourceType::SemanticScholar).is_some());
        assert!(registry.get_required("nonexistent").is_err());
    }

    #[test]
    fn test_google_scholar_disabled_by_default() {
        let registry = registry();
        let scholar = registry.get("google_scholar").unwrap();
        assert!(!scholar.supports_search());
        assert!(registry.searchable().iter().all(|s| s.id() != "google_scholar"));
    }

    #[test]
    fn test_register_replaces_same_id() {
        let mut registry = SourceRegistry::empty();
        registry.register(Arc::new(MockSource::for_source(SourceType::Crossref)));
        registry.register(Arc::new(MockSource::for_source(SourceType::Crossref)));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.ids().collect::<Vec<_>>(), vec!["crossref"]);
    }

    #[test]
    fn test_capabilities() {
        let registry = registry();
        let doi = registry.with_capability(SourceCapabilities::DOI_LOOKUP);
        let mut ids: Vec<&str> = doi.iter().map(|s| s.id()).collect();
        ids.sort();
        assert_eq!(ids, vec!["crossref", "semantic", "unpaywall"]);
    }
}
