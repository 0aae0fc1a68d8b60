//! Mock source for testing purposes.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::models::{BibFields, CandidateRecord, SearchQuery, SourceType};
use crate::sources::{Source, SourceCapabilities, SourceError};

/// A mock source for testing that returns predefined responses and counts calls.
#[derive(Debug)]
pub struct MockSource {
    source_type: SourceType,
    search_results: Mutex<Vec<CandidateRecord>>,
    records: Mutex<HashMap<String, CandidateRecord>>,
    failure: Mutex<Option<String>>,
    search_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
}

impl MockSource {
    /// Create a new mock source with id `mock`.
    pub fn new() -> Self {
        Self::for_source(SourceType::Other("mock".to_string()))
    }

    /// A mock standing in for a real source (same id, same pacing key).
    pub fn for_source(source_type: SourceType) -> Self {
        Self {
            source_type,
            search_results: Mutex::new(Vec::new()),
            records: Mutex::new(HashMap::new()),
            failure: Mutex::new(None),
            search_calls: AtomicUsize::new(0),
            fetch_calls: AtomicUsize::new(0),
        }
    }

    /// Set the candidates every search returns.
    pub fn set_search_results(&self, results: Vec<CandidateRecord>) {
        *self.search_results.lock().unwrap_or_else(PoisonError::into_inner) = results;
    }

    /// Make `fetch_by_id(id)` return `record`.
    pub fn add_record(&self, id: impl Into<String>, record: CandidateRecord) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.into(), record);
    }

    /// Make every call fail with a network error until cleared.
    pub fn fail_with(&self, message: impl Into<String>) {
        *self.failure.lock().unwrap_or_else(PoisonError::into_inner) = Some(message.into());
    }

    pub fn clear_failure(&self) {
        *self.failure.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn search_calls(&self) -> usize {
        self.search_calls.load(Ordering::SeqCst)
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    fn check_failure(&self) -> Result<(), SourceError> {
        match &*self.failure.lock().unwrap_or_else(PoisonError::into_inner) {
            Some(message) => Err(SourceError::Network(message.clone())),
            None => Ok(()),
        }
    }
}

impl Default for MockSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Source for MockSource {
    fn id(&self) -> &str {
        self.source_type.id()
    }

    fn name(&self) -> &str {
        "Mock Source"
    }

    fn source_type(&self) -> SourceType {
        self.source_type.clone()
    }

    fn capabilities(&self) -> SourceCapabilities {
        SourceCapabilities::SEARCH | SourceCapabilities::LOOKUP | SourceCapabilities::DOI_LOOKUP
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<CandidateRecord>, SourceError> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        self.check_failure()?;
        let results = self.search_results.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(results.iter().take(query.max_results).cloned().collect())
    }

    async fn fetch_by_id(&self, id: &str) -> Result<Option<CandidateRecord>, SourceError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.check_failure()?;
        self.validate_id(id)?;
        Ok(self
            .records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned())
    }
}

/// Helper function to create a candidate for testing.
pub fn make_candidate(index: usize, title: &str, authors: &str, source_type: SourceType) -> CandidateRecord {
    CandidateRecord::new(index, source_type).with_bib(
        BibFields::new()
            .with("ENTRYTYPE", "article")
            .with("title", title)
            .with("author", authors),
    )
}
