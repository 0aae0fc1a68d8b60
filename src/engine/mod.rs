//! Reconciliation and enrichment of canonical records.
//!
//! The [`ReconciliationEngine`] decides whether incoming candidates are new
//! works or copies of stored ones ([`ReconciliationEngine::import`]), and fills
//! in missing metadata by walking the sources in a fixed order
//! ([`ReconciliationEngine::enrich_record`]):
//!
//! 1. Crossref title search when the record has no DOI
//! 2. Semantic Scholar lookup by DOI
//! 3. PubMed title search when the record has no PMID
//! 4. arXiv title search when the abstract is missing or truncated
//! 5. Unpaywall lookup by DOI when no PDF link is known
//! 6. Google Scholar BibTeX export when the year is still missing
//!
//! Every step is guarded by the record's per-source [`EnrichmentState`], so a
//! second pass over the same record issues no repeated calls. A source failure
//! only affects its own step; store failures abort.

mod matcher;
mod merge;

pub use matcher::{find_best_match, MatchOutcome};
pub use merge::{fold_record, merge_candidate, MergeSummary, TRANSFERABLE_FIELDS};

use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::config::MatchingConfig;
use crate::models::{
    Bibliographic, CandidateRecord, CanonicalRecord, EnrichmentState, IdType, SearchQuery, SourceType,
};
use crate::sources::{Source, SourceError, SourceRegistry};
use crate::store::{RecordStore, StoreError};
use crate::ui::Progress;
use crate::utils::Tolerance;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Record store failure: {0}")]
    Store(#[from] StoreError),
}

/// Result of one enrichment step
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// A candidate was merged into the record
    Merged(MergeSummary),
    /// Results came back but none was close enough
    Rejected {
        best_title: String,
        title_distance: f64,
        author_distance: f64,
    },
    /// The source had nothing for this record
    NoResults,
    /// The call failed; the step stays pending for a later run
    Failed(String),
    /// Preconditions not met, already attempted, or the source is unavailable
    NotApplicable,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepReport {
    pub source: SourceType,
    pub outcome: StepOutcome,
}

/// What [`ReconciliationEngine::enrich_record`] did to one record
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnrichmentReport {
    pub record_id: String,
    pub steps: Vec<StepReport>,
    /// Set when an identifier found during enrichment showed the record to be
    /// a copy of this stored record, which it was folded into
    pub folded_into: Option<String>,
}

impl EnrichmentReport {
    pub fn merged(&self) -> usize {
        self.count(|o| matches!(o, StepOutcome::Merged(_)))
    }

    pub fn rejected(&self) -> usize {
        self.count(|o| matches!(o, StepOutcome::Rejected { .. } | StepOutcome::NoResults))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, StepOutcome::Failed(_)))
    }

    pub fn outcome(&self, source: &SourceType) -> Option<&StepOutcome> {
        self.steps.iter().find(|s| &s.source == source).map(|s| &s.outcome)
    }

    fn count(&self, predicate: impl Fn(&StepOutcome) -> bool) -> usize {
        self.steps.iter().filter(|s| predicate(&s.outcome)).count()
    }
}

/// Totals for [`ReconciliationEngine::enrich_batch`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub records: usize,
    pub merged: usize,
    pub rejected: usize,
    pub failed: usize,
    /// Records folded into a stored copy of the same work
    pub folded: usize,
    /// Records left unsaved because an enriched identifier already belongs to another record
    pub conflicts: usize,
}

/// Totals for [`ReconciliationEngine::import`]
#[derive(Debug, Clone, Default)]
pub struct ImportReport {
    pub added: usize,
    pub updated: usize,
    /// Candidates folded into another candidate of the same batch
    pub folded: usize,
    /// Candidates carrying an identifier of a different stored record; that identifier was left out
    pub conflicts: usize,
    /// The canonical records touched by the import
    pub records: Vec<CanonicalRecord>,
}

/// Matches candidates against the store and enriches records from sources
#[derive(Debug, Clone)]
pub struct ReconciliationEngine {
    registry: Arc<SourceRegistry>,
    store: Option<Arc<RecordStore>>,
    matching: MatchingConfig,
    identity: Option<String>,
    retry_skipped: bool,
    show_progress: bool,
}

impl ReconciliationEngine {
    /// Without a store the engine runs cache-free: every candidate is new and nothing is persisted.
    pub fn new(registry: Arc<SourceRegistry>, store: Option<Arc<RecordStore>>, matching: MatchingConfig) -> Self {
        Self {
            registry,
            store,
            matching,
            identity: None,
            retry_skipped: false,
            show_progress: false,
        }
    }

    /// Contact email passed along with search queries
    pub fn with_identity(mut self, email: Option<String>) -> Self {
        self.identity = email;
        self
    }

    /// Retry sources that previously found no confident match
    pub fn retry_skipped(mut self, retry: bool) -> Self {
        self.retry_skipped = retry;
        self
    }

    pub fn show_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn store(&self) -> Option<&Arc<RecordStore>> {
        self.store.as_ref()
    }

    fn store_tolerance(&self) -> Tolerance {
        Tolerance::from(&self.matching)
    }

    /// Bring candidates into the store.
    ///
    /// Candidates matching a stored record are merged into it; the rest are
    /// promoted to new records. Unmatched candidates that turn out to be the
    /// same work as one promoted earlier in the batch are folded into it.
    pub fn import(&self, candidates: Vec<CandidateRecord>) -> Result<ImportReport, EngineError> {
        let Some(store) = &self.store else {
            return Ok(Self::import_cache_free(candidates));
        };

        let mut report = ImportReport::default();
        let reconciliation = store.reconcile(candidates, self.store_tolerance())?;

        for found in reconciliation.matched {
            // Merge into the copy an earlier candidate of this batch already updated
            let mut record = report
                .records
                .iter()
                .find(|r| r.stored_key() == found.record.stored_key())
                .cloned()
                .unwrap_or(found.record);
            merge_candidate(&mut record, &found.candidate);
            report.conflicts += self.upsert_without_clashes(store, &mut record)?;
            report.updated += 1;
            replace_or_push(&mut report.records, record);
        }

        for candidate in reconciliation.unmatched {
            // An earlier candidate of this batch may already have been promoted
            if let Some((mut record, route)) = store.lookup(&candidate, self.store_tolerance())? {
                tracing::debug!("Folding '{}' into {} by {}", candidate.title(), record.id(), route);
                merge_candidate(&mut record, &candidate);
                report.conflicts += self.upsert_without_clashes(store, &mut record)?;
                report.folded += 1;
                replace_or_push(&mut report.records, record);
                continue;
            }

            let mut record = candidate.into_record();
            record.fix_mandatory_fields();
            report.conflicts += self.upsert_without_clashes(store, &mut record)?;
            tracing::info!("Added {} '{}'", record.id(), record.title());
            report.added += 1;
            report.records.push(record);
        }

        Ok(report)
    }

    /// Upsert `record`, leaving out any identifier a different stored record
    /// already holds. Returns 1 if an identifier had to be left out.
    fn upsert_without_clashes(&self, store: &RecordStore, record: &mut CanonicalRecord) -> Result<usize, EngineError> {
        let conflict = match store.upsert(record) {
            Ok(_) => return Ok(0),
            Err(StoreError::Conflict(message)) => message,
            Err(e) => return Err(e.into()),
        };

        let clashes = store.identifier_clashes(record)?;
        if clashes.is_empty() {
            return Err(StoreError::Conflict(conflict).into());
        }
        for (id_type, owner) in clashes {
            tracing::warn!(
                "'{}': {} {} belongs to stored record {}, leaving it out",
                record.title(),
                id_type,
                record.identifier(id_type).unwrap_or(""),
                owner.id()
            );
            record.clear_identifier(id_type);
        }
        store.upsert(record)?;
        Ok(1)
    }

    fn import_cache_free(candidates: Vec<CandidateRecord>) -> ImportReport {
        let mut report = ImportReport::default();
        let mut by_id: HashMap<String, usize> = HashMap::new();

        for candidate in candidates {
            let id = candidate.generated_id();
            if let Some(&position) = by_id.get(&id) {
                merge_candidate(&mut report.records[position], &candidate);
                report.folded += 1;
                continue;
            }
            let mut record = candidate.into_record();
            record.fix_mandatory_fields();
            by_id.insert(id, report.records.len());
            report.records.push(record);
            report.added += 1;
        }
        report
    }

    /// Run every applicable enrichment step on `record`, persisting after each step that changed it.
    pub async fn enrich_record(&self, record: &mut CanonicalRecord) -> Result<EnrichmentReport, EngineError> {
        if self.retry_skipped {
            record.aux.enrichment.retain(|_, state| *state != EnrichmentState::Skipped);
        }

        let mut report = EnrichmentReport {
            record_id: record.id(),
            steps: Vec::with_capacity(6),
            folded_into: None,
        };

        let outcome = self.crossref_step(record).await;
        self.finish_step(record, &mut report, SourceType::Crossref, outcome)?;

        let outcome = self.semantic_scholar_step(record).await;
        self.finish_step(record, &mut report, SourceType::SemanticScholar, outcome)?;

        let outcome = self.pubmed_step(record).await;
        self.finish_step(record, &mut report, SourceType::PubMed, outcome)?;

        let outcome = self.arxiv_step(record).await;
        self.finish_step(record, &mut report, SourceType::Arxiv, outcome)?;

        let outcome = self.unpaywall_step(record).await;
        self.finish_step(record, &mut report, SourceType::Unpaywall, outcome)?;

        let outcome = self.google_scholar_step(record).await;
        self.finish_step(record, &mut report, SourceType::GoogleScholar, outcome)?;

        Ok(report)
    }

    /// Enrich records one at a time.
    ///
    /// Source failures are counted and the batch goes on. A record that turns
    /// out to be a stored copy of another is folded into it; an identifier
    /// conflict that cannot be resolved that way skips saving the record.
    /// Any other store failure aborts.
    pub async fn enrich_batch(&self, records: &mut [CanonicalRecord]) -> Result<BatchReport, EngineError> {
        let progress = if self.show_progress {
            Progress::new(records.len() as u64, "Enriching")
        } else {
            Progress::hidden()
        };

        let mut batch = BatchReport::default();
        for record in records.iter_mut() {
            progress.set_message(&crate::ui::truncate_with_ellipsis(record.title(), 50));
            match self.enrich_record(record).await {
                Ok(report) => {
                    batch.merged += report.merged();
                    batch.rejected += report.rejected();
                    batch.failed += report.failed();
                    if report.folded_into.is_some() {
                        batch.folded += 1;
                    }
                }
                Err(EngineError::Store(StoreError::Conflict(message))) => {
                    tracing::warn!("Not saving '{}': {}", record.title(), message);
                    batch.conflicts += 1;
                }
                Err(e) => {
                    progress.finish_with_message("Aborted");
                    return Err(e);
                }
            }
            batch.records += 1;
            progress.inc(1);
        }
        progress.finish_with_message(&format!("Enriched {} records", batch.records));
        Ok(batch)
    }

    fn source(&self, source_type: &SourceType) -> Option<&Arc<dyn Source>> {
        let source = self.registry.get_by_type(source_type);
        if source.is_none() {
            tracing::debug!("{} is not registered", source_type);
        }
        source
    }

    fn is_pending(&self, record: &CanonicalRecord, source_type: &SourceType) -> bool {
        record.aux.enrichment_state(source_type) == EnrichmentState::Pending
    }

    fn search_query(&self, record: &CanonicalRecord) -> SearchQuery {
        let mut query = SearchQuery::new(record.title())
            .identity(self.identity.clone())
            .max_results(self.matching.max_candidates);
        if let Some(year) = record.bib.year() {
            query = query.year(year);
        }
        query
    }

    async fn crossref_step(&self, record: &mut CanonicalRecord) -> StepOutcome {
        let source_type = SourceType::Crossref;
        if record.identifier(IdType::Doi).is_some() || !self.is_pending(record, &source_type) {
            return StepOutcome::NotApplicable;
        }
        let Some(source) = self.source(&source_type) else {
            return StepOutcome::NotApplicable;
        };

        let tolerance = Tolerance::new(self.matching.crossref_title_tolerance, self.matching.author_tolerance);
        let outcome = self
            .match_and_merge(source.as_ref(), record, tolerance)
            .await;

        // The search hit may be abbreviated; the DOI record carries the full metadata
        if matches!(outcome, StepOutcome::Merged(_)) {
            if let Some(doi) = record.identifier(IdType::Doi).map(str::to_string) {
                match source.fetch_by_id(&doi).await {
                    Ok(Some(full)) => {
                        merge_candidate(record, &full);
                    }
                    Ok(None) => tracing::debug!("Crossref has no record for {}", doi),
                    Err(e) => tracing::warn!("Crossref refresh of {} failed: {}", doi, e),
                }
            }
        }
        outcome
    }

    async fn semantic_scholar_step(&self, record: &mut CanonicalRecord) -> StepOutcome {
        let source_type = SourceType::SemanticScholar;
        let Some(doi) = record.identifier(IdType::Doi).map(str::to_string) else {
            return StepOutcome::NotApplicable;
        };
        if !self.is_pending(record, &source_type) {
            return StepOutcome::NotApplicable;
        }
        match self.source(&source_type) {
            Some(source) => self.fetch_and_merge(source.as_ref(), record, &doi).await,
            None => StepOutcome::NotApplicable,
        }
    }

    async fn pubmed_step(&self, record: &mut CanonicalRecord) -> StepOutcome {
        let source_type = SourceType::PubMed;
        if record.identifier(IdType::Pmid).is_some() || !self.is_pending(record, &source_type) {
            return StepOutcome::NotApplicable;
        }
        let Some(source) = self.source(&source_type) else {
            return StepOutcome::NotApplicable;
        };
        // PubMed titles are often edited by the indexer, hence the looser tolerance
        let tolerance = Tolerance::new(self.matching.pubmed_title_tolerance, self.matching.author_tolerance);
        self.match_and_merge(source.as_ref(), record, tolerance).await
    }

    async fn arxiv_step(&self, record: &mut CanonicalRecord) -> StepOutcome {
        let source_type = SourceType::Arxiv;
        if record.has_full_abstract() || !self.is_pending(record, &source_type) {
            return StepOutcome::NotApplicable;
        }
        let Some(source) = self.source(&source_type) else {
            return StepOutcome::NotApplicable;
        };
        let tolerance = Tolerance::new(self.matching.arxiv_title_tolerance, self.matching.author_tolerance);
        self.match_and_merge(source.as_ref(), record, tolerance).await
    }

    async fn unpaywall_step(&self, record: &mut CanonicalRecord) -> StepOutcome {
        let source_type = SourceType::Unpaywall;
        let Some(doi) = record.identifier(IdType::Doi).map(str::to_string) else {
            return StepOutcome::NotApplicable;
        };
        if record.has_pdf_link() || !self.is_pending(record, &source_type) {
            return StepOutcome::NotApplicable;
        }
        match self.source(&source_type) {
            Some(source) => self.fetch_and_merge(source.as_ref(), record, &doi).await,
            None => StepOutcome::NotApplicable,
        }
    }

    async fn google_scholar_step(&self, record: &mut CanonicalRecord) -> StepOutcome {
        let source_type = SourceType::GoogleScholar;
        if record.bib.year().is_some() || !self.is_pending(record, &source_type) {
            return StepOutcome::NotApplicable;
        }
        let Some(bib_url) = record.aux.scholar_bib_url.clone() else {
            return StepOutcome::NotApplicable;
        };
        match self.source(&source_type) {
            Some(source) => self.fetch_and_merge(source.as_ref(), record, &bib_url).await,
            None => StepOutcome::NotApplicable,
        }
    }

    async fn match_and_merge(
        &self,
        source: &dyn Source,
        record: &mut CanonicalRecord,
        tolerance: Tolerance,
    ) -> StepOutcome {
        let query = self.search_query(record);
        match find_best_match(source, &*record, tolerance, query).await {
            Ok(MatchOutcome::Matched { candidate, .. }) => StepOutcome::Merged(merge_candidate(record, &candidate)),
            Ok(MatchOutcome::Rejected {
                candidates,
                author_distance,
            }) => {
                let best = &candidates[0];
                StepOutcome::Rejected {
                    best_title: best.item.title().to_string(),
                    title_distance: best.title_distance,
                    author_distance,
                }
            }
            Ok(MatchOutcome::NoResults) => StepOutcome::NoResults,
            Err(e) => source_failure(source, e),
        }
    }

    async fn fetch_and_merge(&self, source: &dyn Source, record: &mut CanonicalRecord, id: &str) -> StepOutcome {
        match source.fetch_by_id(id).await {
            Ok(Some(candidate)) => {
                tracing::info!("{}: merged record for {}", source.name(), id);
                StepOutcome::Merged(merge_candidate(record, &candidate))
            }
            Ok(None) => {
                tracing::info!("{}: nothing found for {}", source.name(), id);
                StepOutcome::NoResults
            }
            Err(e) => source_failure(source, e),
        }
    }

    /// Record the step's state on the record and persist it when it changed
    fn finish_step(
        &self,
        record: &mut CanonicalRecord,
        report: &mut EnrichmentReport,
        source: SourceType,
        outcome: StepOutcome,
    ) -> Result<(), EngineError> {
        let state = match &outcome {
            StepOutcome::Merged(_) => Some(EnrichmentState::Done),
            StepOutcome::Rejected { .. } | StepOutcome::NoResults => Some(EnrichmentState::Skipped),
            StepOutcome::Failed(_) | StepOutcome::NotApplicable => None,
        };
        if let Some(state) = state {
            record.aux.set_enrichment_state(&source, state);
            if let Some(store) = &self.store {
                self.save_enriched(store, record, report)?;
            }
        }
        report.steps.push(StepReport { source, outcome });
        Ok(())
    }

    /// Persist an enriched record.
    ///
    /// When the record picked up an identifier a different stored record
    /// holds, both describe the same work: the record is folded into that
    /// one, its own row is removed, and enrichment continues on the result.
    fn save_enriched(
        &self,
        store: &RecordStore,
        record: &mut CanonicalRecord,
        report: &mut EnrichmentReport,
    ) -> Result<(), EngineError> {
        let conflict = match store.upsert(record) {
            Ok(_) => return Ok(()),
            Err(StoreError::Conflict(message)) => message,
            Err(e) => return Err(e.into()),
        };
        let Some((id_type, mut owner)) = store.identifier_clashes(record)?.into_iter().next() else {
            return Err(StoreError::Conflict(conflict).into());
        };

        tracing::info!(
            "'{}' has the {} of stored record {}, folding it in",
            record.title(),
            id_type,
            owner.id()
        );
        let previous = record.stored_key().map(str::to_string);
        fold_record(&mut owner, record);
        // The old row still holds the identifiers the owner just took over
        if let Some(previous) = previous.filter(|key| *key != owner.id()) {
            store.delete(&previous)?;
        }
        self.upsert_without_clashes(store, &mut owner)?;

        report.folded_into = Some(owner.id());
        *record = owner;
        Ok(())
    }
}

fn source_failure(source: &dyn Source, error: SourceError) -> StepOutcome {
    match error {
        SourceError::Disabled(reason) => {
            tracing::debug!("{} skipped: {}", source.name(), reason);
            StepOutcome::NotApplicable
        }
        other => {
            tracing::warn!("{} failed: {}", source.name(), other);
            StepOutcome::Failed(other.to_string())
        }
    }
}

fn replace_or_push(records: &mut Vec<CanonicalRecord>, record: CanonicalRecord) {
    match records.iter_mut().find(|r| r.stored_key() == record.stored_key()) {
        Some(existing) => *existing = record,
        None => records.push(record),
    }
}
