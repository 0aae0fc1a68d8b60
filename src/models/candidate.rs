use serde::{Deserialize, Serialize};

use super::record::{AuxData, BibFields, Bibliographic, CanonicalRecord, SourceType};

/// A record as returned by a source, before reconciliation.
///
/// Candidates are transient: they are either merged into an existing
/// [`CanonicalRecord`] or promoted into a new one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidateRecord {
    /// Position in the source's result list
    #[serde(default)]
    pub index: usize,
    pub source: Option<SourceType>,
    pub bib: BibFields,
    #[serde(default)]
    pub aux: AuxData,
}

impl CandidateRecord {
    pub fn new(index: usize, source: SourceType) -> Self {
        Self {
            index,
            source: Some(source),
            bib: BibFields::default(),
            aux: AuxData::default(),
        }
    }

    pub fn with_bib(mut self, bib: BibFields) -> Self {
        self.bib = bib;
        self
    }

    pub fn with_aux(mut self, aux: AuxData) -> Self {
        self.aux = aux;
        self
    }

    /// Candidate wrapping a user-supplied record
    pub fn from_record(index: usize, record: CanonicalRecord) -> Self {
        Self {
            index,
            source: Some(SourceType::Import),
            bib: record.bib,
            aux: record.aux,
        }
    }

    pub fn source_id(&self) -> &str {
        self.source.as_ref().map(SourceType::id).unwrap_or("unknown")
    }

    /// Promote into a new canonical record
    pub fn into_record(self) -> CanonicalRecord {
        CanonicalRecord::new(self.bib, self.aux)
    }
}

impl Bibliographic for CandidateRecord {
    fn bib(&self) -> &BibFields {
        &self.bib
    }

    fn aux(&self) -> &AuxData {
        &self.aux
    }
}
