//! Field-by-field merge of a source candidate into a canonical record.

use crate::models::{CandidateRecord, CanonicalRecord, EnrichmentState};

/// Bibliography fields a source may contribute to a record
pub const TRANSFERABLE_FIELDS: &[&str] = &[
    "title",
    "author",
    "year",
    "month",
    "journal",
    "booktitle",
    "school",
    "institution",
    "publisher",
    "howpublished",
    "volume",
    "number",
    "pages",
    "abstract",
    "doi",
    "url",
    "eprint",
    "archiveprefix",
    "keywords",
    "isbn",
    "issn",
    "language",
];

/// Fields always taken from the candidate when it has them
const META_FIELDS: &[&str] = &["ID", "ENTRYTYPE"];

/// What a merge changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeSummary {
    pub bib_fields: Vec<String>,
    pub aux_fields: Vec<String>,
}

impl MergeSummary {
    pub fn is_empty(&self) -> bool {
        self.bib_fields.is_empty() && self.aux_fields.is_empty()
    }
}

/// Merge `candidate` into `record`.
///
/// A transferable field is adopted only when the incoming value is strictly
/// longer than the current one. Auxiliary data is first-write-wins except
/// links, which are appended when their normalized URL is new. Merging the
/// same candidate twice changes nothing the second time.
pub fn merge_candidate(record: &mut CanonicalRecord, candidate: &CandidateRecord) -> MergeSummary {
    let mut summary = MergeSummary::default();

    for &field in META_FIELDS {
        if let Some(incoming) = candidate.bib.get(field) {
            if record.bib.get(field) != Some(incoming) {
                record.bib.set(field, incoming);
                summary.bib_fields.push(field.to_string());
            }
        }
    }

    for &field in TRANSFERABLE_FIELDS {
        let Some(incoming) = candidate.bib.get(field) else {
            continue;
        };
        let current_len = record.bib.get(field).map_or(0, |v| v.chars().count());
        if incoming.chars().count() > current_len {
            record.bib.set(field, incoming);
            summary.bib_fields.push(field.to_string());
        }
    }

    summary.aux_fields = record.aux.absorb_missing(&candidate.aux);
    summary
}

/// Fold `duplicate`, a second stored copy of the same work, into `target`.
///
/// Transferable fields follow the longer-value rule, except that `target`
/// keeps its DOI and citation metadata. Auxiliary data fills gaps, and a
/// source that is done on either copy is done on the result.
pub fn fold_record(target: &mut CanonicalRecord, duplicate: &CanonicalRecord) -> MergeSummary {
    let mut summary = MergeSummary::default();

    for &field in TRANSFERABLE_FIELDS {
        let Some(incoming) = duplicate.bib.get(field) else {
            continue;
        };
        let adopt = match target.bib.get(field) {
            None => true,
            Some(_) if field == "doi" => false,
            Some(current) => incoming.chars().count() > current.chars().count(),
        };
        if adopt {
            target.bib.set(field, incoming);
            summary.bib_fields.push(field.to_string());
        }
    }

    summary.aux_fields = target.aux.absorb_missing(&duplicate.aux);
    for (source, state) in &duplicate.aux.enrichment {
        if *state == EnrichmentState::Done {
            target.aux.enrichment.insert(source.clone(), EnrichmentState::Done);
        }
    }
    summary
}
