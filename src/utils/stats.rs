//! Coverage statistics over a set of records.

use serde::Serialize;

use crate::models::{Bibliographic, IdType};

/// How many records carry each kind of metadata
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CorpusStats {
    pub total: usize,
    pub with_year: usize,
    pub with_title: usize,
    pub with_doi: usize,
    pub with_arxivid: usize,
    pub with_pmid: usize,
    pub with_semantic_scholar_id: usize,
    pub with_valid_id: usize,
    pub with_abstract: usize,
    pub with_full_abstract: usize,
    pub with_pdf: usize,
    pub pdf_without_abstract: usize,
}

impl CorpusStats {
    pub fn collect<'a, R, I>(records: I) -> Self
    where
        R: Bibliographic + 'a,
        I: IntoIterator<Item = &'a R>,
    {
        let mut stats = CorpusStats::default();
        for record in records {
            stats.add(record);
        }
        stats
    }

    pub fn add<R: Bibliographic>(&mut self, record: &R) {
        let count = |flag: bool| usize::from(flag);
        self.total += 1;
        self.with_year += count(record.bib().year().is_some());
        self.with_title += count(record.bib().title().is_some());
        self.with_doi += count(record.identifier(IdType::Doi).is_some());
        self.with_arxivid += count(record.identifier(IdType::ArxivId).is_some());
        self.with_pmid += count(record.identifier(IdType::Pmid).is_some());
        self.with_semantic_scholar_id += count(record.aux().semantic_scholar_id.is_some());
        self.with_valid_id += count(record.has_valid_external_id());
        self.with_abstract += count(record.has_abstract());
        self.with_full_abstract += count(record.has_full_abstract());
        self.with_pdf += count(record.has_pdf_link());
        self.pdf_without_abstract += count(!record.has_abstract() && record.has_pdf_link());
    }

    /// `(label, count)` rows in display order
    pub fn rows(&self) -> Vec<(&'static str, usize)> {
        vec![
            ("year", self.with_year),
            ("title", self.with_title),
            ("DOI", self.with_doi),
            ("arXiv id", self.with_arxivid),
            ("PubMed id", self.with_pmid),
            ("Semantic Scholar id", self.with_semantic_scholar_id),
            ("any external id", self.with_valid_id),
            ("abstract", self.with_abstract),
            ("full abstract", self.with_full_abstract),
            ("PDF link", self.with_pdf),
            ("PDF but no abstract", self.pdf_without_abstract),
        ]
    }
}
