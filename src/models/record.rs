//! Bibliographic record types shared by the store, the sources and the engine.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::utils::{generate_id, is_pdf_url, normalize_title, normalize_url, parse_author_list};

/// Academic metadata source a record or candidate came from
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Crossref,
    #[serde(rename = "pubmed")]
    PubMed,
    Arxiv,
    #[serde(rename = "semantic")]
    SemanticScholar,
    GoogleScholar,
    Unpaywall,
    /// Records supplied by the user (files, manual entry)
    Import,
    /// Custom source
    #[serde(untagged)]
    Other(String),
}

impl SourceType {
    /// Human-readable name
    pub fn name(&self) -> &str {
        match self {
            SourceType::Crossref => "Crossref",
            SourceType::PubMed => "PubMed",
            SourceType::Arxiv => "arXiv",
            SourceType::SemanticScholar => "Semantic Scholar",
            SourceType::GoogleScholar => "Google Scholar",
            SourceType::Unpaywall => "Unpaywall",
            SourceType::Import => "Import",
            SourceType::Other(name) => name,
        }
    }

    /// Stable identifier, used for registry lookups, enrichment flags and pacing
    pub fn id(&self) -> &str {
        match self {
            SourceType::Crossref => "crossref",
            SourceType::PubMed => "pubmed",
            SourceType::Arxiv => "arxiv",
            SourceType::SemanticScholar => "semantic",
            SourceType::GoogleScholar => "google_scholar",
            SourceType::Unpaywall => "unpaywall",
            SourceType::Import => "import",
            SourceType::Other(id) => id,
        }
    }

    /// Parse an identifier produced by [`SourceType::id`]
    pub fn from_id(id: &str) -> Self {
        match id.to_lowercase().as_str() {
            "crossref" => SourceType::Crossref,
            "pubmed" => SourceType::PubMed,
            "arxiv" => SourceType::Arxiv,
            "semantic" | "semantic_scholar" | "semanticscholar" => SourceType::SemanticScholar,
            "google_scholar" | "scholar" => SourceType::GoogleScholar,
            "unpaywall" => SourceType::Unpaywall,
            "import" => SourceType::Import,
            other => SourceType::Other(other.to_string()),
        }
    }
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// External identifier kinds, in the priority order used for reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdType {
    Doi,
    Pmid,
    ArxivId,
    ScholarId,
}

impl IdType {
    /// All identifier kinds, highest priority first
    pub const BY_PRIORITY: [IdType; 4] = [IdType::Doi, IdType::Pmid, IdType::ArxivId, IdType::ScholarId];

    /// Column holding this identifier in the record store
    pub fn column(&self) -> &'static str {
        match self {
            IdType::Doi => "doi",
            IdType::Pmid => "pmid",
            IdType::ArxivId => "arxivid",
            IdType::ScholarId => "scholarid",
        }
    }
}

impl std::fmt::Display for IdType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.column())
    }
}

/// Flat BibTeX-style field map.
///
/// Empty values are never stored: setting a field to an empty or
/// whitespace-only string removes it. The well-known fields have dedicated
/// accessors; everything else lives in a lowercase-keyed map. The serialized
/// form is a single flat object (`{"ENTRYTYPE": "article", "title": ...}`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, String>", into = "BTreeMap<String, String>")]
pub struct BibFields {
    entry_type: Option<String>,
    cite_key: Option<String>,
    title: Option<String>,
    author: Option<String>,
    year: Option<String>,
    doi: Option<String>,
    abstract_text: Option<String>,
    other: BTreeMap<String, String>,
}

impl BibFields {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style [`BibFields::set`]
    pub fn with(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set(name, value);
        self
    }

    fn slot(&mut self, name: &str) -> Option<&mut Option<String>> {
        match name.to_lowercase().as_str() {
            "entrytype" => Some(&mut self.entry_type),
            "id" => Some(&mut self.cite_key),
            "title" => Some(&mut self.title),
            "author" => Some(&mut self.author),
            "year" => Some(&mut self.year),
            "doi" => Some(&mut self.doi),
            "abstract" => Some(&mut self.abstract_text),
            _ => None,
        }
    }

    /// Set a field, removing it when the value is empty
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        let value = if value.trim().is_empty() { None } else { Some(value) };
        match self.slot(name) {
            Some(slot) => *slot = value,
            None => {
                let key = name.to_lowercase();
                match value {
                    Some(value) => {
                        self.other.insert(key, value);
                    }
                    None => {
                        self.other.remove(&key);
                    }
                }
            }
        }
    }

    pub fn remove(&mut self, name: &str) {
        self.set(name, String::new());
    }

    /// Get any field by name (case-insensitive)
    pub fn get(&self, name: &str) -> Option<&str> {
        match name.to_lowercase().as_str() {
            "entrytype" => self.entry_type.as_deref(),
            "id" => self.cite_key.as_deref(),
            "title" => self.title.as_deref(),
            "author" => self.author.as_deref(),
            "year" => self.year.as_deref(),
            "doi" => self.doi.as_deref(),
            "abstract" => self.abstract_text.as_deref(),
            other => self.other.get(other).map(String::as_str),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn entry_type(&self) -> Option<&str> {
        self.entry_type.as_deref()
    }

    pub fn cite_key(&self) -> Option<&str> {
        self.cite_key.as_deref()
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn author(&self) -> Option<&str> {
        self.author.as_deref()
    }

    pub fn year(&self) -> Option<&str> {
        self.year.as_deref()
    }

    pub fn doi(&self) -> Option<&str> {
        self.doi.as_deref()
    }

    pub fn abstract_text(&self) -> Option<&str> {
        self.abstract_text.as_deref()
    }

    /// All present fields as `(name, value)` pairs; `ENTRYTYPE` and `ID` keep their BibTeX casing
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        let known = [
            ("ENTRYTYPE", &self.entry_type),
            ("ID", &self.cite_key),
            ("title", &self.title),
            ("author", &self.author),
            ("year", &self.year),
            ("doi", &self.doi),
            ("abstract", &self.abstract_text),
        ];
        known
            .into_iter()
            .filter_map(|(name, value)| value.as_deref().map(|v| (name, v)))
            .chain(self.other.iter().map(|(k, v)| (k.as_str(), v.as_str())))
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy every field from `other` that is absent here; returns the names copied
    pub fn absorb_missing(&mut self, other: &BibFields) -> Vec<String> {
        let missing: Vec<(String, String)> = other
            .iter()
            .filter(|(name, _)| !self.contains(name))
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();
        let mut copied = Vec::with_capacity(missing.len());
        for (name, value) in missing {
            self.set(&name, value);
            copied.push(name);
        }
        copied
    }
}

impl From<BTreeMap<String, String>> for BibFields {
    fn from(map: BTreeMap<String, String>) -> Self {
        let mut bib = BibFields::default();
        for (name, value) in map {
            bib.set(&name, value);
        }
        bib
    }
}

impl From<BibFields> for BTreeMap<String, String> {
    fn from(bib: BibFields) -> Self {
        bib.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }
}

/// Structured author name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    #[serde(default)]
    pub given: String,
    #[serde(default)]
    pub family: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub middle: Option<String>,
}

impl Author {
    pub fn new(given: impl Into<String>, family: impl Into<String>) -> Self {
        Self {
            given: given.into(),
            family: family.into(),
            middle: None,
        }
    }

    /// `Family, Given Middle` as used in BibTeX author lists
    pub fn bibtex_name(&self) -> String {
        let mut given = self.given.clone();
        if let Some(middle) = &self.middle {
            if !given.is_empty() {
                given.push(' ');
            }
            given.push_str(middle);
        }
        if given.is_empty() {
            self.family.clone()
        } else {
            format!("{}, {}", self.family, given)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkType {
    Main,
    Pdf,
}

/// A link to the work, tagged with where it came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub url: String,
    #[serde(rename = "type")]
    pub link_type: LinkType,
    pub source: String,
}

impl Link {
    pub fn new(url: impl Into<String>, link_type: LinkType, source: &SourceType) -> Self {
        Self {
            url: url.into(),
            link_type,
            source: source.id().to_string(),
        }
    }
}

/// Per-source enrichment progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrichmentState {
    /// Not yet attempted, or the last attempt failed transiently
    #[default]
    Pending,
    /// Attempted and a confident match was merged
    Done,
    /// Attempted with no confident match; do not retry
    #[serde(rename = "skipped_ambiguous")]
    Skipped,
}

/// Record metadata that does not belong in the bibliography itself
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuxData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pmid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arxivid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scholarid: Option<String>,
    #[serde(rename = "ss_id", skip_serializing_if = "Option::is_none")]
    pub semantic_scholar_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scholar_bib_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub authors: Vec<Author>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub urls: Vec<Link>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub enrichment: BTreeMap<String, EnrichmentState>,
    /// Source-specific payloads (`xref_author`, `ss_topics`, ...)
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl AuxData {
    /// Add a link unless an equivalent URL is already present
    pub fn add_link(&mut self, link: Link) -> bool {
        let key = normalize_url(&link.url);
        if self.urls.iter().any(|l| normalize_url(&l.url) == key) {
            return false;
        }
        self.urls.push(link);
        true
    }

    pub fn enrichment_state(&self, source: &SourceType) -> EnrichmentState {
        self.enrichment.get(source.id()).copied().unwrap_or_default()
    }

    pub fn set_enrichment_state(&mut self, source: &SourceType, state: EnrichmentState) {
        self.enrichment.insert(source.id().to_string(), state);
    }

    /// Fill every field that is unset here from `other`, appending unseen links.
    /// Returns the names of the fields that changed.
    pub fn absorb_missing(&mut self, other: &AuxData) -> Vec<String> {
        let mut changed = Vec::new();

        let options = [
            ("pmid", &mut self.pmid, &other.pmid),
            ("arxivid", &mut self.arxivid, &other.arxivid),
            ("scholarid", &mut self.scholarid, &other.scholarid),
            ("ss_id", &mut self.semantic_scholar_id, &other.semantic_scholar_id),
            ("scholar_bib_url", &mut self.scholar_bib_url, &other.scholar_bib_url),
            ("language", &mut self.language, &other.language),
        ];
        for (name, mine, theirs) in options {
            if mine.is_none() && theirs.is_some() {
                *mine = theirs.clone();
                changed.push(name.to_string());
            }
        }

        if self.authors.is_empty() && !other.authors.is_empty() {
            self.authors = other.authors.clone();
            changed.push("authors".to_string());
        }

        let mut added_link = false;
        for link in &other.urls {
            added_link |= self.add_link(link.clone());
        }
        if added_link {
            changed.push("urls".to_string());
        }

        for (source, state) in &other.enrichment {
            if !self.enrichment.contains_key(source) {
                self.enrichment.insert(source.clone(), *state);
            }
        }

        for (key, value) in &other.extra {
            if !self.extra.contains_key(key) {
                self.extra.insert(key.clone(), value.clone());
                changed.push(key.clone());
            }
        }

        changed
    }
}

/// Read access and derived predicates common to stored records and source candidates
pub trait Bibliographic {
    fn bib(&self) -> &BibFields;
    fn aux(&self) -> &AuxData;

    fn title(&self) -> &str {
        self.bib().title().unwrap_or("")
    }

    fn normalized_title(&self) -> String {
        normalize_title(self.title())
    }

    /// Identifier derived from the title and author list
    fn generated_id(&self) -> String {
        generate_id(self.title(), self.bib().author().unwrap_or(""))
    }

    /// Structured authors if known, otherwise parsed from the bibliography
    fn authors(&self) -> Vec<Author> {
        if self.aux().authors.is_empty() {
            parse_author_list(self.bib().author().unwrap_or(""))
        } else {
            self.aux().authors.clone()
        }
    }

    fn identifier(&self, id_type: IdType) -> Option<&str> {
        let value = match id_type {
            IdType::Doi => self.bib().doi(),
            IdType::Pmid => self.aux().pmid.as_deref(),
            IdType::ArxivId => self.aux().arxivid.as_deref(),
            IdType::ScholarId => self.aux().scholarid.as_deref(),
        };
        value.filter(|v| !v.trim().is_empty())
    }

    /// Venue field appropriate for the entry type
    fn venue(&self) -> &str {
        let bib = self.bib();
        let field = match bib.entry_type().map(str::to_lowercase).as_deref() {
            Some("article") => "journal",
            Some("inproceedings") | Some("incollection") | Some("inbook") => "booktitle",
            Some("book") => "publisher",
            Some("phdthesis") | Some("mastersthesis") => "school",
            Some("techreport") => "institution",
            _ => return bib.get("journal").or_else(|| bib.get("booktitle")).unwrap_or(""),
        };
        bib.get(field).unwrap_or("")
    }

    fn has_abstract(&self) -> bool {
        self.bib().abstract_text().is_some()
    }

    /// True when an abstract is present and does not look like a truncated snippet
    fn has_full_abstract(&self) -> bool {
        match self.bib().abstract_text() {
            Some(text) => {
                let text = text.trim_end();
                !(text.ends_with('…') || text.ends_with("..."))
            }
            None => false,
        }
    }

    fn has_pdf_link(&self) -> bool {
        self.aux().urls.iter().any(|l| l.link_type == LinkType::Pdf)
            || self.bib().get("eprint").is_some_and(is_pdf_url)
            || self.bib().get("url").is_some_and(is_pdf_url)
    }

    fn has_valid_external_id(&self) -> bool {
        IdType::BY_PRIORITY.iter().any(|t| self.identifier(*t).is_some())
    }
}

/// A bibliographic record owned by the store
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub bib: BibFields,
    #[serde(default)]
    pub aux: AuxData,
    /// Key assigned when the record was first persisted
    #[serde(skip)]
    stored_key: Option<String>,
}

impl CanonicalRecord {
    pub fn new(bib: BibFields, aux: AuxData) -> Self {
        Self {
            bib,
            aux,
            stored_key: None,
        }
    }

    /// Storage key: the persisted key once stored, the derived id before that
    pub fn id(&self) -> String {
        self.stored_key.clone().unwrap_or_else(|| self.generated_id())
    }

    pub fn stored_key(&self) -> Option<&str> {
        self.stored_key.as_deref()
    }

    pub(crate) fn set_stored_key(&mut self, key: impl Into<String>) {
        self.stored_key = Some(key.into());
    }

    /// Drop one external identifier
    pub fn clear_identifier(&mut self, id_type: IdType) {
        match id_type {
            IdType::Doi => self.bib.remove("doi"),
            IdType::Pmid => self.aux.pmid = None,
            IdType::ArxivId => self.aux.arxivid = None,
            IdType::ScholarId => self.aux.scholarid = None,
        }
    }

    /// Fill the fields a bibliography entry cannot do without.
    ///
    /// The citation key becomes first author family name + year (or `____`)
    /// + first title word, and a missing entry type defaults to `article`.
    pub fn fix_mandatory_fields(&mut self) {
        if self.bib.entry_type().is_none() {
            self.bib.set("ENTRYTYPE", "article");
        }
        if self.bib.cite_key().is_none() {
            let family = self
                .authors()
                .first()
                .map(|a| a.family.split_whitespace().collect::<String>())
                .unwrap_or_default();
            let year = self.bib.year().unwrap_or("____").to_string();
            let first_word = self
                .title()
                .split_whitespace()
                .next()
                .map(|w| w.chars().filter(|c| c.is_alphanumeric()).collect::<String>())
                .unwrap_or_default()
                .to_lowercase();
            self.bib.set("ID", format!("{family}{year}{first_word}"));
        }
    }
}

impl Bibliographic for CanonicalRecord {
    fn bib(&self) -> &BibFields {
        &self.bib
    }

    fn aux(&self) -> &AuxData {
        &self.aux
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CanonicalRecord {
        let bib = BibFields::new()
            .with("ENTRYTYPE", "article")
            .with("title", "Deep Learning for Radiology Reports")
            .with("author", "Smith, John and Doe, Alice")
            .with("year", "2020")
            .with("journal", "Radiology");
        CanonicalRecord::new(bib, AuxData::default())
    }

    #[test]
    fn test_empty_values_are_not_stored() {
        let mut bib = BibFields::new().with("title", "A title").with("note", "  ");
        assert!(!bib.contains("note"));
        bib.set("title", "");
        assert!(bib.title().is_none());
        assert!(bib.is_empty());
    }

    #[test]
    fn test_bib_serializes_flat() {
        let record = sample();
        let json = serde_json::to_value(&record.bib).unwrap();
        assert_eq!(json["ENTRYTYPE"], "article");
        assert_eq!(json["journal"], "Radiology");

        let back: BibFields = serde_json::from_value(json).unwrap();
        assert_eq!(back, record.bib);
    }

    #[test]
    fn test_field_names_are_case_insensitive() {
        let bib = BibFields::new().with("Journal", "Nature").with("entrytype", "article");
        assert_eq!(bib.get("journal"), Some("Nature"));
        assert_eq!(bib.get("ENTRYTYPE"), Some("article"));
    }

    #[test]
    fn test_venue_by_entry_type() {
        let mut record = sample();
        assert_eq!(record.venue(), "Radiology");

        record.bib.set("ENTRYTYPE", "inproceedings");
        record.bib.set("booktitle", "MICCAI");
        assert_eq!(record.venue(), "MICCAI");
    }

    #[test]
    fn test_truncated_abstract_is_not_full() {
        let mut record = sample();
        assert!(!record.has_abstract());

        record.bib.set("abstract", "We present a method for …");
        assert!(record.has_abstract());
        assert!(!record.has_full_abstract());

        record.bib.set("abstract", "We present a method for reports.");
        assert!(record.has_full_abstract());
    }

    #[test]
    fn test_pdf_link_detection() {
        let mut record = sample();
        assert!(!record.has_pdf_link());
        record
            .aux
            .add_link(Link::new("https://example.org/paper.pdf", LinkType::Pdf, &SourceType::Unpaywall));
        assert!(record.has_pdf_link());
    }

    #[test]
    fn test_add_link_deduplicates() {
        let mut aux = AuxData::default();
        assert!(aux.add_link(Link::new("https://www.example.org/a/", LinkType::Main, &SourceType::Crossref)));
        assert!(!aux.add_link(Link::new("http://example.org/a", LinkType::Main, &SourceType::Arxiv)));
        assert_eq!(aux.urls.len(), 1);
    }

    #[test]
    fn test_enrichment_state_roundtrip_names() {
        let mut aux = AuxData::default();
        assert_eq!(aux.enrichment_state(&SourceType::Crossref), EnrichmentState::Pending);
        aux.set_enrichment_state(&SourceType::PubMed, EnrichmentState::Skipped);

        let json = serde_json::to_value(&aux).unwrap();
        assert_eq!(json["enrichment"]["pubmed"], "skipped_ambiguous");
    }

    #[test]
    fn test_id_prefers_stored_key() {
        let mut record = sample();
        let derived = record.id();
        assert_eq!(derived, record.generated_id());

        record.set_stored_key("kept");
        record.bib.set("title", "Another title entirely");
        assert_eq!(record.id(), "kept");
    }

    #[test]
    fn test_clear_identifier() {
        let mut record = sample();
        record.bib.set("doi", "10.1/xyz");
        record.aux.pmid = Some("42".to_string());

        record.clear_identifier(IdType::Pmid);
        assert!(record.identifier(IdType::Pmid).is_none());
        assert_eq!(record.identifier(IdType::Doi), Some("10.1/xyz"));

        record.clear_identifier(IdType::Doi);
        assert!(!record.has_valid_external_id());
    }

    #[test]
    fn test_fix_mandatory_fields() {
        let mut record = sample();
        record.bib.remove("ENTRYTYPE");
        record.fix_mandatory_fields();
        assert_eq!(record.bib.entry_type(), Some("article"));
        assert_eq!(record.bib.cite_key(), Some("Smith2020deep"));

        let mut undated = CanonicalRecord::new(BibFields::new().with("title", "Untitled Work"), AuxData::default());
        undated.fix_mandatory_fields();
        assert_eq!(undated.bib.cite_key(), Some("____untitled"));
    }

    #[test]
    fn test_source_type_ids() {
        assert_eq!(SourceType::from_id("semantic"), SourceType::SemanticScholar);
        assert_eq!(SourceType::GoogleScholar.id(), "google_scholar");
        assert_eq!(SourceType::from_id("zotero"), SourceType::Other("zotero".to_string()));
        assert_eq!(serde_json::to_value(SourceType::PubMed).unwrap(), "pubmed");
    }
}
