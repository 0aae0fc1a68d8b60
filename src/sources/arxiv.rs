//! arXiv metadata source implementation.

use async_trait::async_trait;
use chrono::Datelike;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;

use crate::models::{AuxData, BibFields, CandidateRecord, Link, LinkType, SearchQuery, SourceType};
use crate::sources::{Source, SourceCapabilities, SourceError};
use crate::utils::{author_from_display_name, author_list_to_string, extract_doi, title_tokens, HttpClient};

const ARXIV_API_BASE: &str = "https://export.arxiv.org/api";
const ARXIV_PDF_URL: &str = "https://arxiv.org/pdf";

/// arXiv caps a single query at this many results
const ARXIV_MAX_RESULTS: usize = 200;

static VERSION_SUFFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"v\d+$").unwrap());

/// arXiv metadata source using the Atom export API
#[derive(Debug, Clone)]
pub struct ArxivSource {
    client: Arc<HttpClient>,
    base_url: String,
}

impl ArxivSource {
    pub fn new(client: Arc<HttpClient>) -> Self {
        Self {
            client,
            base_url: ARXIV_API_BASE.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Parse an arXiv ID from various formats
    ///
    /// Handles formats like:
    /// - "2301.12345"
    /// - "2301.12345v1" (version is stripped)
    /// - "arxiv:2301.12345"
    /// - "https://arxiv.org/abs/2301.12345v1"
    /// - "hep-th/9901001v2"
    pub fn parse_id(id: &str) -> Result<String, SourceError> {
        let id = id.trim().to_lowercase();
        let id = match id.find("/abs/") {
            Some(pos) => id[pos + 5..].to_string(),
            None => id.strip_prefix("arxiv:").unwrap_or(&id).to_string(),
        };
        let id = VERSION_SUFFIX.replace(&id, "").to_string();

        if id.is_empty() {
            return Err(SourceError::InvalidRequest("Empty arXiv ID".to_string()));
        }
        Ok(id)
    }

    /// Title query: every significant title word must appear in the title
    fn build_search_query(query: &SearchQuery) -> String {
        let terms: Vec<String> = title_tokens(&query.title)
            .into_iter()
            .map(|t| format!("ti:{}", t))
            .collect();
        if terms.is_empty() {
            format!("ti:\"{}\"", query.title.trim())
        } else {
            terms.join(" AND ")
        }
    }

    /// Parse an arXiv Atom feed into candidates
    fn parse_feed(xml: &str) -> Result<Vec<CandidateRecord>, SourceError> {
        let feed = feed_rs::parser::parse(xml.as_bytes())
            .map_err(|e| SourceError::Parse(format!("Failed to parse arXiv feed: {}", e)))?;

        Ok(feed
            .entries
            .iter()
            .enumerate()
            .filter_map(|(index, entry)| Self::parse_entry(index, entry))
            .collect())
    }

    /// Parse an arXiv Atom feed entry; entries without an id are skipped
    fn parse_entry(index: usize, entry: &feed_rs::model::Entry) -> Option<CandidateRecord> {
        let arxiv_id = Self::parse_id(&entry.id).ok()?;

        // arXiv reports unknown ids as a single "Error" entry
        let title = entry
            .title
            .as_ref()
            .map(|t| t.content.split_whitespace().collect::<Vec<_>>().join(" "))
            .unwrap_or_default();
        if title == "Error" {
            return None;
        }

        let authors: Vec<_> = entry
            .authors
            .iter()
            .map(|a| author_from_display_name(&a.name))
            .collect();
        let abstract_text = entry
            .summary
            .as_ref()
            .map(|s| s.content.split_whitespace().collect::<Vec<_>>().join(" "))
            .unwrap_or_default();
        let year = entry
            .published
            .map(|d| d.year().to_string())
            .unwrap_or_default();

        let mut bib = BibFields::new()
            .with("ENTRYTYPE", "misc")
            .with("title", title)
            .with("author", author_list_to_string(&authors))
            .with("year", year)
            .with("abstract", abstract_text)
            .with("eprint", arxiv_id.clone())
            .with("archiveprefix", "arXiv")
            .with("howpublished", "arXiv");

        let mut aux = AuxData {
            arxivid: Some(arxiv_id.clone()),
            authors,
            ..Default::default()
        };
        for link in &entry.links {
            // Published version, linked as http://dx.doi.org/<doi>
            if link.title.as_deref() == Some("doi") || link.href.contains("doi.org/") {
                if let Some(doi) = extract_doi(&link.href) {
                    bib.set("doi", doi);
                }
                continue;
            }
            let is_pdf = link.media_type.as_deref() == Some("application/pdf")
                || link.title.as_deref() == Some("pdf");
            let link_type = if is_pdf { LinkType::Pdf } else { LinkType::Main };
            aux.add_link(Link::new(link.href.clone(), link_type, &SourceType::Arxiv));
        }
        aux.add_link(Link::new(
            format!("{}/{}", ARXIV_PDF_URL, arxiv_id),
            LinkType::Pdf,
            &SourceType::Arxiv,
        ));

        Some(
            CandidateRecord::new(index, SourceType::Arxiv)
                .with_bib(bib)
                .with_aux(aux),
        )
    }
}

#[async_trait]
impl Source for ArxivSource {
    fn id(&self) -> &str {
        "arxiv"
    }

    fn name(&self) -> &str {
        "arXiv"
    }

    fn source_type(&self) -> SourceType {
        SourceType::Arxiv
    }

    fn capabilities(&self) -> SourceCapabilities {
        SourceCapabilities::SEARCH | SourceCapabilities::LOOKUP
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<CandidateRecord>, SourceError> {
        let url = format!(
            "{}/query?search_query={}&start=0&max_results={}",
            self.base_url,
            urlencoding::encode(&Self::build_search_query(query)),
            query.max_results.min(ARXIV_MAX_RESULTS)
        );
        let xml = self.client.get_text(self.id(), &url).await?;
        Self::parse_feed(&xml)
    }

    async fn fetch_by_id(&self, id: &str) -> Result<Option<CandidateRecord>, SourceError> {
        let arxiv_id = Self::parse_id(id)?;
        let url = format!(
            "{}/query?id_list={}&max_results=1",
            self.base_url,
            urlencoding::encode(&arxiv_id)
        );
        let xml = self.client.get_text(self.id(), &url).await?;
        Ok(Self::parse_feed(&xml)?.into_iter().next())
    }

    fn validate_id(&self, id: &str) -> Result<(), SourceError> {
        Self::parse_id(id).map(|_| ())
    }
}
