//! Semantic Scholar metadata source implementation.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::Deserialize;
use std::sync::Arc;

use crate::models::{AuxData, BibFields, CandidateRecord, Link, LinkType, SearchQuery, SourceType};
use crate::sources::{found, Source, SourceCapabilities, SourceError};
use crate::utils::{author_from_display_name, author_list_to_string, HttpClient};

const SEMANTIC_SCHOLAR_API_BASE: &str = "https://api.semanticscholar.org";
const SEARCH_FIELDS: &str = "title,authors,year,venue,abstract,url,externalIds";

/// Semantic Scholar metadata source
///
/// DOI lookups use the v1 paper endpoint, which also reports topics and
/// author ids; title search uses the graph API.
#[derive(Debug, Clone)]
pub struct SemanticScholarSource {
    client: Arc<HttpClient>,
    base_url: String,
    api_key: Option<String>,
}

impl SemanticScholarSource {
    pub fn new(client: Arc<HttpClient>) -> Self {
        Self {
            client,
            base_url: SEMANTIC_SCHOLAR_API_BASE.to_string(),
            api_key: None,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(key) = &self.api_key {
            if let Ok(value) = HeaderValue::from_str(key) {
                headers.insert("x-api-key", value);
            }
        }
        headers
    }

    /// Convert a v1 paper response, keeping the raw `authors` and `topics` payloads
    fn parse_paper(raw: serde_json::Value) -> Result<Option<CandidateRecord>, SourceError> {
        if raw.get("error").is_some() {
            return Ok(None);
        }
        let topics = raw.get("topics").cloned();
        let raw_authors = raw.get("authors").cloned();
        let paper: S2Paper = serde_json::from_value(raw)?;
        let Some(paper_id) = paper.paper_id.clone() else {
            return Ok(None);
        };

        let mut candidate = paper.into_candidate(0);
        candidate.aux.semantic_scholar_id = Some(paper_id);
        if let Some(topics) = topics.filter(|t| !t.is_null()) {
            candidate.aux.extra.insert("ss_topics".to_string(), topics);
        }
        if let Some(authors) = raw_authors.filter(|a| !a.is_null()) {
            candidate.aux.extra.insert("ss_authors".to_string(), authors);
        }
        Ok(Some(candidate))
    }
}

#[async_trait]
impl Source for SemanticScholarSource {
    fn id(&self) -> &str {
        "semantic"
    }

    fn name(&self) -> &str {
        "Semantic Scholar"
    }

    fn source_type(&self) -> SourceType {
        SourceType::SemanticScholar
    }

    fn capabilities(&self) -> SourceCapabilities {
        SourceCapabilities::SEARCH | SourceCapabilities::DOI_LOOKUP
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<CandidateRecord>, SourceError> {
        let url = format!(
            "{}/graph/v1/paper/search?query={}&limit={}&fields={}",
            self.base_url,
            urlencoding::encode(&query.title),
            query.max_results.min(100),
            SEARCH_FIELDS
        );
        let response: S2SearchResponse = self.client.get_json_with_headers(self.id(), &url, self.headers()).await?;

        Ok(response
            .data
            .into_iter()
            .enumerate()
            .map(|(index, paper)| paper.into_candidate(index))
            .collect())
    }

    async fn fetch_by_id(&self, doi: &str) -> Result<Option<CandidateRecord>, SourceError> {
        self.validate_id(doi)?;
        let url = format!("{}/v1/paper/{}", self.base_url, doi.trim());
        let raw = found(
            self.client
                .get_json_with_headers::<serde_json::Value>(self.id(), &url, self.headers())
                .await,
        )?;
        match raw {
            Some(raw) => Self::parse_paper(raw),
            None => Ok(None),
        }
    }
}

// Semantic Scholar API response types

#[derive(Debug, Deserialize)]
struct S2SearchResponse {
    #[serde(default)]
    data: Vec<S2Paper>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct S2Paper {
    #[serde(rename = "paperId")]
    paper_id: Option<String>,
    title: Option<String>,
    #[serde(rename = "abstract")]
    abstract_text: Option<String>,
    year: Option<i64>,
    venue: Option<String>,
    url: Option<String>,
    doi: Option<String>,
    #[serde(rename = "arxivId")]
    arxiv_id: Option<String>,
    #[serde(rename = "externalIds")]
    external_ids: Option<S2ExternalIds>,
    authors: Vec<S2Author>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct S2ExternalIds {
    #[serde(rename = "DOI")]
    doi: Option<String>,
    #[serde(rename = "ArXiv")]
    arxiv: Option<String>,
    #[serde(rename = "PubMed")]
    pubmed: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct S2Author {
    name: Option<String>,
}

impl S2Paper {
    fn into_candidate(self, index: usize) -> CandidateRecord {
        let external = self.external_ids.unwrap_or_default();
        let authors: Vec<_> = self
            .authors
            .iter()
            .filter_map(|a| a.name.as_deref())
            .map(author_from_display_name)
            .collect();

        let bib = BibFields::new()
            .with("title", self.title.unwrap_or_default())
            .with("author", author_list_to_string(&authors))
            .with("year", self.year.map(|y| y.to_string()).unwrap_or_default())
            .with("journal", self.venue.unwrap_or_default())
            .with("abstract", self.abstract_text.unwrap_or_default())
            .with("doi", self.doi.or(external.doi).unwrap_or_default());

        let mut aux = AuxData {
            semantic_scholar_id: self.paper_id,
            arxivid: self.arxiv_id.or(external.arxiv),
            pmid: external.pubmed,
            authors,
            ..Default::default()
        };
        if let Some(url) = self.url {
            aux.add_link(Link::new(url, LinkType::Main, &SourceType::SemanticScholar));
        }

        CandidateRecord::new(index, SourceType::SemanticScholar)
            .with_bib(bib)
            .with_aux(aux)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::PolitenessGovernor;

    const PAPER_V1: &str = r#"{
        "paperId": "abc123",
        "title": "Deep Learning for Radiology Reports",
        "abstract": "A complete abstract.",
        "arxivId": "2301.12345",
        "doi": "10.1/xyz",
        "year": 2020,
        "venue": "Radiology",
        "url": "https://www.semanticscholar.org/paper/abc123",
        "authors": [{"authorId": "1", "name": "John Smith"}, {"authorId": null, "name": "Alice Doe"}],
        "topics": [{"topic": "Deep learning", "topicId": "42"}]
    }"#;

    fn source(server: &mockito::ServerGuard) -> SemanticScholarSource {
        let client = Arc::new(HttpClient::new(Arc::new(PolitenessGovernor::new())).unwrap());
        SemanticScholarSource::new(client).with_base_url(server.url())
    }

    #[tokio::test]
    async fn test_fetch_by_doi() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/v1/paper/10.1/xyz")
            .with_status(200)
            .with_body(PAPER_V1)
            .create_async()
            .await;

        let candidate = source(&server).fetch_by_id("10.1/xyz").await.unwrap().unwrap();
        mock.assert_async().await;

        assert_eq!(candidate.aux.semantic_scholar_id.as_deref(), Some("abc123"));
        assert_eq!(candidate.aux.arxivid.as_deref(), Some("2301.12345"));
        assert_eq!(candidate.bib.abstract_text(), Some("A complete abstract."));
        assert_eq!(candidate.bib.author(), Some("Smith, John and Doe, Alice"));
        assert!(candidate.aux.extra.contains_key("ss_topics"));
        assert!(candidate.aux.extra.contains_key("ss_authors"));
    }

    #[tokio::test]
    async fn test_fetch_unknown_doi() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/v1/paper/10.1/none")
            .with_status(404)
            .with_body(r#"{"error": "Paper not found"}"#)
            .create_async()
            .await;

        assert!(source(&server).fetch_by_id("10.1/none").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_api_key_header() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/graph/v1/paper/search")
            .match_query(mockito::Matcher::Any)
            .match_header("x-api-key", "secret")
            .with_status(200)
            .with_body(r#"{"total": 1, "data": [{"paperId": "p1", "title": "T", "externalIds": {"DOI": "10.2/t"}}]}"#)
            .create_async()
            .await;

        let results = source(&server)
            .with_api_key(Some("secret".to_string()))
            .search(&SearchQuery::new("T"))
            .await
            .unwrap();
        mock.assert_async().await;
        assert_eq!(results[0].bib.doi(), Some("10.2/t"));
    }
}
