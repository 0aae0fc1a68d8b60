//! Crossref metadata source implementation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::models::{AuxData, Author, BibFields, CandidateRecord, Link, LinkType, SearchQuery, SourceType};
use crate::sources::{found, Source, SourceCapabilities, SourceError};
use crate::utils::{author_list_to_string, is_pdf_url, strip_tags, HttpClient};

const CROSSREF_API_BASE: &str = "https://api.crossref.org";

/// Crossref metadata source
///
/// Uses the Crossref REST API for title search and DOI lookup. Sending a
/// `mailto` puts requests in Crossref's polite pool.
#[derive(Debug, Clone)]
pub struct CrossRefSource {
    client: Arc<HttpClient>,
    base_url: String,
    mailto: Option<String>,
}

impl CrossRefSource {
    pub fn new(client: Arc<HttpClient>) -> Self {
        Self {
            client,
            base_url: CROSSREF_API_BASE.to_string(),
            mailto: None,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_mailto(mut self, mailto: Option<String>) -> Self {
        self.mailto = mailto;
        self
    }

    fn mailto_param(&self, identity: Option<&str>) -> String {
        identity
            .or(self.mailto.as_deref())
            .map(|m| format!("&mailto={}", urlencoding::encode(m)))
            .unwrap_or_default()
    }
}

#[async_trait]
impl Source for CrossRefSource {
    fn id(&self) -> &str {
        "crossref"
    }

    fn name(&self) -> &str {
        "Crossref"
    }

    fn source_type(&self) -> SourceType {
        SourceType::Crossref
    }

    fn capabilities(&self) -> SourceCapabilities {
        SourceCapabilities::SEARCH | SourceCapabilities::LOOKUP | SourceCapabilities::DOI_LOOKUP
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<CandidateRecord>, SourceError> {
        let mut url = format!(
            "{}/works?query.title={}&rows={}",
            self.base_url,
            urlencoding::encode(&query.title),
            query.max_results
        );

        if let Some(year) = &query.year {
            url = format!("{}&filter=from-pub-date:{},until-pub-date:{}", url, year, year);
        }
        url.push_str(&self.mailto_param(query.identity.as_deref()));

        let data: CRListResponse = self.client.get_json(self.id(), &url).await?;
        if data.status != "ok" {
            return Err(SourceError::Api(format!("Crossref returned status {}", data.status)));
        }

        Ok(data
            .message
            .items
            .into_iter()
            .enumerate()
            .map(|(index, item)| item_to_candidate(index, item))
            .collect())
    }

    async fn fetch_by_id(&self, doi: &str) -> Result<Option<CandidateRecord>, SourceError> {
        self.validate_id(doi)?;
        let url = format!(
            "{}/works/{}?{}",
            self.base_url,
            urlencoding::encode(doi.trim()),
            self.mailto_param(None).trim_start_matches('&')
        );

        let data = found(self.client.get_json::<CRItemResponse>(self.id(), &url).await)?;
        Ok(data.map(|d| item_to_candidate(0, d.message)))
    }
}

// Crossref API response types

#[derive(Debug, Deserialize)]
struct CRListResponse {
    #[serde(default)]
    status: String,
    message: CRList,
}

#[derive(Debug, Default, Deserialize)]
struct CRList {
    #[serde(default)]
    items: Vec<CRItem>,
}

#[derive(Debug, Deserialize)]
struct CRItemResponse {
    message: CRItem,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CRItem {
    #[serde(rename = "DOI")]
    doi: Option<String>,
    title: Vec<String>,
    #[serde(rename = "container-title")]
    container_title: Vec<String>,
    #[serde(rename = "type")]
    item_type: Option<String>,
    issued: Option<CRDate>,
    author: Vec<CRAuthor>,
    link: Vec<CRLink>,
    #[serde(rename = "URL")]
    url: Option<String>,
    publisher: Option<String>,
    volume: Option<String>,
    issue: Option<String>,
    page: Option<String>,
    #[serde(rename = "abstract")]
    abstract_text: Option<String>,
    language: Option<String>,
    #[serde(rename = "ISSN")]
    issn: Vec<String>,
    #[serde(rename = "ISBN")]
    isbn: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct CRDate {
    #[serde(rename = "date-parts", default)]
    date_parts: Vec<Vec<Option<i64>>>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(default)]
struct CRAuthor {
    #[serde(skip_serializing_if = "Option::is_none")]
    given: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    family: Option<String>,
    /// Organisational authors
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sequence: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CRLink {
    #[serde(rename = "URL")]
    url: String,
    #[serde(rename = "content-type", default)]
    content_type: Option<String>,
}

/// BibTeX entry type and the field that carries the container title
fn entry_type_for(item_type: Option<&str>) -> (&'static str, &'static str) {
    match item_type {
        Some("proceedings-article") => ("inproceedings", "booktitle"),
        Some("book-chapter") | Some("book-section") | Some("book-part") => ("incollection", "booktitle"),
        Some("book") | Some("monograph") | Some("edited-book") | Some("reference-book") => ("book", "series"),
        Some("dissertation") => ("phdthesis", "school"),
        Some("report") => ("techreport", "institution"),
        Some("posted-content") => ("misc", "howpublished"),
        _ => ("article", "journal"),
    }
}

fn item_to_candidate(index: usize, item: CRItem) -> CandidateRecord {
    let (entry_type, container_field) = entry_type_for(item.item_type.as_deref());
    let authors: Vec<Author> = item
        .author
        .iter()
        .map(|a| match (&a.family, &a.name) {
            (Some(family), _) => Author::new(a.given.clone().unwrap_or_default(), family.clone()),
            (None, Some(name)) => Author::new("", name.clone()),
            (None, None) => Author::new(a.given.clone().unwrap_or_default(), ""),
        })
        .collect();
    let year = item
        .issued
        .as_ref()
        .and_then(|d| d.date_parts.first())
        .and_then(|parts| parts.first().copied().flatten())
        .map(|y| y.to_string());

    let mut bib = BibFields::new()
        .with("ENTRYTYPE", entry_type)
        .with("title", item.title.first().cloned().unwrap_or_default())
        .with("author", author_list_to_string(&authors))
        .with("doi", item.doi.clone().unwrap_or_default())
        .with("year", year.unwrap_or_default())
        .with("publisher", item.publisher.unwrap_or_default())
        .with("volume", item.volume.unwrap_or_default())
        .with("number", item.issue.unwrap_or_default())
        .with("pages", item.page.unwrap_or_default())
        .with("issn", item.issn.join(", "))
        .with("isbn", item.isbn.join(", "))
        .with("url", item.url.clone().unwrap_or_default());
    if let Some(container) = item.container_title.first() {
        bib.set(container_field, container.clone());
    }
    if let Some(abstract_text) = &item.abstract_text {
        bib.set("abstract", strip_tags(abstract_text));
    }

    let mut aux = AuxData {
        language: item.language,
        authors,
        ..Default::default()
    };
    if !item.author.is_empty() {
        if let Ok(raw) = serde_json::to_value(&item.author) {
            aux.extra.insert("xref_author".to_string(), raw);
        }
    }
    if let Some(url) = item.url {
        aux.add_link(Link::new(url, LinkType::Main, &SourceType::Crossref));
    }
    for link in item.link {
        let is_pdf = link.content_type.as_deref() == Some("application/pdf") || is_pdf_url(&link.url);
        let link_type = if is_pdf { LinkType::Pdf } else { LinkType::Main };
        aux.add_link(Link::new(link.url, link_type, &SourceType::Crossref));
    }

    CandidateRecord::new(index, SourceType::Crossref)
        .with_bib(bib)
        .with_aux(aux)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Bibliographic;
    use crate::utils::PolitenessGovernor;

    const SEARCH_BODY: &str = r#"{
        "status": "ok",
        "message-type": "work-list",
        "message": {
            "items": [
                {
                    "DOI": "10.1/xyz",
                    "title": ["Deep Learning for Radiology Reports"],
                    "container-title": ["Radiology"],
                    "type": "journal-article",
                    "issued": {"date-parts": [[2020, 3]]},
                    "author": [
                        {"given": "John", "family": "Smith", "sequence": "first"},
                        {"given": "Alice", "family": "Doe", "sequence": "additional"}
                    ],
                    "URL": "http://dx.doi.org/10.1/xyz",
                    "link": [{"URL": "https://example.org/xyz.pdf", "content-type": "application/pdf"}],
                    "abstract": "<jats:p>We study reports.</jats:p>"
                },
                {
                    "title": ["An Unrelated Work"],
                    "type": "proceedings-article",
                    "container-title": ["Proc. Things"],
                    "issued": {"date-parts": [[null]]}
                }
            ]
        }
    }"#;

    fn source(server: &mockito::ServerGuard) -> CrossRefSource {
        let client = Arc::new(HttpClient::new(Arc::new(PolitenessGovernor::new())).unwrap());
        CrossRefSource::new(client).with_base_url(server.url())
    }

    #[tokio::test]
    async fn test_search_parses_items() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/works")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(SEARCH_BODY)
            .create_async()
            .await;

        let results = source(&server)
            .search(&SearchQuery::new("Deep Learning for Radiology Reports"))
            .await
            .unwrap();
        mock.assert_async().await;

        assert_eq!(results.len(), 2);
        let first = &results[0];
        assert_eq!(first.index, 0);
        assert_eq!(first.bib.doi(), Some("10.1/xyz"));
        assert_eq!(first.bib.year(), Some("2020"));
        assert_eq!(first.bib.get("journal"), Some("Radiology"));
        assert_eq!(first.bib.author(), Some("Smith, John and Doe, Alice"));
        assert_eq!(first.bib.abstract_text(), Some("We study reports."));
        assert!(first.has_pdf_link());
        assert!(first.aux.extra.contains_key("xref_author"));

        let second = &results[1];
        assert_eq!(second.bib.entry_type(), Some("inproceedings"));
        assert_eq!(second.bib.get("booktitle"), Some("Proc. Things"));
        assert!(second.bib.year().is_none());
    }

    #[tokio::test]
    async fn test_search_sends_mailto() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/works")
            .match_query(mockito::Matcher::UrlEncoded(
                "mailto".into(),
                "me@example.org".into(),
            ))
            .with_status(200)
            .with_body(r#"{"status": "ok", "message": {"items": []}}"#)
            .create_async()
            .await;

        let query = SearchQuery::new("Anything").identity(Some("me@example.org".to_string()));
        let results = source(&server).search(&query).await.unwrap();
        mock.assert_async().await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_by_doi_not_found() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", mockito::Matcher::Regex(r"^/works/".to_string()))
            .match_query(mockito::Matcher::Any)
            .with_status(404)
            .create_async()
            .await;

        let result = source(&server).fetch_by_id("10.1/missing").await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_fetch_by_doi_rejects_empty() {
        let server = mockito::Server::new_async().await;
        assert!(matches!(
            source(&server).fetch_by_id(" ").await,
            Err(SourceError::InvalidRequest(_))
        ));
    }
}
