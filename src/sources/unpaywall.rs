//! Unpaywall open-access link source.
//!
//! Unpaywall only answers DOI lookups and requires a contact email on every
//! request; without one the source reports itself as disabled.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

use crate::models::{AuxData, Author, BibFields, CandidateRecord, Link, LinkType, SourceType};
use crate::sources::{found, Source, SourceCapabilities, SourceError};
use crate::utils::{author_list_to_string, HttpClient};

const UNPAYWALL_API_BASE: &str = "https://api.unpaywall.org/v2";

#[derive(Debug, Clone)]
pub struct UnpaywallSource {
    client: Arc<HttpClient>,
    base_url: String,
    email: Option<String>,
}

impl UnpaywallSource {
    pub fn new(client: Arc<HttpClient>) -> Self {
        Self {
            client,
            base_url: UNPAYWALL_API_BASE.to_string(),
            email: None,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_email(mut self, email: Option<String>) -> Self {
        self.email = email;
        self
    }

    fn parse_result(item: UnpaywallResponse) -> CandidateRecord {
        let authors: Vec<Author> = item
            .z_authors
            .unwrap_or_default()
            .into_iter()
            .filter_map(|a| {
                let family = a.family.or(a.raw_author_name)?;
                Some(Author::new(a.given.unwrap_or_default(), family))
            })
            .collect();

        let bib = BibFields::new()
            .with("title", item.title.unwrap_or_default())
            .with("author", author_list_to_string(&authors))
            .with("doi", item.doi)
            .with("year", item.year.map(|y| y.to_string()).unwrap_or_default())
            .with("journal", item.journal_name.unwrap_or_default())
            .with("publisher", item.publisher.unwrap_or_default());

        let mut aux = AuxData {
            authors,
            ..Default::default()
        };
        if let Some(location) = item.best_oa_location {
            if let Some(pdf) = location.url_for_pdf {
                aux.add_link(Link::new(pdf, LinkType::Pdf, &SourceType::Unpaywall));
            }
            if let Some(landing) = location.url_for_landing_page {
                aux.add_link(Link::new(landing, LinkType::Main, &SourceType::Unpaywall));
            }
        }

        CandidateRecord::new(0, SourceType::Unpaywall)
            .with_bib(bib)
            .with_aux(aux)
    }
}

#[async_trait]
impl Source for UnpaywallSource {
    fn id(&self) -> &str {
        "unpaywall"
    }

    fn name(&self) -> &str {
        "Unpaywall"
    }

    fn source_type(&self) -> SourceType {
        SourceType::Unpaywall
    }

    fn capabilities(&self) -> SourceCapabilities {
        SourceCapabilities::DOI_LOOKUP
    }

    async fn fetch_by_id(&self, doi: &str) -> Result<Option<CandidateRecord>, SourceError> {
        self.validate_id(doi)?;
        let email = self
            .email
            .as_deref()
            .ok_or_else(|| SourceError::Disabled("Unpaywall requires identity.email".to_string()))?;

        let url = format!(
            "{}/{}?email={}",
            self.base_url,
            doi.trim(),
            urlencoding::encode(email)
        );
        let item = found(self.client.get_json::<UnpaywallResponse>(self.id(), &url).await)?;
        Ok(item.map(Self::parse_result))
    }
}

#[derive(Debug, Deserialize)]
struct UnpaywallResponse {
    doi: String,
    title: Option<String>,
    year: Option<i64>,
    journal_name: Option<String>,
    publisher: Option<String>,
    z_authors: Option<Vec<UnpaywallAuthor>>,
    best_oa_location: Option<UnpaywallLocation>,
}

#[derive(Debug, Deserialize)]
struct UnpaywallAuthor {
    given: Option<String>,
    family: Option<String>,
    raw_author_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UnpaywallLocation {
    url_for_pdf: Option<String>,
    url_for_landing_page: Option<String>,
}
