//! PubMed metadata source implementation using the E-utilities API.

use async_trait::async_trait;
use quick_xml::de::from_str;
use serde::Deserialize;
use std::sync::Arc;

use crate::models::{AuxData, Author, BibFields, CandidateRecord, Link, LinkType, SearchQuery, SourceType};
use crate::sources::{Source, SourceCapabilities, SourceError};
use crate::utils::{author_list_to_string, HttpClient};

/// PubMed E-utilities API base URL
const PUBMED_EUTILS_BASE: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils";
const TOOL_NAME: &str = env!("CARGO_PKG_NAME");

/// PubMed metadata source
///
/// Searches with `esearch` and resolves the returned PMIDs with `efetch`.
#[derive(Debug, Clone)]
pub struct PubMedSource {
    client: Arc<HttpClient>,
    base_url: String,
    email: Option<String>,
}

impl PubMedSource {
    pub fn new(client: Arc<HttpClient>) -> Self {
        Self {
            client,
            base_url: PUBMED_EUTILS_BASE.to_string(),
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

    fn identity_params(&self, identity: Option<&str>) -> String {
        let mut params = format!("&tool={}", TOOL_NAME);
        if let Some(email) = identity.or(self.email.as_deref()) {
            params.push_str(&format!("&email={}", urlencoding::encode(email)));
        }
        params
    }

    /// Build E-utilities search URL
    fn build_search_url(&self, query: &SearchQuery) -> String {
        let mut url = format!(
            "{}/esearch.fcgi?db=pubmed&retmode=xml&retmax={}&term={}",
            self.base_url,
            query.max_results,
            urlencoding::encode(&query.title)
        );
        if let Some(year) = &query.year {
            url.push_str(&format!("&datetype=pdat&mindate={}&maxdate={}", year, year));
        }
        url.push_str(&self.identity_params(query.identity.as_deref()));
        url
    }

    /// Build E-utilities fetch URL for specific PubMed IDs
    fn build_fetch_url(&self, ids: &[String], identity: Option<&str>) -> String {
        format!(
            "{}/efetch.fcgi?db=pubmed&retmode=xml&id={}{}",
            self.base_url,
            ids.join(","),
            self.identity_params(identity)
        )
    }

    /// Parse E-utilities search response XML
    fn parse_search_response(xml: &str) -> Result<Vec<String>, SourceError> {
        #[derive(Debug, Deserialize)]
        #[allow(non_snake_case)]
        struct ESearchResult {
            IdList: Option<IdList>,
        }

        #[derive(Debug, Deserialize)]
        struct IdList {
            #[serde(rename = "Id", default)]
            ids: Vec<String>,
        }

        let result: ESearchResult = from_str(xml)
            .map_err(|e| SourceError::Parse(format!("Failed to parse PubMed search XML: {}", e)))?;
        Ok(result.IdList.map(|list| list.ids).unwrap_or_default())
    }

    /// Parse E-utilities fetch response XML into candidates, in document order
    fn parse_fetch_response(xml: &str) -> Result<Vec<CandidateRecord>, SourceError> {
        #[derive(Debug, Deserialize)]
        struct PubmedArticleSet {
            #[serde(rename = "PubmedArticle", default)]
            articles: Vec<PubmedArticle>,
        }

        #[derive(Debug, Deserialize)]
        #[allow(non_snake_case)]
        struct PubmedArticle {
            MedlineCitation: Option<MedlineCitation>,
            PubmedData: Option<PubmedData>,
        }

        #[derive(Debug, Deserialize)]
        #[allow(non_snake_case)]
        struct MedlineCitation {
            PMID: Option<Text>,
            Article: Option<Article>,
        }

        #[derive(Debug, Deserialize)]
        struct Text {
            #[serde(rename = "$text", default)]
            value: String,
        }

        #[derive(Debug, Deserialize)]
        #[allow(non_snake_case)]
        struct Article {
            Journal: Option<Journal>,
            ArticleTitle: Option<Text>,
            Pagination: Option<Pagination>,
            Abstract: Option<Abstract>,
            AuthorList: Option<AuthorList>,
            Language: Option<String>,
        }

        #[derive(Debug, Deserialize)]
        #[allow(non_snake_case)]
        struct Journal {
            Title: Option<String>,
            JournalIssue: Option<JournalIssue>,
        }

        #[derive(Debug, Deserialize)]
        #[allow(non_snake_case)]
        struct JournalIssue {
            Volume: Option<String>,
            Issue: Option<String>,
            PubDate: Option<PubDate>,
        }

        #[derive(Debug, Deserialize)]
        #[allow(non_snake_case)]
        struct PubDate {
            Year: Option<String>,
            MedlineDate: Option<String>,
        }

        #[derive(Debug, Deserialize)]
        #[allow(non_snake_case)]
        struct Pagination {
            MedlinePgn: Option<String>,
        }

        #[derive(Debug, Deserialize)]
        struct Abstract {
            #[serde(rename = "AbstractText", default)]
            texts: Vec<Text>,
        }

        #[derive(Debug, Deserialize)]
        struct AuthorList {
            #[serde(rename = "Author", default)]
            authors: Vec<PubmedAuthor>,
        }

        #[derive(Debug, Deserialize)]
        #[allow(non_snake_case)]
        struct PubmedAuthor {
            LastName: Option<String>,
            ForeName: Option<String>,
            CollectiveName: Option<String>,
        }

        #[derive(Debug, Deserialize)]
        #[allow(non_snake_case)]
        struct PubmedData {
            ArticleIdList: Option<ArticleIdList>,
        }

        #[derive(Debug, Deserialize)]
        struct ArticleIdList {
            #[serde(rename = "ArticleId", default)]
            ids: Vec<ArticleId>,
        }

        #[derive(Debug, Deserialize)]
        struct ArticleId {
            #[serde(rename = "@IdType", default)]
            id_type: String,
            #[serde(rename = "$text", default)]
            value: String,
        }

        let result: PubmedArticleSet = from_str(xml)
            .map_err(|e| SourceError::Parse(format!("Failed to parse PubMed fetch XML: {}", e)))?;

        let mut candidates = Vec::new();
        for (index, article) in result.articles.into_iter().enumerate() {
            let Some(citation) = article.MedlineCitation else {
                continue;
            };
            let pmid = citation.PMID.map(|p| p.value.trim().to_string()).unwrap_or_default();
            let Some(details) = citation.Article else {
                continue;
            };

            let authors: Vec<Author> = details
                .AuthorList
                .map(|list| {
                    list.authors
                        .into_iter()
                        .filter_map(|a| match (a.LastName, a.CollectiveName) {
                            (Some(last), _) => Some(Author::new(a.ForeName.unwrap_or_default(), last)),
                            (None, Some(collective)) => Some(Author::new("", collective)),
                            (None, None) => None,
                        })
                        .collect()
                })
                .unwrap_or_default();

            let abstract_text = details
                .Abstract
                .map(|ab| {
                    ab.texts
                        .iter()
                        .map(|t| t.value.trim())
                        .filter(|t| !t.is_empty())
                        .collect::<Vec<_>>()
                        .join(" ")
                })
                .unwrap_or_default();

            let (journal, issue) = match details.Journal {
                Some(journal) => (journal.Title, journal.JournalIssue),
                None => (None, None),
            };
            let year = issue
                .as_ref()
                .and_then(|ji| ji.PubDate.as_ref())
                .and_then(|pd| {
                    pd.Year
                        .clone()
                        .or_else(|| pd.MedlineDate.as_ref().map(|d| d.chars().take(4).collect()))
                })
                .unwrap_or_default();
            let (volume, number) = issue.map(|ji| (ji.Volume, ji.Issue)).unwrap_or((None, None));

            let doi = article
                .PubmedData
                .and_then(|pd| pd.ArticleIdList)
                .and_then(|list| list.ids.into_iter().find(|id| id.id_type == "doi"))
                .map(|id| id.value.trim().to_string())
                .unwrap_or_default();

            let bib = BibFields::new()
                .with("ENTRYTYPE", "article")
                .with("title", details.ArticleTitle.map(|t| t.value).unwrap_or_default())
                .with("author", author_list_to_string(&authors))
                .with("journal", journal.unwrap_or_default())
                .with("volume", volume.unwrap_or_default())
                .with("number", number.unwrap_or_default())
                .with("pages", details.Pagination.and_then(|p| p.MedlinePgn).unwrap_or_default())
                .with("year", year)
                .with("doi", doi)
                .with("abstract", abstract_text);

            let mut aux = AuxData {
                pmid: Some(pmid.clone()).filter(|p| !p.is_empty()),
                language: details.Language,
                authors,
                ..Default::default()
            };
            if !pmid.is_empty() {
                aux.add_link(Link::new(
                    format!("https://pubmed.ncbi.nlm.nih.gov/{}/", pmid),
                    LinkType::Main,
                    &SourceType::PubMed,
                ));
            }

            candidates.push(CandidateRecord::new(index, SourceType::PubMed).with_bib(bib).with_aux(aux));
        }

        Ok(candidates)
    }

    async fn fetch(&self, ids: &[String], identity: Option<&str>) -> Result<Vec<CandidateRecord>, SourceError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let xml = self.client.get_text(self.id(), &self.build_fetch_url(ids, identity)).await?;
        Self::parse_fetch_response(&xml)
    }
}

#[async_trait]
impl Source for PubMedSource {
    fn id(&self) -> &str {
        "pubmed"
    }

    fn name(&self) -> &str {
        "PubMed"
    }

    fn source_type(&self) -> SourceType {
        SourceType::PubMed
    }

    fn capabilities(&self) -> SourceCapabilities {
        SourceCapabilities::SEARCH | SourceCapabilities::LOOKUP
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<CandidateRecord>, SourceError> {
        let xml = self.client.get_text(self.id(), &self.build_search_url(query)).await?;
        let ids = Self::parse_search_response(&xml)?;
        tracing::debug!("PubMed search returned {} ids", ids.len());
        self.fetch(&ids, query.identity.as_deref()).await
    }

    async fn fetch_by_id(&self, pmid: &str) -> Result<Option<CandidateRecord>, SourceError> {
        self.validate_id(pmid)?;
        let records = self.fetch(&[pmid.trim().to_string()], None).await?;
        Ok(records.into_iter().next())
    }

    fn validate_id(&self, id: &str) -> Result<(), SourceError> {
        let id = id.trim();
        if id.is_empty() || !id.chars().all(|c| c.is_ascii_digit()) {
            return Err(SourceError::InvalidRequest(format!("Invalid PMID: {:?}", id)));
        }
        Ok(())
    }
}
