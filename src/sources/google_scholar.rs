//! Google Scholar source.
//!
//! NOTE: Scholar has no API. Search scrapes the results page and lookups
//! download the BibTeX export behind a result. This source is disabled
//! unless `sources.google_scholar_enabled` is set, and its default pacing is
//! deliberately slow.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::sync::Arc;

use crate::models::{AuxData, BibFields, CandidateRecord, Link, LinkType, SearchQuery, SourceType};
use crate::sources::{found, Source, SourceCapabilities, SourceError};
use crate::utils::{browser_headers, extract_doi, is_pdf_url, parse_author_list, HttpClient};

const GOOGLE_SCHOLAR_URL: &str = "https://scholar.google.com";

static RESULT: Lazy<Selector> = Lazy::new(|| Selector::parse("div.gs_r[data-cid]").unwrap());
static TITLE: Lazy<Selector> = Lazy::new(|| Selector::parse("h3.gs_rt").unwrap());
static TITLE_LINK: Lazy<Selector> = Lazy::new(|| Selector::parse("h3.gs_rt a").unwrap());
static BYLINE: Lazy<Selector> = Lazy::new(|| Selector::parse("div.gs_a").unwrap());
static SNIPPET: Lazy<Selector> = Lazy::new(|| Selector::parse("div.gs_rs").unwrap());
static SIDE_LINK: Lazy<Selector> = Lazy::new(|| Selector::parse("div.gs_or_ggsm a").unwrap());

static TYPE_MARKERS: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*(\[[A-Z]+\]\s*)+").unwrap());
static YEAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(1[89]\d{2}|20\d{2})\b").unwrap());

#[derive(Debug, Clone)]
pub struct GoogleScholarSource {
    client: Arc<HttpClient>,
    base_url: String,
    enabled: bool,
}

impl GoogleScholarSource {
    pub fn new(client: Arc<HttpClient>) -> Self {
        Self {
            client,
            base_url: GOOGLE_SCHOLAR_URL.to_string(),
            enabled: false,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    fn ensure_enabled(&self) -> Result<(), SourceError> {
        if self.enabled {
            Ok(())
        } else {
            Err(SourceError::Disabled(
                "Google Scholar is disabled; set sources.google_scholar_enabled = true".to_string(),
            ))
        }
    }

    /// BibTeX export URL for a result cluster
    fn bib_url(&self, cluster_id: &str) -> String {
        format!(
            "{}/scholar.bib?q=info:{}:scholar.google.com/&output=citation&hl=en",
            self.base_url, cluster_id
        )
    }

    /// Parse a results page into candidates
    fn parse_results(&self, html: &str) -> Vec<CandidateRecord> {
        let document = Html::parse_document(html);
        document
            .select(&RESULT)
            .enumerate()
            .filter_map(|(index, result)| self.parse_result(index, result))
            .collect()
    }

    fn parse_result(&self, index: usize, result: ElementRef<'_>) -> Option<CandidateRecord> {
        let cluster_id = result.value().attr("data-cid")?.to_string();
        let title = result.select(&TITLE).next().map(element_text)?;
        let title = TYPE_MARKERS.replace(&title, "").trim().to_string();
        if title.is_empty() {
            return None;
        }

        let byline = result.select(&BYLINE).next().map(element_text).unwrap_or_default();
        let mut parts = byline.split(" - ");
        let authors_part = parts.next().unwrap_or("").trim_end_matches('…').trim();
        let venue_part = parts.next().unwrap_or("");
        let authors = authors_part
            .split(',')
            .map(str::trim)
            .filter(|a| !a.is_empty() && *a != "…")
            .collect::<Vec<_>>()
            .join(" and ");
        let year = YEAR.find(venue_part).map(|m| m.as_str().to_string()).unwrap_or_default();
        let venue = venue_part
            .split(',')
            .next()
            .map(str::trim)
            .filter(|v| !YEAR.is_match(v))
            .unwrap_or("")
            .to_string();

        let snippet = result.select(&SNIPPET).next().map(element_text).unwrap_or_default();
        // Publisher links often carry the DOI in their path
        let doi = result
            .select(&TITLE_LINK)
            .filter_map(|link| link.value().attr("href"))
            .find_map(extract_doi)
            .unwrap_or_default();

        let bib = BibFields::new()
            .with("ENTRYTYPE", "article")
            .with("title", title)
            .with("author", authors.clone())
            .with("year", year)
            .with("journal", venue)
            .with("abstract", snippet)
            .with("doi", doi);

        let mut aux = AuxData {
            scholarid: Some(cluster_id.clone()),
            scholar_bib_url: Some(self.bib_url(&cluster_id)),
            authors: parse_author_list(&authors),
            ..Default::default()
        };
        for link in result.select(&TITLE_LINK).chain(result.select(&SIDE_LINK)) {
            if let Some(href) = link.value().attr("href").filter(|h| h.starts_with("http")) {
                let link_type = if is_pdf_url(href) { LinkType::Pdf } else { LinkType::Main };
                aux.add_link(Link::new(href, link_type, &SourceType::GoogleScholar));
            }
        }

        Some(
            CandidateRecord::new(index, SourceType::GoogleScholar)
                .with_bib(bib)
                .with_aux(aux),
        )
    }
}

fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .collect::<String>()
        .replace('\u{a0}', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[async_trait]
impl Source for GoogleScholarSource {
    fn id(&self) -> &str {
        "google_scholar"
    }

    fn name(&self) -> &str {
        "Google Scholar"
    }

    fn source_type(&self) -> SourceType {
        SourceType::GoogleScholar
    }

    fn capabilities(&self) -> SourceCapabilities {
        if self.enabled {
            SourceCapabilities::SEARCH | SourceCapabilities::LOOKUP
        } else {
            SourceCapabilities::empty()
        }
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<CandidateRecord>, SourceError> {
        self.ensure_enabled()?;
        let url = format!(
            "{}/scholar?hl=en&q={}&num={}",
            self.base_url,
            urlencoding::encode(&query.title),
            query.max_results.min(20)
        );
        let html = self
            .client
            .get_text_with_headers(self.id(), &url, browser_headers())
            .await?;
        if html.contains("gs_captcha") || html.contains("id=\"recaptcha\"") {
            return Err(SourceError::RateLimit);
        }
        Ok(self.parse_results(&html))
    }

    /// `bib_url` is the BibTeX export link recorded in `aux.scholar_bib_url`
    async fn fetch_by_id(&self, bib_url: &str) -> Result<Option<CandidateRecord>, SourceError> {
        self.ensure_enabled()?;
        self.validate_id(bib_url)?;
        let Some(text) = found(
            self.client
                .get_text_with_headers(self.id(), bib_url, browser_headers())
                .await,
        )?
        else {
            return Ok(None);
        };

        let bib = parse_bibtex_entry(&text)
            .ok_or_else(|| SourceError::Parse("Google Scholar returned no BibTeX entry".to_string()))?;
        let aux = AuxData {
            authors: parse_author_list(bib.author().unwrap_or("")),
            ..Default::default()
        };
        Ok(Some(
            CandidateRecord::new(0, SourceType::GoogleScholar)
                .with_bib(bib)
                .with_aux(aux),
        ))
    }
}

struct BibCursor {
    chars: Vec<char>,
    pos: usize,
}

impl BibCursor {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn skip_while(&mut self, pred: impl Fn(char) -> bool) {
        while self.peek().is_some_and(&pred) {
            self.pos += 1;
        }
    }

    fn take_until(&mut self, stop: impl Fn(char) -> bool) -> String {
        let start = self.pos;
        self.skip_while(|c| !stop(c));
        self.chars[start..self.pos].iter().collect()
    }

    /// Read a `{...}` or `"..."` delimited value; the cursor sits on the opening delimiter
    fn take_delimited(&mut self, close: char) -> String {
        self.pos += 1;
        let mut depth = 0usize;
        let mut out = String::new();
        while let Some(c) = self.peek() {
            self.pos += 1;
            match c {
                '{' => depth += 1,
                '}' if depth == 0 && close == '}' => return out,
                '}' => depth = depth.saturating_sub(1),
                '"' if depth == 0 && close == '"' => return out,
                _ => {}
            }
            out.push(c);
        }
        out
    }
}

/// Parse the first entry of a BibTeX document.
///
/// Supports `{}`-, `""`- and bare-delimited values; inner braces are dropped.
pub fn parse_bibtex_entry(text: &str) -> Option<BibFields> {
    let start = text.find('@')?;
    let rest = &text[start + 1..];
    let open = rest.find(['{', '('])?;
    let entry_type = rest[..open].trim().to_lowercase();
    if entry_type.is_empty() {
        return None;
    }

    let mut cursor = BibCursor {
        chars: rest[open + 1..].chars().collect(),
        pos: 0,
    };
    let key = cursor.take_until(|c| c == ',' || c == '}');
    let mut bib = BibFields::new()
        .with("ENTRYTYPE", entry_type)
        .with("ID", key.trim());

    loop {
        cursor.skip_while(|c| c.is_whitespace() || c == ',');
        match cursor.peek() {
            None | Some('}') | Some(')') => break,
            _ => {}
        }

        let name = cursor.take_until(|c| c == '=' || c == '}');
        if cursor.peek() != Some('=') {
            break;
        }
        cursor.pos += 1;
        cursor.skip_while(char::is_whitespace);

        let value = match cursor.peek() {
            Some('{') => cursor.take_delimited('}'),
            Some('"') => cursor.take_delimited('"'),
            _ => cursor.take_until(|c| c == ',' || c == '}').trim().to_string(),
        };
        let value = value
            .replace(['{', '}'], "")
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        bib.set(name.trim(), value);
    }

    Some(bib)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::PolitenessGovernor;

    const RESULTS_HTML: &str = r#"<html><body><div id="gs_res_ccl_mid">
<div class="gs_r gs_or gs_scl" data-cid="AbCdEf123" data-rp="0">
  <div class="gs_ggs gs_fl"><div class="gs_or_ggsm"><a href="https://repo.example.org/paper.pdf">[PDF] example.org</a></div></div>
  <div class="gs_ri">
    <h3 class="gs_rt"><span class="gs_ctg2">[HTML]</span> <a href="https://pubs.example.org/doi/10.1148/radiol.2020192224">Deep learning for radiology reports</a></h3>
    <div class="gs_a">J Smith, A Doe&nbsp;- Radiology, 2020&nbsp;- pubs.example.org</div>
    <div class="gs_rs">We study radiology reports with deep models …</div>
  </div>
</div>
<div class="gs_r gs_or gs_scl" data-cid="ZzZ999">
  <div class="gs_ri">
    <h3 class="gs_rt"><span>[CITATION]</span> A citation-only result</h3>
    <div class="gs_a">B Roe - 1999</div>
  </div>
</div>
</div></body></html>"#;

    fn source(enabled: bool) -> GoogleScholarSource {
        let client = Arc::new(HttpClient::new(Arc::new(PolitenessGovernor::new())).unwrap());
        GoogleScholarSource::new(client).enabled(enabled)
    }

    #[test]
    fn test_source_disabled_by_default() {
        let source = source(false);
        assert!(source.capabilities().is_empty());
        assert!(source.ensure_enabled().is_err());
    }

    #[test]
    fn test_parse_results() {
        let results = source(true).parse_results(RESULTS_HTML);
        assert_eq!(results.len(), 2);

        let first = &results[0];
        assert_eq!(first.bib.title(), Some("Deep learning for radiology reports"));
        assert_eq!(first.bib.author(), Some("J Smith and A Doe"));
        assert_eq!(first.bib.year(), Some("2020"));
        assert_eq!(first.bib.get("journal"), Some("Radiology"));
        assert_eq!(first.aux.scholarid.as_deref(), Some("AbCdEf123"));
        assert!(first.aux.scholar_bib_url.as_deref().unwrap().contains("info:AbCdEf123"));
        assert_eq!(first.aux.authors[0].family, "Smith");
        assert!(first.aux.urls.iter().any(|l| l.link_type == LinkType::Pdf));
        assert_eq!(first.bib.doi(), Some("10.1148/radiol.2020192224"));

        let second = &results[1];
        assert_eq!(second.bib.title(), Some("A citation-only result"));
        assert_eq!(second.bib.year(), Some("1999"));
        assert!(second.bib.get("journal").is_none());
        assert!(second.bib.doi().is_none());
    }

    #[test]
    fn test_parse_bibtex_entry() {
        let text = r#"@article{smith2020deep,
  title={Deep learning for {R}adiology reports},
  author={Smith, John and Doe, Alice},
  journal="Radiology",
  volume={12},
  year=2020,
  publisher={RSNA}
}"#;
        let bib = parse_bibtex_entry(text).unwrap();
        assert_eq!(bib.entry_type(), Some("article"));
        assert_eq!(bib.cite_key(), Some("smith2020deep"));
        assert_eq!(bib.title(), Some("Deep learning for Radiology reports"));
        assert_eq!(bib.author(), Some("Smith, John and Doe, Alice"));
        assert_eq!(bib.get("journal"), Some("Radiology"));
        assert_eq!(bib.year(), Some("2020"));
        assert_eq!(bib.get("publisher"), Some("RSNA"));
    }

    #[test]
    fn test_parse_bibtex_garbage() {
        assert!(parse_bibtex_entry("<html>blocked</html>").is_none());
    }

    #[tokio::test]
    async fn test_fetch_bib() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/scholar.bib")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body("@inproceedings{roe1999a,\n title={A result},\n author={Roe, Bob},\n booktitle={Proc},\n year={1999}\n}\n")
            .create_async()
            .await;

        let source = source(true).with_base_url(server.url());
        let url = source.bib_url("ZzZ999");
        let candidate = source.fetch_by_id(&url).await.unwrap().unwrap();

        mock.assert_async().await;
        assert_eq!(candidate.bib.year(), Some("1999"));
        assert_eq!(candidate.aux.authors[0].family, "Roe");
    }
}
