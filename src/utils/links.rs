//! URL and identifier helpers shared by the sources and the record model.

use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

static DOI_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r#"(10\.\d{4,9}/[^\s"<>?#&]+)"#).unwrap());
static TAG_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").unwrap());

/// Canonical form used to compare links: no scheme, no `www.`, no trailing slash, lowercase
pub fn normalize_url(raw: &str) -> String {
    let raw = raw.trim();
    let normalized = match Url::parse(raw) {
        Ok(url) => {
            let host = url.host_str().unwrap_or("");
            let host = host.strip_prefix("www.").unwrap_or(host);
            let mut out = format!("{}{}", host, url.path().trim_end_matches('/'));
            if let Some(query) = url.query() {
                out.push('?');
                out.push_str(query);
            }
            out
        }
        Err(_) => {
            let stripped = raw
                .trim_start_matches("https://")
                .trim_start_matches("http://");
            let stripped = stripped.strip_prefix("www.").unwrap_or(stripped);
            stripped.trim_end_matches('/').to_string()
        }
    };
    normalized.to_lowercase()
}

/// Whether a URL points at a PDF
pub fn is_pdf_url(url: &str) -> bool {
    let lower = url.to_lowercase();
    let path = lower.split(['?', '#']).next().unwrap_or("");
    path.ends_with(".pdf") || path.contains("/pdf/") || lower.contains("type=pdf")
}

/// Pull a DOI out of free text, a doi.org URL or a publisher URL that embeds one
pub fn extract_doi(text: &str) -> Option<String> {
    DOI_PATTERN
        .captures(text)
        .map(|caps| caps[1].trim_end_matches(['.', ',', ';', ')']).to_string())
}

/// Drop markup tags (JATS, HTML) and collapse whitespace
pub fn strip_tags(text: &str) -> String {
    TAG_PATTERN
        .replace_all(text, " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
