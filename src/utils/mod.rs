//! Utility modules supporting record reconciliation.
//!
//! - [`normalize_title`], [`generate_id`], [`parse_author_list`]: canonical record identity
//! - [`title_distance`], [`author_distance`], [`rerank_by_similarity`]: match scoring
//! - [`PolitenessGovernor`]: per-source pacing of outbound calls
//! - [`HttpClient`]: shared HTTP client routed through the governor
//! - [`CorpusStats`]: metadata coverage counts

mod http;
mod identity;
mod links;
mod politeness;
mod similarity;
mod stats;

pub use http::{advertised_rate_limit, browser_headers, default_user_agent, HttpClient};
pub use identity::{
    author_from_display_name, author_list_to_string, generate_id, normalize_title, parse_author_list,
    title_tokens, MAX_TITLE_LEN,
};
pub use links::{extract_doi, is_pdf_url, normalize_url, strip_tags};
pub use politeness::{parse_interval, PolitenessGovernor, RateLimit, SourcePacer};
pub use similarity::{author_distance, rerank_by_similarity, title_distance, Ranked, Tolerance};
pub use stats::CorpusStats;
