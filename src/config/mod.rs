//! Configuration management.
//!
//! Settings are layered: built-in defaults, then an optional TOML file,
//! then `LITREVIEW_*` environment variables (`__` separates nested keys,
//! e.g. `LITREVIEW_STORE__CACHE_FREE=true`).

mod file_config;

pub use file_config::ConfigFileError;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::utils::{PolitenessGovernor, RateLimit};

const ENV_PREFIX: &str = "LITREVIEW";
const CONFIG_FILE_NAME: &str = "litreview.toml";

/// Application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Contact identity sent to sources
    #[serde(default)]
    pub identity: IdentityConfig,

    /// Record store location and mode
    #[serde(default)]
    pub store: StoreConfig,

    /// Match acceptance thresholds
    #[serde(default)]
    pub matching: MatchingConfig,

    /// Per-source switches and keys
    #[serde(default)]
    pub sources: SourcesConfig,

    /// Starting rate limits per source
    #[serde(default = "default_source_rates")]
    pub source_rates: Vec<SourceRateConfig>,

    #[serde(default)]
    pub http: HttpConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            identity: IdentityConfig::default(),
            store: StoreConfig::default(),
            matching: MatchingConfig::default(),
            sources: SourcesConfig::default(),
            source_rates: default_source_rates(),
            http: HttpConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Email sent to Crossref, PubMed and Unpaywall
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite database file
    #[serde(default = "default_store_path")]
    pub path: PathBuf,

    /// Run without a persistent store
    #[serde(default)]
    pub cache_free: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            cache_free: false,
        }
    }
}

fn default_store_path() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("litreview").join("papers.sqlite"))
        .unwrap_or_else(|| PathBuf::from("./papers.sqlite"))
}

/// Distance thresholds for accepting a candidate as the same work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchingConfig {
    #[serde(default = "default_crossref_title_tolerance")]
    pub crossref_title_tolerance: f64,
    #[serde(default = "default_pubmed_title_tolerance")]
    pub pubmed_title_tolerance: f64,
    #[serde(default = "default_arxiv_title_tolerance")]
    pub arxiv_title_tolerance: f64,
    /// Author tolerance for source search matches
    #[serde(default = "default_author_tolerance")]
    pub author_tolerance: f64,
    /// Title threshold for approximate store lookups
    #[serde(default = "default_store_title_threshold")]
    pub store_title_threshold: f64,
    /// Author threshold for approximate store lookups
    #[serde(default = "default_store_author_threshold")]
    pub store_author_threshold: f64,
    /// Results requested per source search
    #[serde(default = "default_max_candidates")]
    pub max_candidates: usize,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            crossref_title_tolerance: default_crossref_title_tolerance(),
            pubmed_title_tolerance: default_pubmed_title_tolerance(),
            arxiv_title_tolerance: default_arxiv_title_tolerance(),
            author_tolerance: default_author_tolerance(),
            store_title_threshold: default_store_title_threshold(),
            store_author_threshold: default_store_author_threshold(),
            max_candidates: default_max_candidates(),
        }
    }
}

fn default_crossref_title_tolerance() -> f64 {
    0.1
}

fn default_pubmed_title_tolerance() -> f64 {
    0.4
}

fn default_arxiv_title_tolerance() -> f64 {
    0.35
}

fn default_author_tolerance() -> f64 {
    0.1
}

fn default_store_title_threshold() -> f64 {
    0.35
}

fn default_store_author_threshold() -> f64 {
    0.1
}

fn default_max_candidates() -> usize {
    5
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourcesConfig {
    /// Google Scholar scraping is off unless enabled
    #[serde(default)]
    pub google_scholar_enabled: bool,

    /// Semantic Scholar API key (optional, for higher rate limits)
    #[serde(default)]
    pub semantic_scholar_api_key: Option<String>,

    /// Base URL overrides keyed by source id, for mirrors and tests
    #[serde(default)]
    pub base_urls: std::collections::BTreeMap<String, String>,
}

impl SourcesConfig {
    pub fn base_url(&self, source: &str) -> Option<&str> {
        self.base_urls.get(source).map(String::as_str)
    }
}

/// Starting rate limit for one source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRateConfig {
    pub source: String,
    /// Calls allowed per interval
    pub limit: u32,
    /// Interval length in seconds
    pub interval_secs: f64,
}

impl SourceRateConfig {
    fn new(source: &str, limit: u32, interval_secs: f64) -> Self {
        Self {
            source: source.to_string(),
            limit,
            interval_secs,
        }
    }

    pub fn rate_limit(&self) -> Option<RateLimit> {
        if !self.interval_secs.is_finite() || self.interval_secs <= 0.0 {
            return None;
        }
        RateLimit::new(self.limit, Duration::from_secs_f64(self.interval_secs))
    }
}

fn default_source_rates() -> Vec<SourceRateConfig> {
    vec![
        SourceRateConfig::new("crossref", 50, 1.0),
        SourceRateConfig::new("pubmed", 3, 1.0),
        SourceRateConfig::new("arxiv", 1, 3.0),
        SourceRateConfig::new("semantic", 100, 300.0),
        SourceRateConfig::new("unpaywall", 10, 1.0),
        SourceRateConfig::new("google_scholar", 1, 5.0),
    ]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default)]
    pub user_agent: Option<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            user_agent: None,
        }
    }
}

fn default_timeout() -> u64 {
    30
}

fn default_connect_timeout() -> u64 {
    10
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// `json` for structured output, anything else for plain text
    #[serde(default)]
    pub format: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Politeness governor seeded with the configured rate limits
    pub fn governor(&self) -> PolitenessGovernor {
        self.source_rates
            .iter()
            .filter_map(|rate| rate.rate_limit().map(|limit| (rate.source.clone(), limit)))
            .fold(PolitenessGovernor::new(), |governor, (source, limit)| {
                governor.with_limit(source, limit)
            })
    }
}

/// Load configuration from an optional file plus the environment
pub fn load_config(path: Option<&Path>) -> Result<Config, config::ConfigError> {
    let mut builder = config::Config::builder();
    if let Some(path) = path {
        builder = builder.add_source(config::File::from(path));
    }
    let settings = builder
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    settings.try_deserialize()
}

/// Look for a config file in the working directory, then the user config directory
pub fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from(CONFIG_FILE_NAME);
    if local.is_file() {
        return Some(local);
    }
    default_config_path().filter(|path| path.is_file())
}

/// `<user config dir>/litreview/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("litreview").join("config.toml"))
}
