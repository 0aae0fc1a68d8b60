//! Reading and writing the TOML configuration file.
//!
//! ```toml
//! [identity]
//! email = "you@example.org"
//!
//! [store]
//! path = "~/.local/share/litreview/papers.sqlite"
//! cache_free = false
//!
//! [matching]
//! crossref_title_tolerance = 0.1
//! pubmed_title_tolerance = 0.4
//! arxiv_title_tolerance = 0.35
//! author_tolerance = 0.1
//!
//! [sources]
//! google_scholar_enabled = false
//! semantic_scholar_api_key = "your-api-key"
//!
//! [[source_rates]]
//! source = "crossref"
//! limit = 50
//! interval_secs = 1.0
//!
//! [logging]
//! level = "info"
//! ```

use std::path::Path;

use super::Config;

/// Configuration file errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigFileError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Serialize error: {0}")]
    Serialize(String),
}

impl Config {
    /// Load configuration from a TOML file, without environment overrides
    pub fn from_file(path: &Path) -> Result<Self, ConfigFileError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigFileError::Io(e.to_string()))?;

        toml::from_str(&content).map_err(|e| ConfigFileError::Parse(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories
    pub fn save(&self, path: &Path) -> Result<(), ConfigFileError> {
        let content = toml::to_string_pretty(self).map_err(|e| ConfigFileError::Serialize(e.to_string()))?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| ConfigFileError::Io(e.to_string()))?;
        }
        std::fs::write(path, content).map_err(|e| ConfigFileError::Io(e.to_string()))
    }
}
