//! Source query model.

use serde::{Deserialize, Serialize};

/// Title search sent to a metadata source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchQuery {
    /// Title to look for
    pub title: String,

    /// Contact address sent to sources that ask for one (polite pools)
    #[serde(default)]
    pub identity: Option<String>,

    /// Maximum results requested
    #[serde(default = "default_max_results")]
    pub max_results: usize,

    /// Optional publication year hint
    #[serde(default)]
    pub year: Option<String>,
}

fn default_max_results() -> usize {
    5
}

impl SearchQuery {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            identity: None,
            max_results: default_max_results(),
            year: None,
        }
    }

    pub fn identity(mut self, identity: Option<String>) -> Self {
        self.identity = identity;
        self
    }

    pub fn max_results(mut self, max: usize) -> Self {
        self.max_results = max;
        self
    }

    pub fn year(mut self, year: impl Into<String>) -> Self {
        self.year = Some(year.into());
        self
    }
}
