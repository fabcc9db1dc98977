//! Analyzer settings.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ConfigError;

/// Tunables for one [`Analyzer`](crate::analyzer::Analyzer).
///
/// Every field has a default, so an empty YAML mapping is a valid config.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnalyzerConfig {
    /// Maximum nesting depth the extractor descends into.
    pub max_depth: usize,
    /// Hard timeout for one history-archive load.
    pub history_timeout_secs: u64,
    /// Lookback window, in days, for observed values fetched from the archive.
    pub history_days: u32,
    /// Minimum similarity ratio for a fuzzy suggestion.
    pub similarity_threshold: f64,
    /// Report unknown filters, tests and variables in templates as warnings.
    pub report_unknown_template_names: bool,
    /// Additional template globals provided by extensions.
    pub extra_template_globals: Vec<String>,
    /// Additional domains whose states are never validated.
    pub free_form_domains: Vec<String>,
    /// Prefix for rule edit links in the issue feed.
    pub edit_link_base: String,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        AnalyzerConfig {
            max_depth: 20,
            history_timeout_secs: 10,
            history_days: 30,
            similarity_threshold: 0.6,
            report_unknown_template_names: true,
            extra_template_globals: Vec::new(),
            free_form_domains: Vec::new(),
            edit_link_base: "/config/automation/edit/".to_string(),
        }
    }
}

impl AnalyzerConfig {
    /// Parse a YAML config and check value ranges.
    pub fn from_yaml(input: &str) -> Result<Self, ConfigError> {
        if input.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: AnalyzerConfig =
            serde_saphyr::from_str(input).map_err(|e| ConfigError::Syntax(e.to_string()))?;
        config.check()?;
        Ok(config)
    }

    pub fn history_timeout(&self) -> Duration {
        Duration::from_secs(self.history_timeout_secs)
    }

    fn check(&self) -> Result<(), ConfigError> {
        if self.max_depth == 0 {
            return Err(ConfigError::Invalid {
                field: "max_depth",
                message: "must be at least 1".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(ConfigError::Invalid {
                field: "similarity_threshold",
                message: format!("must be within [0, 1], got {}", self.similarity_threshold),
            });
        }
        if self.history_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "history_timeout_secs",
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}
