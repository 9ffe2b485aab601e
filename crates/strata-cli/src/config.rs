//! CLI configuration via environment variables

use std::env;

/// CLI configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Default to JSON output (STRATA_JSON=1)
    pub default_json: bool,
    /// Log filter directive (STRATA_LOG)
    pub log_filter: Option<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self {
            default_json: env::var("STRATA_JSON")
                .map(|v| {
                    let lower = v.to_lowercase();
                    lower == "1" || lower == "true" || lower == "json"
                })
                .unwrap_or(false),
            log_filter: env::var("STRATA_LOG").ok().filter(|v| !v.trim().is_empty()),
        }
    }

    /// Filter directive for the log subscriber
    pub fn log_directive(&self, verbose: bool) -> String {
        match &self.log_filter {
            Some(filter) => filter.clone(),
            None if verbose => "info".to_string(),
            None => "warn".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}
