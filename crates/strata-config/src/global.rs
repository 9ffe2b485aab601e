//! Global Configuration (~/.strata/config.toml)
//!
//! Handles user-level configuration stored in `~/.strata/config.toml`.

use crate::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Global user configuration from ~/.strata/config.toml
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct GlobalConfig {
    /// Default settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub defaults: Option<DefaultsConfig>,
}

/// Default settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct DefaultsConfig {
    /// Compiler used when a project does not name one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compiler: Option<String>,

    /// Default number of parallel jobs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jobs: Option<usize>,

    /// Default build profile
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
}

impl GlobalConfig {
    /// Load global configuration from a file
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound(path.to_path_buf())
            } else {
                ConfigError::IoError(e)
            }
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::TomlParseError {
            file: path.to_path_buf(),
            error: e,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the global configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if let Some(defaults) = &self.defaults {
            if defaults.jobs == Some(0) {
                return Err(ConfigError::InvalidValue {
                    field: "defaults.jobs".to_string(),
                    reason: "must be at least 1".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Get the global config file path (~/.strata/config.toml)
    pub fn global_config_path() -> ConfigResult<PathBuf> {
        let home = dirs::home_dir().ok_or(ConfigError::HomeNotFound)?;
        Ok(home.join(".strata").join("config.toml"))
    }

    /// Default compiler, if set
    pub fn default_compiler(&self) -> Option<&str> {
        self.defaults.as_ref().and_then(|d| d.compiler.as_deref())
    }

    /// Default job count, if set
    pub fn default_jobs(&self) -> Option<usize> {
        self.defaults.as_ref().and_then(|d| d.jobs)
    }

    /// Default profile, if set
    pub fn default_profile(&self) -> Option<&str> {
        self.defaults.as_ref().and_then(|d| d.profile.as_deref())
    }
}
