//! Configuration Loader
//!
//! Handles loading and merging configuration from multiple sources with proper precedence.

use crate::global::GlobalConfig;
use crate::project::{ProjectConfig, ToolchainConfig, DEFAULT_COMPILER};
use crate::{ConfigError, ConfigResult, PROJECT_CONFIG_FILE};
use std::env;
use std::path::{Path, PathBuf};

/// Configuration loader
///
/// Loads configuration from multiple sources and merges them with proper precedence:
/// 1. Global config (~/.strata/config.toml) - lowest priority
/// 2. Project config (./strata.toml) - overrides global
/// 3. Environment variables (STRATA_*) - overrides project
/// 4. CLI flags - highest priority (handled by caller)
pub struct ConfigLoader {
    /// Cached global config path
    global_config_path: Option<PathBuf>,
}

/// Merged configuration result
#[derive(Debug, Clone)]
pub struct Config {
    /// Project configuration
    pub project: ProjectConfig,

    /// Global configuration
    pub global: GlobalConfig,

    /// Project root directory (where strata.toml was found)
    pub project_root: Option<PathBuf>,

    /// Profile requested through STRATA_PROFILE
    pub env_profile: Option<String>,

    /// Job count requested through STRATA_JOBS
    pub env_jobs: Option<usize>,
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self {
            global_config_path: None,
        }
    }

    /// Use a specific global config file instead of ~/.strata/config.toml
    pub fn with_global_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.global_config_path = Some(path.into());
        self
    }

    /// Load configuration starting from the given directory
    ///
    /// Walks up the directory tree to find strata.toml, then loads and merges
    /// global config if it exists.
    pub fn load_from_directory(&mut self, start_dir: &Path) -> ConfigResult<Config> {
        let (project_root, project_config) = self.find_project_config(start_dir)?;
        let global_config = self.load_global_config().unwrap_or_default();
        self.finish(project_config, global_config, project_root)
    }

    /// Load configuration from a specific project config file
    pub fn load_from_file(&mut self, config_path: &Path) -> ConfigResult<Config> {
        let project_config = ProjectConfig::load_from_file(config_path)?;
        let global_config = self.load_global_config().unwrap_or_default();
        let project_root = config_path.parent().map(|p| p.to_path_buf());
        self.finish(project_config, global_config, project_root)
    }

    fn finish(
        &self,
        project: ProjectConfig,
        global: GlobalConfig,
        project_root: Option<PathBuf>,
    ) -> ConfigResult<Config> {
        let mut config = Config {
            project,
            global,
            project_root,
            env_profile: None,
            env_jobs: None,
        };
        self.apply_env_overrides(&mut config)?;
        Ok(config)
    }

    /// Find project configuration by walking up directory tree
    ///
    /// Returns (project_root, project_config); a missing file yields the default config
    fn find_project_config(
        &self,
        start_dir: &Path,
    ) -> ConfigResult<(Option<PathBuf>, ProjectConfig)> {
        let mut current = start_dir.to_path_buf();

        loop {
            let config_path = current.join(PROJECT_CONFIG_FILE);

            if config_path.exists() {
                let project_config = ProjectConfig::load_from_file(&config_path)?;
                return Ok((Some(current), project_config));
            }

            match current.parent() {
                Some(parent) => current = parent.to_path_buf(),
                None => return Ok((None, ProjectConfig::default())),
            }
        }
    }

    /// Load global configuration from ~/.strata/config.toml
    fn load_global_config(&mut self) -> ConfigResult<GlobalConfig> {
        let path = match &self.global_config_path {
            Some(path) => path.clone(),
            None => {
                let path = GlobalConfig::global_config_path()?;
                self.global_config_path = Some(path.clone());
                path
            }
        };

        // Global config is optional - if it doesn't exist, return default
        if !path.exists() {
            return Ok(GlobalConfig::default());
        }

        GlobalConfig::load_from_file(&path)
    }

    /// Apply environment variable overrides
    ///
    /// STRATA_FC replaces the compiler, STRATA_PROFILE selects the default
    /// profile and STRATA_JOBS the default job count.
    fn apply_env_overrides(&self, config: &mut Config) -> ConfigResult<()> {
        if let Ok(compiler) = env::var("STRATA_FC") {
            if !compiler.trim().is_empty() {
                config
                    .project
                    .toolchain
                    .get_or_insert_with(ToolchainConfig::default)
                    .compiler = Some(compiler);
            }
        }

        if let Ok(profile) = env::var("STRATA_PROFILE") {
            if !profile.trim().is_empty() {
                config.env_profile = Some(profile);
            }
        }

        if let Ok(jobs) = env::var("STRATA_JOBS") {
            let parsed = jobs
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| ConfigError::InvalidValue {
                    field: "STRATA_JOBS".to_string(),
                    reason: format!("expected a positive integer, got '{}'", jobs),
                })?;
            config.env_jobs = Some(parsed);
        }

        Ok(())
    }

    /// Get the global configuration directory (~/.strata)
    pub fn global_config_dir() -> ConfigResult<PathBuf> {
        let home = dirs::home_dir().ok_or(ConfigError::HomeNotFound)?;
        Ok(home.join(".strata"))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    /// Configuration for a directory without strata.toml
    pub fn detached(root: impl Into<PathBuf>) -> Self {
        Self {
            project: ProjectConfig::default(),
            global: GlobalConfig::default(),
            project_root: Some(root.into()),
            env_profile: None,
            env_jobs: None,
        }
    }

    /// Get the project root directory
    pub fn project_root(&self) -> Option<&Path> {
        self.project_root.as_deref()
    }

    /// Get the project name
    pub fn project_name(&self) -> Option<&str> {
        self.project.project_name()
    }

    /// Check if this is a project (has strata.toml)
    pub fn is_project(&self) -> bool {
        self.project_root.is_some()
    }

    /// Effective compiler (project/env > global > default)
    pub fn compiler(&self) -> &str {
        self.project
            .compiler()
            .or_else(|| self.global.default_compiler())
            .unwrap_or(DEFAULT_COMPILER)
    }

    /// Effective linker (project > compiler)
    pub fn linker(&self) -> &str {
        self.project.linker().unwrap_or_else(|| self.compiler())
    }

    /// Flag naming the module interface output directory
    pub fn module_output_flag(&self) -> &str {
        self.project
            .toolchain
            .as_ref()
            .and_then(|t| t.module_output_flag.as_deref())
            .unwrap_or("-J")
    }

    /// Flag adding a module search directory
    pub fn include_flag(&self) -> &str {
        self.project
            .toolchain
            .as_ref()
            .and_then(|t| t.include_flag.as_deref())
            .unwrap_or("-I")
    }

    /// Effective default profile (env > global > "dev")
    pub fn default_profile(&self) -> &str {
        self.env_profile
            .as_deref()
            .or_else(|| self.global.default_profile())
            .unwrap_or("dev")
    }

    /// Effective default job count (env > global > available cores)
    pub fn default_jobs(&self) -> usize {
        self.env_jobs
            .or_else(|| self.global.default_jobs())
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1)
            })
    }
}
