//! Build profile management
//!
//! A profile is a named set of compile and link flags. `dev` and `release`
//! are built in; `[profile.<name>]` tables override them or define new
//! profiles, optionally inheriting from another one.

use crate::error::{BuildError, BuildResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use strata_config::ProfileSection;

/// Build profile
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    /// Development profile (default)
    Dev,
    /// Release profile (optimized)
    Release,
    /// Profile defined in strata.toml
    Custom(String),
}

impl Profile {
    /// Parse profile from string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> BuildResult<Self> {
        match s.trim().to_lowercase().as_str() {
            "" => Err(BuildError::InvalidProfile(
                "profile name cannot be empty".to_string(),
            )),
            "dev" => Ok(Self::Dev),
            "release" => Ok(Self::Release),
            custom => Ok(Self::Custom(custom.to_string())),
        }
    }

    /// Get profile name
    pub fn name(&self) -> &str {
        match self {
            Self::Dev => "dev",
            Self::Release => "release",
            Self::Custom(name) => name,
        }
    }

    /// Check if this is a built-in profile
    pub fn is_builtin(&self) -> bool {
        matches!(self, Self::Dev | Self::Release)
    }

    /// Get default configuration for this profile
    pub fn default_config(&self) -> ProfileConfig {
        match self {
            Self::Dev => ProfileConfig {
                name: "dev".to_string(),
                compile_flags: strings(&["-O0", "-g", "-fcheck=all", "-Wall"]),
                link_flags: Vec::new(),
                parallel: true,
                incremental: true,
            },
            Self::Release => ProfileConfig {
                name: "release".to_string(),
                compile_flags: strings(&["-O3"]),
                link_flags: Vec::new(),
                parallel: true,
                incremental: true,
            },
            Self::Custom(name) => ProfileConfig {
                name: name.clone(),
                ..Self::Dev.default_config()
            },
        }
    }
}

#[allow(clippy::derivable_impls)]
impl Default for Profile {
    fn default() -> Self {
        Self::Dev
    }
}

impl std::fmt::Display for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

fn strings(flags: &[&str]) -> Vec<String> {
    flags.iter().map(|s| s.to_string()).collect()
}

/// Resolved profile configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileConfig {
    /// Profile name
    pub name: String,
    /// Flags passed to every compile
    pub compile_flags: Vec<String>,
    /// Flags passed to every link
    pub link_flags: Vec<String>,
    /// Run independent actions concurrently
    pub parallel: bool,
    /// Reuse the persistent analysis cache
    pub incremental: bool,
}

impl ProfileConfig {
    /// Create from profile with defaults
    pub fn from_profile(profile: &Profile) -> Self {
        profile.default_config()
    }

    /// Apply a `[profile.<name>]` table; present flag lists replace inherited ones
    pub fn merge_with_section(&mut self, section: &ProfileSection) {
        if let Some(flags) = &section.flags {
            self.compile_flags = flags.clone();
        }
        if let Some(flags) = &section.link_flags {
            self.link_flags = flags.clone();
        }
        if let Some(parallel) = section.parallel {
            self.parallel = parallel;
        }
        if let Some(incremental) = section.incremental {
            self.incremental = incremental;
        }
    }
}

/// Profile manager - handles profile loading and inheritance
#[derive(Debug, Clone)]
pub struct ProfileManager {
    /// Available profiles
    profiles: HashMap<String, ProfileConfig>,
}

impl ProfileManager {
    /// Create new profile manager with the built-in profiles
    pub fn new() -> Self {
        let mut profiles = HashMap::new();
        profiles.insert("dev".to_string(), Profile::Dev.default_config());
        profiles.insert("release".to_string(), Profile::Release.default_config());
        Self { profiles }
    }

    /// Built-in profiles plus the `[profile.*]` tables of a project
    pub fn from_sections(sections: &BTreeMap<String, ProfileSection>) -> BuildResult<Self> {
        let mut manager = Self::new();
        for name in sections.keys() {
            let config = resolve(name, sections, &mut Vec::new())?;
            manager.profiles.insert(name.clone(), config);
        }
        Ok(manager)
    }

    /// Get profile configuration
    pub fn get(&self, profile: &Profile) -> BuildResult<ProfileConfig> {
        let name = profile.name();
        self.profiles
            .get(name)
            .cloned()
            .ok_or_else(|| BuildError::ProfileNotFound(name.to_string()))
    }

    /// Check if profile exists
    pub fn has_profile(&self, name: &str) -> bool {
        self.profiles.contains_key(name)
    }

    /// List all available profiles
    pub fn list_profiles(&self) -> Vec<String> {
        let mut names: Vec<_> = self.profiles.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for ProfileManager {
    fn default() -> Self {
        Self::new()
    }
}

fn resolve(
    name: &str,
    sections: &BTreeMap<String, ProfileSection>,
    chain: &mut Vec<String>,
) -> BuildResult<ProfileConfig> {
    if chain.iter().any(|n| n == name) {
        chain.push(name.to_string());
        return Err(BuildError::InvalidProfile(format!(
            "inheritance cycle: {}",
            chain.join(" -> ")
        )));
    }

    let profile = Profile::from_str(name)?;
    let Some(section) = sections.get(name) else {
        return if profile.is_builtin() {
            Ok(profile.default_config())
        } else {
            Err(BuildError::ProfileNotFound(name.to_string()))
        };
    };

    chain.push(name.to_string());
    let mut config = match &section.inherits {
        Some(base) => resolve(base, sections, chain)?,
        None => profile.default_config(),
    };
    chain.pop();

    config.name = name.to_string();
    config.merge_with_section(section);
    Ok(config)
}
