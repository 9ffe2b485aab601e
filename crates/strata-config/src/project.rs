//! Project Configuration (strata.toml)
//!
//! Handles project-level configuration stored in `strata.toml` at the project root.

use crate::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Default source root, relative to the project root
pub const DEFAULT_SOURCE_DIR: &str = "src";
/// Default module root, relative to the project root
pub const DEFAULT_MODULE_DIR: &str = "src/modules";
/// Default build output root, relative to the project root
pub const DEFAULT_BUILD_DIR: &str = "build";
/// Default compiler command
pub const DEFAULT_COMPILER: &str = "gfortran";

/// Project configuration from strata.toml
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct ProjectConfig {
    /// Project metadata
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<ProjectSection>,

    /// Directory layout
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layout: Option<LayoutConfig>,

    /// Compiler and linker commands
    #[serde(skip_serializing_if = "Option::is_none")]
    pub toolchain: Option<ToolchainConfig>,

    /// Build profiles by name
    #[serde(default)]
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub profile: BTreeMap<String, ProfileSection>,

    /// Additional link requirements
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<LinkConfig>,
}

/// Project metadata
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ProjectSection {
    /// Project name
    pub name: String,
}

/// Directory layout, all paths relative to the project root
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct LayoutConfig {
    /// Source root holding programs (default: "src")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<PathBuf>,

    /// Module root (default: "src/modules")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modules: Option<PathBuf>,

    /// Build output and cache root (default: "build")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build: Option<PathBuf>,
}

/// Toolchain commands
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct ToolchainConfig {
    /// Compiler command (default: "gfortran")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compiler: Option<String>,

    /// Linker command (default: the compiler)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub linker: Option<String>,

    /// Flag naming the module interface output directory (default: "-J")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module_output_flag: Option<String>,

    /// Flag adding a module search directory (default: "-I")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include_flag: Option<String>,
}

/// A `[profile.<name>]` table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct ProfileSection {
    /// Base profile to inherit from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inherits: Option<String>,

    /// Compile flags (replace the inherited ones)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flags: Option<Vec<String>>,

    /// Link flags (replace the inherited ones)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link_flags: Option<Vec<String>>,

    /// Run independent actions concurrently
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parallel: Option<bool>,

    /// Reuse cached scan and resolution results
    #[serde(skip_serializing_if = "Option::is_none")]
    pub incremental: Option<bool>,
}

/// `[link]` table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct LinkConfig {
    /// Module name -> extra unit ids linked whenever that module is linked
    #[serde(default)]
    pub extra: BTreeMap<String, Vec<String>>,
}

impl ProjectConfig {
    /// Load project configuration from a file
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

    /// Validate the project configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if let Some(project) = &self.project {
            if project.name.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "project.name".to_string(),
                    reason: "name cannot be empty".to_string(),
                });
            }
        }

        if let Some(toolchain) = &self.toolchain {
            for (field, value) in [
                ("toolchain.compiler", &toolchain.compiler),
                ("toolchain.linker", &toolchain.linker),
            ] {
                if matches!(value, Some(v) if v.trim().is_empty()) {
                    return Err(ConfigError::InvalidValue {
                        field: field.to_string(),
                        reason: "command cannot be empty".to_string(),
                    });
                }
            }
        }

        for (name, section) in &self.profile {
            if name.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "profile".to_string(),
                    reason: "profile name cannot be empty".to_string(),
                });
            }
            if section.inherits.as_deref() == Some(name.as_str()) {
                return Err(ConfigError::InvalidValue {
                    field: format!("profile.{}.inherits", name),
                    reason: "a profile cannot inherit from itself".to_string(),
                });
            }
        }

        if let Some(link) = &self.link {
            for (module, extras) in &link.extra {
                if extras.iter().any(|e| e.is_empty()) {
                    return Err(ConfigError::InvalidValue {
                        field: format!("link.extra.{}", module),
                        reason: "unit ids cannot be empty".to_string(),
                    });
                }
            }
        }

        Ok(())
    }

    /// Get the project name, if present
    pub fn project_name(&self) -> Option<&str> {
        self.project.as_ref().map(|p| p.name.as_str())
    }

    /// Source root relative to the project root
    pub fn source_dir(&self) -> PathBuf {
        self.layout
            .as_ref()
            .and_then(|l| l.source.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SOURCE_DIR))
    }

    /// Module root relative to the project root
    pub fn module_dir(&self) -> PathBuf {
        self.layout
            .as_ref()
            .and_then(|l| l.modules.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_MODULE_DIR))
    }

    /// Build root relative to the project root
    pub fn build_dir(&self) -> PathBuf {
        self.layout
            .as_ref()
            .and_then(|l| l.build.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_BUILD_DIR))
    }

    /// Configured compiler, if any
    pub fn compiler(&self) -> Option<&str> {
        self.toolchain.as_ref().and_then(|t| t.compiler.as_deref())
    }

    /// Configured linker, if any
    pub fn linker(&self) -> Option<&str> {
        self.toolchain.as_ref().and_then(|t| t.linker.as_deref())
    }

    /// Extra link units declared for a module
    pub fn extra_link_units(&self) -> BTreeMap<String, Vec<String>> {
        self.link
            .as_ref()
            .map(|l| {
                l.extra
                    .iter()
                    .map(|(k, v)| (k.to_lowercase(), v.iter().map(|u| u.to_lowercase()).collect()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Merge another project config into this one
    /// Other config takes precedence for non-None values
    pub fn merge(&mut self, other: &ProjectConfig) {
        if other.project.is_some() {
            self.project = other.project.clone();
        }
        if other.layout.is_some() {
            self.layout = other.layout.clone();
        }
        if other.toolchain.is_some() {
            self.toolchain = other.toolchain.clone();
        }
        if !other.profile.is_empty() {
            self.profile.extend(other.profile.clone());
        }
        if other.link.is_some() {
            self.link = other.link.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_project_config() {
        let toml = r#"
[project]
name = "heat"
"#;

        let config: ProjectConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.project_name(), Some("heat"));
        assert_eq!(config.source_dir(), PathBuf::from("src"));
        assert_eq!(config.module_dir(), PathBuf::from("src/modules"));
        assert_eq!(config.build_dir(), PathBuf::from("build"));
    }

    #[test]
    fn test_parse_full_project_config() {
        let toml = r#"
[project]
name = "heat"

[layout]
source = "app"
modules = "lib"
build = "out"

[toolchain]
compiler = "ifx"
linker = "ifx"
module-output-flag = "-module"
include-flag = "-I"

[profile.release]
flags = ["-O3"]

[profile.bench]
inherits = "release"
flags = ["-O3", "-xHost"]
link-flags = ["-static"]

[link.extra]
solver = ["solver:fast_path"]
"#;

        let config: ProjectConfig = toml::from_str(toml).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.source_dir(), PathBuf::from("app"));
        assert_eq!(config.module_dir(), PathBuf::from("lib"));
        assert_eq!(config.compiler(), Some("ifx"));
        assert_eq!(config.profile.len(), 2);
        assert_eq!(
            config.profile["bench"].link_flags,
            Some(vec!["-static".to_string()])
        );
        assert_eq!(
            config.extra_link_units().get("solver"),
            Some(&vec!["solver:fast_path".to_string()])
        );
    }

    #[test]
    fn test_unknown_field_rejected() {
        let toml = r#"
[layout]
sources = "src"
"#;
        assert!(toml::from_str::<ProjectConfig>(toml).is_err());
    }

    #[test]
    fn test_self_inheriting_profile_rejected() {
        let toml = r#"
[profile.loop]
inherits = "loop"
"#;
        let config: ProjectConfig = toml::from_str(toml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_compiler_rejected() {
        let config = ProjectConfig {
            toolchain: Some(ToolchainConfig {
                compiler: Some("  ".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_merge_configs() {
        let mut base = ProjectConfig::default();
        let override_config = ProjectConfig {
            project: Some(ProjectSection {
                name: "override".to_string(),
            }),
            ..Default::default()
        };

        base.merge(&override_config);
        assert_eq!(base.project_name(), Some("override"));
    }
}
