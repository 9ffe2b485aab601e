/// Build system error types
use std::path::PathBuf;
use thiserror::Error;

pub type BuildResult<T> = Result<T, BuildError>;

/// Errors are `Clone` so that a single resolution failure can be reported
/// against every target that reaches it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("Configuration mismatch in {path}: {reason}")]
    ConfigurationMismatch { path: PathBuf, reason: String },

    #[error("Unresolved import: '{unit}' uses module '{name}', which is not defined")]
    UnresolvedImport { unit: String, name: String },

    #[error("Circular dependency detected: {}", .cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },

    #[error("Ambiguous target '{target}', candidates: {}", .candidates.join(", "))]
    AmbiguousTarget {
        target: String,
        candidates: Vec<String>,
    },

    #[error("Target not found: {target}")]
    UnknownTarget { target: String },

    #[error("{action} failed:\n{diagnostics}")]
    ToolchainFailure { action: String, diagnostics: String },

    #[error("{action} was not started because the build stopped at the first failure")]
    Cancelled { action: String },

    #[error("Profile not found: {0}")]
    ProfileNotFound(String),

    #[error("Invalid profile: {0}")]
    InvalidProfile(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Build cache error: {0}")]
    CacheError(String),

    #[error("I/O error at {path}: {error}")]
    IoError { path: PathBuf, error: String },

    #[error("Build failed: {0}")]
    BuildFailed(String),
}

impl BuildError {
    /// Create an I/O error with path context
    pub fn io(path: impl Into<PathBuf>, error: std::io::Error) -> Self {
        Self::IoError {
            path: path.into(),
            error: error.to_string(),
        }
    }

    /// Create a configuration mismatch error
    pub fn mismatch(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::ConfigurationMismatch {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create an unresolved import error
    pub fn unresolved(unit: impl Into<String>, name: impl Into<String>) -> Self {
        Self::UnresolvedImport {
            unit: unit.into(),
            name: name.into(),
        }
    }

    /// Create a toolchain failure carrying the tool's diagnostics verbatim
    pub fn toolchain(action: impl Into<String>, diagnostics: impl Into<String>) -> Self {
        Self::ToolchainFailure {
            action: action.into(),
            diagnostics: diagnostics.into(),
        }
    }

    /// Short machine-readable name of the error kind
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConfigurationMismatch { .. } => "configuration-mismatch",
            Self::UnresolvedImport { .. } => "unresolved-import",
            Self::CyclicDependency { .. } => "cyclic-dependency",
            Self::AmbiguousTarget { .. } => "ambiguous-target",
            Self::UnknownTarget { .. } => "unknown-target",
            Self::ToolchainFailure { .. } => "toolchain-failure",
            Self::Cancelled { .. } => "cancelled",
            Self::ProfileNotFound(_) | Self::InvalidProfile(_) => "profile",
            Self::Config(_) => "config",
            Self::CacheError(_) => "cache",
            Self::IoError { .. } => "io",
            Self::BuildFailed(_) => "build",
        }
    }
}

impl From<strata_config::ConfigError> for BuildError {
    fn from(error: strata_config::ConfigError) -> Self {
        Self::Config(error.to_string())
    }
}
