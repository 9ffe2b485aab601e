//! Strata build engine
//!
//! Incremental builds for projects made of modules, submodules and programs
//! that import each other with `use`:
//! - Source discovery and unit classification
//! - Import scanning backed by a persistent per-file cache
//! - Transitive module closures with fixed-point invalidation
//! - Target selection by name, path or directory
//! - Build planning and parallel execution through a pluggable toolchain
//! - Build profiles and progress reporting

pub mod build_order;
pub mod builder;
pub mod cache;
pub mod catalog;
pub mod error;
pub mod executor;
pub mod fingerprint;
pub mod module_resolver;
pub mod output;
pub mod plan;
pub mod profile;
pub mod scanner;
pub mod targets;
pub mod toolchain;

// Re-export main types
pub use build_order::{BuildGraph, ClosureSolver, ModuleNode};
pub use builder::{
    Analysis, BuildConfig, BuildReport, BuildStats, Builder, TargetReport, UnitDependencies,
};
pub use cache::{prune_orphans, CacheEntry, CacheStore, DiskStore, MemoryStore};
pub use catalog::{Catalog, RejectedUnit, SourceFile, SourceLayout, SourceUnit, UnitKind};
pub use error::{BuildError, BuildResult};
pub use executor::{ActionReport, ActionStatus, Executor, ExecutorConfig};
pub use fingerprint::{compute_fingerprint, compute_hash};
pub use module_resolver::{ModuleResolver, Resolution};
pub use output::{BuildProgress, OutputMode};
pub use plan::{ActionKind, ArtifactLayout, BuildAction, BuildPlan, PlanOutcome, Planner};
pub use profile::{Profile, ProfileConfig, ProfileManager};
pub use scanner::{extract_imports, ImportScanner, ScanOutcome};
pub use targets::{select_targets, BuildTarget, TargetRequest};
pub use toolchain::{CommandToolchain, CompileRequest, LinkRequest, ToolOutput, Toolchain};
