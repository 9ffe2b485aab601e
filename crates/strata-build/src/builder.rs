//! Build orchestration
//!
//! One invocation runs discovery, scanning and resolution to a fixed point,
//! then plans the requested targets and executes the plan.
use crate::cache::{prune_orphans, CacheStore, DiskStore, MemoryStore};
use crate::catalog::{Catalog, SourceLayout, UnitKind};
use crate::error::{BuildError, BuildResult};
use crate::executor::{ActionReport, ActionStatus, Executor, ExecutorConfig};
use crate::module_resolver::{ModuleResolver, Resolution};
use crate::output::{BuildProgress, OutputMode};
use crate::plan::{ArtifactLayout, PlanOutcome, Planner};
use crate::profile::{Profile, ProfileConfig, ProfileManager};
use crate::scanner::{ImportScanner, ScanOutcome};
use crate::targets::select_targets;
use crate::toolchain::{CommandToolchain, Toolchain};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use strata_config::{Config, ConfigLoader};

/// Cache directory inside the build root
pub const CACHE_DIR: &str = ".cache";

/// Per-invocation build settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildConfig {
    /// Selected profile
    pub profile: Profile,
    /// Concurrent actions
    pub jobs: usize,
    /// Stop starting actions after the first failure
    pub fail_fast: bool,
    /// Use the persistent cache when the profile allows it
    pub use_cache: bool,
    /// Progress output
    pub output_mode: OutputMode,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            profile: Profile::Dev,
            jobs: 1,
            fail_fast: false,
            use_cache: true,
            output_mode: OutputMode::Normal,
        }
    }
}

/// Build statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BuildStats {
    /// Accepted source units
    pub units: usize,
    /// Source files rejected during classification
    pub rejected_units: usize,
    /// Units whose text was scanned
    pub scanned_units: usize,
    /// Units whose imports came from the cache
    pub cache_hits: usize,
    /// Orphaned cache entries removed
    pub pruned_entries: usize,
    pub closures_recomputed: usize,
    pub closures_reused: usize,
    /// Invalidation passes before resolution settled
    pub invalidation_passes: usize,
    pub actions: usize,
    pub actions_run: usize,
    pub actions_up_to_date: usize,
    pub actions_failed: usize,
    pub actions_skipped: usize,
    pub actions_cancelled: usize,
    /// Waves of mutually independent actions
    pub parallel_groups: usize,
    #[serde(serialize_with = "as_secs")]
    pub analysis_time: Duration,
    #[serde(serialize_with = "as_secs")]
    pub execution_time: Duration,
    #[serde(serialize_with = "as_secs")]
    pub total_time: Duration,
}

fn as_secs<S: serde::Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64())
}

impl BuildStats {
    fn record_analysis(&mut self, analysis: &Analysis) {
        self.units = analysis.catalog.len();
        self.rejected_units = analysis.catalog.rejected().len();
        self.scanned_units = analysis.scan.changed.len();
        self.cache_hits = analysis.scan.cache_hits;
        self.pruned_entries = analysis.pruned;
        self.closures_recomputed = analysis.resolution.recomputed;
        self.closures_reused = analysis.resolution.reused;
        self.invalidation_passes = analysis.resolution.passes;
    }

    fn record_actions(&mut self, reports: &[ActionReport]) {
        self.actions = reports.len();
        for report in reports {
            match report.status {
                ActionStatus::Succeeded => self.actions_run += 1,
                ActionStatus::UpToDate => self.actions_up_to_date += 1,
                ActionStatus::Failed(_) => {
                    self.actions_run += 1;
                    self.actions_failed += 1;
                }
                ActionStatus::Skipped { .. } => self.actions_skipped += 1,
                ActionStatus::Cancelled => self.actions_cancelled += 1,
            }
        }
    }
}

/// Settled analysis of the source tree
#[derive(Debug, Clone)]
pub struct Analysis {
    pub catalog: Catalog,
    pub scan: ScanOutcome,
    pub resolution: Resolution,
    /// Orphaned cache entries removed
    pub pruned: usize,
}

/// Outcome of one requested target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetReport {
    pub request: String,
    /// Selected unit, when selection succeeded
    pub unit: Option<String>,
    /// Artifact path, or why it was not produced
    pub outcome: Result<PathBuf, BuildError>,
}

/// Result of [`Builder::build`]
#[derive(Debug, Clone)]
pub struct BuildReport {
    pub profile: String,
    pub targets: Vec<TargetReport>,
    pub actions: Vec<ActionReport>,
    pub stats: BuildStats,
}

impl BuildReport {
    /// Whether every requested target was produced
    pub fn success(&self) -> bool {
        self.targets.iter().all(|t| t.outcome.is_ok())
    }

    /// Targets that failed
    pub fn failures(&self) -> impl Iterator<Item = &TargetReport> {
        self.targets.iter().filter(|t| t.outcome.is_err())
    }
}

/// Dependencies of one unit, as shown by `strata deps`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitDependencies {
    pub unit: String,
    pub kind: UnitKind,
    pub path: PathBuf,
    /// Raw imports
    pub imports: Vec<String>,
    /// Transitive module closure
    pub closure: Vec<String>,
    /// Units linked into the executable, programs only
    pub link_units: Vec<String>,
}

/// Main builder for orchestrating builds
pub struct Builder {
    config: Config,
    layout: SourceLayout,
    build: BuildConfig,
    profiles: ProfileManager,
    store: Option<Box<dyn CacheStore>>,
    scanner: ImportScanner,
    toolchain: Arc<dyn Toolchain>,
    progress: Option<BuildProgress>,
}

impl Builder {
    /// Create a builder for the project containing `project_dir`
    pub fn new(project_dir: impl AsRef<Path>) -> BuildResult<Self> {
        let project_dir = project_dir.as_ref();
        let project_dir = fs::canonicalize(project_dir).map_err(|e| BuildError::io(project_dir, e))?;
        let mut config = ConfigLoader::new().load_from_directory(&project_dir)?;
        if config.project_root.is_none() {
            config.project_root = Some(project_dir);
        }
        Self::from_config(config)
    }

    /// Create a builder from an already loaded configuration
    pub fn from_config(config: Config) -> BuildResult<Self> {
        let root = config
            .project_root()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let layout = SourceLayout::from_config(&root, &config.project);
        let profiles = ProfileManager::from_sections(&config.project.profile)?;
        let build = BuildConfig {
            profile: Profile::from_str(config.default_profile())?,
            jobs: config.default_jobs(),
            ..BuildConfig::default()
        };
        let toolchain = Arc::new(CommandToolchain::from_config(&config));

        Ok(Self {
            config,
            layout,
            build,
            profiles,
            store: None,
            scanner: ImportScanner::new(),
            toolchain,
            progress: None,
        })
    }

    /// Select the build profile
    pub fn with_profile(mut self, profile: Profile) -> Self {
        self.build.profile = profile;
        self
    }

    /// Set the number of concurrent actions
    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.build.jobs = jobs.max(1);
        self
    }

    /// Stop starting actions after the first failure
    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.build.fail_fast = fail_fast;
        self
    }

    /// Enable/disable the persistent cache
    pub fn with_cache(mut self, use_cache: bool) -> Self {
        self.build.use_cache = use_cache;
        self
    }

    /// Use a specific cache store
    pub fn with_cache_store(mut self, store: Box<dyn CacheStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Use a specific toolchain
    pub fn with_toolchain(mut self, toolchain: Arc<dyn Toolchain>) -> Self {
        self.toolchain = toolchain;
        self
    }

    /// Set the progress output mode
    pub fn with_output_mode(mut self, mode: OutputMode) -> Self {
        self.build.output_mode = mode;
        self
    }

    /// Report progress to a specific sink
    pub fn with_progress(mut self, progress: BuildProgress) -> Self {
        self.build.output_mode = progress.mode();
        self.progress = Some(progress);
        self
    }

    /// Effective build settings
    pub fn build_config(&self) -> &BuildConfig {
        &self.build
    }

    /// Source layout
    pub fn layout(&self) -> &SourceLayout {
        &self.layout
    }

    /// Scanner shared across invocations of this builder
    pub fn scanner(&self) -> &ImportScanner {
        &self.scanner
    }

    /// Resolved configuration of the selected profile
    pub fn profile_config(&self) -> BuildResult<ProfileConfig> {
        self.profiles.get(&self.build.profile)
    }

    /// Artifact locations of the selected profile
    pub fn artifacts(&self) -> ArtifactLayout {
        ArtifactLayout::new(&self.layout.build_dir, self.build.profile.name())
    }

    fn store(&mut self) -> BuildResult<&mut Box<dyn CacheStore>> {
        if self.store.is_none() {
            let incremental = self.profile_config()?.incremental;
            let store: Box<dyn CacheStore> = if self.build.use_cache && incremental {
                Box::new(DiskStore::new(self.layout.build_dir.join(CACHE_DIR)))
            } else {
                tracing::debug!("persistent cache disabled, using memory store");
                Box::new(MemoryStore::new())
            };
            self.store = Some(store);
        }
        match self.store.as_mut() {
            Some(store) => Ok(store),
            None => Err(BuildError::CacheError("cache store unavailable".to_string())),
        }
    }

    /// Discover, scan and resolve the source tree
    ///
    /// Returns only once no cached closure is being invalidated any more.
    pub fn analyze(&mut self) -> BuildResult<Analysis> {
        let catalog = Catalog::discover(&self.layout)?;
        let scanner = std::mem::take(&mut self.scanner);
        let result = self.store().map(|store| {
            let pruned = prune_orphans(store.as_mut(), &catalog.live_paths());
            let scan = scanner.scan_catalog(&catalog, store.as_mut());
            let resolution = ModuleResolver::resolve(&catalog, &scan, store.as_mut());
            (pruned, scan, resolution)
        });
        self.scanner = scanner;
        let (pruned, scan, resolution) = result?;

        if pruned > 0 {
            tracing::info!(pruned, "removed cache entries of deleted sources");
        }

        Ok(Analysis {
            catalog,
            scan,
            resolution,
            pruned,
        })
    }

    /// Analyze and plan `requests` without running anything
    pub fn plan(&mut self, requests: &[String]) -> BuildResult<(Analysis, PlanOutcome)> {
        let analysis = self.analyze()?;
        let artifacts = self.artifacts();
        let outcome = Planner::new(&analysis.catalog, &analysis.resolution, &artifacts)
            .with_link_extras(self.config.project.extra_link_units())
            .plan(requests)?;
        Ok((analysis, outcome))
    }

    /// Build `requests` (the source root when empty)
    pub fn build(&mut self, requests: &[String]) -> BuildResult<BuildReport> {
        let start = Instant::now();
        let requests: Vec<String> = if requests.is_empty() {
            vec![".".to_string()]
        } else {
            let mut seen = BTreeSet::new();
            requests
                .iter()
                .filter(|r| seen.insert(r.as_str()))
                .cloned()
                .collect()
        };

        let profile = self.profile_config()?;
        tracing::info!(profile = %profile.name, jobs = self.build.jobs, "starting build");

        let (analysis, outcome) = self.plan(&requests)?;
        let PlanOutcome { mut plan, failures } = outcome;
        let analysis_time = start.elapsed();

        plan.mark_up_to_date(|path| fs::metadata(path).and_then(|m| m.modified()).ok());

        let executor_config = ExecutorConfig {
            jobs: if profile.parallel { self.build.jobs } else { 1 },
            fail_fast: self.build.fail_fast,
            compile_flags: profile.compile_flags.clone(),
            link_flags: profile.link_flags.clone(),
            interface_dir: self.artifacts().interface_dir(),
        };

        let exec_start = Instant::now();
        let mut progress = self
            .progress
            .take()
            .unwrap_or_else(|| BuildProgress::new(self.build.output_mode));
        let executed = Executor::new(self.toolchain.as_ref(), executor_config).execute(&plan, &mut progress);
        self.progress = Some(progress);
        let actions = executed?;
        let execution_time = exec_start.elapsed();

        let mut targets = Vec::new();
        for request in &requests {
            for planned in plan.targets().iter().filter(|t| &t.request == request) {
                let outcome = match &actions[planned.action].status {
                    ActionStatus::Succeeded | ActionStatus::UpToDate => Ok(planned.artifact.clone()),
                    ActionStatus::Failed(error) => Err(error.clone()),
                    ActionStatus::Skipped { cause } => Err(actions
                        .iter()
                        .find_map(|a| match &a.status {
                            ActionStatus::Failed(error) if &a.label == cause => Some(error.clone()),
                            _ => None,
                        })
                        .unwrap_or_else(|| BuildError::BuildFailed(format!("{} failed", cause)))),
                    ActionStatus::Cancelled => Err(BuildError::Cancelled {
                        action: actions[planned.action].label.clone(),
                    }),
                };
                targets.push(TargetReport {
                    request: request.clone(),
                    unit: Some(planned.unit.clone()),
                    outcome,
                });
            }
            for failure in failures.iter().filter(|f| &f.request == request) {
                targets.push(TargetReport {
                    request: request.clone(),
                    unit: failure.unit.clone(),
                    outcome: Err(failure.error.clone()),
                });
            }
        }

        let mut stats = BuildStats::default();
        stats.record_analysis(&analysis);
        stats.record_actions(&actions);
        stats.parallel_groups = plan.parallel_groups();
        stats.analysis_time = analysis_time;
        stats.execution_time = execution_time;
        stats.total_time = start.elapsed();

        tracing::info!(
            targets = targets.len(),
            failed = targets.iter().filter(|t| t.outcome.is_err()).count(),
            seconds = stats.total_time.as_secs_f64(),
            "build finished"
        );

        Ok(BuildReport {
            profile: profile.name,
            targets,
            actions,
            stats,
        })
    }

    /// Imports, closure and link set of the units selected by `request`
    pub fn dependencies(&mut self, request: &str) -> BuildResult<Vec<UnitDependencies>> {
        let analysis = self.analyze()?;
        let artifacts = self.artifacts();
        let planner = Planner::new(&analysis.catalog, &analysis.resolution, &artifacts)
            .with_link_extras(self.config.project.extra_link_units());

        let selected = select_targets(request, analysis.catalog.units(), analysis.catalog.rejected())?;
        let mut result = Vec::with_capacity(selected.len());
        for target in selected {
            let Some(unit) = analysis.catalog.get(&target.unit) else {
                continue;
            };
            let imports = analysis.resolution.imports(&unit.id).to_vec();
            let (closure, link_units) = match unit.kind {
                UnitKind::Program => {
                    let mut closure = BTreeSet::new();
                    for name in &imports {
                        closure.extend(analysis.resolution.require(&unit.id, name)?);
                        closure.insert(name.clone());
                    }
                    (closure.into_iter().collect(), planner.link_units(unit)?)
                }
                _ => {
                    let closure = match analysis.resolution.closure(&unit.id) {
                        Some(result) => result.clone()?,
                        None => Vec::new(),
                    };
                    (closure, Vec::new())
                }
            };
            result.push(UnitDependencies {
                unit: unit.id.clone(),
                kind: unit.kind,
                path: unit.path.clone(),
                imports,
                closure,
                link_units,
            });
        }
        Ok(result)
    }
}
