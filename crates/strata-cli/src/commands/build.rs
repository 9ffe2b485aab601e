//! Build command - compile requested targets with profiles and caching

use anyhow::{Context, Result};
use std::path::PathBuf;
use strata_build::{BuildReport, Builder, OutputMode, Profile, TargetReport};

/// Build command arguments
#[derive(Debug, Default)]
pub struct BuildArgs {
    /// Targets to build (the source root when empty)
    pub targets: Vec<String>,
    /// Build profile (dev, release, or custom)
    pub profile: Option<String>,
    /// Build in release mode (shorthand for --profile=release)
    pub release: bool,
    /// Number of parallel jobs
    pub jobs: Option<usize>,
    /// Stop starting actions after the first failure
    pub fail_fast: bool,
    /// Rescan everything, keeping the cache in memory
    pub no_cache: bool,
    /// Verbose output
    pub verbose: bool,
    /// Quiet output (errors only)
    pub quiet: bool,
    /// JSON output
    pub json: bool,
    /// Project directory (defaults to current directory)
    pub project_dir: Option<PathBuf>,
}

/// Run the build command, returning whether every target succeeded
pub fn run(args: BuildArgs) -> Result<bool> {
    let project_dir = args
        .project_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from("."));

    let mut builder = Builder::new(&project_dir).context("Failed to load project configuration")?;

    if let Some(profile) = determine_profile(&args)? {
        builder = builder.with_profile(profile);
    }
    if let Some(jobs) = args.jobs {
        builder = builder.with_jobs(jobs);
    }
    let output_mode = determine_output_mode(&args);
    let mut builder = builder
        .with_fail_fast(args.fail_fast)
        .with_cache(!args.no_cache)
        .with_output_mode(output_mode);

    tracing::debug!(
        project = %builder.layout().project_root.display(),
        profile = %builder.build_config().profile,
        jobs = builder.build_config().jobs,
        "starting build"
    );
    let report = builder.build(&args.targets).context("Build failed")?;
    tracing::info!(
        profile = %report.profile,
        targets = report.targets.len(),
        failed = report.failures().count(),
        "build finished"
    );

    match output_mode {
        OutputMode::Json => println!("{}", json_report(&report)),
        OutputMode::Quiet => {}
        OutputMode::Normal | OutputMode::Verbose => print_summary(&report, args.verbose),
    }

    Ok(report.success())
}

/// Determine build profile from arguments; `None` keeps the configured default
fn determine_profile(args: &BuildArgs) -> Result<Option<Profile>> {
    if args.release {
        Ok(Some(Profile::Release))
    } else if let Some(ref profile_name) = args.profile {
        Profile::from_str(profile_name)
            .map(Some)
            .map_err(|e| anyhow::anyhow!("Invalid profile: {}", e))
    } else {
        Ok(None)
    }
}

/// Determine output mode from arguments
fn determine_output_mode(args: &BuildArgs) -> OutputMode {
    if args.json {
        OutputMode::Json
    } else if args.quiet {
        OutputMode::Quiet
    } else if args.verbose {
        OutputMode::Verbose
    } else {
        OutputMode::Normal
    }
}

fn target_json(target: &TargetReport) -> serde_json::Value {
    match &target.outcome {
        Ok(artifact) => serde_json::json!({
            "request": target.request,
            "unit": target.unit,
            "success": true,
            "artifact": artifact.display().to_string(),
        }),
        Err(error) => serde_json::json!({
            "request": target.request,
            "unit": target.unit,
            "success": false,
            "error": {
                "kind": error.kind(),
                "message": error.to_string(),
            },
        }),
    }
}

fn json_report(report: &BuildReport) -> serde_json::Value {
    serde_json::json!({
        "success": report.success(),
        "profile": report.profile,
        "targets": report.targets.iter().map(target_json).collect::<Vec<_>>(),
        "actions": report
            .actions
            .iter()
            .map(|a| serde_json::json!({
                "label": a.label,
                "status": a.status.name(),
                "duration": a.duration.as_secs_f64(),
            }))
            .collect::<Vec<_>>(),
        "stats": report.stats,
    })
}

fn print_summary(report: &BuildReport, verbose: bool) {
    let stats = &report.stats;
    let failed = report.failures().count();

    println!("\n{}", "=".repeat(60));
    if failed == 0 {
        println!("Build succeeded in {:.2}s", stats.total_time.as_secs_f64());
    } else {
        println!(
            "Build failed: {} of {} targets in {:.2}s",
            failed,
            report.targets.len(),
            stats.total_time.as_secs_f64()
        );
    }
    println!("{}", "=".repeat(60));

    for target in &report.targets {
        let name = target.unit.as_deref().unwrap_or(&target.request);
        match &target.outcome {
            Ok(artifact) => println!("  ok      {} -> {}", name, artifact.display()),
            Err(error) => println!("  FAILED  {} [{}]: {}", name, error.kind(), error),
        }
    }

    println!("{}", "-".repeat(60));
    println!("  Profile: {}", report.profile);
    println!(
        "  Units: {} ({} rejected)",
        stats.units, stats.rejected_units
    );
    println!(
        "  Actions: {} run, {} fresh, {} failed, {} skipped",
        stats.actions_run, stats.actions_up_to_date, stats.actions_failed, stats.actions_skipped
    );
    if verbose {
        println!(
            "  Scanned: {} ({} cache hits, {} pruned)",
            stats.scanned_units, stats.cache_hits, stats.pruned_entries
        );
        println!(
            "  Closures: {} recomputed, {} reused in {} passes",
            stats.closures_recomputed, stats.closures_reused, stats.invalidation_passes
        );
        println!("  Parallel groups: {}", stats.parallel_groups);
        println!(
            "  Analysis: {:.2}s, execution: {:.2}s",
            stats.analysis_time.as_secs_f64(),
            stats.execution_time.as_secs_f64()
        );
    }
    println!("{}", "=".repeat(60));
}
