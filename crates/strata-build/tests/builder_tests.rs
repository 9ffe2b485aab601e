//! End-to-end builder tests on real project trees
//!
//! The toolchain is a stand-in that writes the files a compiler would, so
//! timestamps and caches behave as in a real build.

use pretty_assertions::assert_eq;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use strata_build::{
    BuildError, BuildResult, Builder, CompileRequest, LinkRequest, MemoryStore, OutputMode,
    Profile, ToolOutput, Toolchain,
};
use strata_config::Config;
use tempfile::TempDir;

#[derive(Default)]
struct FakeCompiler {
    runs: AtomicUsize,
}

impl FakeCompiler {
    fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

fn write(path: &Path, text: &str) -> BuildResult<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(|e| BuildError::io(dir, e))?;
    }
    fs::write(path, text).map_err(|e| BuildError::io(path, e))
}

impl Toolchain for FakeCompiler {
    fn compile(&self, request: &CompileRequest<'_>) -> BuildResult<ToolOutput> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let text = fs::read_to_string(request.source).map_err(|e| BuildError::io(request.source, e))?;
        if text.contains("syntax error") {
            return Err(BuildError::toolchain(request.label, "Error: Unclassifiable statement"));
        }
        write(request.object, "obj")?;
        if request.source.components().any(|c| c.as_os_str() == "modules") {
            let stem = request.source.file_stem().unwrap().to_string_lossy().to_string();
            write(&request.interface_dir.join(format!("{}.mod", stem)), "mod")?;
        }
        Ok(ToolOutput::default())
    }

    fn link(&self, request: &LinkRequest<'_>) -> BuildResult<ToolOutput> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        write(request.executable, "exe")?;
        Ok(ToolOutput::default())
    }
}

fn project(files: &[(&str, &str)]) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    for (path, text) in files {
        let full = dir.path().join(path);
        fs::create_dir_all(full.parent().unwrap()).unwrap();
        fs::write(full, text).unwrap();
    }
    dir
}

fn standard_project() -> TempDir {
    project(&[
        ("src/main.f90", "program main\n  use util\nend program main\n"),
        ("src/modules/util.f90", "module util\n  use core\nend module util\n"),
        ("src/modules/core.f90", "module core\nend module core\n"),
    ])
}

fn builder(root: &Path, toolchain: Arc<FakeCompiler>) -> Builder {
    Builder::from_config(Config::detached(root))
        .unwrap()
        .with_toolchain(toolchain)
        .with_output_mode(OutputMode::Quiet)
        .with_jobs(2)
}

#[test]
fn test_build_default_target() {
    let dir = standard_project();
    let toolchain = Arc::new(FakeCompiler::default());
    let mut builder = builder(dir.path(), toolchain.clone())
        .with_cache_store(Box::new(MemoryStore::new()));

    let report = builder.build(&[]).unwrap();

    assert!(report.success(), "{:?}", report.targets);
    assert_eq!(report.profile, "dev");
    assert_eq!(report.targets.len(), 1);
    let exe = report.targets[0].outcome.as_ref().unwrap();
    assert!(exe.starts_with(dir.path().join("build/dev/bin")));
    assert!(exe.exists());
    assert_eq!(toolchain.runs(), 4);
    assert_eq!(report.stats.units, 3);
    assert_eq!(report.stats.actions_run, 4);
}

#[test]
fn test_second_build_rescans_nothing() {
    let dir = standard_project();
    let toolchain = Arc::new(FakeCompiler::default());
    let mut builder = builder(dir.path(), toolchain.clone())
        .with_cache_store(Box::new(MemoryStore::new()));

    builder.build(&["main".to_string()]).unwrap();
    let scans = builder.scanner().scan_count();
    assert_eq!(scans, 3);

    let report = builder.build(&["main".to_string()]).unwrap();
    assert_eq!(builder.scanner().scan_count(), scans);
    assert_eq!(report.stats.cache_hits, 3);
    assert_eq!(report.stats.closures_recomputed, 0);
    assert_eq!(report.stats.actions_up_to_date, 4);
    assert_eq!(toolchain.runs(), 4);
}

#[test]
fn test_disk_cache_survives_builders() {
    let dir = standard_project();
    let toolchain = Arc::new(FakeCompiler::default());

    let mut first = builder(dir.path(), toolchain.clone());
    first.build(&[]).unwrap();
    assert!(dir.path().join("build/.cache").is_dir());

    let mut second = builder(dir.path(), toolchain);
    let report = second.build(&[]).unwrap();
    assert_eq!(second.scanner().scan_count(), 0);
    assert_eq!(report.stats.cache_hits, 3);
}

#[test]
fn test_edit_rescans_only_the_edited_file() {
    let dir = standard_project();
    let toolchain = Arc::new(FakeCompiler::default());
    let mut builder = builder(dir.path(), toolchain).with_cache_store(Box::new(MemoryStore::new()));
    builder.build(&[]).unwrap();

    fs::write(
        dir.path().join("src/modules/core.f90"),
        "module core\n  integer :: answer = 42\nend module core\n",
    )
    .unwrap();
    let report = builder.build(&[]).unwrap();

    assert_eq!(report.stats.scanned_units, 1);
    assert_eq!(report.stats.closures_recomputed, 2);
    assert!(report.success());
}

#[test]
fn test_failures_are_reported_per_target() {
    let dir = project(&[
        ("src/good.f90", "program good\n  use util\nend program good\n"),
        ("src/broken.f90", "program broken\n  use bad\nend program broken\n"),
        ("src/orphan.f90", "program orphan\n  use nowhere\nend program orphan\n"),
        ("src/modules/util.f90", "module util\nend module util\n"),
        ("src/modules/bad.f90", "module bad\n  syntax error\nend module bad\n"),
    ]);
    let toolchain = Arc::new(FakeCompiler::default());
    let mut builder = builder(dir.path(), toolchain).with_cache_store(Box::new(MemoryStore::new()));

    let report = builder.build(&[]).unwrap();
    assert!(!report.success());

    let outcome = |unit: &str| {
        report
            .targets
            .iter()
            .find(|t| t.unit.as_deref() == Some(unit))
            .map(|t| t.outcome.clone())
            .unwrap()
    };
    assert!(outcome("good.f90").is_ok());
    assert_eq!(
        outcome("broken.f90").unwrap_err(),
        BuildError::toolchain("Compile(bad)", "Error: Unclassifiable statement")
    );
    assert_eq!(
        outcome("orphan.f90").unwrap_err(),
        BuildError::UnresolvedImport {
            unit: "orphan.f90".into(),
            name: "nowhere".into(),
        }
    );
    assert_eq!(report.failures().count(), 2);
}

#[test]
fn test_deleted_source_prunes_cache_entry() {
    let dir = standard_project();
    fs::write(dir.path().join("src/extra.f90"), "program extra\nend program extra\n").unwrap();
    let toolchain = Arc::new(FakeCompiler::default());
    let mut builder = builder(dir.path(), toolchain).with_cache_store(Box::new(MemoryStore::new()));
    builder.build(&[]).unwrap();

    fs::remove_file(dir.path().join("src/extra.f90")).unwrap();
    let analysis = builder.analyze().unwrap();
    assert_eq!(analysis.pruned, 1);
    assert_eq!(analysis.catalog.len(), 3);
}

#[test]
fn test_release_profile_uses_its_own_artifacts() {
    let dir = standard_project();
    let toolchain = Arc::new(FakeCompiler::default());
    let mut builder = builder(dir.path(), toolchain)
        .with_cache_store(Box::new(MemoryStore::new()))
        .with_profile(Profile::Release);

    let report = builder.build(&["main".to_string()]).unwrap();
    assert_eq!(report.profile, "release");
    let exe = report.targets[0].outcome.as_ref().unwrap();
    assert!(exe.starts_with(dir.path().join("build/release/bin")));
}

#[test]
fn test_unknown_profile_is_an_error() {
    let dir = standard_project();
    let mut builder = builder(dir.path(), Arc::new(FakeCompiler::default()))
        .with_profile(Profile::Custom("bench".into()));
    assert!(matches!(
        builder.build(&[]),
        Err(BuildError::ProfileNotFound(name)) if name == "bench"
    ));
}

#[test]
fn test_dependencies_of_program() {
    let dir = standard_project();
    let mut builder = builder(dir.path(), Arc::new(FakeCompiler::default()))
        .with_cache_store(Box::new(MemoryStore::new()));

    let deps = builder.dependencies("main").unwrap();
    assert_eq!(deps.len(), 1);
    assert_eq!(deps[0].imports, vec!["util"]);
    assert_eq!(deps[0].closure, vec!["core", "util"]);
    assert_eq!(deps[0].link_units, vec!["main.f90", "util", "core"]);
}
