//! Dependency resolution
//!
//! Builds the import graph of modules and submodules, works out which cached
//! closures are still valid, and computes the rest. A submodule depends on
//! its own imports and on its parent.
//!
//! Staleness is settled before any closure is computed: a node is stale when
//! it was rescanned, has no cached closure, or names a missing unit, and a
//! node importing a stale node is stale too. Passes repeat until one marks
//! nothing new.

use crate::build_order::{BuildGraph, ClosureResult, ClosureSolver, ModuleNode};
use crate::cache::CacheStore;
use crate::catalog::{Catalog, UnitKind};
use crate::error::{BuildError, BuildResult};
use crate::scanner::ScanOutcome;
use std::collections::{BTreeMap, BTreeSet};

/// Resolved closures for one invocation
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    closures: BTreeMap<String, ClosureResult>,
    imports: BTreeMap<String, Vec<String>>,
    stale: BTreeSet<String>,
    /// Closures computed in this invocation
    pub recomputed: usize,
    /// Closures taken from the cache
    pub reused: usize,
    /// Invalidation passes until no new node became stale
    pub passes: usize,
}

impl Resolution {
    /// Closure of a module or submodule
    pub fn closure(&self, id: &str) -> Option<&ClosureResult> {
        self.closures.get(id)
    }

    /// Closure of module `name` as required by `importer`
    pub fn require(&self, importer: &str, name: &str) -> BuildResult<Vec<String>> {
        match self.closures.get(name) {
            Some(result) => result.clone(),
            None => Err(BuildError::unresolved(importer, name)),
        }
    }

    /// Raw imports of any unit
    pub fn imports(&self, id: &str) -> &[String] {
        self.imports.get(id).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Nodes whose cached closure was invalidated
    pub fn stale(&self) -> &BTreeSet<String> {
        &self.stale
    }

    /// Nodes whose closure could not be computed
    pub fn failures(&self) -> impl Iterator<Item = (&String, &BuildError)> {
        self.closures
            .iter()
            .filter_map(|(id, result)| result.as_ref().err().map(|e| (id, e)))
    }
}

/// Resolves module closures against the incremental cache
pub struct ModuleResolver;

impl ModuleResolver {
    /// Build the module graph of `catalog`
    pub fn graph(catalog: &Catalog, scan: &ScanOutcome) -> BuildGraph {
        let mut graph = BuildGraph::new();
        for unit in catalog.units() {
            if unit.kind == UnitKind::Program {
                continue;
            }
            let mut deps = scan.imports.get(&unit.id).cloned().unwrap_or_default();
            if let Some(parent) = &unit.parent {
                deps.push(parent.clone());
            }
            graph.add_module(ModuleNode::new(&unit.id, unit.path.clone()).with_dependencies(deps));
        }
        graph
    }

    /// Resolve every module and submodule closure
    ///
    /// Successful closures are written back to `store`; failed ones leave the
    /// entry without a closure so the next run recomputes them.
    pub fn resolve(catalog: &Catalog, scan: &ScanOutcome, store: &mut dyn CacheStore) -> Resolution {
        let graph = Self::graph(catalog, scan);

        let mut cached: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (id, node) in graph.modules() {
            let Some(unit) = catalog.get(id) else { continue };
            let entry = store
                .load(&node.path)
                .filter(|e| e.matches(&unit.fingerprint));
            if let Some(closure) = entry.and_then(|e| e.closure) {
                cached.insert(id.clone(), closure);
            }
        }

        let mut stale: BTreeSet<String> = graph
            .modules()
            .iter()
            .filter(|(id, node)| {
                scan.changed.contains(*id)
                    || !cached.contains_key(*id)
                    || node.dependencies.iter().any(|d| !graph.contains(d))
            })
            .map(|(id, _)| id.clone())
            .collect();

        let mut passes = 0;
        loop {
            passes += 1;
            let newly: Vec<String> = graph
                .modules()
                .iter()
                .filter(|(id, _)| !stale.contains(*id))
                .filter(|(_, node)| node.dependencies.iter().any(|d| stale.contains(d)))
                .map(|(id, _)| id.clone())
                .collect();
            if newly.is_empty() {
                break;
            }
            tracing::debug!(pass = passes, nodes = ?newly, "invalidated closures");
            stale.extend(newly);
        }

        let mut solver = ClosureSolver::new(&graph);
        for rejected in catalog.rejected() {
            if rejected.kind != UnitKind::Program {
                solver.seed(rejected.id.clone(), Err(rejected.error.clone()));
            }
        }
        let mut reused = 0;
        for (id, closure) in cached {
            if !stale.contains(&id) {
                solver.seed(id, Ok(closure));
                reused += 1;
            }
        }

        let ids: Vec<String> = graph.modules().keys().cloned().collect();
        for id in &ids {
            if let Err(e) = solver.closure(id) {
                tracing::debug!(unit = %id, "closure failed: {}", e);
            }
        }
        let recomputed = solver.computed().len();
        let closures = solver.into_results();

        for id in &stale {
            let (Some(unit), Some(result)) = (catalog.get(id), closures.get(id)) else {
                continue;
            };
            let Some(mut entry) = store.load(&unit.path) else {
                continue;
            };
            entry.closure = result.as_ref().ok().cloned();
            if let Err(e) = store.store(entry) {
                tracing::warn!(unit = %id, "failed to write cache entry: {}", e);
            }
        }

        tracing::info!(
            modules = graph.len(),
            recomputed,
            reused,
            passes,
            "dependency resolution settled"
        );

        Resolution {
            closures,
            imports: scan.imports.clone(),
            stale,
            recomputed,
            reused,
            passes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStore;
    use crate::catalog::{SourceFile, SourceLayout};
    use crate::scanner::ImportScanner;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    fn layout() -> SourceLayout {
        SourceLayout::new("/p", "src", "src/modules", "build")
    }

    fn module(name: &str, uses: &[&str]) -> SourceFile {
        let mut text = format!("module {}\n", name);
        for u in uses {
            text.push_str(&format!("  use {}\n", u));
        }
        text.push_str("end module\n");
        SourceFile {
            path: PathBuf::from(format!("/p/src/modules/{}.f90", name)),
            text,
        }
    }

    fn resolve(files: Vec<SourceFile>, store: &mut MemoryStore) -> Resolution {
        let catalog = Catalog::from_files(&layout(), files);
        let scan = ImportScanner::new().scan_catalog(&catalog, store);
        ModuleResolver::resolve(&catalog, &scan, store)
    }

    #[test]
    fn test_submodule_depends_on_parent() {
        let mut store = MemoryStore::new();
        let files = vec![
            module("grid", &["kinds"]),
            module("kinds", &[]),
            SourceFile {
                path: PathBuf::from("/p/src/modules/grid/io.f90"),
                text: "submodule (grid) io\nend submodule\n".into(),
            },
        ];

        let resolution = resolve(files, &mut store);
        assert_eq!(
            resolution.closure("grid:io").cloned().unwrap().unwrap(),
            vec!["grid".to_string(), "kinds".to_string()]
        );
    }

    #[test]
    fn test_second_run_reuses_everything() {
        let mut store = MemoryStore::new();
        let files = vec![module("a", &["b"]), module("b", &[])];

        let first = resolve(files.clone(), &mut store);
        assert_eq!(first.recomputed, 2);

        let second = resolve(files, &mut store);
        assert_eq!(second.recomputed, 0);
        assert_eq!(second.reused, 2);
        assert!(second.stale().is_empty());
        assert_eq!(second.closure("a").cloned().unwrap().unwrap(), vec!["b"]);
    }

    #[test]
    fn test_unresolved_import_is_not_cached() {
        let mut store = MemoryStore::new();
        let files = vec![module("a", &["missing"])];

        let first = resolve(files.clone(), &mut store);
        assert_eq!(
            first.closure("a").cloned().unwrap(),
            Err(BuildError::unresolved("a", "missing"))
        );

        let second = resolve(files, &mut store);
        assert!(second.stale().contains("a"));
        assert_eq!(first.failures().count(), 1);
    }

    #[test]
    fn test_require_reports_missing_module() {
        let mut store = MemoryStore::new();
        let resolution = resolve(vec![module("a", &[])], &mut store);

        assert_eq!(resolution.require("main", "a").unwrap(), Vec::<String>::new());
        assert_eq!(
            resolution.require("main", "nope"),
            Err(BuildError::unresolved("main", "nope"))
        );
    }
}
