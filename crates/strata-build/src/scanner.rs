//! Import scanning
//!
//! Imports are found line by line with two single-line forms:
//!
//! ```text
//! use <name> [, only: ...]
//! use, non_intrinsic :: <name> [, only: ...]
//! ```
//!
//! Statements continued over several lines or hidden inside string literals
//! are not detected.

use crate::cache::{CacheEntry, CacheStore};
use crate::catalog::{Catalog, SourceUnit};
use rayon::prelude::*;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;

/// Compiler-provided modules, never treated as project imports
pub const INTRINSIC_MODULES: &[&str] = &[
    "iso_fortran_env",
    "iso_c_binding",
    "ieee_arithmetic",
    "ieee_exceptions",
    "ieee_features",
    "omp_lib",
    "omp_lib_kinds",
    "openacc",
];

fn import_patterns() -> &'static [Regex; 2] {
    static PATTERNS: OnceLock<[Regex; 2]> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            Regex::new(r"(?i)^\s*use\s+([a-z_][a-z0-9_]*)\s*(?:[,;!]|$)").expect("short use pattern"),
            Regex::new(r"(?i)^\s*use\s*,\s*non_intrinsic\s*::\s*([a-z_][a-z0-9_]*)\s*(?:[,;!]|$)")
                .expect("qualified use pattern"),
        ]
    })
}

/// Imported module names in first-seen order, lower-cased and deduplicated
pub fn extract_imports(text: &str) -> Vec<String> {
    let [short, qualified] = import_patterns();
    let mut seen = HashSet::new();
    let mut imports = Vec::new();

    for line in text.lines() {
        let caps = short.captures(line).or_else(|| qualified.captures(line));
        let Some(caps) = caps else { continue };

        let name = caps[1].to_lowercase();
        if INTRINSIC_MODULES.contains(&name.as_str()) {
            continue;
        }
        if seen.insert(name.clone()) {
            imports.push(name);
        }
    }

    imports
}

/// Result of scanning a catalog
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanOutcome {
    /// Unit id -> raw imports
    pub imports: BTreeMap<String, Vec<String>>,
    /// Units whose text was scanned because no valid cache entry existed
    pub changed: BTreeSet<String>,
    /// Units served from the cache
    pub cache_hits: usize,
}

/// Extracts imports, counting every text scan it performs
#[derive(Debug, Default)]
pub struct ImportScanner {
    scans: AtomicUsize,
}

impl ImportScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of text scans performed so far
    pub fn scan_count(&self) -> usize {
        self.scans.load(Ordering::Relaxed)
    }

    /// Scan one source text
    pub fn scan_text(&self, text: &str) -> Vec<String> {
        self.scans.fetch_add(1, Ordering::Relaxed);
        extract_imports(text)
    }

    /// Scan every unit of `catalog`, reusing cache entries whose fingerprint
    /// still matches
    ///
    /// Rescanned units get a fresh entry without a closure.
    pub fn scan_catalog(&self, catalog: &Catalog, store: &mut dyn CacheStore) -> ScanOutcome {
        let mut outcome = ScanOutcome::default();
        let mut pending: Vec<&SourceUnit> = Vec::new();

        for unit in catalog.units() {
            match store.load(&unit.path) {
                Some(entry) if entry.matches(&unit.fingerprint) => {
                    tracing::debug!(unit = %unit.id, "imports served from cache");
                    outcome.cache_hits += 1;
                    outcome.imports.insert(unit.id.clone(), entry.imports);
                }
                _ => pending.push(unit),
            }
        }

        let scanned: Vec<(&SourceUnit, Vec<String>)> = pending
            .par_iter()
            .map(|unit| (*unit, self.scan_text(catalog.text(&unit.id).unwrap_or(""))))
            .collect();

        for (unit, imports) in scanned {
            tracing::debug!(unit = %unit.id, imports = ?imports, "scanned");
            let entry = CacheEntry::new(&unit.path, &unit.fingerprint, imports.clone());
            if let Err(e) = store.store(entry) {
                tracing::warn!(unit = %unit.id, "failed to write cache entry: {}", e);
            }
            outcome.changed.insert(unit.id.clone());
            outcome.imports.insert(unit.id.clone(), imports);
        }

        tracing::info!(
            units = catalog.len(),
            scanned = outcome.changed.len(),
            cache_hits = outcome.cache_hits,
            "import scan finished"
        );
        outcome
    }
}
