//! Source discovery and classification
//!
//! Every source file under the module root is a module (directly in the root)
//! or a submodule (in a directory nested below it). Everything else under the
//! source root is a program. A unit's declared name comes from its header and
//! must agree with its file name; a submodule's declared parent must agree with
//! the directory it lives in.

use crate::error::{BuildError, BuildResult};
use crate::fingerprint::compute_fingerprint;
use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use walkdir::WalkDir;

/// Recognized source file extensions (compared case-insensitively)
pub const SOURCE_EXTENSIONS: &[&str] = &["f", "for", "f90", "f95", "f03", "f08"];

/// Whether `path` has a recognized source extension
pub fn is_source_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| SOURCE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Kind of compilation unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitKind {
    /// Main program, linked into an executable
    Program,
    /// Module, importable by name
    Module,
    /// Implementation unit attached to a module or another submodule
    Submodule,
}

impl std::fmt::Display for UnitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Program => write!(f, "program"),
            Self::Module => write!(f, "module"),
            Self::Submodule => write!(f, "submodule"),
        }
    }
}

/// A classified source file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceUnit {
    /// Unique id: module name, `ancestor:name` for submodules, or the
    /// relative path with extension for programs, which keeps programs out of
    /// the module namespace
    pub id: String,
    /// Declared name (lower case); the file stem for programs
    pub name: String,
    pub kind: UnitKind,
    /// Path on disk
    pub path: PathBuf,
    /// Path relative to the source root (or the project root when the module
    /// tree lives outside the source root)
    pub rel_path: PathBuf,
    /// Parent unit id, submodules only
    pub parent: Option<String>,
    /// Content fingerprint
    pub fingerprint: String,
}

impl SourceUnit {
    /// Create a program unit named after its file stem
    pub fn program(path: PathBuf, rel_path: PathBuf, fingerprint: String) -> Self {
        let name = file_stem(&rel_path);
        let id = slash_path(&rel_path);
        Self {
            id,
            name,
            kind: UnitKind::Program,
            path,
            rel_path,
            parent: None,
            fingerprint,
        }
    }

    /// Create a module unit
    pub fn module(name: &str, path: PathBuf, rel_path: PathBuf, fingerprint: String) -> Self {
        let name = name.to_lowercase();
        Self {
            id: name.clone(),
            name,
            kind: UnitKind::Module,
            path,
            rel_path,
            parent: None,
            fingerprint,
        }
    }

    /// Create a submodule unit of `ancestor`, optionally nested under the
    /// submodule `parent` of that ancestor
    pub fn submodule(
        ancestor: &str,
        parent: Option<&str>,
        name: &str,
        path: PathBuf,
        rel_path: PathBuf,
        fingerprint: String,
    ) -> Self {
        let ancestor = ancestor.to_lowercase();
        let name = name.to_lowercase();
        let parent = match parent {
            Some(p) => format!("{}:{}", ancestor, p.to_lowercase()),
            None => ancestor.clone(),
        };
        Self {
            id: format!("{}:{}", ancestor, name),
            name,
            kind: UnitKind::Submodule,
            path,
            rel_path,
            parent: Some(parent),
            fingerprint,
        }
    }

    /// Root module of a submodule, or the module itself
    pub fn ancestor(&self) -> Option<&str> {
        match self.kind {
            UnitKind::Module => Some(&self.id),
            UnitKind::Submodule => self.id.split(':').next(),
            UnitKind::Program => None,
        }
    }

    /// Relative path without extension, `/`-separated
    pub fn rel_stem(&self) -> String {
        slash_path(&self.rel_path.with_extension(""))
    }

    /// Relative path, `/`-separated
    pub fn display_path(&self) -> String {
        slash_path(&self.rel_path)
    }

    /// Whether this unit produces a module interface artifact
    pub fn has_interface(&self) -> bool {
        !matches!(self.kind, UnitKind::Program)
    }
}

/// A source file that could not be classified
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedUnit {
    /// Id the unit would have had
    pub id: String,
    pub kind: UnitKind,
    pub path: PathBuf,
    pub rel_path: PathBuf,
    pub error: BuildError,
}

/// Unit declaration found in a source header
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Declaration {
    Program(String),
    Module(String),
    Submodule {
        ancestor: String,
        parent: Option<String>,
        name: String,
    },
}

fn declaration_patterns() -> &'static [Regex; 3] {
    static PATTERNS: OnceLock<[Regex; 3]> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let ident = r"[a-z_][a-z0-9_]*";
        [
            Regex::new(&format!(r"(?i)^\s*program\s+({ident})\s*(?:!.*)?$"))
                .expect("program pattern"),
            Regex::new(&format!(r"(?i)^\s*module\s+({ident})\s*(?:!.*)?$"))
                .expect("module pattern"),
            Regex::new(&format!(
                r"(?i)^\s*submodule\s*\(\s*({ident})\s*(?::\s*({ident})\s*)?\)\s*({ident})\s*(?:!.*)?$"
            ))
            .expect("submodule pattern"),
        ]
    })
}

/// First unit declaration in `text`, names lower-cased
pub fn parse_declaration(text: &str) -> Option<Declaration> {
    let [program, module, submodule] = declaration_patterns();

    for line in text.lines() {
        if let Some(caps) = submodule.captures(line) {
            return Some(Declaration::Submodule {
                ancestor: caps[1].to_lowercase(),
                parent: caps.get(2).map(|m| m.as_str().to_lowercase()),
                name: caps[3].to_lowercase(),
            });
        }
        if let Some(caps) = module.captures(line) {
            return Some(Declaration::Module(caps[1].to_lowercase()));
        }
        if let Some(caps) = program.captures(line) {
            return Some(Declaration::Program(caps[1].to_lowercase()));
        }
    }

    None
}

/// Where sources live, all paths absolute or relative to the working directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLayout {
    pub project_root: PathBuf,
    pub source_dir: PathBuf,
    pub module_dir: PathBuf,
    pub build_dir: PathBuf,
}

impl SourceLayout {
    /// Layout with directories given relative to `project_root`
    pub fn new(
        project_root: impl Into<PathBuf>,
        source_dir: impl AsRef<Path>,
        module_dir: impl AsRef<Path>,
        build_dir: impl AsRef<Path>,
    ) -> Self {
        let project_root = project_root.into();
        Self {
            source_dir: project_root.join(source_dir),
            module_dir: project_root.join(module_dir),
            build_dir: project_root.join(build_dir),
            project_root,
        }
    }

    /// Layout described by a loaded configuration
    pub fn from_config(project_root: &Path, config: &strata_config::ProjectConfig) -> Self {
        Self::new(
            project_root,
            config.source_dir(),
            config.module_dir(),
            config.build_dir(),
        )
    }

    /// Path of `path` relative to the source root, falling back to the project root
    pub fn relative(&self, path: &Path) -> PathBuf {
        path.strip_prefix(&self.source_dir)
            .or_else(|_| path.strip_prefix(&self.project_root))
            .unwrap_or(path)
            .to_path_buf()
    }
}

/// Source text read from disk
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: PathBuf,
    pub text: String,
}

/// The classified set of source units for one invocation
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    units: Vec<SourceUnit>,
    index: HashMap<String, usize>,
    texts: HashMap<String, String>,
    rejected: Vec<RejectedUnit>,
}

impl Catalog {
    /// Walk the source and module roots and classify every source file
    pub fn discover(layout: &SourceLayout) -> BuildResult<Self> {
        if !layout.source_dir.exists() {
            return Err(BuildError::BuildFailed(format!(
                "Source directory not found: {}",
                layout.source_dir.display()
            )));
        }

        let mut paths = BTreeSet::new();
        for root in [&layout.source_dir, &layout.module_dir] {
            if !root.exists() {
                continue;
            }
            for entry in WalkDir::new(root)
                .follow_links(false)
                .into_iter()
                .filter_entry(|e| !e.path().starts_with(&layout.build_dir) && !is_hidden(e, root))
                .filter_map(|e| e.ok())
            {
                if entry.file_type().is_file() && is_source_file(entry.path()) {
                    paths.insert(entry.path().to_path_buf());
                }
            }
        }

        let mut files = Vec::with_capacity(paths.len());
        for path in paths {
            let bytes = fs::read(&path).map_err(|e| BuildError::io(&path, e))?;
            let text = String::from_utf8_lossy(&bytes).into_owned();
            files.push(SourceFile { path, text });
        }

        tracing::debug!(files = files.len(), "discovered source files");
        Ok(Self::from_files(layout, files))
    }

    /// Classify already-read source files
    pub fn from_files(layout: &SourceLayout, mut files: Vec<SourceFile>) -> Self {
        files.sort_by(|a, b| a.path.cmp(&b.path));

        let mut accepted: Vec<(SourceUnit, String)> = Vec::new();
        let mut rejected = Vec::new();

        for file in files {
            match classify(layout, &file) {
                Ok(unit) => accepted.push((unit, file.text)),
                Err(rejection) => rejected.push(rejection),
            }
        }

        // Module and submodule names must resolve to exactly one unit
        let mut by_id: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (i, (unit, _)) in accepted.iter().enumerate() {
            by_id.entry(unit.id.clone()).or_default().push(i);
        }
        let mut duplicate = vec![false; accepted.len()];
        for (id, positions) in &by_id {
            if positions.len() < 2 {
                continue;
            }
            let paths: Vec<String> = positions
                .iter()
                .map(|&i| accepted[i].0.display_path())
                .collect();
            for &i in positions {
                duplicate[i] = true;
                let unit = &accepted[i].0;
                rejected.push(RejectedUnit {
                    id: id.clone(),
                    kind: unit.kind,
                    path: unit.path.clone(),
                    rel_path: unit.rel_path.clone(),
                    error: BuildError::mismatch(
                        &unit.path,
                        format!("'{}' is defined more than once: {}", id, paths.join(", ")),
                    ),
                });
            }
        }

        let mut catalog = Self::default();
        let mut pending = Vec::new();
        for ((unit, text), dup) in accepted.into_iter().zip(duplicate) {
            if !dup {
                pending.push((unit, text));
            }
        }

        // A submodule file must sit in the directory named after its parent
        let locations: HashMap<String, PathBuf> = pending
            .iter()
            .map(|(u, _)| (u.id.clone(), u.path.with_extension("")))
            .collect();
        for (unit, text) in pending {
            if let Some(parent) = &unit.parent {
                if let Some(parent_dir) = locations.get(parent) {
                    let dir = unit.path.parent().map(lowercase_path);
                    if dir.as_deref() != Some(lowercase_path(parent_dir).as_str()) {
                        rejected.push(RejectedUnit {
                            id: unit.id.clone(),
                            kind: unit.kind,
                            path: unit.path.clone(),
                            rel_path: unit.rel_path.clone(),
                            error: BuildError::mismatch(
                                &unit.path,
                                format!(
                                    "submodule '{}' must live in the directory of its parent '{}'",
                                    unit.id, parent
                                ),
                            ),
                        });
                        continue;
                    }
                }
            }
            catalog.insert(unit, text);
        }

        for rejection in &rejected {
            tracing::warn!(unit = %rejection.id, "{}", rejection.error);
        }
        catalog.rejected = rejected;
        catalog
    }

    fn insert(&mut self, unit: SourceUnit, text: String) {
        self.index.insert(unit.id.clone(), self.units.len());
        self.texts.insert(unit.id.clone(), text);
        self.units.push(unit);
    }

    /// All accepted units, sorted by path
    pub fn units(&self) -> &[SourceUnit] {
        &self.units
    }

    /// Unit by id
    pub fn get(&self, id: &str) -> Option<&SourceUnit> {
        self.index.get(id).map(|&i| &self.units[i])
    }

    /// Source text of a unit
    pub fn text(&self, id: &str) -> Option<&str> {
        self.texts.get(id).map(|t| t.as_str())
    }

    /// Module by name
    pub fn module(&self, name: &str) -> Option<&SourceUnit> {
        self.get(name).filter(|u| u.kind == UnitKind::Module)
    }

    /// All programs
    pub fn programs(&self) -> impl Iterator<Item = &SourceUnit> {
        self.units.iter().filter(|u| u.kind == UnitKind::Program)
    }

    /// Every submodule below `id` (children, grandchildren, ...)
    pub fn submodules_of(&self, id: &str) -> Vec<&SourceUnit> {
        self.units
            .iter()
            .filter(|u| u.kind == UnitKind::Submodule)
            .filter(|u| {
                let mut parent = u.parent.as_deref();
                while let Some(p) = parent {
                    if p == id {
                        return true;
                    }
                    parent = self.get(p).and_then(|pu| pu.parent.as_deref());
                }
                false
            })
            .collect()
    }

    /// Units that failed classification
    pub fn rejected(&self) -> &[RejectedUnit] {
        &self.rejected
    }

    /// Rejection recorded for an id, if any
    pub fn rejection(&self, id: &str) -> Option<&RejectedUnit> {
        self.rejected.iter().find(|r| r.id == id)
    }

    /// Paths of every discovered file, accepted or not
    pub fn live_paths(&self) -> BTreeSet<PathBuf> {
        self.units
            .iter()
            .map(|u| u.path.clone())
            .chain(self.rejected.iter().map(|r| r.path.clone()))
            .collect()
    }

    /// Number of accepted units
    pub fn len(&self) -> usize {
        self.units.len()
    }

    /// Whether no unit was accepted
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

fn classify(layout: &SourceLayout, file: &SourceFile) -> Result<SourceUnit, RejectedUnit> {
    let path = file.path.clone();
    let rel_path = layout.relative(&path);
    let stem = file_stem(&path);
    let fingerprint = compute_fingerprint(&file.text);

    let in_module_tree = path.starts_with(&layout.module_dir);
    if !in_module_tree {
        return Ok(SourceUnit::program(path, rel_path, fingerprint));
    }

    let dirs: Vec<String> = path
        .strip_prefix(&layout.module_dir)
        .ok()
        .and_then(|p| p.parent())
        .map(|p| {
            p.components()
                .map(|c| c.as_os_str().to_string_lossy().to_lowercase())
                .collect()
        })
        .unwrap_or_default();

    let reject = |kind: UnitKind, id: String, reason: String| RejectedUnit {
        id,
        kind,
        path: path.clone(),
        rel_path: rel_path.clone(),
        error: BuildError::mismatch(&path, reason),
    };

    let declaration = parse_declaration(&file.text);

    if dirs.is_empty() {
        return match declaration {
            Some(Declaration::Module(name)) if name == stem => Ok(SourceUnit::module(
                &name,
                path.clone(),
                rel_path.clone(),
                fingerprint,
            )),
            Some(Declaration::Module(name)) => Err(reject(
                UnitKind::Module,
                stem.clone(),
                format!(
                    "module name does not match file name: declares '{}', file is '{}'",
                    name, stem
                ),
            )),
            Some(_) => Err(reject(
                UnitKind::Module,
                stem.clone(),
                "files in the module root must declare a MODULE".to_string(),
            )),
            None => Err(reject(
                UnitKind::Module,
                stem.clone(),
                "no MODULE declaration found".to_string(),
            )),
        };
    }

    let expected_id = format!("{}:{}", dirs[0], stem);
    match declaration {
        Some(Declaration::Submodule {
            ancestor,
            parent,
            name,
        }) => {
            if name != stem {
                return Err(reject(
                    UnitKind::Submodule,
                    expected_id,
                    format!(
                        "submodule name does not match file name: declares '{}', file is '{}'",
                        name, stem
                    ),
                ));
            }
            if ancestor != dirs[0] {
                return Err(reject(
                    UnitKind::Submodule,
                    expected_id,
                    format!(
                        "submodule declares ancestor '{}' but lives under '{}'",
                        ancestor, dirs[0]
                    ),
                ));
            }
            let expected_parent = if dirs.len() > 1 { dirs.last() } else { None };
            if parent.as_ref() != expected_parent {
                return Err(reject(
                    UnitKind::Submodule,
                    expected_id,
                    format!(
                        "submodule declares parent '{}' but lives in '{}'",
                        match &parent {
                            Some(p) => format!("{}:{}", ancestor, p),
                            None => ancestor.clone(),
                        },
                        dirs.join("/")
                    ),
                ));
            }
            Ok(SourceUnit::submodule(
                &ancestor,
                parent.as_deref(),
                &name,
                path.clone(),
                rel_path.clone(),
                fingerprint,
            ))
        }
        Some(_) => Err(reject(
            UnitKind::Submodule,
            expected_id,
            "files below the module root must declare a SUBMODULE".to_string(),
        )),
        None => Err(reject(
            UnitKind::Submodule,
            expected_id,
            "no SUBMODULE declaration found".to_string(),
        )),
    }
}

fn is_hidden(entry: &walkdir::DirEntry, root: &Path) -> bool {
    entry.path() != root
        && entry
            .file_name()
            .to_str()
            .map(|s| s.starts_with('.'))
            .unwrap_or(false)
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

pub(crate) fn slash_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn lowercase_path(path: &Path) -> String {
    slash_path(path).to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn layout() -> SourceLayout {
        SourceLayout::new("/p", "src", "src/modules", "build")
    }

    fn file(path: &str, text: &str) -> SourceFile {
        SourceFile {
            path: PathBuf::from("/p").join(path),
            text: text.to_string(),
        }
    }

    #[test]
    fn test_parse_declarations() {
        assert_eq!(
            parse_declaration("! header\nMODULE Grid\ncontains\nend module"),
            Some(Declaration::Module("grid".into()))
        );
        assert_eq!(
            parse_declaration("program Heat  ! main\n"),
            Some(Declaration::Program("heat".into()))
        );
        assert_eq!(
            parse_declaration("submodule (grid : io) writer\n"),
            Some(Declaration::Submodule {
                ancestor: "grid".into(),
                parent: Some("io".into()),
                name: "writer".into(),
            })
        );
        assert_eq!(
            parse_declaration("submodule(grid) io\n"),
            Some(Declaration::Submodule {
                ancestor: "grid".into(),
                parent: None,
                name: "io".into(),
            })
        );
    }

    #[test]
    fn test_module_procedure_is_not_a_declaration() {
        let text = "  module procedure solve\n  module subroutine step(x)\n";
        assert_eq!(parse_declaration(text), None);
    }

    #[test]
    fn test_classification_by_location() {
        let catalog = Catalog::from_files(
            &layout(),
            vec![
                file("src/main.f90", "program main\nend program"),
                file("src/modules/grid.f90", "module grid\nend module"),
                file("src/modules/grid/io.f90", "submodule (grid) io\nend submodule"),
                file(
                    "src/modules/grid/io/writer.f90",
                    "submodule (grid:io) writer\nend submodule",
                ),
            ],
        );

        assert!(catalog.rejected().is_empty(), "{:?}", catalog.rejected());
        assert_eq!(catalog.get("main.f90").unwrap().kind, UnitKind::Program);
        assert_eq!(catalog.get("grid").unwrap().kind, UnitKind::Module);

        let io = catalog.get("grid:io").unwrap();
        assert_eq!(io.kind, UnitKind::Submodule);
        assert_eq!(io.parent.as_deref(), Some("grid"));

        let writer = catalog.get("grid:writer").unwrap();
        assert_eq!(writer.parent.as_deref(), Some("grid:io"));
        assert_eq!(writer.ancestor(), Some("grid"));

        let subs: Vec<_> = catalog
            .submodules_of("grid")
            .iter()
            .map(|u| u.id.clone())
            .collect();
        assert_eq!(subs, vec!["grid:io".to_string(), "grid:writer".to_string()]);
    }

    #[test]
    fn test_module_name_must_match_file_name() {
        let catalog = Catalog::from_files(
            &layout(),
            vec![file("src/modules/grid.f90", "module mesh\nend module")],
        );

        assert!(catalog.get("grid").is_none());
        let rejection = catalog.rejection("grid").unwrap();
        match &rejection.error {
            BuildError::ConfigurationMismatch { reason, .. } => {
                assert!(reason.contains("module name does not match file name"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_submodule_hierarchy_must_match_directories() {
        let catalog = Catalog::from_files(
            &layout(),
            vec![
                file("src/modules/grid.f90", "module grid\nend module"),
                file("src/modules/mesh.f90", "module mesh\nend module"),
                file("src/modules/grid/io.f90", "submodule (mesh) io\nend submodule"),
            ],
        );

        assert!(catalog.get("grid:io").is_none());
        assert!(catalog.get("mesh:io").is_none());
        assert_eq!(catalog.rejected().len(), 1);
        assert_eq!(catalog.rejected()[0].id, "grid:io");
    }

    #[test]
    fn test_nested_submodule_must_sit_under_parent_directory() {
        let catalog = Catalog::from_files(
            &layout(),
            vec![
                file("src/modules/grid.f90", "module grid\nend module"),
                file("src/modules/grid/io.f90", "submodule (grid) io\nend submodule"),
                file("src/modules/grid/other/io.f90", "submodule (grid:other) io\nend submodule"),
            ],
        );

        // duplicate ids are rejected together
        assert!(catalog.get("grid:io").is_none());
        assert_eq!(
            catalog
                .rejected()
                .iter()
                .filter(|r| r.id == "grid:io")
                .count(),
            2
        );
    }

    #[test]
    fn test_duplicate_modules_rejected() {
        let catalog = Catalog::from_files(
            &layout(),
            vec![
                file("src/modules/grid.f90", "module grid\nend module"),
                file("src/modules/GRID.F90", "module grid\nend module"),
            ],
        );

        assert!(catalog.module("grid").is_none());
        assert_eq!(catalog.rejected().len(), 2);
    }

    #[test]
    fn test_program_ids_are_relative_paths() {
        let catalog = Catalog::from_files(
            &layout(),
            vec![
                file("src/a/prog.f90", "program prog\nend"),
                file("src/b/prog.f90", "program prog\nend"),
            ],
        );

        assert!(catalog.get("a/prog.f90").is_some());
        assert!(catalog.get("b/prog.f90").is_some());
        assert_eq!(catalog.programs().count(), 2);
        assert_eq!(catalog.get("a/prog.f90").unwrap().name, "prog");
    }

    #[test]
    fn test_program_and_module_may_share_a_name() {
        let catalog = Catalog::from_files(
            &layout(),
            vec![
                file("src/grid.f90", "program grid_driver
  use grid
end program"),
                file("src/modules/grid.f90", "module grid
end module"),
            ],
        );

        assert!(catalog.rejected().is_empty(), "{:?}", catalog.rejected());
        assert_eq!(catalog.get("grid.f90").unwrap().kind, UnitKind::Program);
        assert_eq!(catalog.module("grid").unwrap().display_path(), "modules/grid.f90");
    }

    #[test]
    fn test_source_extensions() {
        assert!(is_source_file(Path::new("a.f90")));
        assert!(is_source_file(Path::new("a.F90")));
        assert!(is_source_file(Path::new("legacy.for")));
        assert!(!is_source_file(Path::new("notes.txt")));
        assert!(!is_source_file(Path::new("Makefile")));
    }
}
