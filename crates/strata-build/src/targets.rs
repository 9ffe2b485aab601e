/// Build target requests and their resolution to source units
///
/// Resolution is a pure function of the request string and the unit set, so
/// it never touches the file system.
use crate::catalog::{is_source_file, RejectedUnit, SourceUnit, UnitKind};
use crate::error::{BuildError, BuildResult};
use serde::Serialize;
use std::path::Path;

/// A parsed target request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetRequest {
    /// Bare unit name, matched against program, module and submodule names
    Name(String),
    /// Unit path relative to the source root, extension optional
    Path(String),
    /// Programs in a directory; the empty string is the source root
    Directory { dir: String, recursive: bool },
}

impl TargetRequest {
    /// Parse a request
    ///
    /// `dir/` selects programs directly in `dir`, `dir//` also those in every
    /// nested directory, and `.` the programs directly in the source root.
    pub fn parse(request: &str) -> Self {
        let normalized = request.trim().replace('\\', "/");

        if let Some(dir) = normalized.strip_suffix("//") {
            return Self::Directory {
                dir: normalize_dir(dir),
                recursive: true,
            };
        }
        if let Some(dir) = normalized.strip_suffix('/') {
            return Self::Directory {
                dir: normalize_dir(dir),
                recursive: false,
            };
        }
        if normalized == "." {
            return Self::Directory {
                dir: String::new(),
                recursive: false,
            };
        }

        let path = strip_dot_prefix(&normalized);
        let has_extension = is_source_file(Path::new(path));
        let stem = if has_extension {
            path.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(path)
        } else {
            path
        };

        if path.contains('/') || has_extension {
            Self::Path(stem.to_lowercase())
        } else {
            Self::Name(stem.to_lowercase())
        }
    }
}

impl std::fmt::Display for TargetRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Name(name) => write!(f, "{}", name),
            Self::Path(path) => write!(f, "{}", path),
            Self::Directory { dir, recursive } => {
                let dir = if dir.is_empty() { "." } else { dir.as_str() };
                write!(f, "{}/{}", dir, if *recursive { "/" } else { "" })
            }
        }
    }
}

fn strip_dot_prefix(mut path: &str) -> &str {
    while let Some(rest) = path.strip_prefix("./") {
        path = rest;
    }
    path
}

fn normalize_dir(dir: &str) -> String {
    let dir = strip_dot_prefix(dir).trim_end_matches('/');
    if dir == "." {
        String::new()
    } else {
        dir.to_lowercase()
    }
}

/// A unit selected by a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildTarget {
    /// The request as given
    pub request: String,
    /// Selected unit id
    pub unit: String,
    pub kind: UnitKind,
}

/// Resolve `request` against the accepted and rejected units
///
/// A name that matches a rejected unit reports the rejection.
pub fn select_targets(
    request: &str,
    units: &[SourceUnit],
    rejected: &[RejectedUnit],
) -> BuildResult<Vec<BuildTarget>> {
    let parsed = TargetRequest::parse(request);
    let target = |unit: &SourceUnit| BuildTarget {
        request: request.to_string(),
        unit: unit.id.clone(),
        kind: unit.kind,
    };
    let unknown = || BuildError::UnknownTarget {
        target: request.to_string(),
    };

    let matches: Vec<&SourceUnit> = match &parsed {
        TargetRequest::Name(name) => units
            .iter()
            .filter(|u| match u.kind {
                UnitKind::Program | UnitKind::Module => u.name == *name,
                UnitKind::Submodule => u.name == *name || u.id == *name,
            })
            .collect(),
        TargetRequest::Path(path) => units
            .iter()
            .filter(|u| u.rel_stem().to_lowercase() == *path)
            .collect(),
        TargetRequest::Directory { dir, recursive } => {
            let mut selected: Vec<&SourceUnit> = units
                .iter()
                .filter(|u| u.kind == UnitKind::Program)
                .filter(|u| {
                    let stem = u.rel_stem().to_lowercase();
                    let parent = stem.rsplit_once('/').map(|(p, _)| p).unwrap_or("");
                    if *recursive {
                        dir.is_empty() || parent == dir || parent.starts_with(&format!("{}/", dir))
                    } else {
                        parent == dir
                    }
                })
                .collect();
            if selected.is_empty() {
                return Err(unknown());
            }
            selected.sort_by(|a, b| a.id.cmp(&b.id));
            return Ok(selected.into_iter().map(target).collect());
        }
    };

    match matches.len() {
        0 => {
            let rejection = rejected.iter().find(|r| match &parsed {
                TargetRequest::Name(name) => {
                    r.id == *name || r.id.rsplit_once(':').map(|(_, n)| n) == Some(name.as_str())
                }
                TargetRequest::Path(path) => {
                    crate::catalog::slash_path(&r.rel_path.with_extension("")).to_lowercase()
                        == *path
                }
                TargetRequest::Directory { .. } => false,
            });
            Err(rejection.map(|r| r.error.clone()).unwrap_or_else(unknown))
        }
        1 => Ok(vec![target(matches[0])]),
        _ => {
            let mut candidates: Vec<String> = matches.iter().map(|u| u.display_path()).collect();
            candidates.sort();
            Err(BuildError::AmbiguousTarget {
                target: request.to_string(),
                candidates,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use std::path::PathBuf;

    fn program(rel: &str) -> SourceUnit {
        SourceUnit::program(
            PathBuf::from("/p/src").join(rel),
            PathBuf::from(rel),
            String::new(),
        )
    }

    fn units() -> Vec<SourceUnit> {
        vec![
            program("main.f90"),
            program("apps/prog.f90"),
            program("tools/prog.f90"),
            program("tools/deep/scan.f90"),
            SourceUnit::module(
                "grid",
                PathBuf::from("/p/src/modules/grid.f90"),
                PathBuf::from("modules/grid.f90"),
                String::new(),
            ),
            SourceUnit::submodule(
                "grid",
                None,
                "io",
                PathBuf::from("/p/src/modules/grid/io.f90"),
                PathBuf::from("modules/grid/io.f90"),
                String::new(),
            ),
        ]
    }

    fn ids(targets: Vec<BuildTarget>) -> Vec<String> {
        targets.into_iter().map(|t| t.unit).collect()
    }

    #[rstest]
    #[case("main", TargetRequest::Name("main".into()))]
    #[case("Grid", TargetRequest::Name("grid".into()))]
    #[case("apps/prog", TargetRequest::Path("apps/prog".into()))]
    #[case("./apps/prog.f90", TargetRequest::Path("apps/prog".into()))]
    #[case("apps\\prog", TargetRequest::Path("apps/prog".into()))]
    #[case("main.F90", TargetRequest::Path("main".into()))]
    #[case("tools/", TargetRequest::Directory { dir: "tools".into(), recursive: false })]
    #[case("tools//", TargetRequest::Directory { dir: "tools".into(), recursive: true })]
    #[case(".", TargetRequest::Directory { dir: String::new(), recursive: false })]
    #[case("./", TargetRequest::Directory { dir: String::new(), recursive: false })]
    #[case(".//", TargetRequest::Directory { dir: String::new(), recursive: true })]
    fn test_parse(#[case] request: &str, #[case] expected: TargetRequest) {
        assert_eq!(TargetRequest::parse(request), expected);
    }

    #[test]
    fn test_unique_name() {
        assert_eq!(ids(select_targets("main", &units(), &[]).unwrap()), vec!["main.f90"]);
        assert_eq!(ids(select_targets("grid", &units(), &[]).unwrap()), vec!["grid"]);
        assert_eq!(ids(select_targets("io", &units(), &[]).unwrap()), vec!["grid:io"]);
        assert_eq!(
            ids(select_targets("grid:io", &units(), &[]).unwrap()),
            vec!["grid:io"]
        );
    }

    #[test]
    fn test_ambiguous_name_lists_paths() {
        let err = select_targets("prog", &units(), &[]).unwrap_err();
        assert_eq!(
            err,
            BuildError::AmbiguousTarget {
                target: "prog".into(),
                candidates: vec!["apps/prog.f90".into(), "tools/prog.f90".into()],
            }
        );

        assert_eq!(
            ids(select_targets("tools/prog", &units(), &[]).unwrap()),
            vec!["tools/prog.f90"]
        );
    }

    #[test]
    fn test_program_named_like_a_module_is_ambiguous() {
        let mut units = units();
        units.push(program("grid.f90"));

        assert_eq!(
            select_targets("grid", &units, &[]),
            Err(BuildError::AmbiguousTarget {
                target: "grid".into(),
                candidates: vec!["grid.f90".into(), "modules/grid.f90".into()],
            })
        );
        assert_eq!(ids(select_targets("grid.f90", &units, &[]).unwrap()), vec!["grid.f90"]);
        assert_eq!(ids(select_targets("modules/grid", &units, &[]).unwrap()), vec!["grid"]);
    }

    #[test]
    fn test_directory_selection() {
        assert_eq!(
            ids(select_targets("tools/", &units(), &[]).unwrap()),
            vec!["tools/prog.f90"]
        );
        assert_eq!(
            ids(select_targets("tools//", &units(), &[]).unwrap()),
            vec!["tools/deep/scan.f90", "tools/prog.f90"]
        );
        assert_eq!(ids(select_targets(".", &units(), &[]).unwrap()), vec!["main.f90"]);
        assert_eq!(select_targets(".//", &units(), &[]).unwrap().len(), 4);
    }

    #[test]
    fn test_unknown_target() {
        assert_eq!(
            select_targets("nothing", &units(), &[]),
            Err(BuildError::UnknownTarget {
                target: "nothing".into()
            })
        );
        assert!(select_targets("empty/", &units(), &[]).is_err());
    }

    #[test]
    fn test_rejected_unit_reports_its_error() {
        let error = BuildError::mismatch("/p/src/modules/mesh.f90", "module name does not match file name");
        let rejected = vec![RejectedUnit {
            id: "mesh".into(),
            kind: UnitKind::Module,
            path: PathBuf::from("/p/src/modules/mesh.f90"),
            rel_path: PathBuf::from("modules/mesh.f90"),
            error: error.clone(),
        }];

        assert_eq!(select_targets("mesh", &units(), &rejected), Err(error.clone()));
        assert_eq!(
            select_targets("modules/mesh", &units(), &rejected),
            Err(error)
        );
    }
}
