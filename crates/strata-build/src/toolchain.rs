//! Compiler and linker invocation
//!
//! The engine sees the toolchain only through [`Toolchain`]. The default
//! implementation runs the configured commands as subprocesses and captures
//! their output.

use crate::error::{BuildError, BuildResult};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

/// Inputs of one compile
#[derive(Debug, Clone)]
pub struct CompileRequest<'a> {
    /// Action label used in diagnostics
    pub label: &'a str,
    pub source: &'a Path,
    pub object: &'a Path,
    /// Where interfaces are written and searched
    pub interface_dir: &'a Path,
    pub flags: &'a [String],
}

/// Inputs of one link
#[derive(Debug, Clone)]
pub struct LinkRequest<'a> {
    /// Action label used in diagnostics
    pub label: &'a str,
    /// Objects in link-line order
    pub objects: &'a [PathBuf],
    pub executable: &'a Path,
    pub flags: &'a [String],
}

/// Captured output of a successful tool run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl ToolOutput {
    /// Whether the tool printed anything (warnings, usually)
    pub fn has_output(&self) -> bool {
        !self.stdout.trim().is_empty() || !self.stderr.trim().is_empty()
    }
}

/// Compiler and linker boundary
pub trait Toolchain: Send + Sync {
    /// Produce an object file and, for modules, an interface artifact
    fn compile(&self, request: &CompileRequest<'_>) -> BuildResult<ToolOutput>;

    /// Produce an executable from objects
    fn link(&self, request: &LinkRequest<'_>) -> BuildResult<ToolOutput>;
}

/// Runs the configured compiler and linker as subprocesses
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandToolchain {
    compiler: String,
    linker: String,
    module_output_flag: String,
    include_flag: String,
}

impl CommandToolchain {
    /// gfortran-style toolchain driven by `compiler`, which also links
    pub fn new(compiler: impl Into<String>) -> Self {
        let compiler = compiler.into();
        Self {
            linker: compiler.clone(),
            compiler,
            module_output_flag: "-J".to_string(),
            include_flag: "-I".to_string(),
        }
    }

    /// Toolchain described by a loaded configuration
    pub fn from_config(config: &strata_config::Config) -> Self {
        Self::new(config.compiler())
            .with_linker(config.linker())
            .with_module_flags(config.module_output_flag(), config.include_flag())
    }

    /// Use a separate link command
    pub fn with_linker(mut self, linker: impl Into<String>) -> Self {
        self.linker = linker.into();
        self
    }

    /// Flags naming the interface output and search directories
    pub fn with_module_flags(
        mut self,
        output_flag: impl Into<String>,
        include_flag: impl Into<String>,
    ) -> Self {
        self.module_output_flag = output_flag.into();
        self.include_flag = include_flag.into();
        self
    }

    /// Arguments passed to the compiler
    pub fn compile_args(&self, request: &CompileRequest<'_>) -> Vec<String> {
        let dir = request.interface_dir.display().to_string();
        let mut args: Vec<String> = request.flags.to_vec();
        args.extend([
            "-c".to_string(),
            request.source.display().to_string(),
            "-o".to_string(),
            request.object.display().to_string(),
            self.module_output_flag.clone(),
            dir.clone(),
            self.include_flag.clone(),
            dir,
        ]);
        args
    }

    /// Arguments passed to the linker
    pub fn link_args(&self, request: &LinkRequest<'_>) -> Vec<String> {
        let mut args: Vec<String> = request.flags.to_vec();
        args.extend(request.objects.iter().map(|o| o.display().to_string()));
        args.push("-o".to_string());
        args.push(request.executable.display().to_string());
        args
    }

    fn run(&self, label: &str, program: &str, args: &[String]) -> BuildResult<ToolOutput> {
        tracing::debug!(action = label, command = %format!("{} {}", program, args.join(" ")), "running");
        let start = Instant::now();

        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .and_then(|child| child.wait_with_output())
            .map_err(|e| BuildError::toolchain(label, format!("failed to run `{}`: {}", program, e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            let mut diagnostics = stderr;
            diagnostics.push_str(&stdout);
            if diagnostics.trim().is_empty() {
                diagnostics = format!("`{}` exited with {}", program, output.status);
            }
            return Err(BuildError::toolchain(label, diagnostics));
        }

        Ok(ToolOutput {
            stdout,
            stderr,
            duration: start.elapsed(),
        })
    }
}

fn ensure_parent(path: &Path) -> BuildResult<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(|e| BuildError::io(dir, e))?;
    }
    Ok(())
}

impl Toolchain for CommandToolchain {
    fn compile(&self, request: &CompileRequest<'_>) -> BuildResult<ToolOutput> {
        ensure_parent(request.object)?;
        fs::create_dir_all(request.interface_dir)
            .map_err(|e| BuildError::io(request.interface_dir, e))?;
        self.run(request.label, &self.compiler, &self.compile_args(request))
    }

    fn link(&self, request: &LinkRequest<'_>) -> BuildResult<ToolOutput> {
        ensure_parent(request.executable)?;
        self.run(request.label, &self.linker, &self.link_args(request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn flags() -> Vec<String> {
        vec!["-O2".to_string()]
    }

    #[test]
    fn test_compile_args() {
        let flags = flags();
        let request = CompileRequest {
            label: "Compile(grid)",
            source: Path::new("src/modules/grid.f90"),
            object: Path::new("build/dev/obj/grid.o"),
            interface_dir: Path::new("build/dev/mod"),
            flags: &flags,
        };
        let toolchain = CommandToolchain::new("gfortran");

        assert_eq!(
            toolchain.compile_args(&request),
            vec![
                "-O2",
                "-c",
                "src/modules/grid.f90",
                "-o",
                "build/dev/obj/grid.o",
                "-J",
                "build/dev/mod",
                "-I",
                "build/dev/mod",
            ]
        );
    }

    #[test]
    fn test_link_args_keep_object_order() {
        let flags = Vec::new();
        let objects = vec![PathBuf::from("main.o"), PathBuf::from("a.o"), PathBuf::from("b.o")];
        let request = LinkRequest {
            label: "Link(main)",
            objects: &objects,
            executable: Path::new("bin/main"),
            flags: &flags,
        };
        let toolchain = CommandToolchain::new("gfortran").with_linker("ld-wrapper");

        assert_eq!(
            toolchain.link_args(&request),
            vec!["main.o", "a.o", "b.o", "-o", "bin/main"]
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_failing_command_is_a_toolchain_failure() {
        let temp = TempDir::new().unwrap();
        let flags = Vec::new();
        let object = temp.path().join("obj/a.o");
        let interface_dir = temp.path().join("mod");
        let request = CompileRequest {
            label: "Compile(a)",
            source: Path::new("a.f90"),
            object: &object,
            interface_dir: &interface_dir,
            flags: &flags,
        };

        let err = CommandToolchain::new("false").compile(&request).unwrap_err();
        assert_eq!(err.kind(), "toolchain-failure");
        assert!(interface_dir.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_successful_command() {
        let temp = TempDir::new().unwrap();
        let flags = Vec::new();
        let objects = Vec::new();
        let executable = temp.path().join("bin/p");
        let request = LinkRequest {
            label: "Link(p)",
            objects: &objects,
            executable: &executable,
            flags: &flags,
        };

        let output = CommandToolchain::new("true").link(&request).unwrap();
        assert!(!output.has_output());
        assert!(temp.path().join("bin").is_dir());
    }

    #[test]
    fn test_missing_compiler() {
        let temp = TempDir::new().unwrap();
        let flags = Vec::new();
        let object = temp.path().join("a.o");
        let request = CompileRequest {
            label: "Compile(a)",
            source: Path::new("a.f90"),
            object: &object,
            interface_dir: temp.path(),
            flags: &flags,
        };

        let err = CommandToolchain::new("strata-no-such-compiler")
            .compile(&request)
            .unwrap_err();
        match err {
            BuildError::ToolchainFailure { action, diagnostics } => {
                assert_eq!(action, "Compile(a)");
                assert!(diagnostics.contains("strata-no-such-compiler"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
