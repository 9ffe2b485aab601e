//! Progress reporting
//!
//! Start and finish lines for each action. Everything is written from the
//! scheduling thread, so lines never interleave.

use crate::executor::ActionStatus;
use crate::toolchain::ToolOutput;
use std::io::{self, Write};
use std::time::Duration;

/// How much the build prints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    /// Action lines and errors
    #[default]
    Normal,
    /// Also fresh and skipped actions, with timings
    Verbose,
    /// Errors only
    Quiet,
    /// Nothing; the caller prints a JSON report
    Json,
}

/// Writes action progress in the selected mode
pub struct BuildProgress {
    mode: OutputMode,
    out: Box<dyn Write + Send>,
}

impl BuildProgress {
    /// Progress on stdout
    pub fn new(mode: OutputMode) -> Self {
        Self::with_writer(mode, Box::new(io::stdout()))
    }

    /// Progress on an arbitrary writer
    pub fn with_writer(mode: OutputMode, out: Box<dyn Write + Send>) -> Self {
        Self { mode, out }
    }

    pub fn mode(&self) -> OutputMode {
        self.mode
    }

    fn shows_actions(&self) -> bool {
        matches!(self.mode, OutputMode::Normal | OutputMode::Verbose)
    }

    /// An action was handed to the toolchain
    pub fn action_started(&mut self, verb: &str, subject: &str) {
        if self.shows_actions() {
            let _ = writeln!(self.out, "{:>12} {}", verb, subject);
        }
    }

    /// An action reached a final status
    pub fn action_finished(&mut self, label: &str, status: &ActionStatus, duration: Duration) {
        match (self.mode, status) {
            (OutputMode::Json, _) => {}
            (_, ActionStatus::Failed(error)) => {
                let _ = writeln!(self.out, "error: {}", error);
            }
            (OutputMode::Verbose, ActionStatus::Succeeded) => {
                let _ = writeln!(
                    self.out,
                    "{:>12} {} in {:.2}s",
                    "Finished",
                    label,
                    duration.as_secs_f64()
                );
            }
            (OutputMode::Verbose, ActionStatus::UpToDate) => {
                let _ = writeln!(self.out, "{:>12} {}", "Fresh", label);
            }
            (OutputMode::Verbose, ActionStatus::Skipped { cause }) => {
                let _ = writeln!(self.out, "{:>12} {} (needs {})", "Skipped", label, cause);
            }
            (OutputMode::Verbose, ActionStatus::Cancelled) => {
                let _ = writeln!(self.out, "{:>12} {}", "Cancelled", label);
            }
            _ => {}
        }
    }

    /// Warnings or other output from a successful tool run
    pub fn tool_output(&mut self, output: &ToolOutput) {
        if !self.shows_actions() || !output.has_output() {
            return;
        }
        if !output.stderr.trim().is_empty() {
            let _ = write!(self.out, "{}", output.stderr);
        }
        if self.mode == OutputMode::Verbose && !output.stdout.trim().is_empty() {
            let _ = write!(self.out, "{}", output.stdout);
        }
    }

    /// Free-form status line, hidden in quiet and JSON modes
    pub fn status(&mut self, message: &str) {
        if self.shows_actions() {
            let _ = writeln!(self.out, "{}", message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BuildError;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl Write for Capture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Capture {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    fn progress(mode: OutputMode) -> (BuildProgress, Capture) {
        let capture = Capture::default();
        (
            BuildProgress::with_writer(mode, Box::new(capture.clone())),
            capture,
        )
    }

    #[test]
    fn test_normal_mode_shows_actions_and_errors() {
        let (mut p, out) = progress(OutputMode::Normal);
        p.action_started("Compiling", "grid");
        p.action_finished("Compile(grid)", &ActionStatus::UpToDate, Duration::ZERO);
        p.action_finished(
            "Compile(b)",
            &ActionStatus::Failed(BuildError::toolchain("Compile(b)", "b.f90:1: Error")),
            Duration::ZERO,
        );

        let text = out.text();
        assert!(text.contains("   Compiling grid"));
        assert!(!text.contains("Fresh"));
        assert!(text.contains("error: Compile(b) failed:\nb.f90:1: Error"));
    }

    #[test]
    fn test_quiet_mode_only_errors() {
        let (mut p, out) = progress(OutputMode::Quiet);
        p.action_started("Compiling", "grid");
        p.status("Build finished");
        p.action_finished(
            "Link(main)",
            &ActionStatus::Failed(BuildError::toolchain("Link(main)", "undefined reference")),
            Duration::ZERO,
        );

        assert_eq!(
            out.text(),
            "error: Link(main) failed:\nundefined reference\n"
        );
    }

    #[test]
    fn test_json_mode_prints_nothing() {
        let (mut p, out) = progress(OutputMode::Json);
        p.action_started("Linking", "main");
        p.action_finished(
            "Link(main)",
            &ActionStatus::Failed(BuildError::toolchain("Link(main)", "boom")),
            Duration::ZERO,
        );
        assert!(out.text().is_empty());
    }

    #[test]
    fn test_verbose_mode_shows_skips() {
        let (mut p, out) = progress(OutputMode::Verbose);
        p.action_finished(
            "Link(main)",
            &ActionStatus::Skipped {
                cause: "Compile(b)".into(),
            },
            Duration::ZERO,
        );
        assert!(out.text().contains("Skipped Link(main) (needs Compile(b))"));
    }
}
