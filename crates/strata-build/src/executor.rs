//! Plan execution
//!
//! Actions run on a bounded rayon pool once all their prerequisites have
//! succeeded. Scheduling and progress reporting stay on the calling thread;
//! workers only run the toolchain and send their result back.
//!
//! A failed action skips everything that transitively needs it while
//! independent actions carry on. With fail-fast, no new action starts after
//! the first failure, running ones finish, and the rest are cancelled.

use crate::error::{BuildError, BuildResult};
use crate::output::BuildProgress;
use crate::plan::{ActionKind, BuildAction, BuildPlan};
use crate::toolchain::{CompileRequest, LinkRequest, ToolOutput, Toolchain};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::mpsc;
use std::time::{Duration, Instant};

/// Final state of an action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionStatus {
    /// The toolchain ran and succeeded
    Succeeded,
    /// Outputs were already current
    UpToDate,
    /// The toolchain reported an error
    Failed(BuildError),
    /// Not run because a prerequisite failed
    Skipped {
        /// Label of the failed action
        cause: String,
    },
    /// Not run because the build stopped at the first failure
    Cancelled,
}

impl ActionStatus {
    /// Whether the action's outputs are usable
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded | Self::UpToDate)
    }

    /// Short name used in reports
    pub fn name(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::UpToDate => "up-to-date",
            Self::Failed(_) => "failed",
            Self::Skipped { .. } => "skipped",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Outcome of one action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionReport {
    pub id: usize,
    pub label: String,
    pub status: ActionStatus,
    pub duration: Duration,
}

/// Execution settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Maximum concurrent actions
    pub jobs: usize,
    /// Stop starting actions after the first failure
    pub fail_fast: bool,
    pub compile_flags: Vec<String>,
    pub link_flags: Vec<String>,
    /// Interface output and search directory
    pub interface_dir: PathBuf,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            jobs: 1,
            fail_fast: false,
            compile_flags: Vec::new(),
            link_flags: Vec::new(),
            interface_dir: PathBuf::from("mod"),
        }
    }
}

/// Runs a [`BuildPlan`] against a [`Toolchain`]
pub struct Executor<'a> {
    toolchain: &'a dyn Toolchain,
    config: ExecutorConfig,
}

type Completion = (usize, BuildResult<ToolOutput>, Duration);

impl<'a> Executor<'a> {
    pub fn new(toolchain: &'a dyn Toolchain, config: ExecutorConfig) -> Self {
        Self { toolchain, config }
    }

    /// Execute every action of `plan`, returning one report per action in
    /// plan order
    pub fn execute(&self, plan: &BuildPlan, progress: &mut BuildProgress) -> BuildResult<Vec<ActionReport>> {
        let jobs = self.config.jobs.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(jobs)
            .thread_name(|i| format!("strata-worker-{}", i))
            .build()
            .map_err(|e| BuildError::BuildFailed(format!("Failed to start worker pool: {}", e)))?;

        let mut schedule = Schedule::new(plan);
        let (tx, rx) = mpsc::channel::<Completion>();

        pool.in_place_scope(|scope| {
            let mut in_flight = 0;
            loop {
                while in_flight < jobs && !schedule.stopped {
                    let Some(id) = schedule.next_ready() else { break };
                    let action = &plan.actions()[id];

                    if action.up_to_date {
                        schedule.finish(id, ActionStatus::UpToDate, Duration::ZERO, progress);
                        continue;
                    }

                    let (verb, subject) = describe(action);
                    progress.action_started(verb, subject);
                    tracing::debug!(action = %action.label(), "dispatched");

                    in_flight += 1;
                    let tx = tx.clone();
                    scope.spawn(move |_| {
                        let start = Instant::now();
                        let result = panic::catch_unwind(AssertUnwindSafe(|| self.run(action)))
                            .unwrap_or_else(|_| {
                                Err(BuildError::BuildFailed(format!("{} panicked", action.label())))
                            });
                        let _ = tx.send((id, result, start.elapsed()));
                    });
                }

                if in_flight == 0 {
                    break;
                }

                let Ok((id, result, duration)) = rx.recv() else { break };
                in_flight -= 1;

                match result {
                    Ok(output) => {
                        progress.tool_output(&output);
                        schedule.finish(id, ActionStatus::Succeeded, duration, progress);
                    }
                    Err(error) => {
                        tracing::warn!(action = %plan.actions()[id].label(), "failed");
                        schedule.finish(id, ActionStatus::Failed(error), duration, progress);
                        if self.config.fail_fast {
                            schedule.stopped = true;
                        }
                    }
                }
            }
        });

        Ok(schedule.into_reports(progress))
    }

    fn run(&self, action: &BuildAction) -> BuildResult<ToolOutput> {
        let label = action.label();
        match &action.kind {
            ActionKind::Compile { source, object, .. } => self.toolchain.compile(&CompileRequest {
                label: &label,
                source,
                object,
                interface_dir: &self.config.interface_dir,
                flags: &self.config.compile_flags,
            }),
            ActionKind::Link {
                objects,
                executable,
            } => self.toolchain.link(&LinkRequest {
                label: &label,
                objects,
                executable,
                flags: &self.config.link_flags,
            }),
        }
    }
}

fn describe(action: &BuildAction) -> (&'static str, &str) {
    match action.kind {
        ActionKind::Compile { .. } => ("Compiling", action.unit.as_str()),
        ActionKind::Link { .. } => ("Linking", action.unit.as_str()),
    }
}

/// Scheduler state, owned by the calling thread
struct Schedule<'p> {
    plan: &'p BuildPlan,
    position: Vec<usize>,
    waiting_on: Vec<usize>,
    dependents: Vec<Vec<usize>>,
    ready: BinaryHeap<Reverse<(usize, usize)>>,
    status: Vec<Option<(ActionStatus, Duration)>>,
    stopped: bool,
}

impl<'p> Schedule<'p> {
    fn new(plan: &'p BuildPlan) -> Self {
        let n = plan.len();
        let mut position = vec![0; n];
        for (pos, &id) in plan.order().iter().enumerate() {
            position[id] = pos;
        }

        let mut dependents = vec![Vec::new(); n];
        let mut waiting_on = vec![0; n];
        for action in plan.actions() {
            waiting_on[action.id] = action.prerequisites.len();
            for &p in &action.prerequisites {
                dependents[p].push(action.id);
            }
        }

        let ready = plan
            .actions()
            .iter()
            .filter(|a| a.prerequisites.is_empty())
            .map(|a| Reverse((position[a.id], a.id)))
            .collect();

        Self {
            plan,
            position,
            waiting_on,
            dependents,
            ready,
            status: vec![None; n],
            stopped: false,
        }
    }

    /// Ready action earliest in plan order
    fn next_ready(&mut self) -> Option<usize> {
        self.ready.pop().map(|Reverse((_, id))| id)
    }

    fn finish(&mut self, id: usize, status: ActionStatus, duration: Duration, progress: &mut BuildProgress) {
        let label = self.plan.actions()[id].label();
        progress.action_finished(&label, &status, duration);

        if status.is_success() {
            for i in 0..self.dependents[id].len() {
                let dependent = self.dependents[id][i];
                self.waiting_on[dependent] -= 1;
                if self.waiting_on[dependent] == 0 && self.status[dependent].is_none() {
                    self.ready.push(Reverse((self.position[dependent], dependent)));
                }
            }
        } else {
            for dependent in self.plan.dependents_of(id) {
                if self.status[dependent].is_none() {
                    let skipped = ActionStatus::Skipped {
                        cause: label.clone(),
                    };
                    progress.action_finished(
                        &self.plan.actions()[dependent].label(),
                        &skipped,
                        Duration::ZERO,
                    );
                    self.status[dependent] = Some((skipped, Duration::ZERO));
                }
            }
        }

        self.status[id] = Some((status, duration));
    }

    fn into_reports(self, progress: &mut BuildProgress) -> Vec<ActionReport> {
        let plan = self.plan;
        self.status
            .into_iter()
            .enumerate()
            .map(|(id, status)| {
                let label = plan.actions()[id].label();
                let (status, duration) = status.unwrap_or_else(|| {
                    progress.action_finished(&label, &ActionStatus::Cancelled, Duration::ZERO);
                    (ActionStatus::Cancelled, Duration::ZERO)
                });
                ActionReport {
                    id,
                    label,
                    status,
                    duration,
                }
            })
            .collect()
    }
}
