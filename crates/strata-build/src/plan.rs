//! Build planning
//!
//! Turns target requests into a graph of compile and link actions. A unit's
//! compile depends on the compiles of the modules it imports and, for a
//! submodule, on its parent's compile. A program's link depends on the
//! compile of every unit in its link set.

use crate::build_order::{BuildGraph, ModuleNode};
use crate::catalog::{Catalog, SourceUnit, UnitKind};
use crate::error::{BuildError, BuildResult};
use crate::module_resolver::Resolution;
use crate::targets::select_targets;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Where build outputs go for one profile
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLayout {
    root: PathBuf,
}

impl ArtifactLayout {
    /// Outputs under `<build_dir>/<profile>`
    pub fn new(build_dir: &Path, profile: &str) -> Self {
        Self {
            root: build_dir.join(profile),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory receiving module interfaces
    pub fn interface_dir(&self) -> PathBuf {
        self.root.join("mod")
    }

    /// Object file of a unit
    pub fn object(&self, unit: &SourceUnit) -> PathBuf {
        let obj = self.root.join("obj");
        match unit.kind {
            UnitKind::Module => obj.join(format!("{}.o", unit.name)),
            UnitKind::Submodule => obj.join(format!("{}.o", unit.id.replace(':', "@"))),
            UnitKind::Program => obj.join("programs").join(format!("{}.o", unit.rel_stem())),
        }
    }

    /// Interface artifact of a module or submodule
    pub fn interface(&self, unit: &SourceUnit) -> Option<PathBuf> {
        match unit.kind {
            UnitKind::Module => Some(self.interface_dir().join(format!("{}.mod", unit.name))),
            UnitKind::Submodule => Some(
                self.interface_dir()
                    .join(format!("{}.smod", unit.id.replace(':', "@"))),
            ),
            UnitKind::Program => None,
        }
    }

    /// Executable of a program
    pub fn executable(&self, unit: &SourceUnit) -> PathBuf {
        self.root
            .join("bin")
            .join(format!("{}{}", unit.rel_stem(), std::env::consts::EXE_SUFFIX))
    }
}

/// What an action does
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ActionKind {
    Compile {
        source: PathBuf,
        object: PathBuf,
        interface: Option<PathBuf>,
    },
    Link {
        objects: Vec<PathBuf>,
        executable: PathBuf,
    },
}

/// One compile or link step
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildAction {
    pub id: usize,
    /// Unit compiled, or program linked
    pub unit: String,
    pub kind: ActionKind,
    /// Actions whose outputs this one needs
    pub prerequisites: BTreeSet<usize>,
    /// Outputs exist and are newer than every input
    pub up_to_date: bool,
}

impl BuildAction {
    /// Human-readable name, e.g. `Compile(grid)` or `Link(main)`
    pub fn label(&self) -> String {
        match self.kind {
            ActionKind::Compile { .. } => format!("Compile({})", self.unit),
            ActionKind::Link { .. } => format!("Link({})", self.unit),
        }
    }

    pub fn is_link(&self) -> bool {
        matches!(self.kind, ActionKind::Link { .. })
    }

    /// Files this action writes
    pub fn outputs(&self) -> Vec<&Path> {
        match &self.kind {
            ActionKind::Compile {
                object, interface, ..
            } => std::iter::once(object.as_path())
                .chain(interface.as_deref())
                .collect(),
            ActionKind::Link { executable, .. } => vec![executable.as_path()],
        }
    }

    /// Primary artifact
    pub fn artifact(&self) -> &Path {
        match &self.kind {
            ActionKind::Compile { object, .. } => object,
            ActionKind::Link { executable, .. } => executable,
        }
    }
}

/// A requested unit and the action producing its artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedTarget {
    pub request: String,
    pub unit: String,
    pub action: usize,
    pub artifact: PathBuf,
    /// Units linked into the executable, program first; empty for modules
    pub link_units: Vec<String>,
}

/// A request that could not be planned
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanFailure {
    pub request: String,
    pub unit: Option<String>,
    pub error: BuildError,
}

/// Actions for one invocation in a valid execution order
#[derive(Debug, Clone, Default)]
pub struct BuildPlan {
    actions: Vec<BuildAction>,
    order: Vec<usize>,
    targets: Vec<PlannedTarget>,
    parallel_groups: usize,
}

impl BuildPlan {
    pub fn actions(&self) -> &[BuildAction] {
        &self.actions
    }

    pub fn action(&self, id: usize) -> Option<&BuildAction> {
        self.actions.get(id)
    }

    /// Action ids, every prerequisite before its dependents
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    /// Labels in execution order
    pub fn labels(&self) -> Vec<String> {
        self.order.iter().map(|&id| self.actions[id].label()).collect()
    }

    pub fn targets(&self) -> &[PlannedTarget] {
        &self.targets
    }

    /// Number of waves of mutually independent actions
    pub fn parallel_groups(&self) -> usize {
        self.parallel_groups
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Mark actions whose outputs are current
    ///
    /// An action is up to date when all its outputs exist, none is older than
    /// any input, and none of its prerequisites needs to run. `mtime` returns
    /// `None` for a missing file.
    pub fn mark_up_to_date<F>(&mut self, mtime: F)
    where
        F: Fn(&Path) -> Option<SystemTime>,
    {
        for &id in &self.order {
            let action = &self.actions[id];
            let prerequisites_fresh = action
                .prerequisites
                .iter()
                .all(|&p| self.actions[p].up_to_date);

            let fresh = prerequisites_fresh && {
                let oldest_output = action
                    .outputs()
                    .into_iter()
                    .map(|p| mtime(p))
                    .collect::<Option<Vec<_>>>()
                    .and_then(|times| times.into_iter().min());

                let mut inputs: Vec<&Path> = action
                    .prerequisites
                    .iter()
                    .flat_map(|&p| self.actions[p].outputs())
                    .collect();
                match &action.kind {
                    ActionKind::Compile { source, .. } => inputs.push(source),
                    ActionKind::Link { objects, .. } => {
                        inputs.extend(objects.iter().map(|o| o.as_path()))
                    }
                }

                match oldest_output {
                    Some(output) => inputs
                        .into_iter()
                        .all(|input| matches!(mtime(input), Some(t) if t <= output)),
                    None => false,
                }
            };

            self.actions[id].up_to_date = fresh;
        }
    }

    /// Every action that transitively requires `id`
    pub fn dependents_of(&self, id: usize) -> BTreeSet<usize> {
        let mut result = BTreeSet::new();
        for &candidate in &self.order {
            let action = &self.actions[candidate];
            if action
                .prerequisites
                .iter()
                .any(|p| *p == id || result.contains(p))
            {
                result.insert(candidate);
            }
        }
        result
    }
}

/// Result of planning
#[derive(Debug, Clone, Default)]
pub struct PlanOutcome {
    pub plan: BuildPlan,
    pub failures: Vec<PlanFailure>,
}

/// Builds plans against one catalog and resolution
pub struct Planner<'a> {
    catalog: &'a Catalog,
    resolution: &'a Resolution,
    layout: &'a ArtifactLayout,
    extras: BTreeMap<String, Vec<String>>,
}

impl<'a> Planner<'a> {
    pub fn new(catalog: &'a Catalog, resolution: &'a Resolution, layout: &'a ArtifactLayout) -> Self {
        Self {
            catalog,
            resolution,
            layout,
            extras: BTreeMap::new(),
        }
    }

    /// Extra units linked whenever a given module is linked
    pub fn with_link_extras(mut self, extras: BTreeMap<String, Vec<String>>) -> Self {
        self.extras = extras;
        self
    }

    /// Plan every request; failing requests are reported without affecting
    /// the others
    pub fn plan(&self, requests: &[String]) -> BuildResult<PlanOutcome> {
        let mut builder = PlanBuilder::default();
        let mut failures = Vec::new();

        for request in requests {
            let selected = match select_targets(request, self.catalog.units(), self.catalog.rejected()) {
                Ok(selected) => selected,
                Err(error) => {
                    tracing::debug!(request = %request, "target selection failed: {}", error);
                    failures.push(PlanFailure {
                        request: request.clone(),
                        unit: None,
                        error,
                    });
                    continue;
                }
            };

            for target in selected {
                let Some(unit) = self.catalog.get(&target.unit) else {
                    continue;
                };
                match self.plan_unit(&mut builder, unit) {
                    Ok((action, link_units)) => builder.targets.push(PlannedTarget {
                        request: request.clone(),
                        unit: unit.id.clone(),
                        action,
                        artifact: builder.actions[action].artifact().to_path_buf(),
                        link_units,
                    }),
                    Err(error) => failures.push(PlanFailure {
                        request: request.clone(),
                        unit: Some(unit.id.clone()),
                        error,
                    }),
                }
            }
        }

        let plan = builder.finish()?;
        tracing::info!(
            actions = plan.len(),
            targets = plan.targets().len(),
            failures = failures.len(),
            "build plan ready"
        );
        Ok(PlanOutcome { plan, failures })
    }

    fn plan_unit(&self, builder: &mut PlanBuilder, unit: &SourceUnit) -> BuildResult<(usize, Vec<String>)> {
        match unit.kind {
            UnitKind::Program => {
                let link_units = self.link_units(unit)?;
                let mut prerequisites = BTreeSet::new();
                let mut objects = Vec::with_capacity(link_units.len());
                for id in &link_units {
                    let Some(member) = self.catalog.get(id) else { continue };
                    prerequisites.insert(self.ensure_compile(builder, member));
                    objects.push(self.layout.object(member));
                }
                let action = builder.link(
                    unit,
                    ActionKind::Link {
                        objects,
                        executable: self.layout.executable(unit),
                    },
                    prerequisites,
                );
                Ok((action, link_units))
            }
            UnitKind::Module | UnitKind::Submodule => {
                if let Some(Err(error)) = self.resolution.closure(&unit.id) {
                    return Err(error.clone());
                }
                Ok((self.ensure_compile(builder, unit), Vec::new()))
            }
        }
    }

    /// Modules a unit compiles against, plus its parent
    fn direct_dependencies(&self, unit: &SourceUnit) -> Vec<String> {
        let mut deps: Vec<String> = self.resolution.imports(&unit.id).to_vec();
        if let Some(parent) = &unit.parent {
            deps.push(parent.clone());
        }
        deps
    }

    fn ensure_compile(&self, builder: &mut PlanBuilder, unit: &SourceUnit) -> usize {
        if let Some(&id) = builder.compiles.get(&unit.id) {
            return id;
        }

        let mut prerequisites = BTreeSet::new();
        for dep in self.direct_dependencies(unit) {
            if let Some(dep_unit) = self.catalog.get(&dep) {
                prerequisites.insert(self.ensure_compile(builder, dep_unit));
            }
        }

        builder.compile(
            unit,
            ActionKind::Compile {
                source: unit.path.clone(),
                object: self.layout.object(unit),
                interface: self.layout.interface(unit),
            },
            prerequisites,
        )
    }

    /// Units whose objects a program links, program first and the rest with
    /// dependents before their dependencies
    ///
    /// The set holds every imported module and its closure, every submodule
    /// below a module in the set, and the configured extras of each module,
    /// repeated until nothing new is added.
    pub fn link_units(&self, program: &SourceUnit) -> BuildResult<Vec<String>> {
        let mut set = BTreeSet::new();
        for name in self.resolution.imports(&program.id) {
            let closure = self.resolution.require(&program.id, name)?;
            set.insert(name.clone());
            set.extend(closure);
        }

        loop {
            let mut added = BTreeSet::new();
            for id in &set {
                let Some(unit) = self.catalog.get(id) else { continue };
                if unit.kind == UnitKind::Module {
                    for sub in self.catalog.submodules_of(id) {
                        added.insert(sub.id.clone());
                    }
                }
                for extra in self.extras.get(id).into_iter().flatten() {
                    if self.catalog.get(extra).is_none() {
                        return Err(match self.catalog.rejection(extra) {
                            Some(rejected) => rejected.error.clone(),
                            None => BuildError::Config(format!(
                                "[link.extra] entry for '{}' names unknown unit '{}'",
                                id, extra
                            )),
                        });
                    }
                    added.insert(extra.clone());
                }
            }
            added.retain(|id| !set.contains(id));
            if added.is_empty() {
                break;
            }
            for id in added {
                match self.resolution.closure(&id) {
                    Some(Ok(closure)) => set.extend(closure.iter().cloned()),
                    Some(Err(error)) => return Err(error.clone()),
                    None => return Err(BuildError::unresolved(&program.id, &id)),
                }
                set.insert(id);
            }
        }

        let mut graph = BuildGraph::new();
        for id in &set {
            let Some(unit) = self.catalog.get(id) else { continue };
            let deps = self
                .direct_dependencies(unit)
                .into_iter()
                .filter(|d| set.contains(d))
                .collect();
            graph.add_module(ModuleNode::new(id, unit.path.clone()).with_dependencies(deps));
        }
        let mut order = graph.compute_build_order()?;
        order.reverse();

        let mut units = Vec::with_capacity(order.len() + 1);
        units.push(program.id.clone());
        units.extend(order);
        Ok(units)
    }
}

#[derive(Default)]
struct PlanBuilder {
    actions: Vec<BuildAction>,
    compiles: HashMap<String, usize>,
    links: HashMap<String, usize>,
    targets: Vec<PlannedTarget>,
}

impl PlanBuilder {
    fn push(&mut self, unit: &SourceUnit, kind: ActionKind, prerequisites: BTreeSet<usize>) -> usize {
        let id = self.actions.len();
        self.actions.push(BuildAction {
            id,
            unit: unit.id.clone(),
            kind,
            prerequisites,
            up_to_date: false,
        });
        id
    }

    fn compile(&mut self, unit: &SourceUnit, kind: ActionKind, prerequisites: BTreeSet<usize>) -> usize {
        let id = self.push(unit, kind, prerequisites);
        self.compiles.insert(unit.id.clone(), id);
        id
    }

    fn link(&mut self, unit: &SourceUnit, kind: ActionKind, prerequisites: BTreeSet<usize>) -> usize {
        if let Some(&id) = self.links.get(&unit.id) {
            return id;
        }
        let id = self.push(unit, kind, prerequisites);
        self.links.insert(unit.id.clone(), id);
        id
    }

    fn finish(self) -> BuildResult<BuildPlan> {
        let mut graph = BuildGraph::new();
        for action in &self.actions {
            let deps = action
                .prerequisites
                .iter()
                .map(|&p| self.actions[p].label())
                .collect();
            graph.add_module(
                ModuleNode::new(action.label(), action.artifact().to_path_buf()).with_dependencies(deps),
            );
        }

        let by_label: HashMap<String, usize> = self
            .actions
            .iter()
            .map(|a| (a.label(), a.id))
            .collect();
        let order = graph
            .compute_build_order()?
            .into_iter()
            .filter_map(|label| by_label.get(&label).copied())
            .collect();
        let parallel_groups = graph.parallel_build_groups()?.len();

        Ok(BuildPlan {
            actions: self.actions,
            order,
            targets: self.targets,
            parallel_groups,
        })
    }
}
