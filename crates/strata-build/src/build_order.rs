//! Dependency graph ordering and closure computation
use crate::error::{BuildError, BuildResult};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, HashMap};
use std::path::PathBuf;

/// A node in the dependency graph
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModuleNode {
    /// Node name (unit id or action label)
    pub name: String,
    /// Source file path
    pub path: PathBuf,
    /// Names of the nodes this one depends on
    pub dependencies: Vec<String>,
}

impl ModuleNode {
    /// Create a new module node
    pub fn new(name: impl Into<String>, path: PathBuf) -> Self {
        Self {
            name: name.into(),
            path,
            dependencies: Vec::new(),
        }
    }

    /// Add dependencies (duplicates are dropped)
    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        let mut seen = BTreeSet::new();
        self.dependencies = dependencies
            .into_iter()
            .filter(|d| seen.insert(d.clone()))
            .collect();
        self
    }
}

/// Directed dependency graph
///
/// Ties in the build order are broken by insertion order.
#[derive(Debug, Clone, Default)]
pub struct BuildGraph {
    modules: BTreeMap<String, ModuleNode>,
    insertion: Vec<String>,
}

impl BuildGraph {
    /// Create a new empty build graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node, replacing any node with the same name
    pub fn add_module(&mut self, module: ModuleNode) {
        if !self.modules.contains_key(&module.name) {
            self.insertion.push(module.name.clone());
        }
        self.modules.insert(module.name.clone(), module);
    }

    /// Get a node by name
    pub fn get_module(&self, name: &str) -> Option<&ModuleNode> {
        self.modules.get(name)
    }

    /// Whether a node exists
    pub fn contains(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    /// All nodes by name
    pub fn modules(&self) -> &BTreeMap<String, ModuleNode> {
        &self.modules
    }

    /// Get node count
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Check if graph is empty
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Check every dependency names an existing node
    pub fn validate(&self) -> BuildResult<()> {
        for (name, module) in &self.modules {
            for dep in &module.dependencies {
                if !self.modules.contains_key(dep) {
                    return Err(BuildError::unresolved(name, dep));
                }
            }
        }
        Ok(())
    }

    /// Compute topological build order using Kahn's algorithm
    /// Returns nodes in the order they should be built
    pub fn compute_build_order(&self) -> BuildResult<Vec<String>> {
        self.validate()?;
        if self.modules.is_empty() {
            return Ok(Vec::new());
        }

        let position: HashMap<&str, usize> = self
            .insertion
            .iter()
            .enumerate()
            .map(|(i, n)| (n.as_str(), i))
            .collect();

        let mut in_degree = self.compute_in_degrees();
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
        for (name, module) in &self.modules {
            for dep in &module.dependencies {
                dependents.entry(dep.as_str()).or_default().push(name.as_str());
            }
        }

        let mut ready = BinaryHeap::new();
        for (name, degree) in &in_degree {
            if *degree == 0 {
                ready.push(Reverse(position[name]));
            }
        }

        let mut result = Vec::with_capacity(self.modules.len());
        while let Some(Reverse(index)) = ready.pop() {
            let name = self.insertion[index].as_str();
            result.push(name.to_string());

            for dependent in dependents.get(name).into_iter().flatten() {
                if let Some(degree) = in_degree.get_mut(*dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.push(Reverse(position[dependent]));
                    }
                }
            }
        }

        if result.len() != self.modules.len() {
            return Err(BuildError::CyclicDependency {
                cycle: self.find_cycle(),
            });
        }

        Ok(result)
    }

    /// Number of dependencies of each node
    fn compute_in_degrees(&self) -> HashMap<&str, usize> {
        self.modules
            .iter()
            .map(|(name, module)| (name.as_str(), module.dependencies.len()))
            .collect()
    }

    /// Group nodes into waves that can be built concurrently
    pub fn parallel_build_groups(&self) -> BuildResult<Vec<Vec<String>>> {
        self.validate()?;
        if self.modules.is_empty() {
            return Ok(Vec::new());
        }

        let mut groups = Vec::new();
        let mut built = BTreeSet::new();

        loop {
            let group: Vec<String> = self
                .modules
                .iter()
                .filter(|(name, _)| !built.contains(*name))
                .filter(|(_, module)| module.dependencies.iter().all(|d| built.contains(d)))
                .map(|(name, _)| name.clone())
                .collect();

            if group.is_empty() {
                break;
            }

            built.extend(group.iter().cloned());
            groups.push(group);
        }

        if built.len() != self.modules.len() {
            return Err(BuildError::CyclicDependency {
                cycle: self.find_cycle(),
            });
        }

        Ok(groups)
    }

    /// Find a cycle in the graph, first node repeated at the end
    fn find_cycle(&self) -> Vec<String> {
        let mut visited = BTreeSet::new();
        let mut path = Vec::new();

        for name in self.modules.keys() {
            if let Some(cycle) = self.dfs_find_cycle(name, &mut visited, &mut path) {
                return cycle;
            }
        }

        Vec::new()
    }

    fn dfs_find_cycle(
        &self,
        name: &str,
        visited: &mut BTreeSet<String>,
        path: &mut Vec<String>,
    ) -> Option<Vec<String>> {
        if let Some(start) = path.iter().position(|m| m == name) {
            let mut cycle = path[start..].to_vec();
            cycle.push(name.to_string());
            return Some(cycle);
        }

        if !visited.insert(name.to_string()) {
            return None;
        }

        path.push(name.to_string());
        if let Some(module) = self.modules.get(name) {
            for dep in &module.dependencies {
                if let Some(cycle) = self.dfs_find_cycle(dep, visited, path) {
                    return Some(cycle);
                }
            }
        }
        path.pop();
        None
    }
}

/// Closure of one node: the sorted set of every node it transitively
/// depends on, or the error that prevented computing it
pub type ClosureResult = Result<Vec<String>, BuildError>;

/// Memoized depth-first closure computation over a [`BuildGraph`]
///
/// Results can be seeded ahead of time: a seeded node is never traversed,
/// and a seeded node absent from the graph counts as defined.
pub struct ClosureSolver<'g> {
    graph: &'g BuildGraph,
    memo: BTreeMap<String, ClosureResult>,
    computed: BTreeSet<String>,
}

impl<'g> ClosureSolver<'g> {
    pub fn new(graph: &'g BuildGraph) -> Self {
        Self {
            graph,
            memo: BTreeMap::new(),
            computed: BTreeSet::new(),
        }
    }

    /// Provide a known result for `name`
    pub fn seed(&mut self, name: impl Into<String>, result: ClosureResult) {
        self.memo.insert(name.into(), result);
    }

    /// Closure of `name`
    pub fn closure(&mut self, name: &str) -> ClosureResult {
        let mut path = Vec::new();
        self.visit(name, &mut path)
    }

    /// Nodes whose closure was computed rather than seeded
    pub fn computed(&self) -> &BTreeSet<String> {
        &self.computed
    }

    /// All results, seeded and computed
    pub fn into_results(self) -> BTreeMap<String, ClosureResult> {
        self.memo
    }

    fn visit(&mut self, name: &str, path: &mut Vec<String>) -> ClosureResult {
        if let Some(result) = self.memo.get(name) {
            return result.clone();
        }

        if let Some(start) = path.iter().position(|n| n == name) {
            let mut cycle = path[start..].to_vec();
            cycle.push(name.to_string());
            return Err(BuildError::CyclicDependency { cycle });
        }

        let graph = self.graph;
        let Some(node) = graph.get_module(name) else {
            return Err(BuildError::UnknownTarget {
                target: name.to_string(),
            });
        };

        path.push(name.to_string());
        let mut closure = BTreeSet::new();
        let mut result = Ok(());
        for dep in &node.dependencies {
            if !graph.contains(dep) && !self.memo.contains_key(dep) {
                result = Err(BuildError::unresolved(name, dep));
                break;
            }
            match self.visit(dep, path) {
                Ok(deps) => {
                    closure.insert(dep.clone());
                    closure.extend(deps);
                }
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }
        path.pop();

        let result = result.map(|()| closure.into_iter().collect::<Vec<_>>());
        self.computed.insert(name.to_string());
        self.memo.insert(name.to_string(), result.clone());
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn node(name: &str, deps: &[&str]) -> ModuleNode {
        ModuleNode::new(name, PathBuf::from(format!("{}.f90", name)))
            .with_dependencies(deps.iter().map(|d| d.to_string()).collect())
    }

    fn graph(nodes: &[(&str, &[&str])]) -> BuildGraph {
        let mut graph = BuildGraph::new();
        for (name, deps) in nodes {
            graph.add_module(node(name, deps));
        }
        graph
    }

    #[test]
    fn test_empty_graph() {
        let graph = BuildGraph::new();
        assert!(graph.is_empty());
        assert_eq!(graph.len(), 0);
        assert_eq!(graph.compute_build_order().unwrap(), Vec::<String>::new());
    }

    #[test]
    fn test_linear_dependency_chain() {
        let graph = graph(&[("a", &["b"]), ("b", &["c"]), ("c", &[])]);
        assert_eq!(graph.compute_build_order().unwrap(), vec!["c", "b", "a"]);
    }

    #[test]
    fn test_ties_follow_insertion_order() {
        let graph = graph(&[("z", &[]), ("m", &[]), ("a", &["z", "m"])]);
        assert_eq!(graph.compute_build_order().unwrap(), vec!["z", "m", "a"]);
    }

    #[test]
    fn test_diamond_dependency() {
        let graph = graph(&[
            ("a", &["b", "c"]),
            ("b", &["d"]),
            ("c", &["d"]),
            ("d", &[]),
        ]);

        let order = graph.compute_build_order().unwrap();
        assert_eq!(order[0], "d");
        assert_eq!(order[3], "a");

        let groups = graph.parallel_build_groups().unwrap();
        assert_eq!(
            groups,
            vec![vec!["d".to_string()], vec!["b".into(), "c".into()], vec!["a".into()]]
        );
    }

    #[test]
    fn test_circular_dependency_detection() {
        let graph = graph(&[("a", &["b"]), ("b", &["a"])]);

        match graph.compute_build_order() {
            Err(BuildError::CyclicDependency { cycle }) => {
                assert_eq!(cycle, vec!["a", "b", "a"]);
            }
            other => panic!("Expected CyclicDependency error, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_dependency() {
        let graph = graph(&[("a", &["nonexistent"])]);
        assert_eq!(
            graph.validate(),
            Err(BuildError::unresolved("a", "nonexistent"))
        );
    }

    #[test]
    fn test_closure_is_transitive_and_sorted() {
        let graph = graph(&[("a", &["c", "b"]), ("b", &["d"]), ("c", &[]), ("d", &[])]);
        let mut solver = ClosureSolver::new(&graph);

        assert_eq!(solver.closure("a").unwrap(), vec!["b", "c", "d"]);
        assert_eq!(solver.closure("c").unwrap(), Vec::<String>::new());
        assert_eq!(solver.computed().len(), 4);
    }

    #[test]
    fn test_self_import_is_a_cycle() {
        let graph = graph(&[("a", &["a"])]);
        let mut solver = ClosureSolver::new(&graph);

        assert_eq!(
            solver.closure("a"),
            Err(BuildError::CyclicDependency {
                cycle: vec!["a".into(), "a".into()]
            })
        );
    }

    #[test]
    fn test_cycle_error_reaches_importers() {
        let graph = graph(&[("top", &["x"]), ("x", &["y"]), ("y", &["z"]), ("z", &["x"])]);
        let mut solver = ClosureSolver::new(&graph);

        let err = solver.closure("top").unwrap_err();
        assert_eq!(
            err,
            BuildError::CyclicDependency {
                cycle: vec!["x".into(), "y".into(), "z".into(), "x".into()]
            }
        );
        assert!(solver.closure("y").is_err());
    }

    #[test]
    fn test_seeded_results_are_not_traversed() {
        let graph = graph(&[("a", &["b"]), ("b", &["c"]), ("c", &[])]);
        let mut solver = ClosureSolver::new(&graph);
        solver.seed("b", Ok(vec!["c".to_string()]));

        assert_eq!(solver.closure("a").unwrap(), vec!["b", "c"]);
        assert!(!solver.computed().contains("b"));
        assert!(!solver.computed().contains("c"));
    }

    #[test]
    fn test_unresolved_import_names_importer() {
        let graph = graph(&[("a", &["b"]), ("b", &["ghost"])]);
        let mut solver = ClosureSolver::new(&graph);

        assert_eq!(solver.closure("a"), Err(BuildError::unresolved("b", "ghost")));
    }
}
