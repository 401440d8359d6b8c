//! Dependency graph over test specs and topological execution planning.
//!
//! Models tests as nodes in a directed acyclic graph. An edge `A → B` means
//! "B depends on A" — A must complete before B may run. Both `requires`
//! (forward) and `before` (reverse) edges from [`crate::spec::DependencySpec`]
//! are folded into this single adjacency representation at build time.
//!
//! Topological ordering is computed via Kahn's algorithm, producing a
//! level-ordered result so that same-level tests can run in parallel.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::error::{CrucibleError, Result};
use crate::spec::TestSpec;

/// A step in a planned test execution.
#[derive(Debug, Clone)]
pub struct ExecutionStep {
    /// 0-indexed position in the plan.
    pub position: usize,
    /// Name of the test assigned to this step.
    pub name: String,
    /// Names of tests this step waits for.
    pub depends_on: Vec<String>,
    /// True when this step can run concurrently with sibling steps at the
    /// same topological level that share its `parallel_group`.
    pub parallelizable: bool,
    /// Topological wave this step was assigned to. Two steps only ever
    /// share a group when both `level` and `parallel_group` match.
    level: usize,
    /// The spec's `options.parallel_group` tag, if declared.
    pub parallel_group: Option<String>,
}

/// An ordered, validated execution plan.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub steps: Vec<ExecutionStep>,
}

impl ExecutionPlan {
    /// Partition steps into sequential groups: adjacent parallelizable steps
    /// sharing the same topological level and `parallel_group` tag form one
    /// group, everything else forms a singleton group.
    pub fn parallel_groups(&self) -> Vec<Vec<&ExecutionStep>> {
        let mut groups: Vec<Vec<&ExecutionStep>> = Vec::new();
        let mut current: Vec<&ExecutionStep> = Vec::new();

        for step in &self.steps {
            let same_as_current = current
                .last()
                .is_some_and(|last| last.level == step.level && last.parallel_group == step.parallel_group);

            if step.parallelizable && (current.is_empty() || same_as_current) {
                current.push(step);
            } else {
                if !current.is_empty() {
                    groups.push(std::mem::take(&mut current));
                }
                if step.parallelizable {
                    current.push(step);
                } else {
                    groups.push(vec![step]);
                }
            }
        }
        if !current.is_empty() {
            groups.push(current);
        }
        groups
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }
}

/// Directed dependency graph over test names.
///
/// Edges are stored as `dependency → dependents` adjacency lists. Cycles are
/// detected at insertion time via DFS and rolled back before returning an
/// error, so the graph is never left in an inconsistent state.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    names: HashSet<String>,
    /// `dependency_name → {dependent_name, ...}` (downstream adjacency)
    downstream: HashMap<String, HashSet<String>>,
    /// `dependent_name → {dependency_name, ...}` (upstream adjacency)
    upstream: HashMap<String, HashSet<String>>,
    /// `name → options.parallel_group`, used to split same-level nodes into
    /// distinct execution groups per the explicit-tag rule.
    parallel_groups: HashMap<String, Option<String>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph from a set of specs, folding both `requires` (forward)
    /// and `before` (reverse) edges into one adjacency representation.
    ///
    /// Returns a [`CrucibleError::Dependency`] if any spec references a name
    /// not present in `specs`, or if a cycle would result.
    pub fn from_specs(specs: &[TestSpec]) -> Result<Self> {
        let mut graph = DependencyGraph::new();
        for spec in specs {
            graph.add_node(spec.name.clone());
            graph.set_parallel_group(&spec.name, spec.options.parallel_group.clone());
        }
        for spec in specs {
            for dep in &spec.dependencies.requires {
                graph.add_dependency(dep, &spec.name)?;
            }
            for successor in &spec.dependencies.before {
                graph.add_dependency(&spec.name, successor)?;
            }
        }
        Ok(graph)
    }

    pub fn add_node(&mut self, name: impl Into<String>) {
        let name = name.into();
        self.downstream.entry(name.clone()).or_default();
        self.upstream.entry(name.clone()).or_default();
        self.parallel_groups.entry(name.clone()).or_insert(None);
        self.names.insert(name);
    }

    /// Declare `name`'s explicit `options.parallel_group` tag. Nodes with
    /// `None` only group with other `None` nodes; nodes with `Some(tag)`
    /// only group with nodes declaring the same tag.
    pub fn set_parallel_group(&mut self, name: &str, parallel_group: Option<String>) {
        self.parallel_groups.insert(name.to_string(), parallel_group);
    }

    /// Add a directed edge: `dependent` depends on `dependency`. Both names
    /// must already be registered via [`add_node`].
    pub fn add_dependency(&mut self, dependency: &str, dependent: &str) -> Result<()> {
        if !self.names.contains(dependency) {
            return Err(CrucibleError::dependency(format!(
                "unknown test referenced in dependency graph: {dependency}"
            )));
        }
        if !self.names.contains(dependent) {
            return Err(CrucibleError::dependency(format!(
                "unknown test referenced in dependency graph: {dependent}"
            )));
        }

        self.downstream
            .entry(dependency.to_string())
            .or_default()
            .insert(dependent.to_string());
        self.upstream
            .entry(dependent.to_string())
            .or_default()
            .insert(dependency.to_string());

        if let Some(cycle) = self.find_cycle_through(dependent) {
            self.downstream
                .get_mut(dependency)
                .unwrap()
                .remove(dependent);
            self.upstream.get_mut(dependent).unwrap().remove(dependency);
            return Err(CrucibleError::dependency(format!(
                "circular dependency: {}",
                cycle.join(" -> ")
            )));
        }

        Ok(())
    }

    /// Return test names in topological order (dependencies before
    /// dependents), lexically tie-broken at each wave for determinism.
    pub fn topological_order(&self) -> Result<Vec<String>> {
        let mut in_degree: HashMap<&str, usize> =
            self.names.iter().map(|id| (id.as_str(), 0)).collect();

        for dependents in self.downstream.values() {
            for d in dependents {
                *in_degree.entry(d.as_str()).or_default() += 1;
            }
        }

        let mut queue: VecDeque<&str> = in_degree
            .iter()
            .filter(|(_, &deg)| deg == 0)
            .map(|(&id, _)| id)
            .collect();
        let mut initial: Vec<&str> = queue.into_iter().collect();
        initial.sort_unstable();
        queue = initial.into();

        let mut sorted = Vec::new();
        while let Some(node_id) = queue.pop_front() {
            sorted.push(node_id.to_string());
            if let Some(dependents) = self.downstream.get(node_id) {
                let mut next: Vec<&str> = Vec::new();
                for dep in dependents {
                    let deg = in_degree.get_mut(dep.as_str()).unwrap();
                    *deg -= 1;
                    if *deg == 0 {
                        next.push(dep.as_str());
                    }
                }
                next.sort_unstable();
                queue.extend(next);
            }
        }

        if sorted.len() != self.names.len() {
            return Err(CrucibleError::dependency(
                "dependency graph contains a cycle that escaped insertion-time detection",
            ));
        }

        Ok(sorted)
    }

    /// All transitive dependents of `name` (BFS over downstream edges).
    pub fn transitive_dependents_of(&self, name: &str) -> Result<Vec<String>> {
        if !self.names.contains(name) {
            return Err(CrucibleError::dependency(format!("unknown test: {name}")));
        }
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();
        queue.push_back(name.to_string());

        while let Some(current) = queue.pop_front() {
            if let Some(deps) = self.downstream.get(&current) {
                for dep in deps {
                    if visited.insert(dep.clone()) {
                        queue.push_back(dep.clone());
                    }
                }
            }
        }

        let mut out: Vec<String> = visited.into_iter().collect();
        out.sort_unstable();
        Ok(out)
    }

    /// Convert to an [`ExecutionPlan`] via level-tracked Kahn's algorithm:
    /// tests sharing a topological wave are marked parallelizable.
    pub fn to_execution_plan(&self) -> Result<ExecutionPlan> {
        if self.names.is_empty() {
            return Ok(ExecutionPlan { steps: Vec::new() });
        }

        let mut in_degree: HashMap<String, usize> =
            self.names.iter().map(|id| (id.clone(), 0)).collect();
        for dependents in self.downstream.values() {
            for dep in dependents {
                *in_degree.get_mut(dep).unwrap() += 1;
            }
        }

        let mut initial: Vec<String> = in_degree
            .iter()
            .filter(|(_, &deg)| deg == 0)
            .map(|(id, _)| id.clone())
            .collect();
        initial.sort_unstable();
        let mut level_queue: VecDeque<(String, usize)> =
            initial.into_iter().map(|id| (id, 0usize)).collect();

        let mut node_level: HashMap<String, usize> = HashMap::new();
        let mut sorted_ids: Vec<String> = Vec::new();

        while let Some((node_id, level)) = level_queue.pop_front() {
            node_level.insert(node_id.clone(), level);
            sorted_ids.push(node_id.clone());

            if let Some(dependents) = self.downstream.get(&node_id) {
                let mut next: Vec<String> = Vec::new();
                for dep in dependents {
                    let deg = in_degree.get_mut(dep).unwrap();
                    *deg -= 1;
                    if *deg == 0 {
                        next.push(dep.clone());
                    }
                }
                next.sort_unstable();
                for dep in next {
                    level_queue.push_back((dep, level + 1));
                }
            }
        }

        if sorted_ids.len() != self.names.len() {
            return Err(CrucibleError::dependency(
                "dependency graph contains a cycle that escaped insertion-time detection",
            ));
        }

        // Re-sort each topological wave by (parallel_group, name): this keeps
        // same-level, same-tag nodes contiguous (so `parallel_groups` can
        // merge them) while same-level, differently-tagged nodes stay
        // separated, per the "same explicit tag, or both declare none" rule.
        let tag_of = |name: &str| self.parallel_groups.get(name).cloned().flatten();
        sorted_ids.sort_by(|a, b| {
            node_level
                .get(a)
                .cmp(&node_level.get(b))
                .then_with(|| tag_of(a).cmp(&tag_of(b)))
                .then_with(|| a.cmp(b))
        });

        let mut group_counts: HashMap<(usize, Option<String>), usize> = HashMap::new();
        for name in &sorted_ids {
            let level = *node_level.get(name).unwrap();
            *group_counts.entry((level, tag_of(name))).or_default() += 1;
        }

        let steps = sorted_ids
            .into_iter()
            .enumerate()
            .map(|(pos, name)| {
                let depends_on = self
                    .upstream
                    .get(&name)
                    .into_iter()
                    .flatten()
                    .cloned()
                    .collect::<Vec<_>>();
                let level = *node_level.get(&name).unwrap();
                let parallel_group = tag_of(&name);
                let parallelizable =
                    group_counts.get(&(level, parallel_group.clone())).copied().unwrap_or(1) > 1;
                ExecutionStep {
                    position: pos,
                    name,
                    depends_on,
                    parallelizable,
                    level,
                    parallel_group,
                }
            })
            .collect();

        Ok(ExecutionPlan { steps })
    }

    fn find_cycle_through(&self, start: &str) -> Option<Vec<String>> {
        let mut visited = HashSet::new();
        let mut path = Vec::new();
        if self.dfs_cycle(start, &mut visited, &mut path) {
            Some(path)
        } else {
            None
        }
    }

    fn dfs_cycle<'a>(
        &'a self,
        node: &'a str,
        visited: &mut HashSet<String>,
        path: &mut Vec<String>,
    ) -> bool {
        if path.iter().any(|n| n == node) {
            path.push(node.to_string());
            return true;
        }
        if visited.contains(node) {
            return false;
        }
        visited.insert(node.to_string());
        path.push(node.to_string());

        if let Some(dependents) = self.downstream.get(node) {
            let mut ordered: Vec<&String> = dependents.iter().collect();
            ordered.sort_unstable();
            for dep in ordered {
                if self.dfs_cycle(dep, visited, path) {
                    return true;
                }
            }
        }

        path.pop();
        false
    }
}
