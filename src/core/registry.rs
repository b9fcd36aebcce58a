//! Task registry and prerequisite resolution.
//!
//! The registry owns every task definition. It is filled once at startup and
//! then shared read-only (behind an `Arc`) with the runner and watch service.
//! Prerequisite names are only checked when they are resolved or validated,
//! so tasks may be registered in any order.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;

use petgraph::dot::{Config as DotConfig, Dot};
use petgraph::graph::{DiGraph, NodeIndex};

use crate::core::task::{Task, TaskBody};
use crate::error::{Error, Result};

/// Visit state during the depth-first walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    InProgress,
    Done,
}

/// The task registry.
#[derive(Default)]
pub struct TaskRegistry {
    /// Tasks in registration order.
    tasks: Vec<Task>,
    /// Name to position in `tasks`.
    index: HashMap<String, usize>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task.
    ///
    /// # Errors
    /// Returns [`Error::DuplicateTask`] if the name is already taken.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        prerequisites: Vec<String>,
        body: Arc<dyn TaskBody>,
    ) -> Result<()> {
        self.insert(Task::new(name, prerequisites, body))
    }

    /// Register a fully built [`Task`] (with description).
    pub fn insert(&mut self, task: Task) -> Result<()> {
        if self.index.contains_key(&task.name) {
            return Err(Error::DuplicateTask(task.name));
        }
        self.index.insert(task.name.clone(), self.tasks.len());
        self.tasks.push(task);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Task> {
        self.index.get(name).map(|&i| &self.tasks[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Tasks in registration order.
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tasks.iter().map(|t| t.name.as_str())
    }

    /// Look up a task or fail with [`Error::UnknownTask`].
    pub fn require(&self, name: &str) -> Result<&Task> {
        self.get(name)
            .ok_or_else(|| Error::UnknownTask(name.to_string()))
    }

    /// Transitive prerequisite closure of `name` in topological order.
    ///
    /// Every prerequisite precedes the tasks depending on it, and `name`
    /// itself comes last. Among tasks whose prerequisites are all satisfied,
    /// the one registered first goes first.
    ///
    /// # Errors
    /// - [`Error::UnknownTask`] if `name` or any reachable prerequisite is unregistered
    /// - [`Error::CyclicDependency`] with the cycle path if one is reachable
    pub fn resolve(&self, name: &str) -> Result<Vec<String>> {
        self.resolve_all([name])
    }

    /// Resolve several roots into one deduplicated topological order.
    pub fn resolve_all<'a, I>(&self, names: I) -> Result<Vec<String>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut marks: HashMap<usize, Mark> = HashMap::new();
        let mut closure: Vec<usize> = Vec::new();
        for name in names {
            let root = self.position(name)?;
            let mut path = Vec::new();
            self.visit(root, &mut marks, &mut path, &mut closure)?;
        }
        Ok(self
            .registration_order(&closure)?
            .into_iter()
            .map(|i| self.tasks[i].name.clone())
            .collect())
    }

    fn position(&self, name: &str) -> Result<usize> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| Error::UnknownTask(name.to_string()))
    }

    /// Positions of a task's prerequisites, sorted and deduplicated.
    fn prerequisite_positions(&self, node: usize) -> Result<Vec<usize>> {
        let mut prereqs = self.tasks[node]
            .prerequisites
            .iter()
            .map(|p| self.position(p))
            .collect::<Result<Vec<_>>>()?;
        prereqs.sort_unstable();
        prereqs.dedup();
        Ok(prereqs)
    }

    /// Collect the closure of `node` depth-first, failing on the first cycle.
    fn visit(
        &self,
        node: usize,
        marks: &mut HashMap<usize, Mark>,
        path: &mut Vec<usize>,
        closure: &mut Vec<usize>,
    ) -> Result<()> {
        match marks.get(&node) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::InProgress) => {
                let start = path.iter().position(|&n| n == node).unwrap_or(0);
                let mut cycle: Vec<String> = path[start..]
                    .iter()
                    .map(|&i| self.tasks[i].name.clone())
                    .collect();
                cycle.push(self.tasks[node].name.clone());
                return Err(Error::CyclicDependency { cycle });
            }
            None => {}
        }

        marks.insert(node, Mark::InProgress);
        path.push(node);

        for prereq in self.prerequisite_positions(node)? {
            self.visit(prereq, marks, path, closure)?;
        }

        path.pop();
        marks.insert(node, Mark::Done);
        closure.push(node);
        Ok(())
    }

    /// Kahn's algorithm over an acyclic closure, always releasing the
    /// earliest registered ready task next.
    fn registration_order(&self, closure: &[usize]) -> Result<Vec<usize>> {
        let mut waiting: HashMap<usize, usize> = HashMap::with_capacity(closure.len());
        let mut dependents: HashMap<usize, Vec<usize>> = HashMap::new();
        for &node in closure {
            let prereqs = self.prerequisite_positions(node)?;
            waiting.insert(node, prereqs.len());
            for prereq in prereqs {
                dependents.entry(prereq).or_default().push(node);
            }
        }

        let mut ready: BinaryHeap<Reverse<usize>> = waiting
            .iter()
            .filter(|&(_, &count)| count == 0)
            .map(|(&node, _)| Reverse(node))
            .collect();

        let mut order = Vec::with_capacity(closure.len());
        while let Some(Reverse(node)) = ready.pop() {
            order.push(node);
            for dependent in dependents.get(&node).into_iter().flatten() {
                if let Some(count) = waiting.get_mut(dependent) {
                    *count -= 1;
                    if *count == 0 {
                        ready.push(Reverse(*dependent));
                    }
                }
            }
        }
        Ok(order)
    }

    /// Check the whole registry: every prerequisite exists and no cycle exists.
    pub fn validate(&self) -> Result<()> {
        self.resolve_all(self.names()).map(|_| ())
    }

    /// Prerequisite graph with edges pointing from prerequisite to dependent.
    ///
    /// Edge weights are empty labels so the graph renders cleanly as DOT.
    ///
    /// # Errors
    /// Returns [`Error::UnknownTask`] if a prerequisite is unregistered.
    pub fn dependency_graph(&self) -> Result<DiGraph<String, &'static str>> {
        let mut graph = DiGraph::new();
        let nodes: Vec<NodeIndex> = self
            .tasks
            .iter()
            .map(|t| graph.add_node(t.name.clone()))
            .collect();

        for (i, task) in self.tasks.iter().enumerate() {
            for prereq in &task.prerequisites {
                let from = self.position(prereq)?;
                graph.update_edge(nodes[from], nodes[i], "");
            }
        }
        Ok(graph)
    }

    /// Render the prerequisite graph in Graphviz DOT.
    pub fn to_dot(&self) -> Result<String> {
        let graph = self.dependency_graph()?;
        Ok(format!(
            "{}",
            Dot::with_config(&graph, &[DotConfig::EdgeNoLabel])
        ))
    }
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("tasks", &self.tasks.len())
            .finish()
    }
}
