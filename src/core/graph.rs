//! Task dependency graph.
//!
//! The graph spans a set of requested root tasks and everything reachable
//! through `depends_on`. Construction rejects unknown targets and cycles;
//! cycle errors name every node on the cycle path.

use crate::config::resolve::ResolvedTask;
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// Errors raised while building a task graph.
#[derive(Debug, Error)]
pub enum GraphError {
    /// A `depends_on` target (or requested root) does not exist.
    #[error("task not found: '{0}'")]
    TaskNotFound(String),

    /// A dependency cycle, e.g. `a -> b -> a`.
    #[error("dependency cycle detected: {path}")]
    Cycle { path: String },
}

/// A directed acyclic graph over effective tasks.
#[derive(Debug, Clone)]
pub struct TaskGraph {
    /// Nodes in dependency-first discovery order.
    nodes: Vec<String>,

    /// Edges: task -> the tasks it depends on.
    edges: HashMap<String, Vec<String>>,
}

impl TaskGraph {
    /// Build the graph reachable from `roots`.
    pub fn build(
        roots: &[String],
        tasks: &IndexMap<String, ResolvedTask>,
    ) -> Result<Self, GraphError> {
        let mut graph = TaskGraph {
            nodes: Vec::new(),
            edges: HashMap::new(),
        };
        let mut done = HashSet::new();
        let mut stack = Vec::new();
        for root in roots {
            visit(root, tasks, &mut graph, &mut stack, &mut done)?;
        }
        Ok(graph)
    }

    /// All nodes, dependencies before dependents.
    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.edges.contains_key(name)
    }

    /// Direct dependencies of a task.
    pub fn dependencies_of(&self, name: &str) -> &[String] {
        self.edges.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// A total order respecting `depends_on`.
    pub fn topological_order(&self) -> Vec<String> {
        self.nodes.clone()
    }

    /// Topological layers: layer 0 holds tasks with no dependencies, each
    /// later layer holds tasks whose dependencies all sit in earlier layers.
    /// Ties within a layer keep discovery order.
    pub fn layers(&self) -> Vec<Vec<String>> {
        let mut depth: HashMap<&str, usize> = HashMap::new();
        let mut layers: Vec<Vec<String>> = Vec::new();

        for node in &self.nodes {
            let level = self
                .dependencies_of(node)
                .iter()
                .map(|dep| depth.get(dep.as_str()).copied().unwrap_or(0) + 1)
                .max()
                .unwrap_or(0);
            depth.insert(node.as_str(), level);
            if layers.len() <= level {
                layers.resize_with(level + 1, Vec::new);
            }
            layers[level].push(node.clone());
        }

        layers
    }
}

fn visit(
    name: &str,
    tasks: &IndexMap<String, ResolvedTask>,
    graph: &mut TaskGraph,
    stack: &mut Vec<String>,
    done: &mut HashSet<String>,
) -> Result<(), GraphError> {
    if done.contains(name) {
        return Ok(());
    }
    if let Some(pos) = stack.iter().position(|n| n == name) {
        let mut path: Vec<String> = stack[pos..].to_vec();
        path.push(name.to_string());
        return Err(GraphError::Cycle {
            path: path.join(" -> "),
        });
    }

    let task = tasks
        .get(name)
        .ok_or_else(|| GraphError::TaskNotFound(name.to_string()))?;

    stack.push(name.to_string());
    for dep in &task.depends_on {
        visit(dep, tasks, graph, stack, done)?;
    }
    stack.pop();

    done.insert(name.to_string());
    graph.edges.insert(name.to_string(), task.depends_on.clone());
    graph.nodes.push(name.to_string());
    Ok(())
}
