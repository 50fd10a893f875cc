//! Cycle detection and topological ordering over hard edges
//!
//! Soft edges never participate: an optional, fuzzy or array self-reference
//! is bounded at cascade time by depth, not rejected here.

use crate::error::GraphError;
use crate::graph::DependencyGraph;
use std::collections::{HashMap, HashSet, VecDeque};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    InProgress,
    Done,
}

/// Find hard-edge cycles
///
/// Depth-first search in declaration order. Each cycle is returned as a
/// closed path whose first element is repeated at the end (`A -> B -> A`).
/// An acyclic graph yields an empty list.
#[must_use]
pub fn detect_cycles(graph: &DependencyGraph) -> Vec<Vec<String>> {
    let mut search = CycleSearch::new(graph, None);
    for name in graph.type_names() {
        search.visit_root(name);
    }
    search.cycles
}

/// Order the types reachable from `root` so that hard dependencies come first
///
/// Kahn-style: for every hard edge `A -> B` among the reachable types,
/// `B` precedes `A`. Ties resolve in declaration order.
///
/// # Errors
/// - `GraphError::UnknownType` if `root` is not in the graph
/// - `GraphError::CircularDependency` if the reachable subgraph has a hard cycle
pub fn topological_sort(graph: &DependencyGraph, root: &str) -> Result<Vec<String>, GraphError> {
    let reachable = graph.reachable_from(root)?;

    let mut pending: HashMap<&str, usize> = reachable
        .iter()
        .map(|name| {
            let count = graph
                .hard_dependencies(name)
                .filter(|dep| reachable.contains(*dep))
                .count();
            (name.as_str(), count)
        })
        .collect();

    let mut ready: VecDeque<&str> = reachable
        .iter()
        .map(String::as_str)
        .filter(|name| pending.get(name) == Some(&0))
        .collect();

    let mut order = Vec::with_capacity(reachable.len());
    while let Some(name) = ready.pop_front() {
        order.push(name.to_string());

        let Some(node) = graph.node(name) else {
            continue;
        };
        for dependent in &node.depended_on_by {
            if let Some(count) = pending.get_mut(dependent.as_str()) {
                *count -= 1;
                if *count == 0 {
                    ready.push_back(dependent.as_str());
                }
            }
        }
    }

    if order.len() < reachable.len() {
        let placed: HashSet<&str> = order.iter().map(String::as_str).collect();
        let unresolved: HashSet<&str> = reachable
            .iter()
            .map(String::as_str)
            .filter(|name| !placed.contains(name))
            .collect();

        let mut search = CycleSearch::new(graph, Some(&unresolved));
        for name in reachable.iter().filter(|n| unresolved.contains(n.as_str())) {
            search.visit_root(name);
            if !search.cycles.is_empty() {
                break;
            }
        }

        let cycle_path = search.cycles.into_iter().next().unwrap_or_default();
        tracing::debug!("Topological sort from {} hit cycle {:?}", root, cycle_path);
        return Err(GraphError::CircularDependency { cycle_path });
    }

    Ok(order)
}

struct CycleSearch<'a> {
    graph: &'a DependencyGraph,
    within: Option<&'a HashSet<&'a str>>,
    marks: HashMap<&'a str, Mark>,
    stack: Vec<&'a str>,
    cycles: Vec<Vec<String>>,
}

impl<'a> CycleSearch<'a> {
    fn new(graph: &'a DependencyGraph, within: Option<&'a HashSet<&'a str>>) -> Self {
        Self {
            graph,
            within,
            marks: HashMap::new(),
            stack: Vec::new(),
            cycles: Vec::new(),
        }
    }

    fn visit_root(&mut self, name: &'a str) {
        if !self.marks.contains_key(name) {
            self.visit(name);
        }
    }

    fn visit(&mut self, name: &'a str) {
        self.marks.insert(name, Mark::InProgress);
        self.stack.push(name);

        for dep in self.graph.hard_dependencies(name) {
            if self.within.is_some_and(|set| !set.contains(dep)) {
                continue;
            }
            match self.marks.get(dep) {
                Some(Mark::InProgress) => {
                    if let Some(start) = self.stack.iter().position(|n| *n == dep) {
                        let mut path: Vec<String> =
                            self.stack[start..].iter().map(ToString::to_string).collect();
                        path.push(dep.to_string());
                        self.cycles.push(path);
                    }
                }
                Some(Mark::Done) => {}
                None => self.visit(dep),
            }
        }

        self.stack.pop();
        self.marks.insert(name, Mark::Done);
    }
}
