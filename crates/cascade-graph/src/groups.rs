//! Parallel generation groups
//!
//! Partitions the hard-dependency closure of a root into levels. A type's
//! level is its longest hard-path distance to a leaf, so every member of a
//! level depends only on members of strictly earlier levels and all members
//! of one level may be generated concurrently.

use crate::cycles::topological_sort;
use crate::error::GraphError;
use crate::graph::DependencyGraph;
use std::collections::HashMap;

/// Group the types reachable from `root` into concurrency levels
///
/// Group 0 holds the leaves. Within a group, types keep topological
/// (then declaration) order.
///
/// # Errors
/// Same as [`topological_sort`].
pub fn parallel_groups(graph: &DependencyGraph, root: &str) -> Result<Vec<Vec<String>>, GraphError> {
    let order = topological_sort(graph, root)?;
    Ok(group_levels(graph, &order))
}

fn group_levels(graph: &DependencyGraph, order: &[String]) -> Vec<Vec<String>> {
    let mut levels: HashMap<&str, usize> = HashMap::with_capacity(order.len());
    let mut groups: Vec<Vec<String>> = Vec::new();

    for name in order {
        let level = graph
            .hard_dependencies(name)
            .filter_map(|dep| levels.get(dep))
            .map(|level| level + 1)
            .max()
            .unwrap_or(0);
        levels.insert(name.as_str(), level);

        if groups.len() <= level {
            groups.resize_with(level + 1, Vec::new);
        }
        groups[level].push(name.clone());
    }

    groups
}

/// Ordering plan for one root type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CascadePlan {
    /// Root type
    pub root: String,
    /// Dependencies-first order
    pub order: Vec<String>,
    /// Concurrency levels, leaves first
    pub groups: Vec<Vec<String>>,
}

impl CascadePlan {
    /// Compute the plan for `root`
    ///
    /// # Errors
    /// Same as [`topological_sort`].
    pub fn build(graph: &DependencyGraph, root: &str) -> Result<Self, GraphError> {
        let order = topological_sort(graph, root)?;
        let groups = group_levels(graph, &order);
        Ok(Self {
            root: root.to_string(),
            order,
            groups,
        })
    }

    /// Number of sequential levels
    #[inline]
    #[must_use]
    pub fn depth(&self) -> usize {
        self.groups.len()
    }

    /// Widest level
    #[inline]
    #[must_use]
    pub fn max_parallelism(&self) -> usize {
        self.groups.iter().map(Vec::len).max().unwrap_or(0)
    }
}
