//! Dependency graph builder
//!
//! Turns a validated [`Schema`] into a graph of hard and soft type edges.
//! The graph is built once per schema and is immutable afterwards; every
//! collection preserves schema declaration order so that ordering results
//! are deterministic.

use crate::error::GraphError;
use crate::schema::{Direction, Schema};
use indexmap::{IndexMap, IndexSet};
use petgraph::graphmap::DiGraphMap;
use petgraph::visit::Dfs;

/// Whether an edge constrains ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeStrength {
    /// Required exact reference; participates in cycle detection
    Hard,
    /// Optional, fuzzy or array reference; never blocks ordering
    Soft,
}

/// One relationship edge between types
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    /// Owning type
    pub from_type: String,
    /// Field that declares the relationship
    pub field_name: String,
    /// Referenced type (first union member)
    pub to_type: String,
    /// Operator notation (`->`, `~>`)
    pub operator: &'static str,
    /// List-valued field
    pub is_array: bool,
    /// Field may stay empty
    pub is_optional: bool,
    /// Hard or soft
    pub strength: EdgeStrength,
}

/// Per-type dependency summary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyNode {
    /// Type name
    pub type_name: String,
    /// Hard dependencies
    pub depends_on: IndexSet<String>,
    /// Soft dependencies
    pub soft_depends_on: IndexSet<String>,
    /// Types that hard-depend on this one
    pub depended_on_by: IndexSet<String>,
}

impl DependencyNode {
    fn new(type_name: &str) -> Self {
        Self {
            type_name: type_name.to_string(),
            depends_on: IndexSet::new(),
            soft_depends_on: IndexSet::new(),
            depended_on_by: IndexSet::new(),
        }
    }

    /// No hard dependencies
    #[inline]
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.depends_on.is_empty()
    }
}

/// Type dependency graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyGraph {
    nodes: IndexMap<String, DependencyNode>,
    edges: Vec<Edge>,
}

impl DependencyGraph {
    /// Build the graph for a schema
    ///
    /// Forward relationships add an edge to their first target; backward
    /// relationships add none, since the forward owner already carries it.
    ///
    /// # Errors
    /// Returns `GraphError::Schema` if the schema fails validation.
    pub fn from_schema(schema: &Schema) -> Result<Self, GraphError> {
        schema.validate()?;

        let mut nodes: IndexMap<String, DependencyNode> = schema
            .type_names()
            .map(|name| (name.to_string(), DependencyNode::new(name)))
            .collect();
        let mut edges = Vec::new();

        for (type_name, def) in &schema.types {
            for (field, rel) in def.relations() {
                if rel.direction == Direction::Backward {
                    continue;
                }
                let Some(target) = rel.primary_target() else {
                    continue;
                };

                let strength = if rel.is_hard() {
                    EdgeStrength::Hard
                } else {
                    EdgeStrength::Soft
                };

                if let Some(node) = nodes.get_mut(type_name) {
                    match strength {
                        EdgeStrength::Hard => node.depends_on.insert(target.to_string()),
                        EdgeStrength::Soft => node.soft_depends_on.insert(target.to_string()),
                    };
                }
                if strength == EdgeStrength::Hard {
                    if let Some(node) = nodes.get_mut(target) {
                        node.depended_on_by.insert(type_name.clone());
                    }
                }

                edges.push(Edge {
                    from_type: type_name.clone(),
                    field_name: field.to_string(),
                    to_type: target.to_string(),
                    operator: rel.operator(),
                    is_array: rel.is_array,
                    is_optional: rel.is_optional,
                    strength,
                });
            }
        }

        tracing::debug!(
            "Built dependency graph: {} types, {} edges ({} hard)",
            nodes.len(),
            edges.len(),
            edges.iter().filter(|e| e.strength == EdgeStrength::Hard).count()
        );

        Ok(Self { nodes, edges })
    }

    /// Get a node
    #[inline]
    #[must_use]
    pub fn node(&self, type_name: &str) -> Option<&DependencyNode> {
        self.nodes.get(type_name)
    }

    /// Whether the type is part of the graph
    #[inline]
    #[must_use]
    pub fn contains(&self, type_name: &str) -> bool {
        self.nodes.contains_key(type_name)
    }

    /// Nodes in declaration order
    pub fn nodes(&self) -> impl Iterator<Item = &DependencyNode> + '_ {
        self.nodes.values()
    }

    /// Type names in declaration order
    pub fn type_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.nodes.keys().map(String::as_str)
    }

    /// Number of types
    #[inline]
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// All edges in declaration order
    #[inline]
    #[must_use]
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Hard dependencies of a type, in declaration order
    pub fn hard_dependencies<'a>(&'a self, type_name: &str) -> impl Iterator<Item = &'a str> + 'a {
        self.nodes
            .get(type_name)
            .into_iter()
            .flat_map(|node| node.depends_on.iter().map(String::as_str))
    }

    /// Hard-edge view as a petgraph map (edge `A -> B` means A depends on B)
    #[must_use]
    pub fn hard_graph(&self) -> DiGraphMap<&str, ()> {
        let mut graph = DiGraphMap::new();
        for name in self.nodes.keys() {
            graph.add_node(name.as_str());
        }
        for node in self.nodes.values() {
            for dep in &node.depends_on {
                graph.add_edge(node.type_name.as_str(), dep.as_str(), ());
            }
        }
        graph
    }

    /// Whether any hard cycle exists
    #[must_use]
    pub fn has_hard_cycle(&self) -> bool {
        petgraph::algo::is_cyclic_directed(&self.hard_graph())
    }

    /// Types reachable from `root` over hard edges, root included,
    /// in declaration order
    ///
    /// # Errors
    /// Returns `GraphError::UnknownType` if `root` is not in the graph.
    pub fn reachable_from(&self, root: &str) -> Result<IndexSet<String>, GraphError> {
        if !self.contains(root) {
            return Err(GraphError::UnknownType(root.to_string()));
        }

        let graph = self.hard_graph();
        let mut reached = std::collections::HashSet::new();
        let mut dfs = Dfs::new(&graph, root);
        while let Some(name) = dfs.next(&graph) {
            reached.insert(name);
        }

        Ok(self
            .nodes
            .keys()
            .filter(|name| reached.contains(name.as_str()))
            .cloned()
            .collect())
    }
}
