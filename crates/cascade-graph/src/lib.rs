//! Cascade Graph
//!
//! Construction-time half of cascade generation:
//! - [`Schema`]: parsed type/field/relationship model with validation
//! - [`DependencyGraph`]: hard/soft type edges built once per schema
//! - [`detect_cycles`] / [`topological_sort`]: hard-edge ordering
//! - [`parallel_groups`] / [`CascadePlan`]: concurrency levels for a root
//!
//! # Example
//!
//! ```rust
//! use cascade_graph::{parallel_groups, DependencyGraph, FieldDef, Relationship, Schema, TypeDef};
//!
//! let schema = Schema::new()
//!     .with_type(
//!         "Post",
//!         TypeDef::new()
//!             .field("author", FieldDef::relation(Relationship::forward("User")))
//!             .field("category", FieldDef::relation(Relationship::forward("Category"))),
//!     )
//!     .with_type("User", TypeDef::new())
//!     .with_type("Category", TypeDef::new());
//!
//! let graph = DependencyGraph::from_schema(&schema).unwrap();
//! let groups = parallel_groups(&graph, "Post").unwrap();
//! assert_eq!(groups.len(), 2);
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

mod cycles;
mod error;
mod graph;
mod groups;
mod schema;

pub use cycles::{detect_cycles, topological_sort};
pub use error::{GraphError, SchemaError};
pub use graph::{DependencyGraph, DependencyNode, Edge, EdgeStrength};
pub use groups::{parallel_groups, CascadePlan};
pub use schema::{Direction, FieldDef, MatchMode, Relationship, Schema, TypeDef};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
