//! Cascade Context
//!
//! Token-budgeted accumulator threaded through one cascade run.
//!
//! - [`Entity`]: `$id`/`$type` record with ordered fields
//! - [`GenerationContext`]: parent stack, generated index, array sub-contexts,
//!   relationship log, snapshots and branch/merge
//! - [`GenerationView`]: read-only projection for capability collaborators
//! - [`render_value`]: structured value to readable outline text
//!
//! # Example
//!
//! ```rust
//! use cascade_context::{ContextConfig, Entity, GenerationContext};
//!
//! let mut ctx = GenerationContext::new(ContextConfig::default());
//! ctx.add_generated(Entity::with_id("User", "u1").field("name", "Ada")).unwrap();
//!
//! let branch = ctx.branch();
//! ctx.add_generated(Entity::with_id("User", "u2")).unwrap();
//! assert_eq!(branch.generated_count(), 1);
//! assert_eq!(ctx.generated_count(), 2);
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

mod context;
mod entity;
mod error;
mod render;

pub use context::{
    ContextConfig, ContextStats, ContextStringOptions, GenerationContext, GenerationView,
    RelationshipEdge, Snapshot,
};
pub use entity::{estimate_entity_tokens, is_reserved_key, Entity, RESERVED_KEYS};
pub use error::ContextError;
pub use render::{render_entity, render_value, render_value_indented};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
