//! Cascade Core
//!
//! Generates a root entity and, recursively, the entities its relationship
//! fields point at:
//! - Orders types dependencies-first and rejects hard cycles up front
//! - Bounds recursion by `max_depth` and an optional type allow-list
//! - Fills scalars through the tiered executor, one unit per entity
//! - Persists through an [`EntityStore`] and tracks a budgeted context
//! - Absorbs child failures unless `stop_on_error` is set
//!
//! # Example
//!
//! ```rust
//! use cascade_core::prelude::*;
//! use serde_json::{json, Map, Value};
//! use std::sync::Arc;
//!
//! let schema = Schema::new()
//!     .with_type(
//!         "Post",
//!         TypeDef::new()
//!             .field("title", FieldDef::scalar("string"))
//!             .field("author", FieldDef::relation(Relationship::forward("User"))),
//!     )
//!     .with_type("User", TypeDef::new().field("name", FieldDef::scalar("string")));
//!
//! let executor = TieredExecutor::new().with_handler(
//!     Tier::Code,
//!     handler_fn(|unit: WorkUnit| async move {
//!         let fields = unit.input["fields"].as_object().cloned().unwrap_or_default();
//!         let out: Map<String, Value> = fields.keys().map(|k| (k.clone(), json!("x"))).collect();
//!         Ok(Value::Object(out))
//!     }),
//! );
//!
//! let rt = tokio::runtime::Runtime::new().unwrap();
//! rt.block_on(async {
//!     let scheduler = CascadeScheduler::new(
//!         schema,
//!         executor,
//!         Arc::new(InMemoryEntityStore::new()),
//!         CascadeConfig::default(),
//!     )
//!     .unwrap();
//!
//!     let outcome = scheduler.generate(CascadeRequest::new("Post")).await.unwrap();
//!     assert_eq!(outcome.total_created, 2);
//! });
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod config;
pub mod error;
pub mod events;
pub mod prompt;
pub mod scheduler;
pub mod state;
pub mod store;
pub mod verbs;

pub use config::{CascadeConfig, DEFAULT_ARRAY_COUNT, DEFAULT_FUZZY_THRESHOLD, DEFAULT_MAX_DEPTH};
pub use error::{CascadeError, ConfigError, TemplateError};
pub use events::{CascadeObserver, CascadePhase, CascadeProgressEvent, TracingObserver};
pub use prompt::{placeholders, render_template};
pub use scheduler::{CascadeOutcome, CascadeReport, CascadeRequest, CascadeScheduler};
pub use state::{allowed_transitions, validate_transition, RunState};
pub use store::{EntityStore, InMemoryEntityStore, SearchHit};
pub use verbs::VerbTable;

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for building and running cascades
    pub use crate::{
        CascadeConfig, CascadeError, CascadeObserver, CascadeOutcome, CascadeProgressEvent, CascadeRequest,
        CascadeScheduler, EntityStore, InMemoryEntityStore, RunState,
    };
    pub use cascade_context::{ContextConfig, Entity, GenerationContext};
    pub use cascade_executor::{handler_fn, RetryPolicy, Tier, TierConfig, TierHandler, TieredExecutor, WorkUnit};
    pub use cascade_graph::{FieldDef, Relationship, Schema, TypeDef};
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
