//! Cascade Executor
//!
//! Escalating execution of one unit of work across capability tiers:
//! - [`Tier`]: `code → generative → agentic → human`
//! - [`TierConfig`] / [`RetryPolicy`]: per-tier handler, timeout, retries, backoff
//! - [`TieredExecutor`]: escalation loop returning the full [`TierResult`] history
//! - [`StepHost`]: durable step contract ([`InlineStepHost`], [`MemoizedStepHost`])
//! - [`AuditTrail`]: hash-chained 5W+H records
//! - [`Draft`]: cancellable single-pass chunk sequence
//!
//! # Example
//!
//! ```rust
//! use cascade_executor::{handler_fn, Tier, TieredExecutor, WorkUnit};
//! use serde_json::json;
//!
//! let rt = tokio::runtime::Runtime::new().unwrap();
//! rt.block_on(async {
//!     let executor = TieredExecutor::new()
//!         .with_handler(Tier::Code, handler_fn(|_| async { Err(anyhow::anyhow!("no rule")) }))
//!         .with_handler(Tier::Generative, handler_fn(|_| async { Ok(json!({"title": "Hi"})) }));
//!
//!     let outcome = executor.execute(&WorkUnit::entity("post", "Post", json!({}))).await.unwrap();
//!     assert_eq!(outcome.tier, Tier::Generative);
//! });
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

mod audit;
mod config;
mod draft;
mod durable;
mod error;
mod executor;
mod handler;
mod policy;
mod tier;

pub use audit::{AuditRecord, AuditStatus, AuditTrail, EventSink, FiveWHEvent, How};
pub use config::{ExecutorConfig, SuccessCondition, TierConfig, TierSettings};
pub use draft::{Draft, DraftCancel};
pub use durable::{InlineStepHost, MemoizedStepHost, StepConfig, StepFuture, StepHost};
pub use error::{AttemptTimedOut, AuditError, ExecutorError};
pub use executor::{ExecutionOutcome, TierResult, TieredExecutor};
pub use handler::{handler_fn, ChunkStream, FnHandler, TierHandler, WorkKind, WorkUnit};
pub use policy::{Backoff, RetryPolicy};
pub use tier::Tier;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
