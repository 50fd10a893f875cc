//! Capability collaborator seam

use cascade_context::GenerationView;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

/// Chunk stream offered by a tier for draft generation
pub type ChunkStream = BoxStream<'static, anyhow::Result<String>>;

/// What a unit of work produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkKind {
    /// A whole entity
    Entity,
    /// One field value
    Field,
}

/// One unit of work handed to a tier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkUnit {
    /// Stable name, used for durable step names and audit records
    pub name: String,
    /// Entity or field
    pub kind: WorkKind,
    /// Type being produced
    pub type_name: String,
    /// Field being produced, for [`WorkKind::Field`]
    pub field: Option<String>,
    /// Tier input
    pub input: Value,
    /// Read-only generation context
    pub view: GenerationView,
}

impl WorkUnit {
    /// Entity-producing unit
    #[must_use]
    pub fn entity(name: impl Into<String>, type_name: impl Into<String>, input: Value) -> Self {
        Self {
            name: name.into(),
            kind: WorkKind::Entity,
            type_name: type_name.into(),
            field: None,
            input,
            view: GenerationView::default(),
        }
    }

    /// Field-producing unit
    #[must_use]
    pub fn field(
        name: impl Into<String>,
        type_name: impl Into<String>,
        field: impl Into<String>,
        input: Value,
    ) -> Self {
        Self {
            name: name.into(),
            kind: WorkKind::Field,
            type_name: type_name.into(),
            field: Some(field.into()),
            input,
            view: GenerationView::default(),
        }
    }

    /// Attach the context view
    #[must_use]
    pub fn with_view(mut self, view: GenerationView) -> Self {
        self.view = view;
        self
    }
}

/// One tier's capability collaborator
///
/// Implement this trait to plug a code path, model call, agent or human
/// review queue into the executor.
#[async_trait::async_trait]
pub trait TierHandler: Send + Sync {
    /// Produce a value for `unit`
    async fn execute(&self, unit: &WorkUnit) -> anyhow::Result<Value>;

    /// Optional chunked draft of the same output
    fn draft(&self, _unit: &WorkUnit) -> Option<ChunkStream> {
        None
    }
}

#[async_trait::async_trait]
impl<T: TierHandler + ?Sized> TierHandler for Arc<T> {
    async fn execute(&self, unit: &WorkUnit) -> anyhow::Result<Value> {
        (**self).execute(unit).await
    }

    fn draft(&self, unit: &WorkUnit) -> Option<ChunkStream> {
        (**self).draft(unit)
    }
}

/// Closure-backed handler, see [`handler_fn`]
pub struct FnHandler<F> {
    f: F,
}

/// Adapt an async closure into a [`TierHandler`]
///
/// The closure receives an owned copy of the unit.
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(WorkUnit) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Value>> + Send,
{
    FnHandler { f }
}

#[async_trait::async_trait]
impl<F, Fut> TierHandler for FnHandler<F>
where
    F: Fn(WorkUnit) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Value>> + Send,
{
    async fn execute(&self, unit: &WorkUnit) -> anyhow::Result<Value> {
        (self.f)(unit.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn closures_adapt() {
        let handler = handler_fn(|unit: WorkUnit| async move { Ok(json!({"type": unit.type_name})) });
        let unit = WorkUnit::entity("u", "User", json!({}));
        assert_eq!(handler.execute(&unit).await.unwrap(), json!({"type": "User"}));
        assert!(handler.draft(&unit).is_none());
    }

    #[test]
    fn field_units_carry_field() {
        let unit = WorkUnit::field("p.title", "Post", "title", json!(null));
        assert_eq!(unit.kind, WorkKind::Field);
        assert_eq!(unit.field.as_deref(), Some("title"));
    }
}
