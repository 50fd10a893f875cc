//! Testing utilities for the cascade workspace
//!
//! Fixture schemas, deterministic tier handlers and a recording observer.

#![allow(missing_docs)]

use cascade_core::{
    CascadeConfig, CascadeError, CascadeObserver, CascadePhase, CascadeProgressEvent, CascadeScheduler,
    InMemoryEntityStore,
};
use cascade_executor::{handler_fn, FnHandler, Tier, TieredExecutor, WorkUnit};
use cascade_graph::{FieldDef, Relationship, Schema, TypeDef};
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::future::Future;
use std::sync::Arc;

/// `Post{title, author -> User, category -> Category, tags ~> [Tag]}`
pub fn blog_schema() -> Schema {
    Schema::new()
        .with_type(
            "Post",
            TypeDef::new()
                .field("title", FieldDef::scalar("string"))
                .field("author", FieldDef::relation(Relationship::forward("User").with_backref("latest_post")))
                .field("category", FieldDef::relation(Relationship::forward("Category")))
                .field(
                    "tags",
                    FieldDef::relation(Relationship::forward("Tag").fuzzy().array().with_threshold(0.5)),
                )
                .verb("publish"),
        )
        .with_type(
            "User",
            TypeDef::new()
                .field("name", FieldDef::scalar("string"))
                .field("bio", FieldDef::prompted("string", "Bio for the author of {parent.title}"))
                .field("latest_post", FieldDef::relation(Relationship::backward("Post")))
                .verb("follow"),
        )
        .with_type("Category", TypeDef::new().field("name", FieldDef::scalar("string")))
        .with_type("Tag", TypeDef::new().field("label", FieldDef::scalar("string")))
}

/// `Node{label, children -> [Node] x2}`
pub fn node_schema() -> Schema {
    Schema::new().with_type(
        "Node",
        TypeDef::new()
            .field("label", FieldDef::scalar("string"))
            .field("children", FieldDef::relation(Relationship::forward("Node").array().with_count(2))),
    )
}

/// `A.b -> B`, `B.a -> A`
pub fn cyclic_schema() -> Schema {
    Schema::new()
        .with_type(
            "A",
            TypeDef::new()
                .field("name", FieldDef::scalar("string"))
                .field("b", FieldDef::relation(Relationship::forward("B"))),
        )
        .with_type(
            "B",
            TypeDef::new()
                .field("name", FieldDef::scalar("string"))
                .field("a", FieldDef::relation(Relationship::forward("A"))),
        )
}

/// Fill every requested field with `"<unit name>.<field>"`
pub fn fill_requested(unit: &WorkUnit) -> Value {
    let mut out = Map::new();
    if let Some(fields) = unit.input["fields"].as_object() {
        for name in fields.keys() {
            out.insert(name.clone(), json!(format!("{}.{}", unit.name, name)));
        }
    }
    Value::Object(out)
}

/// Handler that always fills requested fields
pub fn filling_handler() -> FnHandler<impl Fn(WorkUnit) -> std::future::Ready<anyhow::Result<Value>> + Send + Sync> {
    handler_fn(|unit: WorkUnit| std::future::ready(Ok(fill_requested(&unit))))
}

/// Handler that fails for `type_name` and fills everything else
pub fn failing_for(
    type_name: &'static str,
) -> FnHandler<impl Fn(WorkUnit) -> std::future::Ready<anyhow::Result<Value>> + Send + Sync> {
    handler_fn(move |unit: WorkUnit| {
        std::future::ready(if unit.type_name == type_name {
            Err(anyhow::anyhow!("{} generator unavailable", type_name))
        } else {
            Ok(fill_requested(&unit))
        })
    })
}

/// Single code-tier executor around `handler`
pub fn executor_with<F, Fut>(handler: FnHandler<F>) -> TieredExecutor
where
    F: Fn(WorkUnit) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    TieredExecutor::new().with_handler(Tier::Code, handler)
}

/// Scheduler over an in-memory store, returned alongside the store
pub fn scheduler(
    schema: Schema,
    executor: TieredExecutor,
    config: CascadeConfig,
) -> (CascadeScheduler, Arc<InMemoryEntityStore>) {
    let store = Arc::new(InMemoryEntityStore::new());
    let scheduler = CascadeScheduler::new(schema, executor, store.clone(), config).unwrap();
    (scheduler, store)
}

/// Observer that keeps everything it sees
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<CascadeProgressEvent>>,
    errors: Mutex<Vec<String>>,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<CascadeProgressEvent> {
        self.events.lock().clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().clone()
    }

    /// `(type, depth)` of every generating event
    pub fn generated(&self) -> Vec<(String, usize)> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.phase == CascadePhase::Generating)
            .filter_map(|e| Some((e.current_type.clone()?, e.depth?)))
            .collect()
    }

    pub fn phases(&self) -> Vec<CascadePhase> {
        self.events.lock().iter().map(|e| e.phase).collect()
    }
}

impl CascadeObserver for RecordingObserver {
    fn on_progress(&self, event: &CascadeProgressEvent) -> anyhow::Result<()> {
        self.events.lock().push(event.clone());
        Ok(())
    }

    fn on_error(&self, error: &CascadeError) -> anyhow::Result<()> {
        self.errors.lock().push(error.to_string());
        Ok(())
    }
}
