use cascade_context::{ContextConfig, ContextError, Entity, GenerationContext};
use cascade_core::{
    CascadeConfig, CascadeError, CascadeObserver, CascadePhase, CascadeProgressEvent, CascadeRequest, EntityStore,
    RunState,
};
use cascade_executor::{handler_fn, ExecutorConfig, ExecutorError, WorkUnit};
use cascade_graph::{FieldDef, GraphError, Relationship, Schema, TypeDef};
use cascade_test_utils::{
    blog_schema, cyclic_schema, executor_with, failing_for, fill_requested, filling_handler, node_schema, scheduler,
    RecordingObserver,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn blog_post_cascades_to_its_dependencies() {
    let observer = RecordingObserver::new();
    let (scheduler, store) = scheduler(blog_schema(), executor_with(filling_handler()), CascadeConfig::default());
    let scheduler = scheduler.with_observer(observer.clone());

    let outcome = scheduler
        .generate(CascadeRequest::new("Post").with_field("title", "rust"))
        .await
        .unwrap();

    assert_eq!(outcome.state, RunState::Complete);
    assert_eq!(outcome.total_created, 5);
    assert!(outcome.is_clean());

    let post = &outcome.root;
    assert_eq!(post.get("title"), Some(&json!("rust")));

    let author_id = post.get("author").and_then(|v| v.as_str()).unwrap();
    let author = outcome.context.get(author_id).unwrap();
    assert_eq!(author.get("name"), Some(&json!("Post.author.name")));
    assert_eq!(author.get("bio"), Some(&json!("Post.author.bio")));
    assert_eq!(author.get("latest_post"), Some(&json!(post.id)));

    let tags = post.get("tags").and_then(|v| v.as_array()).unwrap();
    assert_eq!(tags.len(), 2);
    let first_tag = outcome.context.get(tags[0].as_str().unwrap()).unwrap();
    assert_eq!(first_tag.get("label"), Some(&json!("Post.tags[0].label")));

    assert_eq!(
        observer.generated(),
        vec![
            ("Post".to_string(), 0),
            ("User".to_string(), 1),
            ("Category".to_string(), 1),
            ("Tag".to_string(), 1),
            ("Tag".to_string(), 1),
        ]
    );
    assert_eq!(observer.phases().first(), Some(&CascadePhase::Starting));
    assert_eq!(observer.phases().last(), Some(&CascadePhase::Complete));

    assert_eq!(store.len(), 5);
    assert_eq!(store.related("Post", &post.id, "author").await.unwrap(), vec![author_id.to_string()]);
    let stored_post = store.get("Post", &post.id).await.unwrap().unwrap();
    assert_eq!(stored_post.get("tags"), post.get("tags"));
}

#[tokio::test]
async fn self_referential_tree_stops_at_max_depth() {
    let observer = RecordingObserver::new();
    let (scheduler, _store) = scheduler(node_schema(), executor_with(filling_handler()), CascadeConfig::default());
    let scheduler = scheduler.with_observer(observer.clone());

    let outcome = scheduler
        .generate(CascadeRequest::new("Node").with_max_depth(3))
        .await
        .unwrap();

    assert_eq!(outcome.total_created, 15);
    assert_eq!(outcome.context.by_type("Node").len(), 15);

    let depths: Vec<usize> = observer.generated().into_iter().map(|(_, depth)| depth).collect();
    for depth in 0..=3 {
        assert_eq!(depths.iter().filter(|d| **d == depth).count(), 1 << depth);
    }

    let leaves: Vec<&Entity> = outcome
        .context
        .by_type("Node")
        .into_iter()
        .filter(|node| node.get("children") == Some(&json!([])))
        .collect();
    assert_eq!(leaves.len(), 8);
    assert!(leaves[0].get("label").and_then(|v| v.as_str()).unwrap().starts_with("Node.children["));
}

#[tokio::test]
async fn child_failures_are_absorbed_by_default() {
    let observer = RecordingObserver::new();
    let (scheduler, _store) = scheduler(blog_schema(), executor_with(failing_for("Category")), CascadeConfig::default());
    let scheduler = scheduler.with_observer(observer.clone());

    let outcome = scheduler
        .generate(CascadeRequest::new("Post").with_field("title", "rust"))
        .await
        .unwrap();

    assert_eq!(outcome.state, RunState::Complete);
    assert_eq!(outcome.total_created, 4);
    assert_eq!(outcome.errors.len(), 1);
    assert!(matches!(
        outcome.errors[0],
        CascadeError::Executor(ExecutorError::AllTiersFailed { .. })
    ));
    assert!(outcome.root.get("category").is_none());
    assert!(outcome.root.get("author").is_some());

    let errors = observer.errors();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("Category generator unavailable"));
}

#[tokio::test]
async fn stop_on_error_aborts_the_run() {
    let observer = RecordingObserver::new();
    let (scheduler, _store) = scheduler(blog_schema(), executor_with(failing_for("Category")), CascadeConfig::default());
    let scheduler = scheduler.with_observer(observer.clone());

    let err = scheduler
        .generate(
            CascadeRequest::new("Post")
                .with_field("title", "rust")
                .with_stop_on_error(true),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, CascadeError::Executor(ExecutorError::AllTiersFailed { .. })));
    assert_eq!(observer.errors().len(), 1);
    assert_eq!(observer.phases().last(), Some(&CascadePhase::Error));
}

#[tokio::test]
async fn root_failure_is_returned() {
    let (scheduler, store) = scheduler(blog_schema(), executor_with(failing_for("Post")), CascadeConfig::default());

    let err = scheduler.generate(CascadeRequest::new("Post")).await.unwrap_err();

    assert!(matches!(err, CascadeError::Executor(_)));
    assert!(store.is_empty());
}

#[tokio::test]
async fn fuzzy_fields_reuse_existing_entities() {
    let (scheduler, store) = scheduler(blog_schema(), executor_with(filling_handler()), CascadeConfig::default());
    store
        .create(Entity::with_id("Tag", "t-rust").field("label", "Rust"))
        .await
        .unwrap();
    store
        .create(Entity::with_id("Tag", "t-garden").field("label", "gardening"))
        .await
        .unwrap();

    let outcome = scheduler
        .generate(CascadeRequest::new("Post").with_field("title", "rust"))
        .await
        .unwrap();

    assert_eq!(outcome.root.get("tags"), Some(&json!(["t-rust"])));
    assert_eq!(outcome.total_created, 3);
    assert_eq!(store.list("Tag").await.unwrap().len(), 2);
    assert_eq!(outcome.context.relationships(&outcome.root.id).len(), 3);
}

#[tokio::test]
async fn hard_cycles_fail_before_generation() {
    let observer = RecordingObserver::new();
    let (scheduler, store) = scheduler(cyclic_schema(), executor_with(filling_handler()), CascadeConfig::default());
    let scheduler = scheduler.with_observer(observer.clone());

    let err = scheduler.generate(CascadeRequest::new("A")).await.unwrap_err();

    match err {
        CascadeError::Graph(GraphError::CircularDependency { cycle_path }) => {
            assert!(cycle_path.contains(&"A".to_string()));
            assert!(cycle_path.contains(&"B".to_string()));
        }
        other => panic!("expected a cycle, got {other}"),
    }
    assert!(observer.events().is_empty());
    assert!(store.is_empty());
}

#[tokio::test]
async fn cascade_types_limit_children() {
    let (scheduler, _store) = scheduler(
        blog_schema(),
        executor_with(filling_handler()),
        CascadeConfig::default().with_cascade_types(["User"]),
    );

    let outcome = scheduler
        .generate(CascadeRequest::new("Post").with_field("title", "rust"))
        .await
        .unwrap();

    assert_eq!(outcome.total_created, 2);
    assert!(outcome.root.get("author").is_some());
    assert!(outcome.root.get("category").is_none());
    assert!(outcome.root.get("tags").is_none());
}

#[tokio::test]
async fn disabled_cascade_generates_only_the_root() {
    let (scheduler, _store) = scheduler(
        blog_schema(),
        executor_with(filling_handler()),
        CascadeConfig::default().with_cascade(false),
    );

    let outcome = scheduler
        .generate(CascadeRequest::new("Post").with_field("title", "rust"))
        .await
        .unwrap();

    assert_eq!(outcome.total_created, 1);
    assert_eq!(outcome.root.get("tags"), Some(&json!([])));
}

#[tokio::test]
async fn resumed_context_keeps_earlier_entities() {
    let config = CascadeConfig::default();
    let (scheduler, _store) = scheduler(node_schema(), executor_with(filling_handler()), config.clone());

    let first = scheduler
        .generate(CascadeRequest::new("Node").with_max_depth(1))
        .await
        .unwrap();
    assert_eq!(first.context.generated_count(), 3);

    let saved = first.context.to_json().unwrap();
    let mut resumed = GenerationContext::from_json(saved, config.context.clone()).unwrap();
    assert!(resumed.contains(&first.root.id));

    let report = scheduler
        .generate_in(CascadeRequest::new("Node").with_max_depth(1), &mut resumed)
        .await
        .unwrap();

    assert_eq!(report.total_created, 3);
    assert_eq!(resumed.generated_count(), 6);
    assert!(resumed.contains(&first.root.id));
    assert!(resumed.contains(&report.root.id));
    assert_eq!(resumed.parent_depth(), 0);
}

#[tokio::test]
async fn levels_link_hard_dependencies() {
    let schema = Schema::new()
        .with_type(
            "Post",
            TypeDef::new()
                .field("title", FieldDef::scalar("string"))
                .field("author", FieldDef::relation(Relationship::forward("User")))
                .field("category", FieldDef::relation(Relationship::forward("Category"))),
        )
        .with_type(
            "User",
            TypeDef::new()
                .field("name", FieldDef::scalar("string"))
                .field("org", FieldDef::relation(Relationship::forward("Org"))),
        )
        .with_type("Org", TypeDef::new().field("name", FieldDef::scalar("string")))
        .with_type("Category", TypeDef::new().field("name", FieldDef::scalar("string")));

    let observer = RecordingObserver::new();
    let (scheduler, store) = scheduler(schema, executor_with(filling_handler()), CascadeConfig::default());
    let scheduler = scheduler.with_observer(observer.clone());

    let outcome = scheduler.generate_levels(CascadeRequest::new("Post")).await.unwrap();

    assert_eq!(outcome.total_created, 4);
    assert_eq!(outcome.context.generated_count(), 4);
    assert!(observer.generated().iter().all(|(_, depth)| *depth == 0));
    assert_eq!(observer.generated().last().map(|(t, _)| t.as_str()), Some("Post"));

    let user = outcome.context.by_type("User")[0].clone();
    let org = outcome.context.by_type("Org")[0].clone();
    let category = outcome.context.by_type("Category")[0].clone();
    assert_eq!(user.get("org"), Some(&json!(org.id)));
    assert_eq!(outcome.root.get("author"), Some(&json!(user.id)));
    assert_eq!(outcome.root.get("category"), Some(&json!(category.id)));

    let verbs: Vec<&str> = outcome
        .context
        .relationships(&outcome.root.id)
        .iter()
        .map(|edge| edge.verb.as_str())
        .collect();
    assert_eq!(verbs, vec!["author", "category"]);
    assert_eq!(store.related("User", &user.id, "org").await.unwrap(), vec![org.id.clone()]);
}

#[tokio::test]
async fn verbs_are_dispatched_by_type() {
    let (scheduler, store) = scheduler(blog_schema(), executor_with(filling_handler()), CascadeConfig::default());
    let mut context = GenerationContext::new(ContextConfig::default());
    let post = Entity::with_id("Post", "p1");
    let user = Entity::with_id("User", "u1");

    scheduler.invoke_verb(&mut context, &post, "publish", &user).await.unwrap();
    assert_eq!(store.related("Post", "p1", "publish").await.unwrap(), vec!["u1"]);

    let err = scheduler
        .invoke_verb(&mut context, &post, "follow", &user)
        .await
        .unwrap_err();
    assert!(matches!(err, CascadeError::UnknownVerb { .. }));
    assert_eq!(scheduler.verbs("User").map(|t| t.contains("follow")), Some(true));
}

fn related_posts_schema() -> Schema {
    Schema::new().with_type(
        "Post",
        TypeDef::new()
            .field("title", FieldDef::scalar("string"))
            .field("related", FieldDef::relation(Relationship::forward("Post").fuzzy().optional())),
    )
}

#[tokio::test]
async fn fuzzy_self_type_never_matches_the_owner() {
    let (scheduler, _store) = scheduler(related_posts_schema(), executor_with(filling_handler()), CascadeConfig::default());

    let outcome = scheduler
        .generate(
            CascadeRequest::new("Post")
                .with_field("title", "rust ownership")
                .with_max_depth(0),
        )
        .await
        .unwrap();

    assert_eq!(outcome.total_created, 1);
    assert!(outcome.root.get("related").is_none());
    assert!(outcome.context.relationships(&outcome.root.id).is_empty());
}

#[tokio::test]
async fn fuzzy_self_type_links_to_another_entity() {
    let (scheduler, store) = scheduler(related_posts_schema(), executor_with(filling_handler()), CascadeConfig::default());
    store
        .create(Entity::with_id("Post", "p-old").field("title", "rust ownership"))
        .await
        .unwrap();

    let outcome = scheduler
        .generate(CascadeRequest::new("Post").with_field("title", "rust ownership"))
        .await
        .unwrap();

    assert_ne!(outcome.root.id, "p-old");
    assert_eq!(outcome.root.get("related"), Some(&json!("p-old")));
    assert_eq!(outcome.total_created, 1);
}

#[tokio::test]
async fn reserved_seed_keys_are_dropped() {
    let (scheduler, store) = scheduler(blog_schema(), executor_with(filling_handler()), CascadeConfig::default());

    let mut request = CascadeRequest::new("Post")
        .with_field("$id", "forged")
        .with_field("title", "rust");
    assert!(!request.seed.contains_key("$id"));
    request.seed.insert("$type".into(), json!("User"));

    let root = scheduler.generate(request.with_max_depth(0)).await.unwrap().root;

    assert_ne!(root.id, "forged");
    assert_eq!(root.type_name, "Post");
    assert!(root.get("$type").is_none());
    let text = serde_json::to_string(&root).unwrap();
    assert_eq!(text.matches("\"$type\"").count(), 1);
    assert!(store.get("Post", &root.id).await.unwrap().is_some());
}

struct BrokenObserver;

impl CascadeObserver for BrokenObserver {
    fn on_progress(&self, _event: &CascadeProgressEvent) -> anyhow::Result<()> {
        anyhow::bail!("dashboard offline")
    }

    fn on_error(&self, _error: &CascadeError) -> anyhow::Result<()> {
        anyhow::bail!("pager offline")
    }
}

#[tokio::test]
async fn failing_observers_never_abort_the_run() {
    let recorder = RecordingObserver::new();
    let (scheduler, _store) = scheduler(blog_schema(), executor_with(failing_for("Category")), CascadeConfig::default());
    let scheduler = scheduler
        .with_observer(Arc::new(BrokenObserver))
        .with_observer(recorder.clone());

    let outcome = scheduler
        .generate(CascadeRequest::new("Post").with_field("title", "rust"))
        .await
        .unwrap();

    assert_eq!(outcome.state, RunState::Complete);
    assert_eq!(outcome.total_created, 4);
    assert_eq!(outcome.errors.len(), 1);
    assert_eq!(recorder.errors().len(), 1);
    assert_eq!(recorder.phases().last(), Some(&CascadePhase::Complete));
}

#[tokio::test]
async fn total_timeout_ends_the_run_without_stop_on_error() {
    let recorder = RecordingObserver::new();
    let slow = handler_fn(|unit: WorkUnit| async move {
        tokio::time::sleep(Duration::from_millis(40)).await;
        Ok(fill_requested(&unit))
    });
    let config = CascadeConfig {
        executor: ExecutorConfig::default().with_total_timeout(Duration::from_millis(20)),
        ..CascadeConfig::default()
    };
    let (scheduler, store) = scheduler(blog_schema(), executor_with(slow), config);
    let scheduler = scheduler.with_observer(recorder.clone());

    let err = scheduler
        .generate(CascadeRequest::new("Post"))
        .await
        .unwrap_err();

    assert!(matches!(err, CascadeError::Executor(ExecutorError::CascadeTimeout { .. })));
    assert!(err.is_fatal());
    assert_eq!(store.len(), 1);
    assert_eq!(recorder.errors().len(), 1);
    assert_eq!(recorder.phases().last(), Some(&CascadePhase::Error));
}

#[tokio::test]
async fn context_overflow_without_compaction_ends_the_run() {
    let config = CascadeConfig::default().with_context(ContextConfig::default().with_max_tokens(40).with_auto_compact(false));
    let (scheduler, store) = scheduler(blog_schema(), executor_with(filling_handler()), config);

    let err = scheduler
        .generate(CascadeRequest::new("Post").with_field("title", "rust"))
        .await
        .unwrap_err();

    assert!(matches!(err, CascadeError::Context(ContextError::ContextOverflow { max: 40, .. })));
    // the rejected entity never reaches the store
    assert_eq!(store.len(), 1);
    assert!(store.list("User").await.unwrap().is_empty());
}
