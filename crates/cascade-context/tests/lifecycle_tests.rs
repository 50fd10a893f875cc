use cascade_context::{ContextConfig, Entity, GenerationContext};
use pretty_assertions::assert_eq;

fn post() -> Entity {
    Entity::with_id("Post", "p1").field("title", "Ownership")
}

fn tag(i: usize) -> Entity {
    Entity::with_id("Tag", format!("t{i}")).field("label", format!("tag {i}"))
}

#[test]
fn nested_array_generation_then_resume() {
    let mut ctx = GenerationContext::new(ContextConfig::default());
    ctx.add_generated(post()).unwrap();

    ctx.push_parent(post());
    ctx.start_array_generation("tags");
    for i in 0..3 {
        let view = ctx.view(Some("tags"));
        assert_eq!(view.parent().map(|p| p.id.as_str()), Some("p1"));
        assert_eq!(view.previous_in_array.len(), i);

        ctx.add_generated(tag(i)).unwrap();
        ctx.add_array_item("tags", tag(i));
        ctx.add_relationship("p1", &format!("t{i}"), "tags");
    }
    let items = ctx.end_array_generation("tags");
    ctx.pop_parent();

    assert_eq!(items.len(), 3);
    assert!(ctx.previous_in_array("tags").is_empty());
    assert_eq!(ctx.parent_depth(), 0);

    let restored = GenerationContext::from_json(ctx.to_json().unwrap(), ContextConfig::default()).unwrap();
    assert_eq!(restored.stats(), ctx.stats());
    assert_eq!(restored.by_type("Tag").len(), 3);
    assert_eq!(restored.relationships("p1").len(), 3);
}

#[test]
fn branches_merge_and_snapshots_roll_back() {
    let mut ctx = GenerationContext::new(ContextConfig::default());
    ctx.add_generated(post()).unwrap();
    let mark = ctx.create_snapshot();

    let mut left = ctx.branch();
    let mut right = ctx.branch();
    left.add_generated(tag(0)).unwrap();
    left.add_relationship("p1", "t0", "tags");
    right.add_generated(tag(1)).unwrap();
    right.add_generated(post().field("title", "Borrowing")).unwrap();

    ctx.merge(&left);
    ctx.merge(&right);
    ctx.recompute_token_usage();

    assert_eq!(ctx.generated_count(), 3);
    assert_eq!(ctx.get("p1").and_then(|p| p.get("title")), Some(&serde_json::json!("Borrowing")));
    assert_eq!(ctx.relationship_count(), 1);
    assert_eq!(ctx.estimate_tokens(), ctx.stats().used_tokens);

    ctx.restore_snapshot(&mark);
    assert_eq!(ctx.generated_count(), 1);
    assert!(ctx.by_type("Tag").is_empty());
}
