use cascade_graph::{
    detect_cycles, parallel_groups, topological_sort, DependencyGraph, FieldDef, GraphError,
    Relationship, Schema, TypeDef,
};
use proptest::prelude::*;

fn type_name(i: usize) -> String {
    format!("T{i}")
}

/// Build a schema with `n` types and the given hard edges `(from, to)`.
fn schema_with_edges(n: usize, edges: &[(usize, usize)]) -> Schema {
    let mut schema = Schema::new();
    for i in 0..n {
        let mut def = TypeDef::new().field("label", FieldDef::scalar("string"));
        for (k, (_, to)) in edges.iter().enumerate().filter(|(_, (from, _))| *from == i) {
            def = def.field(
                format!("ref{k}"),
                FieldDef::relation(Relationship::forward(type_name(*to))),
            );
        }
        schema = schema.with_type(type_name(i), def);
    }
    schema
}

fn assert_valid_order(graph: &DependencyGraph, order: &[String]) {
    let index = |name: &str| order.iter().position(|n| n == name);
    for name in order {
        for dep in graph.hard_dependencies(name) {
            let (Some(a), Some(b)) = (index(name), index(dep)) else {
                panic!("{dep} reachable from {name} but missing from order");
            };
            assert!(b < a, "{dep} must come before {name}");
        }
    }
}

proptest! {
    #[test]
    fn prop_acyclic_sort_is_topological(
        n in 1..12usize,
        raw_edges in proptest::collection::vec((0..12usize, 0..12usize), 0..30)
    ) {
        // Only allow edges from higher to lower index: acyclic by construction
        let edges: Vec<_> = raw_edges
            .into_iter()
            .filter(|(a, b)| *a < n && *b < n && a > b)
            .collect();
        let graph = DependencyGraph::from_schema(&schema_with_edges(n, &edges)).unwrap();

        prop_assert!(detect_cycles(&graph).is_empty());
        for i in 0..n {
            let order = topological_sort(&graph, &type_name(i)).unwrap();
            prop_assert_eq!(order.last().cloned(), Some(type_name(i)));
            assert_valid_order(&graph, &order);
        }
    }

    #[test]
    fn prop_sort_fails_only_with_a_cycle(
        n in 1..8usize,
        raw_edges in proptest::collection::vec((0..8usize, 0..8usize), 0..20)
    ) {
        let edges: Vec<_> = raw_edges.into_iter().filter(|(a, b)| *a < n && *b < n).collect();
        let graph = DependencyGraph::from_schema(&schema_with_edges(n, &edges)).unwrap();

        for i in 0..n {
            match topological_sort(&graph, &type_name(i)) {
                Ok(order) => assert_valid_order(&graph, &order),
                Err(GraphError::CircularDependency { cycle_path }) => {
                    prop_assert!(cycle_path.len() >= 2);
                    prop_assert_eq!(cycle_path.first(), cycle_path.last());
                    prop_assert!(!detect_cycles(&graph).is_empty());
                }
                Err(other) => prop_assert!(false, "unexpected error {other}"),
            }
        }
    }

    #[test]
    fn prop_groups_respect_dependencies(
        n in 1..10usize,
        raw_edges in proptest::collection::vec((0..10usize, 0..10usize), 0..25)
    ) {
        let edges: Vec<_> = raw_edges
            .into_iter()
            .filter(|(a, b)| *a < n && *b < n && a > b)
            .collect();
        let graph = DependencyGraph::from_schema(&schema_with_edges(n, &edges)).unwrap();

        let root = type_name(n - 1);
        let groups = parallel_groups(&graph, &root).unwrap();
        let level = |name: &str| groups.iter().position(|g| g.iter().any(|m| m == name));

        for (i, group) in groups.iter().enumerate() {
            for member in group {
                for dep in graph.hard_dependencies(member) {
                    prop_assert!(level(dep).unwrap() < i);
                }
            }
        }
        prop_assert!(groups[0].iter().all(|m| graph.node(m).unwrap().is_leaf()));
    }
}

#[test]
fn schema_loads_from_yaml() {
    let yaml = r"
types:
  Post:
    fields:
      title: { kind: scalar, hint: string, prompt: 'A title about {topic}' }
      author: { kind: relation, targets: [User] }
      tags: { kind: relation, match: fuzzy, targets: [Tag], array: true, threshold: 0.8 }
      comments: { kind: relation, direction: backward, targets: [Comment], array: true }
  User:
    fields:
      name: { kind: scalar }
    verbs: [follow]
  Tag:
    fields:
      label: { kind: scalar }
  Comment:
    fields:
      post: { kind: relation, targets: [Post] }
";
    let schema: Schema = serde_yaml::from_str(yaml).unwrap();
    schema.validate().unwrap();

    let post = schema.get("Post").unwrap();
    let tags = post.fields["tags"].as_relation().unwrap();
    assert_eq!(tags.operator(), "~>");
    assert!(tags.is_array);
    assert_eq!(tags.threshold, Some(0.8));
    assert_eq!(schema.get("User").unwrap().verbs, vec!["follow".to_string()]);

    let graph = DependencyGraph::from_schema(&schema).unwrap();
    assert_eq!(topological_sort(&graph, "Comment").unwrap(), vec!["User", "Post", "Comment"]);
}

#[test]
fn schema_round_trips_through_json() {
    let schema = schema_with_edges(3, &[(2, 1), (1, 0)]);
    let json = serde_json::to_string(&schema).unwrap();
    let back: Schema = serde_json::from_str(&json).unwrap();
    assert_eq!(schema, back);
}
