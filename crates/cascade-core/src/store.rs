//! Entity store seam
//!
//! The scheduler persists every created entity through [`EntityStore`] and
//! asks it for existing matches before generating fuzzy relationships.
//! [`InMemoryEntityStore`] is the reference implementation used by tests and
//! the CLI dry run; its `search` is a word-overlap score, not an embedding.

use cascade_context::Entity;
use dashmap::DashMap;
use indexmap::IndexMap;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

/// Search result
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    /// Matched entity
    pub entity: Entity,
    /// Similarity in `[0, 1]`
    pub score: f32,
}

/// Storage collaborator
#[async_trait::async_trait]
pub trait EntityStore: Send + Sync {
    /// Fetch one entity
    async fn get(&self, type_name: &str, id: &str) -> anyhow::Result<Option<Entity>>;

    /// Persist a new entity
    async fn create(&self, entity: Entity) -> anyhow::Result<Entity>;

    /// Merge fields into an existing entity
    async fn update(&self, type_name: &str, id: &str, fields: IndexMap<String, Value>) -> anyhow::Result<Entity>;

    /// Remove an entity; `false` if it did not exist
    async fn delete(&self, type_name: &str, id: &str) -> anyhow::Result<bool>;

    /// All entities of a type
    async fn list(&self, type_name: &str) -> anyhow::Result<Vec<Entity>>;

    /// Entities of a type similar to `query`, best first
    async fn search(&self, type_name: &str, query: &str, threshold: f32) -> anyhow::Result<Vec<SearchHit>>;

    /// Record `from --verb--> to_id`
    async fn relate(&self, from_type: &str, from_id: &str, verb: &str, to_id: &str) -> anyhow::Result<()>;

    /// Remove a relation; `false` if it did not exist
    async fn unrelate(&self, from_type: &str, from_id: &str, verb: &str, to_id: &str) -> anyhow::Result<bool>;

    /// Targets of `verb` from an entity, in insertion order
    async fn related(&self, type_name: &str, id: &str, verb: &str) -> anyhow::Result<Vec<String>>;
}

#[derive(Debug, Clone)]
struct Stored {
    seq: u64,
    entity: Entity,
}

/// DashMap-backed store
#[derive(Debug, Default)]
pub struct InMemoryEntityStore {
    entities: DashMap<String, Stored>,
    relations: DashMap<String, Vec<(String, String)>>,
    seq: AtomicU64,
}

impl InMemoryEntityStore {
    /// Empty store
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entities
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Whether nothing is stored
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Every stored entity in creation order
    #[must_use]
    pub fn snapshot(&self) -> Vec<Entity> {
        let mut all: Vec<Stored> = self.entities.iter().map(|e| e.value().clone()).collect();
        all.sort_by_key(|s| s.seq);
        all.into_iter().map(|s| s.entity).collect()
    }

    fn relation_key(from_type: &str, from_id: &str) -> String {
        format!("{from_type}:{from_id}")
    }

    fn lookup(&self, type_name: &str, id: &str) -> Option<Entity> {
        self.entities
            .get(id)
            .filter(|s| s.entity.type_name == type_name)
            .map(|s| s.entity.clone())
    }
}

#[async_trait::async_trait]
impl EntityStore for InMemoryEntityStore {
    async fn get(&self, type_name: &str, id: &str) -> anyhow::Result<Option<Entity>> {
        Ok(self.lookup(type_name, id))
    }

    async fn create(&self, entity: Entity) -> anyhow::Result<Entity> {
        if self.entities.contains_key(&entity.id) {
            anyhow::bail!("entity {} already exists", entity.id);
        }
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        self.entities.insert(
            entity.id.clone(),
            Stored {
                seq,
                entity: entity.clone(),
            },
        );
        Ok(entity)
    }

    async fn update(&self, type_name: &str, id: &str, fields: IndexMap<String, Value>) -> anyhow::Result<Entity> {
        let mut stored = self
            .entities
            .get_mut(id)
            .filter(|s| s.entity.type_name == type_name)
            .ok_or_else(|| anyhow::anyhow!("{type_name} {id} not found"))?;
        stored.entity.fields.extend(fields);
        Ok(stored.entity.clone())
    }

    async fn delete(&self, type_name: &str, id: &str) -> anyhow::Result<bool> {
        let removed = self
            .entities
            .remove_if(id, |_, s| s.entity.type_name == type_name)
            .is_some();
        if removed {
            self.relations.remove(&Self::relation_key(type_name, id));
        }
        Ok(removed)
    }

    async fn list(&self, type_name: &str) -> anyhow::Result<Vec<Entity>> {
        Ok(self
            .snapshot()
            .into_iter()
            .filter(|e| e.type_name == type_name)
            .collect())
    }

    async fn search(&self, type_name: &str, query: &str, threshold: f32) -> anyhow::Result<Vec<SearchHit>> {
        let wanted = words(query);
        let mut hits: Vec<SearchHit> = self
            .list(type_name)
            .await?
            .into_iter()
            .filter_map(|entity| {
                let score = overlap(&wanted, &words(&entity_text(&entity)));
                (score >= threshold && score > 0.0).then_some(SearchHit { entity, score })
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        Ok(hits)
    }

    async fn relate(&self, from_type: &str, from_id: &str, verb: &str, to_id: &str) -> anyhow::Result<()> {
        self.relations
            .entry(Self::relation_key(from_type, from_id))
            .or_default()
            .push((verb.to_string(), to_id.to_string()));
        Ok(())
    }

    async fn unrelate(&self, from_type: &str, from_id: &str, verb: &str, to_id: &str) -> anyhow::Result<bool> {
        let Some(mut edges) = self.relations.get_mut(&Self::relation_key(from_type, from_id)) else {
            return Ok(false);
        };
        let before = edges.len();
        edges.retain(|(v, to)| !(v == verb && to == to_id));
        Ok(edges.len() != before)
    }

    async fn related(&self, type_name: &str, id: &str, verb: &str) -> anyhow::Result<Vec<String>> {
        Ok(self
            .relations
            .get(&Self::relation_key(type_name, id))
            .map(|edges| {
                edges
                    .iter()
                    .filter(|(v, _)| v == verb)
                    .map(|(_, to)| to.clone())
                    .collect()
            })
            .unwrap_or_default())
    }
}

fn entity_text(entity: &Entity) -> String {
    entity
        .fields
        .values()
        .filter_map(Value::as_str)
        .collect::<Vec<_>>()
        .join(" ")
}

fn words(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

#[allow(clippy::cast_precision_loss)]
fn overlap(a: &HashSet<String>, b: &HashSet<String>) -> f32 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f32 / union as f32
}
