//! Generation context
//!
//! Budget-aware accumulator for one cascade run:
//! - parent stack (innermost last)
//! - generated entities (insertion ordered, indexed by id and by type)
//! - per-field array sub-contexts
//! - append-only relationship log
//! - snapshot / restore (LIFO undo) and branch / merge
//!
//! The token budget is tracked incrementally by [`GenerationContext::add_generated`].
//! With `auto_compact` the oldest entities are evicted first (FIFO) until usage
//! falls to `compaction_target * max_context_tokens`.
//!
//! The context is single-writer: callers that share it across tasks must
//! serialize mutation themselves.

use crate::entity::{estimate_entity_tokens, Entity};
use crate::error::ContextError;
use crate::render::render_entity;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const TRUNCATION_MARKER: &str = "\n[... context truncated]";

/// Budget configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Token budget for generated entities
    pub max_context_tokens: usize,
    /// Evict oldest entities instead of failing on overflow
    pub auto_compact: bool,
    /// Fraction of the budget compaction shrinks usage to
    pub compaction_target: f64,
}

impl ContextConfig {
    /// Default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With token budget
    #[inline]
    #[must_use]
    pub fn with_max_tokens(mut self, max: usize) -> Self {
        self.max_context_tokens = max;
        self
    }

    /// With compaction enabled or disabled
    #[inline]
    #[must_use]
    pub fn with_auto_compact(mut self, enabled: bool) -> Self {
        self.auto_compact = enabled;
        self
    }

    fn compaction_threshold(&self) -> usize {
        let ratio = self.compaction_target.clamp(0.0, 1.0);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
        let threshold = (self.max_context_tokens as f64 * ratio) as usize;
        threshold
    }
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_context_tokens: 32_000,
            auto_compact: true,
            compaction_target: 0.5,
        }
    }
}

/// One logged relationship
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelationshipEdge {
    /// Target entity id
    pub to: String,
    /// Relationship verb or field name
    pub verb: String,
}

/// Cheap restore marker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Generated entity count at capture
    pub generated_count: usize,
    /// Parent stack depth at capture
    pub parent_depth: usize,
    /// Capture time
    pub timestamp: DateTime<Utc>,
}

/// Options for [`GenerationContext::build_context_string`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextStringOptions {
    /// Types emitted before all others
    pub relevant_types: Option<Vec<String>>,
    /// Truncate to roughly this many tokens
    pub max_tokens: Option<usize>,
}

impl ContextStringOptions {
    /// Prioritize the given types
    #[must_use]
    pub fn relevant<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.relevant_types = Some(types.into_iter().map(Into::into).collect());
        self
    }

    /// Cap the output size
    #[inline]
    #[must_use]
    pub fn max_tokens(mut self, max: usize) -> Self {
        self.max_tokens = Some(max);
        self
    }
}

/// Read-only projection handed to capability collaborators
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationView {
    /// Parent chain, innermost last
    pub parents: Vec<Entity>,
    /// Earlier elements of the array field being generated
    pub previous_in_array: Vec<Entity>,
    /// Rendered context summary
    pub summary: String,
}

impl GenerationView {
    /// Innermost parent
    #[inline]
    #[must_use]
    pub fn parent(&self) -> Option<&Entity> {
        self.parents.last()
    }
}

/// Counters for logging and diagnostics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContextStats {
    /// Entities currently held
    pub generated: usize,
    /// Parent stack depth
    pub parent_depth: usize,
    /// Relationship edges logged
    pub relationships: usize,
    /// Current token estimate
    pub used_tokens: usize,
    /// Token budget
    pub max_tokens: usize,
    /// Compaction passes run
    pub compactions: usize,
    /// Entities evicted by compaction
    pub evicted: usize,
}

#[derive(Serialize, Deserialize)]
struct PersistedState {
    generated: Vec<Entity>,
    parent_stack: Vec<Entity>,
    relationships: IndexMap<String, Vec<RelationshipEdge>>,
}

/// Mutable accumulator for one cascade run
#[derive(Debug, Clone, Default)]
pub struct GenerationContext {
    config: ContextConfig,
    parent_stack: Vec<Entity>,
    generated: IndexMap<String, Entity>,
    by_type: IndexMap<String, Vec<String>>,
    array_contexts: HashMap<String, Vec<Entity>>,
    relationships: IndexMap<String, Vec<RelationshipEdge>>,
    used_tokens: usize,
    compactions: usize,
    evicted: usize,
}

impl GenerationContext {
    /// Empty context
    #[inline]
    #[must_use]
    pub fn new(config: ContextConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Budget configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    // ---- parent stack ----

    /// Enter a child generation under `entity`
    #[inline]
    pub fn push_parent(&mut self, entity: Entity) {
        self.parent_stack.push(entity);
    }

    /// Leave the innermost parent frame
    #[inline]
    pub fn pop_parent(&mut self) -> Option<Entity> {
        self.parent_stack.pop()
    }

    /// Parent `depth` levels up; 0 is the innermost
    #[inline]
    #[must_use]
    pub fn parent(&self, depth: usize) -> Option<&Entity> {
        self.parent_stack
            .len()
            .checked_sub(depth + 1)
            .and_then(|idx| self.parent_stack.get(idx))
    }

    /// Whole parent chain, innermost last
    #[inline]
    #[must_use]
    pub fn parents(&self) -> &[Entity] {
        &self.parent_stack
    }

    /// Parent stack depth
    #[inline]
    #[must_use]
    pub fn parent_depth(&self) -> usize {
        self.parent_stack.len()
    }

    // ---- generated entities ----

    /// Record a generated entity and charge its estimate to the budget
    ///
    /// Re-adding an existing id replaces it in place.
    ///
    /// # Errors
    /// `ContextError::ContextOverflow` when the budget is exceeded and
    /// compaction is disabled (the entity is not added), or when the entity
    /// alone exceeds the budget (it is dropped after compaction).
    pub fn add_generated(&mut self, entity: Entity) -> Result<(), ContextError> {
        let cost = estimate_entity_tokens(&entity);
        let replaced = self.generated.get(&entity.id).map_or(0, estimate_entity_tokens);
        let projected = self.used_tokens.saturating_sub(replaced) + cost;
        let max = self.config.max_context_tokens;

        if projected > max && !self.config.auto_compact {
            return Err(ContextError::ContextOverflow { used: projected, max });
        }

        let id = entity.id.clone();
        self.index_entity(entity);
        self.used_tokens = projected;

        if self.used_tokens > max {
            self.compact(&id)?;
        }
        Ok(())
    }

    fn index_entity(&mut self, entity: Entity) {
        let id = entity.id.clone();
        let type_name = entity.type_name.clone();
        if let Some(previous) = self.generated.insert(id.clone(), entity) {
            if previous.type_name == type_name {
                return;
            }
            if let Some(ids) = self.by_type.get_mut(&previous.type_name) {
                ids.retain(|existing| *existing != id);
            }
        }
        self.by_type.entry(type_name).or_default().push(id);
    }

    fn evict(&mut self, id: &str) -> Option<Entity> {
        let entity = self.generated.shift_remove(id)?;
        if let Some(ids) = self.by_type.get_mut(&entity.type_name) {
            ids.retain(|existing| existing != id);
        }
        self.used_tokens = self
            .used_tokens
            .saturating_sub(estimate_entity_tokens(&entity));
        Some(entity)
    }

    fn compact(&mut self, newest: &str) -> Result<(), ContextError> {
        let target = self.config.compaction_threshold();
        let before = self.used_tokens;
        let mut evicted = 0usize;

        while self.used_tokens > target {
            let Some(oldest) = self.generated.keys().find(|id| *id != newest).cloned() else {
                break;
            };
            self.evict(&oldest);
            evicted += 1;
        }

        self.compactions += 1;
        self.evicted += evicted;
        tracing::debug!(
            "Compacted context: evicted {} entities, {} -> {} tokens (target {})",
            evicted,
            before,
            self.used_tokens,
            target
        );

        let max = self.config.max_context_tokens;
        if self.used_tokens > max {
            let used = self.used_tokens;
            self.evict(newest);
            tracing::warn!("Entity {} alone exceeds the context budget ({} > {})", newest, used, max);
            return Err(ContextError::ContextOverflow { used, max });
        }
        Ok(())
    }

    /// Look up a generated entity
    #[inline]
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Entity> {
        self.generated.get(id)
    }

    /// Whether `id` has been generated and not evicted
    #[inline]
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.generated.contains_key(id)
    }

    /// Generated entities in insertion order
    pub fn all_generated(&self) -> impl Iterator<Item = &Entity> + '_ {
        self.generated.values()
    }

    /// Number of generated entities held
    #[inline]
    #[must_use]
    pub fn generated_count(&self) -> usize {
        self.generated.len()
    }

    /// Generated entities of one type in insertion order
    #[must_use]
    pub fn by_type(&self, type_name: &str) -> Vec<&Entity> {
        self.by_type
            .get(type_name)
            .map(|ids| ids.iter().filter_map(|id| self.generated.get(id)).collect())
            .unwrap_or_default()
    }

    /// Current token estimate
    #[inline]
    #[must_use]
    pub fn estimate_tokens(&self) -> usize {
        self.used_tokens
    }

    /// Re-estimate usage from the held entities
    ///
    /// Needed after [`merge`](Self::merge), which does not charge the budget.
    pub fn recompute_token_usage(&mut self) -> usize {
        self.used_tokens = self.generated.values().map(estimate_entity_tokens).sum();
        self.used_tokens
    }

    // ---- array generation ----

    /// Open (or reset) the array sub-context for `field`
    pub fn start_array_generation(&mut self, field: &str) {
        self.array_contexts.insert(field.to_string(), Vec::new());
    }

    /// Append an element to `field`'s array sub-context
    pub fn add_array_item(&mut self, field: &str, entity: Entity) {
        self.array_contexts
            .entry(field.to_string())
            .or_default()
            .push(entity);
    }

    /// Elements generated so far for `field`
    #[must_use]
    pub fn previous_in_array(&self, field: &str) -> &[Entity] {
        self.array_contexts.get(field).map_or(&[], Vec::as_slice)
    }

    /// Close `field`'s sub-context, returning its elements
    pub fn end_array_generation(&mut self, field: &str) -> Vec<Entity> {
        self.array_contexts.remove(field).unwrap_or_default()
    }

    // ---- relationships ----

    /// Log a relationship edge
    pub fn add_relationship(&mut self, from_id: &str, to_id: &str, verb: &str) {
        self.relationships
            .entry(from_id.to_string())
            .or_default()
            .push(RelationshipEdge {
                to: to_id.to_string(),
                verb: verb.to_string(),
            });
    }

    /// Edges from `from_id` in insertion order
    #[must_use]
    pub fn relationships(&self, from_id: &str) -> &[RelationshipEdge] {
        self.relationships.get(from_id).map_or(&[], Vec::as_slice)
    }

    /// Total edges logged
    #[must_use]
    pub fn relationship_count(&self) -> usize {
        self.relationships.values().map(Vec::len).sum()
    }

    // ---- snapshot / branch ----

    /// Capture a restore marker
    #[must_use]
    pub fn create_snapshot(&self) -> Snapshot {
        Snapshot {
            generated_count: self.generated.len(),
            parent_depth: self.parent_stack.len(),
            timestamp: Utc::now(),
        }
    }

    /// Drop everything generated or pushed after `snapshot`
    ///
    /// Newest entries go first; the type index and token estimate are rebuilt
    /// from what remains.
    pub fn restore_snapshot(&mut self, snapshot: &Snapshot) {
        self.generated.truncate(snapshot.generated_count);
        self.parent_stack.truncate(snapshot.parent_depth);
        self.rebuild_type_index();
        self.recompute_token_usage();
    }

    fn rebuild_type_index(&mut self) {
        self.by_type.clear();
        for (id, entity) in &self.generated {
            self.by_type
                .entry(entity.type_name.clone())
                .or_default()
                .push(id.clone());
        }
    }

    /// Independent deep copy
    #[inline]
    #[must_use]
    pub fn branch(&self) -> Self {
        self.clone()
    }

    /// Fold a branch back in
    ///
    /// Entities are unioned by id with the branch's version winning;
    /// relationship edges not already present are appended. The token
    /// estimate is left as is, see [`recompute_token_usage`](Self::recompute_token_usage).
    pub fn merge(&mut self, other: &GenerationContext) {
        for entity in other.generated.values() {
            self.index_entity(entity.clone());
        }
        for (from, edges) in &other.relationships {
            let existing = self.relationships.entry(from.clone()).or_default();
            for edge in edges {
                if !existing.contains(edge) {
                    existing.push(edge.clone());
                }
            }
        }
    }

    // ---- persistence ----

    /// Serialize generated entities, parent stack and relationships
    ///
    /// # Errors
    /// Propagates serialization failures.
    pub fn to_json(&self) -> Result<serde_json::Value, ContextError> {
        let state = PersistedState {
            generated: self.generated.values().cloned().collect(),
            parent_stack: self.parent_stack.clone(),
            relationships: self.relationships.clone(),
        };
        Ok(serde_json::to_value(state)?)
    }

    /// Rebuild a context from [`to_json`](Self::to_json) output
    ///
    /// # Errors
    /// `ContextError::InvalidState` if the value does not match the shape.
    pub fn from_json(value: serde_json::Value, config: ContextConfig) -> Result<Self, ContextError> {
        let state: PersistedState = serde_json::from_value(value)?;
        let mut ctx = Self::new(config);
        for entity in state.generated {
            ctx.index_entity(entity);
        }
        ctx.parent_stack = state.parent_stack;
        ctx.relationships = state.relationships;
        ctx.recompute_token_usage();
        Ok(ctx)
    }

    // ---- rendering ----

    /// Readable summary of the parent chain and generated entities
    #[must_use]
    pub fn build_context_string(&self, options: &ContextStringOptions) -> String {
        let mut out = String::new();

        if !self.parent_stack.is_empty() {
            out.push_str("## Parents\n");
            for parent in &self.parent_stack {
                out.push_str(&render_entity(parent, 0));
                out.push('\n');
            }
        }

        if !self.generated.is_empty() {
            out.push_str("## Generated\n");
            let relevant = options.relevant_types.as_deref().unwrap_or(&[]);
            let mut emitted: Vec<&Entity> = Vec::with_capacity(self.generated.len());
            for type_name in relevant {
                emitted.extend(self.by_type(type_name));
            }
            emitted.extend(
                self.generated
                    .values()
                    .filter(|e| !relevant.contains(&e.type_name)),
            );
            for entity in emitted {
                out.push_str(&render_entity(entity, 0));
                out.push('\n');
            }
        }

        if let Some(max_tokens) = options.max_tokens {
            let limit = max_tokens.saturating_mul(4);
            if out.len() > limit {
                let mut cut = limit;
                while !out.is_char_boundary(cut) {
                    cut -= 1;
                }
                out.truncate(cut);
                out.push_str(TRUNCATION_MARKER);
            }
        }

        out
    }

    /// Read-only projection for collaborators
    #[must_use]
    pub fn view(&self, array_field: Option<&str>) -> GenerationView {
        GenerationView {
            parents: self.parent_stack.clone(),
            previous_in_array: array_field
                .map(|field| self.previous_in_array(field).to_vec())
                .unwrap_or_default(),
            summary: self.build_context_string(&ContextStringOptions::default()),
        }
    }

    /// Counters snapshot
    #[must_use]
    pub fn stats(&self) -> ContextStats {
        ContextStats {
            generated: self.generated.len(),
            parent_depth: self.parent_stack.len(),
            relationships: self.relationship_count(),
            used_tokens: self.used_tokens,
            max_tokens: self.config.max_context_tokens,
            compactions: self.compactions,
            evicted: self.evicted,
        }
    }
}
