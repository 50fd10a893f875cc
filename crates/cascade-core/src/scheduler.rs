//! Cascade scheduler
//!
//! Drives recursive entity materialization. The dependency graph is built and
//! validated once per scheduler; every run first computes the plan for its
//! root so a hard cycle fails before anything is generated.
//!
//! Per entity:
//! 1. emit a `generating` progress event (type, depth)
//! 2. render prompts and ask the tiered executor for unfilled scalars
//! 3. persist through the store and record in the context
//! 4. walk relationship fields in declaration order, generating children at
//!    `depth + 1` under a pushed parent frame while `depth < max_depth`
//!
//! Child failures are absorbed (reported to observers and collected) unless
//! `stop_on_error` is set or the error is fatal.

use crate::config::CascadeConfig;
use crate::error::CascadeError;
use crate::events::{CascadeObserver, CascadeProgressEvent};
use crate::prompt::render_template;
use crate::state::{RunState, RunStateMachine};
use crate::store::EntityStore;
use crate::verbs::VerbTable;
use cascade_context::{is_reserved_key, Entity, GenerationContext};
use cascade_executor::{TieredExecutor, WorkUnit};
use cascade_graph::{
    parallel_groups, CascadePlan, DependencyGraph, Direction, FieldDef, GraphError, MatchMode, Relationship, Schema,
};
use futures::future::{join_all, BoxFuture};
use indexmap::IndexMap;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Instant;
use ulid::Ulid;

/// Root entity request
#[derive(Debug, Clone, Default)]
pub struct CascadeRequest {
    /// Root type
    pub type_name: String,
    /// Root id; generated when absent
    pub id: Option<String>,
    /// Pre-filled root fields; never overwritten
    pub seed: IndexMap<String, Value>,
    /// Overrides the configured depth ceiling
    pub max_depth: Option<usize>,
    /// Overrides the configured type allow-list
    pub cascade_types: Option<Vec<String>>,
    /// Overrides the configured stop-on-error behaviour
    pub stop_on_error: Option<bool>,
}

impl CascadeRequest {
    /// Request for a `type_name` root
    #[must_use]
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            ..Self::default()
        }
    }

    /// Use a fixed root id
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Seed a root field; `$id` and `$type` are ignored, use [`Self::with_id`]
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        let name = name.into();
        if is_reserved_key(&name) {
            tracing::warn!("Ignoring reserved seed key {}", name);
        } else {
            self.seed.insert(name, value.into());
        }
        self
    }

    /// Override the depth ceiling
    #[inline]
    #[must_use]
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = Some(depth);
        self
    }

    /// Override the type allow-list
    #[must_use]
    pub fn with_cascade_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cascade_types = Some(types.into_iter().map(Into::into).collect());
        self
    }

    /// Override stop-on-error
    #[inline]
    #[must_use]
    pub fn with_stop_on_error(mut self, stop: bool) -> Self {
        self.stop_on_error = Some(stop);
        self
    }
}

/// Result of a run against a caller-owned context
#[derive(Debug)]
pub struct CascadeReport {
    /// Run id
    pub run_id: Ulid,
    /// Root entity with relationship fields filled
    pub root: Entity,
    /// Absorbed child failures
    pub errors: Vec<CascadeError>,
    /// Entities created, root included
    pub total_created: usize,
    /// Final run state
    pub state: RunState,
}

/// Result of a run with its own context
#[derive(Debug)]
pub struct CascadeOutcome {
    /// Run id
    pub run_id: Ulid,
    /// Root entity with relationship fields filled
    pub root: Entity,
    /// Context accumulated by the run
    pub context: GenerationContext,
    /// Absorbed child failures
    pub errors: Vec<CascadeError>,
    /// Entities created, root included
    pub total_created: usize,
    /// Final run state
    pub state: RunState,
}

impl CascadeOutcome {
    fn from_report(report: CascadeReport, context: GenerationContext) -> Self {
        Self {
            run_id: report.run_id,
            root: report.root,
            context,
            errors: report.errors,
            total_created: report.total_created,
            state: report.state,
        }
    }

    /// Whether no child failed
    #[inline]
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Per-invocation scope
struct Run {
    id: Ulid,
    started: Instant,
    max_depth: usize,
    cascade_types: Option<Vec<String>>,
    stop_on_error: bool,
    errors: Vec<CascadeError>,
    created: usize,
}

impl Run {
    fn allows(&self, type_name: &str) -> bool {
        self.cascade_types
            .as_ref()
            .map_or(true, |types| types.iter().any(|t| t == type_name))
    }

    fn fork(&self, max_depth: usize) -> Self {
        Self {
            id: self.id,
            started: self.started,
            max_depth,
            cascade_types: self.cascade_types.clone(),
            stop_on_error: self.stop_on_error,
            errors: Vec::new(),
            created: 0,
        }
    }

    fn absorb(&mut self, other: Run) {
        self.errors.extend(other.errors);
        self.created += other.created;
    }
}

/// Where an entity sits in the cascade
struct Slot<'a> {
    type_name: &'a str,
    path: String,
    depth: usize,
    array_field: Option<&'a str>,
}

/// Dependency-ordered, depth-bounded generator
pub struct CascadeScheduler {
    schema: Arc<Schema>,
    graph: Arc<DependencyGraph>,
    executor: Arc<TieredExecutor>,
    store: Arc<dyn EntityStore>,
    config: CascadeConfig,
    observers: Vec<Arc<dyn CascadeObserver>>,
    verbs: IndexMap<String, VerbTable>,
}

impl CascadeScheduler {
    /// Validate `schema` and build its dependency graph
    ///
    /// # Errors
    /// `CascadeError::Graph` if the schema references undeclared types.
    pub fn new(
        schema: Schema,
        executor: TieredExecutor,
        store: Arc<dyn EntityStore>,
        config: CascadeConfig,
    ) -> Result<Self, CascadeError> {
        let graph = DependencyGraph::from_schema(&schema)?;
        let executor = executor.with_config(&config.executor);
        tracing::info!(
            "Cascade scheduler ready: {} types, {} edges",
            graph.node_count(),
            graph.edges().len()
        );
        Ok(Self {
            verbs: VerbTable::for_schema(&schema),
            schema: Arc::new(schema),
            graph: Arc::new(graph),
            executor: Arc::new(executor),
            store,
            config,
            observers: Vec::new(),
        })
    }

    /// Add an observer
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn CascadeObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Schema
    #[inline]
    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Dependency graph
    #[inline]
    #[must_use]
    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &CascadeConfig {
        &self.config
    }

    /// Entity store
    #[inline]
    #[must_use]
    pub fn store(&self) -> &dyn EntityStore {
        self.store.as_ref()
    }

    /// Verb table for `type_name`
    #[inline]
    #[must_use]
    pub fn verbs(&self, type_name: &str) -> Option<&VerbTable> {
        self.verbs.get(type_name)
    }

    /// Order and concurrency groups for `root`
    ///
    /// # Errors
    /// `CascadeError::Graph` for unknown roots and hard cycles.
    pub fn plan(&self, root: &str) -> Result<CascadePlan, CascadeError> {
        Ok(CascadePlan::build(&self.graph, root)?)
    }

    /// Invoke a declared verb on `subject`
    ///
    /// # Errors
    /// See [`VerbTable::invoke`].
    pub async fn invoke_verb(
        &self,
        context: &mut GenerationContext,
        subject: &Entity,
        verb: &str,
        object: &Entity,
    ) -> Result<(), CascadeError> {
        let table = self
            .verbs
            .get(&subject.type_name)
            .ok_or_else(|| CascadeError::UnknownVerb {
                type_name: subject.type_name.clone(),
                verb: verb.to_string(),
            })?;
        table
            .invoke(verb, subject, object, context, self.store.as_ref())
            .await
    }

    /// Run a cascade in a fresh context
    ///
    /// # Errors
    /// Structural errors, fatal errors, root failures, and any child failure
    /// when `stop_on_error` is set.
    pub async fn generate(&self, request: CascadeRequest) -> Result<CascadeOutcome, CascadeError> {
        let mut context = GenerationContext::new(self.config.context.clone());
        let report = self.generate_in(request, &mut context).await?;
        Ok(CascadeOutcome::from_report(report, context))
    }

    /// Run a cascade against a caller-owned (e.g. resumed) context
    ///
    /// # Errors
    /// See [`generate`](Self::generate).
    pub async fn generate_in(
        &self,
        request: CascadeRequest,
        context: &mut GenerationContext,
    ) -> Result<CascadeReport, CascadeError> {
        let plan = self.plan(&request.type_name)?;
        tracing::info!(
            "Starting cascade for {}: {} types in {} levels",
            plan.root,
            plan.order.len(),
            plan.depth()
        );

        let mut machine = RunStateMachine::default();
        machine.transition(RunState::Generating)?;
        let mut run = self.start_run(&request);
        self.notify_progress(&CascadeProgressEvent::starting(&request.type_name));

        let slot = Slot {
            type_name: &request.type_name,
            path: request.type_name.clone(),
            depth: 0,
            array_field: None,
        };
        let result = self
            .materialize(&mut run, context, slot, request.id.clone(), request.seed.clone())
            .await;
        self.finish(run, machine, result)
    }

    /// Generate one entity per reachable type, level by level
    ///
    /// Types in the same parallel group run concurrently, each in its own
    /// branch of the context; branches are merged before the next group
    /// starts. Hard relationship fields are linked to the entity generated
    /// for their target type; nothing else cascades.
    ///
    /// # Errors
    /// See [`generate`](Self::generate).
    pub async fn generate_levels(&self, request: CascadeRequest) -> Result<CascadeOutcome, CascadeError> {
        let groups = parallel_groups(&self.graph, &request.type_name)?;
        let mut context = GenerationContext::new(self.config.context.clone());
        let mut machine = RunStateMachine::default();
        machine.transition(RunState::Generating)?;
        let mut run = self.start_run(&request);
        self.notify_progress(&CascadeProgressEvent::starting(&request.type_name));

        let result = self
            .generate_groups(&mut run, &mut context, &request, &groups)
            .await;
        context.recompute_token_usage();
        let report = self.finish(run, machine, result)?;
        Ok(CascadeOutcome::from_report(report, context))
    }

    async fn generate_groups(
        &self,
        run: &mut Run,
        context: &mut GenerationContext,
        request: &CascadeRequest,
        groups: &[Vec<String>],
    ) -> Result<Entity, CascadeError> {
        let mut generated: IndexMap<String, Entity> = IndexMap::new();

        for (level, group) in groups.iter().enumerate() {
            tracing::debug!("Generating level {} ({} types)", level, group.len());

            let tasks = group.iter().map(|type_name| {
                let mut branch = context.branch();
                let mut sub = run.fork(0);
                let is_root = *type_name == request.type_name;
                let (id, mut seed) = if is_root {
                    (request.id.clone(), request.seed.clone())
                } else {
                    (None, IndexMap::new())
                };
                let links = self.hard_links(type_name, &generated);
                for (field, target_id) in &links {
                    seed.entry(field.clone()).or_insert_with(|| json!(target_id));
                }
                async move {
                    let slot = Slot {
                        type_name: type_name.as_str(),
                        path: type_name.clone(),
                        depth: 0,
                        array_field: None,
                    };
                    let result = self.materialize(&mut sub, &mut branch, slot, id, seed).await;
                    if let Ok(entity) = &result {
                        for (field, target_id) in &links {
                            branch.add_relationship(&entity.id, target_id, field);
                            if let Err(err) = self
                                .store
                                .relate(&entity.type_name, &entity.id, field, target_id)
                                .await
                            {
                                sub.errors.push(CascadeError::store("relate", &err));
                            }
                        }
                    }
                    (type_name, branch, sub, result)
                }
            });

            for (type_name, branch, sub, result) in join_all(tasks).await {
                context.merge(&branch);
                run.absorb(sub);
                match result {
                    Ok(entity) => {
                        generated.insert(type_name.clone(), entity);
                    }
                    Err(err) => self.absorb(run, err)?,
                }
            }
        }

        generated
            .shift_remove(&request.type_name)
            .ok_or_else(|| CascadeError::InvalidOutput {
                type_name: request.type_name.clone(),
                message: "root was not generated".to_string(),
            })
    }

    fn hard_links(&self, type_name: &str, generated: &IndexMap<String, Entity>) -> Vec<(String, String)> {
        let Some(def) = self.schema.get(type_name) else {
            return Vec::new();
        };
        def.relations()
            .filter(|(_, rel)| rel.is_hard())
            .filter_map(|(field, rel)| {
                let target = generated.get(rel.primary_target()?)?;
                Some((field.to_string(), target.id.clone()))
            })
            .collect()
    }

    fn start_run(&self, request: &CascadeRequest) -> Run {
        let max_depth = match request.max_depth {
            Some(depth) if self.config.cascade => depth,
            _ => self.config.effective_max_depth(),
        };
        Run {
            id: Ulid::new(),
            started: Instant::now(),
            max_depth,
            cascade_types: request
                .cascade_types
                .clone()
                .or_else(|| self.config.cascade_types.clone()),
            stop_on_error: request.stop_on_error.unwrap_or(self.config.stop_on_error),
            errors: Vec::new(),
            created: 0,
        }
    }

    fn finish(
        &self,
        run: Run,
        mut machine: RunStateMachine,
        result: Result<Entity, CascadeError>,
    ) -> Result<CascadeReport, CascadeError> {
        match result {
            Ok(root) => {
                machine.transition(RunState::Complete)?;
                self.notify_progress(&CascadeProgressEvent::complete(run.created));
                tracing::info!(
                    "Cascade {} complete: {} entities, {} absorbed errors",
                    run.id,
                    run.created,
                    run.errors.len()
                );
                Ok(CascadeReport {
                    run_id: run.id,
                    root,
                    errors: run.errors,
                    total_created: run.created,
                    state: machine.state(),
                })
            }
            Err(err) => {
                machine.transition(RunState::Error)?;
                self.notify_error(&err);
                self.notify_progress(&CascadeProgressEvent::error(run.created));
                tracing::warn!("Cascade {} aborted: {}", run.id, err);
                Err(err)
            }
        }
    }

    fn materialize<'a>(
        &'a self,
        run: &'a mut Run,
        context: &'a mut GenerationContext,
        slot: Slot<'a>,
        id: Option<String>,
        seed: IndexMap<String, Value>,
    ) -> BoxFuture<'a, Result<Entity, CascadeError>> {
        Box::pin(self.build_entity(run, context, slot, id, seed))
    }

    async fn build_entity(
        &self,
        run: &mut Run,
        context: &mut GenerationContext,
        slot: Slot<'_>,
        id: Option<String>,
        seed: IndexMap<String, Value>,
    ) -> Result<Entity, CascadeError> {
        let def = self
            .schema
            .get(slot.type_name)
            .ok_or_else(|| GraphError::UnknownType(slot.type_name.to_string()))?;

        self.notify_progress(&CascadeProgressEvent::generating(slot.type_name, slot.depth));

        let mut entity = match id {
            Some(id) => Entity::with_id(slot.type_name, id),
            None => Entity::new(slot.type_name),
        };
        entity.fields = seed;
        entity.fields.retain(|name, _| !is_reserved_key(name));

        self.fill_scalars(run, context, &slot, &mut entity).await?;

        // the context can refuse on overflow, so it goes first
        context.add_generated(entity.clone())?;
        self.store
            .create(entity.clone())
            .await
            .map_err(|err| CascadeError::store("create", &err))?;
        run.created += 1;

        let mut links = IndexMap::new();
        for (field, rel) in def.relations() {
            if entity.has(field) || rel.direction == Direction::Backward {
                continue;
            }
            if let Some(value) = self.resolve_relation(run, context, &slot, &entity, field, rel).await? {
                entity.set(field, value.clone());
                links.insert(field.to_string(), value);
            }
        }

        if !links.is_empty() {
            context.add_generated(entity.clone())?;
            self.store
                .update(&entity.type_name, &entity.id, links)
                .await
                .map_err(|err| CascadeError::store("update", &err))?;
        }

        Ok(entity)
    }

    async fn fill_scalars(
        &self,
        run: &Run,
        context: &GenerationContext,
        slot: &Slot<'_>,
        entity: &mut Entity,
    ) -> Result<(), CascadeError> {
        let Some(def) = self.schema.get(slot.type_name) else {
            return Ok(());
        };

        let mut values: Map<String, Value> = entity.fields.clone().into_iter().collect();
        if let Some(parent) = context.parent(0) {
            values.insert("parent".to_string(), serde_json::to_value(parent).unwrap_or(Value::Null));
        }

        let mut wanted = Map::new();
        for (name, field) in def.scalars() {
            if entity.has(name) {
                continue;
            }
            let FieldDef::Scalar { hint, prompt } = field else {
                continue;
            };
            let prompt = prompt
                .as_deref()
                .map(|template| render_template(template, &values))
                .transpose()?;
            wanted.insert(name.to_string(), json!({ "hint": hint, "prompt": prompt }));
        }
        if wanted.is_empty() {
            return Ok(());
        }

        let input = json!({
            "type": slot.type_name,
            "path": slot.path,
            "fields": wanted,
            "known": values,
        });
        let unit = WorkUnit::entity(slot.path.clone(), slot.type_name, input)
            .with_view(context.view(slot.array_field));
        let outcome = self.executor.execute_with_start(&unit, run.started).await?;
        tracing::debug!("{} filled by {} tier", slot.path, outcome.tier);

        let output = match outcome.value {
            Value::Object(output) => output,
            other => {
                return Err(CascadeError::InvalidOutput {
                    type_name: slot.type_name.to_string(),
                    message: format!("expected an object, got {other}"),
                })
            }
        };
        for (name, value) in output {
            if wanted.contains_key(&name) {
                entity.set(name, value);
            } else {
                tracing::debug!("Ignoring undeclared or seeded field {} from {}", name, slot.path);
            }
        }
        Ok(())
    }

    async fn resolve_relation(
        &self,
        run: &mut Run,
        context: &mut GenerationContext,
        slot: &Slot<'_>,
        owner: &Entity,
        field: &str,
        rel: &Relationship,
    ) -> Result<Option<Value>, CascadeError> {
        let Some(target) = rel.primary_target() else {
            return Ok(None);
        };

        if rel.match_mode == MatchMode::Fuzzy {
            if let Some(found) = self.find_existing(run, owner, field, rel, target).await? {
                for id in &found {
                    self.link(context, owner, field, id).await?;
                }
                return Ok(Some(if rel.is_array { json!(found) } else { json!(found[0]) }));
            }
        }

        if slot.depth >= run.max_depth {
            tracing::debug!("{}.{} left empty at depth {}", slot.path, field, slot.depth);
            return Ok(rel.is_array.then(|| json!([])));
        }
        if !run.allows(target) {
            tracing::debug!("{}.{} skipped: {} not in cascade types", slot.path, field, target);
            return Ok(None);
        }

        let mut seed = IndexMap::new();
        if let Some(backref) = &rel.backref {
            seed.insert(backref.clone(), json!(owner.id));
        }

        if !rel.is_array {
            let child_slot = Slot {
                type_name: target,
                path: format!("{}.{}", slot.path, field),
                depth: slot.depth + 1,
                array_field: None,
            };
            return match self.generate_child(run, context, owner, child_slot, seed).await {
                Ok(child) => {
                    self.link(context, owner, field, &child.id).await?;
                    Ok(Some(json!(child.id)))
                }
                Err(err) => {
                    self.absorb(run, err)?;
                    Ok(None)
                }
            };
        }

        let count = rel.count.unwrap_or(self.config.default_array_count);
        let mut ids = Vec::with_capacity(count);
        context.start_array_generation(field);
        for index in 0..count {
            let child_slot = Slot {
                type_name: target,
                path: format!("{}.{}[{}]", slot.path, field, index),
                depth: slot.depth + 1,
                array_field: Some(field),
            };
            match self.generate_child(run, context, owner, child_slot, seed.clone()).await {
                Ok(child) => {
                    context.add_array_item(field, child.clone());
                    self.link(context, owner, field, &child.id).await?;
                    ids.push(child.id);
                }
                Err(err) => {
                    if let Err(err) = self.absorb(run, err) {
                        context.end_array_generation(field);
                        return Err(err);
                    }
                }
            }
        }
        context.end_array_generation(field);
        Ok(Some(json!(ids)))
    }

    async fn generate_child(
        &self,
        run: &mut Run,
        context: &mut GenerationContext,
        parent: &Entity,
        slot: Slot<'_>,
        seed: IndexMap<String, Value>,
    ) -> Result<Entity, CascadeError> {
        context.push_parent(parent.clone());
        let result = self.materialize(run, context, slot, None, seed).await;
        context.pop_parent();
        result
    }

    async fn find_existing(
        &self,
        run: &mut Run,
        owner: &Entity,
        field: &str,
        rel: &Relationship,
        target: &str,
    ) -> Result<Option<Vec<String>>, CascadeError> {
        let query = self
            .schema
            .get(&owner.type_name)
            .map(|def| {
                def.scalars()
                    .filter_map(|(name, _)| owner.get(name)?.as_str())
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .unwrap_or_default();
        if query.is_empty() {
            return Ok(None);
        }
        let threshold = rel.threshold.unwrap_or(self.config.fuzzy_threshold);
        let hits = match self.store.search(target, &query, threshold).await {
            Ok(hits) => hits,
            Err(err) => {
                self.absorb(run, CascadeError::store("search", &err))?;
                return Ok(None);
            }
        };

        // the owner is already stored and always matches its own text
        let limit = if rel.is_array {
            rel.count.unwrap_or(self.config.default_array_count)
        } else {
            1
        };
        let ids: Vec<String> = hits
            .into_iter()
            .map(|h| h.entity.id)
            .filter(|id| *id != owner.id)
            .take(limit)
            .collect();
        if ids.is_empty() {
            return Ok(None);
        }
        tracing::debug!("{}.{} matched {} existing {}", owner.type_name, field, ids.len(), target);
        Ok(Some(ids))
    }

    async fn link(
        &self,
        context: &mut GenerationContext,
        owner: &Entity,
        field: &str,
        target_id: &str,
    ) -> Result<(), CascadeError> {
        self.store
            .relate(&owner.type_name, &owner.id, field, target_id)
            .await
            .map_err(|err| CascadeError::store("relate", &err))?;
        context.add_relationship(&owner.id, target_id, field);
        Ok(())
    }

    /// Absorb a child failure, or hand it back when it must end the run
    fn absorb(&self, run: &mut Run, err: CascadeError) -> Result<(), CascadeError> {
        if err.is_fatal() || run.stop_on_error {
            return Err(err);
        }
        tracing::warn!("Absorbed child failure: {}", err);
        self.notify_error(&err);
        run.errors.push(err);
        Ok(())
    }

    fn notify_progress(&self, event: &CascadeProgressEvent) {
        for observer in &self.observers {
            if let Err(err) = observer.on_progress(event) {
                tracing::warn!("Progress observer failed: {}", err);
            }
        }
    }

    fn notify_error(&self, error: &CascadeError) {
        for observer in &self.observers {
            if let Err(err) = observer.on_error(error) {
                tracing::warn!("Error observer failed: {}", err);
            }
        }
    }
}

impl std::fmt::Debug for CascadeScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CascadeScheduler")
            .field("types", &self.schema.types.len())
            .field("executor", &self.executor)
            .field("config", &self.config)
            .field("observers", &self.observers.len())
            .finish_non_exhaustive()
    }
}
