//! Cascade CLI
//!
//! Command implementations behind the `cascade` binary. Each returns the text
//! or JSON it would print so it can be exercised without a terminal.

#![warn(missing_docs)]
#![warn(unreachable_pub)]

use anyhow::{bail, Context};
use cascade_core::{CascadeConfig, CascadeOutcome, CascadeRequest, CascadeScheduler, InMemoryEntityStore, TracingObserver};
use cascade_executor::{handler_fn, Tier, TieredExecutor, WorkUnit};
use cascade_graph::{detect_cycles, CascadePlan, DependencyGraph, EdgeStrength, Schema};
use indexmap::IndexMap;
use serde_json::{json, Map, Value};
use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Schema file format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaFormat {
    /// `.json`
    Json,
    /// `.yaml` / `.yml`
    Yaml,
}

impl SchemaFormat {
    /// Format implied by a file extension; YAML when unknown
    #[must_use]
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Yaml,
        }
    }
}

/// Install the global subscriber; `RUST_LOG` wins over `level`
pub fn init_tracing(level: &str, json: bool) {
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| level.to_string().into());

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

/// Parse a schema document
///
/// # Errors
/// Malformed documents.
pub fn parse_schema(input: &str, format: SchemaFormat) -> anyhow::Result<Schema> {
    let schema = match format {
        SchemaFormat::Json => serde_json::from_str(input).context("invalid JSON schema")?,
        SchemaFormat::Yaml => serde_yaml::from_str(input).context("invalid YAML schema")?,
    };
    Ok(schema)
}

/// Read and parse a schema file
///
/// # Errors
/// Unreadable or malformed files.
pub fn load_schema(path: &Path) -> anyhow::Result<Schema> {
    let input = std::fs::read_to_string(path).with_context(|| format!("cannot read {}", path.display()))?;
    parse_schema(&input, SchemaFormat::from_path(path)).with_context(|| format!("in {}", path.display()))
}

/// Load a scheduler configuration, defaults when `path` is absent
///
/// # Errors
/// Unreadable or malformed files.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<CascadeConfig> {
    match path {
        Some(path) => Ok(CascadeConfig::load(path)?),
        None => Ok(CascadeConfig::default()),
    }
}

/// Result of `validate`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    /// Declared types
    pub types: usize,
    /// Hard edges
    pub hard_edges: usize,
    /// Soft edges
    pub soft_edges: usize,
    /// Hard cycles, each closed on its first type
    pub cycles: Vec<Vec<String>>,
}

impl ValidationReport {
    /// No hard cycles
    #[inline]
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.cycles.is_empty()
    }
}

impl std::fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "{} types, {} edges ({} hard, {} soft)",
            self.types,
            self.hard_edges + self.soft_edges,
            self.hard_edges,
            self.soft_edges
        )?;
        if self.is_ok() {
            return writeln!(f, "ok");
        }
        writeln!(f, "{} hard cycle(s):", self.cycles.len())?;
        for cycle in &self.cycles {
            writeln!(f, "  {}", cycle.join(" -> "))?;
        }
        Ok(())
    }
}

/// `validate`: schema checks plus a hard-cycle scan
///
/// # Errors
/// Schema validation failures. Hard cycles are reported, not raised.
pub fn validate_report(schema: &Schema) -> anyhow::Result<ValidationReport> {
    let graph = DependencyGraph::from_schema(schema)?;
    let hard_edges = graph
        .edges()
        .iter()
        .filter(|edge| edge.strength == EdgeStrength::Hard)
        .count();

    Ok(ValidationReport {
        types: graph.node_count(),
        hard_edges,
        soft_edges: graph.edges().len() - hard_edges,
        cycles: detect_cycles(&graph),
    })
}

/// `plan`: dependency order and concurrency levels for `root`
///
/// # Errors
/// Schema errors, unknown roots and hard cycles.
pub fn plan_report(schema: &Schema, root: &str) -> anyhow::Result<String> {
    let graph = DependencyGraph::from_schema(schema)?;
    let plan = CascadePlan::build(&graph, root)?;

    let mut out = String::new();
    writeln!(out, "root: {}", plan.root)?;
    writeln!(out, "order: {}", plan.order.join(", "))?;
    for (level, group) in plan.groups.iter().enumerate() {
        writeln!(out, "level {}: {}", level, group.join(", "))?;
    }
    writeln!(out, "max parallelism: {}", plan.max_parallelism())?;
    for edge in graph.edges().iter().filter(|edge| plan.order.contains(&edge.from_type)) {
        let strength = match edge.strength {
            EdgeStrength::Hard => "hard",
            EdgeStrength::Soft => "soft",
        };
        let suffix = if edge.is_array { "[]" } else { "" };
        writeln!(
            out,
            "  {}.{} {} {}{} ({})",
            edge.from_type, edge.field_name, edge.operator, edge.to_type, suffix, strength
        )?;
    }
    Ok(out)
}

/// `cycles`: every hard cycle, one per line
///
/// # Errors
/// Schema validation failures.
pub fn cycles_report(schema: &Schema) -> anyhow::Result<Vec<String>> {
    let graph = DependencyGraph::from_schema(schema)?;
    Ok(detect_cycles(&graph).iter().map(|cycle| cycle.join(" -> ")).collect())
}

/// Deterministic stand-in for a generator
///
/// Numbers become `1`, booleans `true`, everything else
/// `"<unit name>.<field>"`.
#[must_use]
pub fn stub_executor() -> TieredExecutor {
    TieredExecutor::new()
        .with_actor("cascade-cli")
        .with_handler(
            Tier::Code,
            handler_fn(|unit: WorkUnit| std::future::ready(Ok(stub_fields(&unit)))),
        )
}

fn stub_fields(unit: &WorkUnit) -> Value {
    let mut out = Map::new();
    if let Some(fields) = unit.input["fields"].as_object() {
        for (name, spec) in fields {
            let value = match spec["hint"].as_str().unwrap_or("string") {
                "number" | "integer" => json!(1),
                "boolean" | "bool" => json!(true),
                _ => json!(format!("{}.{}", unit.name, name)),
            };
            out.insert(name.clone(), value);
        }
    }
    Value::Object(out)
}

/// Parse `key=value` seeds; values are JSON when they parse, strings otherwise
///
/// # Errors
/// Entries without `=`.
pub fn parse_seeds(pairs: &[String]) -> anyhow::Result<IndexMap<String, Value>> {
    let mut seed = IndexMap::new();
    for pair in pairs {
        let Some((key, raw)) = pair.split_once('=') else {
            bail!("seed '{pair}' is not key=value");
        };
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        seed.insert(key.trim().to_string(), value);
    }
    Ok(seed)
}

/// Options for [`dry_run`]
#[derive(Debug, Clone, Default)]
pub struct DryRunOptions {
    /// Root type
    pub root: String,
    /// Seeded root fields
    pub seed: IndexMap<String, Value>,
    /// Depth override
    pub max_depth: Option<usize>,
    /// Generate level by level instead of recursively
    pub levels: bool,
}

/// `dry-run`: cascade against the stub generator and an in-memory store
///
/// # Errors
/// Anything the scheduler reports.
pub async fn dry_run(schema: Schema, config: CascadeConfig, options: DryRunOptions) -> anyhow::Result<CascadeOutcome> {
    let store = Arc::new(InMemoryEntityStore::new());
    let scheduler = CascadeScheduler::new(schema, stub_executor(), store, config)?
        .with_observer(Arc::new(TracingObserver));

    let mut request = CascadeRequest::new(options.root);
    request.seed = options.seed;
    request.max_depth = options.max_depth;

    let outcome = if options.levels {
        scheduler.generate_levels(request).await?
    } else {
        scheduler.generate(request).await?
    };
    tracing::info!(
        "Dry run {} created {} entities ({} absorbed errors)",
        outcome.run_id,
        outcome.total_created,
        outcome.errors.len()
    );
    Ok(outcome)
}

/// JSON summary printed by `dry-run`
///
/// # Errors
/// Entities that cannot be serialized.
pub fn dry_run_report(outcome: &CascadeOutcome) -> anyhow::Result<Value> {
    let stats = outcome.context.stats();
    Ok(json!({
        "run_id": outcome.run_id.to_string(),
        "state": outcome.state,
        "root": outcome.root,
        "total_created": outcome.total_created,
        "errors": outcome.errors.iter().map(ToString::to_string).collect::<Vec<_>>(),
        "entities": outcome.context.all_generated().collect::<Vec<_>>(),
        "context": {
            "used_tokens": stats.used_tokens,
            "max_tokens": stats.max_tokens,
            "relationships": stats.relationships,
            "compactions": stats.compactions,
        },
    }))
}
