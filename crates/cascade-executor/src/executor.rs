//! Tiered executor
//!
//! Tries configured tiers in fixed order (`code → generative → agentic →
//! human`). Each tier gets a per-attempt timeout and its own retry/backoff
//! policy; once a tier's retries are exhausted the executor escalates to the
//! next configured tier. Unconfigured tiers are recorded as skipped.
//!
//! Every attempt runs through the [`StepHost`] as a named step, and every
//! backoff wait as a named sleep.

use crate::audit::{AuditStatus, EventSink, FiveWHEvent};
use crate::config::{ExecutorConfig, TierConfig};
use crate::draft::Draft;
use crate::durable::{InlineStepHost, StepConfig, StepHost};
use crate::error::{AttemptTimedOut, ExecutorError};
use crate::handler::{TierHandler, WorkUnit};
use crate::tier::Tier;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

const SUCCESS_CONDITION_NOT_MET: &str = "success condition not met";

/// One tier's outcome for a unit of work
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TierResult {
    /// Tier
    pub tier: Tier,
    /// Whether the tier produced an accepted value
    pub success: bool,
    /// Accepted value
    pub value: Option<Value>,
    /// Last error message
    pub error: Option<String>,
    /// Whether the last attempt hit the tier timeout
    pub timed_out: bool,
    /// Time spent in this tier, backoff included
    pub duration: Duration,
    /// Attempts made
    pub attempts: u32,
    /// Tier had no handler
    pub skipped: bool,
}

impl TierResult {
    fn skipped(tier: Tier) -> Self {
        Self {
            tier,
            success: false,
            value: None,
            error: None,
            timed_out: false,
            duration: Duration::ZERO,
            attempts: 0,
            skipped: true,
        }
    }
}

/// Successful execution
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionOutcome {
    /// Tier that produced the value
    pub tier: Tier,
    /// Accepted value
    pub value: Value,
    /// Per-tier history up to and including the winning tier
    pub history: Vec<TierResult>,
    /// Total elapsed time
    pub duration: Duration,
}

impl ExecutionOutcome {
    /// Attempts across all tiers
    #[must_use]
    pub fn total_attempts(&self) -> u32 {
        self.history.iter().map(|r| r.attempts).sum()
    }
}

/// Escalating executor over capability tiers
#[derive(Clone)]
pub struct TieredExecutor {
    tiers: BTreeMap<Tier, TierConfig>,
    total_timeout: Option<Duration>,
    step_host: Arc<dyn StepHost>,
    sinks: Vec<Arc<dyn EventSink>>,
    actor: String,
}

impl Default for TieredExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl TieredExecutor {
    /// Executor with no tiers and an inline step host
    #[must_use]
    pub fn new() -> Self {
        Self {
            tiers: BTreeMap::new(),
            total_timeout: None,
            step_host: Arc::new(InlineStepHost),
            sinks: Vec::new(),
            actor: "tiered-executor".to_string(),
        }
    }

    /// Configure `tier`
    #[must_use]
    pub fn with_tier(mut self, tier: Tier, config: TierConfig) -> Self {
        self.tiers.insert(tier, config);
        self
    }

    /// Shorthand for a tier with default policy
    #[must_use]
    pub fn with_handler(self, tier: Tier, handler: impl TierHandler + 'static) -> Self {
        self.with_tier(tier, TierConfig::new(handler))
    }

    /// Bound the total time across all attempts
    #[inline]
    #[must_use]
    pub fn with_total_timeout(mut self, limit: Duration) -> Self {
        self.total_timeout = Some(limit);
        self
    }

    /// Use a durable step host
    #[must_use]
    pub fn with_step_host(mut self, host: Arc<dyn StepHost>) -> Self {
        self.step_host = host;
        self
    }

    /// Add an audit sink
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Name recorded as `who` in audit events
    #[must_use]
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = actor.into();
        self
    }

    /// Overlay file configuration onto configured tiers
    #[must_use]
    pub fn with_config(mut self, config: &ExecutorConfig) -> Self {
        if let Some(limit) = config.total_timeout() {
            self.total_timeout = Some(limit);
        }
        for (tier, settings) in &config.tiers {
            if let Some(current) = self.tiers.remove(tier) {
                self.tiers.insert(*tier, current.apply(settings));
            }
        }
        self
    }

    /// Configured tiers in escalation order
    #[must_use]
    pub fn configured_tiers(&self) -> Vec<Tier> {
        self.tiers.keys().copied().collect()
    }

    /// Whether `tier` has a handler
    #[inline]
    #[must_use]
    pub fn is_configured(&self, tier: Tier) -> bool {
        self.tiers.contains_key(&tier)
    }

    /// Total timeout in effect
    #[inline]
    #[must_use]
    pub fn total_timeout(&self) -> Option<Duration> {
        self.total_timeout
    }

    /// Execute `unit`, timing the total budget from now
    ///
    /// # Errors
    /// See [`execute_with_start`](Self::execute_with_start).
    pub async fn execute(&self, unit: &WorkUnit) -> Result<ExecutionOutcome, ExecutorError> {
        self.execute_with_start(unit, Instant::now()).await
    }

    /// Execute `unit`, timing the total budget from `started`
    ///
    /// Pass the cascade start to bound a whole run rather than one unit.
    ///
    /// # Errors
    /// - `NoTiersConfigured` when no tier has a handler
    /// - `CascadeTimeout` when the budget is spent before an attempt starts
    /// - `AllTiersFailed` with the full history otherwise
    pub async fn execute_with_start(
        &self,
        unit: &WorkUnit,
        started: Instant,
    ) -> Result<ExecutionOutcome, ExecutorError> {
        if self.tiers.is_empty() {
            return Err(ExecutorError::NoTiersConfigured);
        }

        let unit_started = Instant::now();
        let mut history = Vec::with_capacity(Tier::ALL.len());

        for tier in Tier::ALL {
            let Some(config) = self.tiers.get(&tier) else {
                history.push(TierResult::skipped(tier));
                continue;
            };

            let result = self.run_tier(unit, tier, config, started).await?;
            if result.success {
                let value = result.value.clone().unwrap_or(Value::Null);
                history.push(result);
                return Ok(ExecutionOutcome {
                    tier,
                    value,
                    history,
                    duration: unit_started.elapsed(),
                });
            }

            let next = self.next_configured(tier);
            self.emit(
                FiveWHEvent::new(&self.actor, "escalate", location(unit, tier), AuditStatus::Escalated)
                    .because(result.error.clone().unwrap_or_default())
                    .took(result.duration)
                    .with_metadata(json!({
                        "attempts": result.attempts,
                        "next_tier": next.map(Tier::as_str),
                    })),
            );
            metrics::counter!("cascade_tier_escalations_total", "tier" => tier.as_str()).increment(1);
            tracing::info!(
                "Unit {} escalating from {} to {} after {} attempts",
                unit.name,
                tier,
                next.map_or("none", Tier::as_str),
                result.attempts
            );
            history.push(result);
        }

        self.emit(
            FiveWHEvent::new(&self.actor, "all_tiers_failed", unit.name.clone(), AuditStatus::Exhausted)
                .took(unit_started.elapsed()),
        );
        tracing::warn!("Unit {} failed on every configured tier", unit.name);
        Err(ExecutorError::AllTiersFailed { history })
    }

    async fn run_tier(
        &self,
        unit: &WorkUnit,
        tier: Tier,
        config: &TierConfig,
        started: Instant,
    ) -> Result<TierResult, ExecutorError> {
        let tier_started = Instant::now();
        let timeout = config.effective_timeout(tier);
        let policy = config.retries;
        let mut attempts = 0u32;

        self.emit(FiveWHEvent::new(&self.actor, "tier_start", location(unit, tier), AuditStatus::Started));

        let (last_error, timed_out) = loop {
            self.check_total_timeout(unit, started)?;
            attempts += 1;
            metrics::counter!("cascade_tier_attempts_total", "tier" => tier.as_str()).increment(1);

            let step_name = format!("{}:{}:attempt-{}", unit.name, tier, attempts);
            let step_config = StepConfig {
                timeout: Some(timeout),
                retries: policy.max_attempts() - attempts,
            };
            let run = attempt(config.handler.as_ref(), unit, timeout);
            let (message, timed_out) = match self.step_host.step(&step_name, step_config, Box::pin(run)).await {
                Ok(value) if config.accepts(&value) => {
                    let duration = tier_started.elapsed();
                    self.emit(
                        FiveWHEvent::new(&self.actor, "tier_success", location(unit, tier), AuditStatus::Succeeded)
                            .took(duration)
                            .with_metadata(json!({ "attempts": attempts })),
                    );
                    tracing::debug!("Unit {} succeeded on {} (attempt {})", unit.name, tier, attempts);
                    return Ok(TierResult {
                        tier,
                        success: true,
                        value: Some(value),
                        error: None,
                        timed_out: false,
                        duration,
                        attempts,
                        skipped: false,
                    });
                }
                Ok(_) => {
                    // Rejected values escalate without retrying the tier
                    self.record_failure(unit, tier, attempts, SUCCESS_CONDITION_NOT_MET);
                    break (SUCCESS_CONDITION_NOT_MET.to_string(), false);
                }
                Err(err) => {
                    let message = format!("{err:#}");
                    self.record_failure(unit, tier, attempts, &message);
                    (message, err.downcast_ref::<AttemptTimedOut>().is_some())
                }
            };

            if attempts >= policy.max_attempts() {
                break (message, timed_out);
            }
            let delay = policy.delay_for(attempts);
            tracing::debug!(
                "Unit {} retrying {} in {:?} (attempt {} of {})",
                unit.name,
                tier,
                delay,
                attempts + 1,
                policy.max_attempts()
            );
            let sleep_name = format!("{}:{}:backoff-{}", unit.name, tier, attempts);
            self.step_host.sleep(&sleep_name, delay).await;
        };

        Ok(TierResult {
            tier,
            success: false,
            value: None,
            error: Some(last_error),
            timed_out,
            duration: tier_started.elapsed(),
            attempts,
            skipped: false,
        })
    }

    fn check_total_timeout(&self, unit: &WorkUnit, started: Instant) -> Result<(), ExecutorError> {
        let Some(limit) = self.total_timeout else {
            return Ok(());
        };
        let elapsed = started.elapsed();
        if elapsed > limit {
            self.emit(
                FiveWHEvent::new(&self.actor, "cascade_timeout", unit.name.clone(), AuditStatus::TimedOut)
                    .took(elapsed),
            );
            tracing::warn!("Unit {} exceeded total timeout {:?}", unit.name, limit);
            return Err(ExecutorError::CascadeTimeout { limit, elapsed });
        }
        Ok(())
    }

    fn record_failure(&self, unit: &WorkUnit, tier: Tier, attempt: u32, message: &str) {
        tracing::debug!("Unit {} attempt {} on {} failed: {}", unit.name, attempt, tier, message);
        self.emit(
            FiveWHEvent::new(&self.actor, "attempt_failed", location(unit, tier), AuditStatus::Failed)
                .because(message)
                .with_metadata(json!({ "attempt": attempt })),
        );
    }

    fn next_configured(&self, after: Tier) -> Option<Tier> {
        self.tiers.keys().copied().find(|t| *t > after)
    }

    fn emit(&self, event: FiveWHEvent) {
        for sink in &self.sinks {
            if let Err(err) = sink.on_event(&event) {
                tracing::warn!("Audit sink rejected {} event: {}", event.what, err);
            }
        }
    }

    /// Draft from the first configured tier that offers one
    #[must_use]
    pub fn draft(&self, unit: &WorkUnit) -> Option<(Tier, Draft)> {
        self.tiers
            .iter()
            .find_map(|(tier, config)| config.handler.draft(unit).map(|s| (*tier, Draft::new(s))))
    }
}

impl std::fmt::Debug for TieredExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TieredExecutor")
            .field("tiers", &self.tiers)
            .field("total_timeout", &self.total_timeout)
            .field("sinks", &self.sinks.len())
            .finish_non_exhaustive()
    }
}

async fn attempt(handler: &dyn TierHandler, unit: &WorkUnit, limit: Duration) -> anyhow::Result<Value> {
    match tokio::time::timeout(limit, handler.execute(unit)).await {
        Ok(result) => result,
        Err(_) => Err(AttemptTimedOut { limit }.into()),
    }
}

fn location(unit: &WorkUnit, tier: Tier) -> String {
    format!("{}/{}", unit.name, tier)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditTrail;
    use crate::handler::handler_fn;
    use crate::policy::{Backoff, RetryPolicy};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn unit() -> WorkUnit {
        WorkUnit::entity("post-1", "Post", json!({}))
    }

    fn failing() -> impl TierHandler {
        handler_fn(|_| async { Err(anyhow::anyhow!("boom")) })
    }

    fn succeeding(value: Value) -> impl TierHandler {
        handler_fn(move |_| {
            let value = value.clone();
            async move { Ok(value) }
        })
    }

    #[tokio::test]
    async fn no_tiers_is_an_error() {
        let err = TieredExecutor::new().execute(&unit()).await.unwrap_err();
        assert!(matches!(err, ExecutorError::NoTiersConfigured));
    }

    #[tokio::test]
    async fn first_success_wins() {
        let executor = TieredExecutor::new()
            .with_handler(Tier::Code, succeeding(json!(1)))
            .with_handler(Tier::Generative, succeeding(json!(2)));
        let outcome = executor.execute(&unit()).await.unwrap();
        assert_eq!(outcome.tier, Tier::Code);
        assert_eq!(outcome.value, json!(1));
        assert_eq!(outcome.history.len(), 1);
    }

    #[tokio::test]
    async fn skipped_tiers_are_recorded() {
        let executor = TieredExecutor::new().with_handler(Tier::Agentic, succeeding(json!("ok")));
        let outcome = executor.execute(&unit()).await.unwrap();
        let skipped: Vec<_> = outcome.history.iter().filter(|r| r.skipped).map(|r| r.tier).collect();
        assert_eq!(skipped, vec![Tier::Code, Tier::Generative]);
        assert_eq!(outcome.total_attempts(), 1);
    }

    #[tokio::test]
    async fn timeout_marks_result() {
        let slow = handler_fn(|_| async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(json!(null))
        });
        let executor = TieredExecutor::new()
            .with_tier(Tier::Code, TierConfig::new(slow).with_timeout(Duration::from_millis(10)));
        let err = executor.execute(&unit()).await.unwrap_err();
        let code = &err.history()[0];
        assert!(code.timed_out);
        assert!(code.error.as_deref().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn rejected_value_escalates_without_retry() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let code = handler_fn(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(json!({"draft": true})) }
        });
        let executor = TieredExecutor::new()
            .with_tier(
                Tier::Code,
                TierConfig::new(code)
                    .with_retries(RetryPolicy::new(3, Duration::ZERO, Backoff::Constant))
                    .with_success_condition(|v| v.get("final").is_some()),
            )
            .with_handler(Tier::Generative, succeeding(json!({"final": true})));

        let outcome = executor.execute(&unit()).await.unwrap();
        assert_eq!(outcome.tier, Tier::Generative);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.history[0].error.as_deref(), Some(SUCCESS_CONDITION_NOT_MET));
    }

    #[tokio::test]
    async fn total_timeout_stops_before_next_attempt() {
        let executor = TieredExecutor::new()
            .with_handler(Tier::Code, failing())
            .with_handler(Tier::Generative, succeeding(json!(1)))
            .with_total_timeout(Duration::from_millis(5));
        let long_ago = Instant::now().checked_sub(Duration::from_millis(50)).unwrap();

        let err = executor.execute_with_start(&unit(), long_ago).await.unwrap_err();
        assert!(err.is_fatal());
        match err {
            ExecutorError::CascadeTimeout { limit, elapsed } => {
                assert_eq!(limit, Duration::from_millis(5));
                assert!(elapsed >= Duration::from_millis(50));
            }
            other => panic!("expected timeout, got {other}"),
        }
    }

    #[tokio::test]
    async fn audit_trail_records_escalation() {
        let trail = Arc::new(AuditTrail::new());
        let executor = TieredExecutor::new()
            .with_handler(Tier::Code, failing())
            .with_handler(Tier::Human, succeeding(json!("approved")))
            .with_sink(trail.clone());
        executor.execute(&unit()).await.unwrap();

        let whats: Vec<_> = trail.events().into_iter().map(|e| e.what).collect();
        assert_eq!(
            whats,
            vec!["tier_start", "attempt_failed", "escalate", "tier_start", "tier_success"]
        );
        let escalation = &trail.events()[2];
        assert_eq!(escalation.how.metadata.as_ref().unwrap()["next_tier"], "human");
        trail.verify_integrity().unwrap();
    }

    struct BrokenSink;

    impl EventSink for BrokenSink {
        fn on_event(&self, _event: &FiveWHEvent) -> anyhow::Result<()> {
            anyhow::bail!("sink down")
        }
    }

    #[tokio::test]
    async fn sink_failures_are_ignored() {
        let executor = TieredExecutor::new()
            .with_handler(Tier::Code, succeeding(json!(1)))
            .with_sink(Arc::new(BrokenSink));
        assert!(executor.execute(&unit()).await.is_ok());
    }
}
