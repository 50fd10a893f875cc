//! Durable step host contract
//!
//! Every tier attempt runs as a named step and every backoff wait as a named
//! sleep. A host that persists step results can resume a crashed execution
//! without re-running attempts that already succeeded. The executor never
//! persists anything itself.

use dashmap::DashMap;
use futures::future::BoxFuture;
use serde_json::Value;
use std::time::Duration;

/// Body of one step
pub type StepFuture<'a> = BoxFuture<'a, anyhow::Result<Value>>;

/// Step options passed through to the host
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepConfig {
    /// Attempt timeout the executor applies inside the step
    pub timeout: Option<Duration>,
    /// Retries the executor may still perform for this tier
    pub retries: u32,
}

/// Host for named, checkpointable steps
#[async_trait::async_trait]
pub trait StepHost: Send + Sync {
    /// Run (or replay) the step `name`
    async fn step(&self, name: &str, config: StepConfig, run: StepFuture<'_>) -> anyhow::Result<Value>;

    /// Durable wait
    async fn sleep(&self, name: &str, duration: Duration);
}

/// Runs steps directly, no persistence
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineStepHost;

#[async_trait::async_trait]
impl StepHost for InlineStepHost {
    async fn step(&self, _name: &str, _config: StepConfig, run: StepFuture<'_>) -> anyhow::Result<Value> {
        run.await
    }

    async fn sleep(&self, _name: &str, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// In-memory host that replays succeeded steps and completed sleeps
///
/// Sharing one instance across two executions of the same unit simulates a
/// resume after a crash.
#[derive(Debug, Default)]
pub struct MemoizedStepHost {
    results: DashMap<String, Value>,
    slept: DashMap<String, Duration>,
}

impl MemoizedStepHost {
    /// Empty host
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `name` has a recorded result
    #[inline]
    #[must_use]
    pub fn is_completed(&self, name: &str) -> bool {
        self.results.contains_key(name)
    }

    /// Number of recorded step results
    #[inline]
    #[must_use]
    pub fn completed_steps(&self) -> usize {
        self.results.len()
    }
}

#[async_trait::async_trait]
impl StepHost for MemoizedStepHost {
    async fn step(&self, name: &str, _config: StepConfig, run: StepFuture<'_>) -> anyhow::Result<Value> {
        if let Some(value) = self.results.get(name) {
            tracing::debug!("Replaying step {}", name);
            return Ok(value.clone());
        }
        let value = run.await?;
        self.results.insert(name.to_string(), value.clone());
        Ok(value)
    }

    async fn sleep(&self, name: &str, duration: Duration) {
        if self.slept.contains_key(name) {
            return;
        }
        tokio::time::sleep(duration).await;
        self.slept.insert(name.to_string(), duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn counted(calls: &AtomicUsize) -> anyhow::Result<Value> {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(json!(1))
    }

    #[tokio::test]
    async fn memoized_host_replays_success_only() {
        let host = MemoizedStepHost::new();
        let calls = AtomicUsize::new(0);

        host.step("a", StepConfig::default(), Box::pin(counted(&calls))).await.unwrap();
        host.step("a", StepConfig::default(), Box::pin(counted(&calls))).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let failing: StepFuture<'_> = Box::pin(async { Err(anyhow::anyhow!("boom")) });
        assert!(host.step("b", StepConfig::default(), failing).await.is_err());
        assert!(!host.is_completed("b"));
        assert_eq!(host.completed_steps(), 1);
    }
}
