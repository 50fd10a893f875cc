//! Tier and executor configuration

use crate::handler::TierHandler;
use crate::policy::RetryPolicy;
use crate::tier::Tier;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Post-success check; `false` turns a value into a tier failure
pub type SuccessCondition = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// A configured tier: handler plus its policy
#[derive(Clone)]
pub struct TierConfig {
    pub(crate) handler: Arc<dyn TierHandler>,
    pub(crate) timeout: Option<Duration>,
    pub(crate) retries: RetryPolicy,
    pub(crate) success_condition: Option<SuccessCondition>,
}

impl TierConfig {
    /// Tier backed by `handler` with default policy
    pub fn new(handler: impl TierHandler + 'static) -> Self {
        Self::from_arc(Arc::new(handler))
    }

    /// Tier backed by a shared handler
    #[must_use]
    pub fn from_arc(handler: Arc<dyn TierHandler>) -> Self {
        Self {
            handler,
            timeout: None,
            retries: RetryPolicy::none(),
            success_condition: None,
        }
    }

    /// Override the per-attempt timeout
    #[inline]
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the retry policy
    #[inline]
    #[must_use]
    pub fn with_retries(mut self, retries: RetryPolicy) -> Self {
        self.retries = retries;
        self
    }

    /// Require `condition(value)` for a result to count as success
    #[must_use]
    pub fn with_success_condition<F>(mut self, condition: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        self.success_condition = Some(Arc::new(condition));
        self
    }

    /// Overlay file settings
    #[must_use]
    pub fn apply(mut self, settings: &TierSettings) -> Self {
        if let Some(ms) = settings.timeout_ms {
            self.timeout = Some(Duration::from_millis(ms));
        }
        if let Some(retries) = settings.retries {
            self.retries = retries;
        }
        self
    }

    /// Timeout in effect for `tier`
    #[inline]
    #[must_use]
    pub fn effective_timeout(&self, tier: Tier) -> Duration {
        self.timeout.unwrap_or_else(|| tier.default_timeout())
    }

    /// Retry policy
    #[inline]
    #[must_use]
    pub fn retries(&self) -> &RetryPolicy {
        &self.retries
    }

    pub(crate) fn accepts(&self, value: &Value) -> bool {
        self.success_condition.as_ref().map_or(true, |check| check(value))
    }
}

impl fmt::Debug for TierConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TierConfig")
            .field("timeout", &self.timeout)
            .field("retries", &self.retries)
            .field("success_condition", &self.success_condition.is_some())
            .finish_non_exhaustive()
    }
}

/// Serializable per-tier policy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierSettings {
    /// Per-attempt timeout override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Retry policy override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<RetryPolicy>,
}

/// Serializable executor configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Total time budget for one unit of work (or a whole cascade)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_timeout_ms: Option<u64>,
    /// Per-tier overrides
    pub tiers: BTreeMap<Tier, TierSettings>,
}

impl ExecutorConfig {
    /// Total timeout as a duration
    #[inline]
    #[must_use]
    pub fn total_timeout(&self) -> Option<Duration> {
        self.total_timeout_ms.map(Duration::from_millis)
    }

    /// With total timeout
    #[inline]
    #[must_use]
    pub fn with_total_timeout(mut self, timeout: Duration) -> Self {
        self.total_timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// With settings for one tier
    #[inline]
    #[must_use]
    pub fn with_tier(mut self, tier: Tier, settings: TierSettings) -> Self {
        self.tiers.insert(tier, settings);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::handler_fn;
    use crate::policy::Backoff;
    use serde_json::json;

    fn noop() -> TierConfig {
        TierConfig::new(handler_fn(|_| async { Ok(json!(null)) }))
    }

    #[test]
    fn default_timeout_comes_from_tier() {
        let cfg = noop();
        assert_eq!(cfg.effective_timeout(Tier::Code), Duration::from_secs(5));
        let cfg = cfg.with_timeout(Duration::from_millis(50));
        assert_eq!(cfg.effective_timeout(Tier::Human), Duration::from_millis(50));
    }

    #[test]
    fn settings_overlay() {
        let settings = TierSettings {
            timeout_ms: Some(250),
            retries: Some(RetryPolicy::new(2, Duration::from_millis(10), Backoff::Linear)),
        };
        let cfg = noop().apply(&settings);
        assert_eq!(cfg.effective_timeout(Tier::Code), Duration::from_millis(250));
        assert_eq!(cfg.retries().limit, 2);
    }

    #[test]
    fn success_condition_gates_values() {
        let cfg = noop().with_success_condition(|v| v.get("ok").is_some());
        assert!(cfg.accepts(&json!({"ok": true})));
        assert!(!cfg.accepts(&json!({})));
        assert!(noop().accepts(&json!(null)));
    }

    #[test]
    fn config_loads_from_json() {
        let cfg: ExecutorConfig = serde_json::from_value(json!({
            "total_timeout_ms": 1000,
            "tiers": {"code": {"retries": {"limit": 2, "delay_ms": 10, "backoff": "exponential"}}}
        }))
        .unwrap();
        assert_eq!(cfg.total_timeout(), Some(Duration::from_millis(1000)));
        assert_eq!(cfg.tiers[&Tier::Code].retries.map(|r| r.limit), Some(2));
    }
}
