//! Retry and backoff policy

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Delay growth between retries of one tier
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    /// Same delay every time
    #[default]
    Constant,
    /// `delay * n`
    Linear,
    /// `delay * 2^(n-1)`
    Exponential,
}

/// Per-tier retry policy
///
/// `limit` counts retries, so a tier makes at most `limit + 1` attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    #[serde(default)]
    pub limit: u32,
    /// Base delay
    #[serde(rename = "delay_ms", with = "millis", default)]
    pub delay: Duration,
    /// Growth of the base delay
    #[serde(default)]
    pub backoff: Backoff,
}

impl RetryPolicy {
    /// Single attempt, no retries
    #[inline]
    #[must_use]
    pub const fn none() -> Self {
        Self {
            limit: 0,
            delay: Duration::ZERO,
            backoff: Backoff::Constant,
        }
    }

    /// Policy with the given retry limit and base delay
    #[inline]
    #[must_use]
    pub const fn new(limit: u32, delay: Duration, backoff: Backoff) -> Self {
        Self { limit, delay, backoff }
    }

    /// Maximum attempts including the first
    #[inline]
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.limit.saturating_add(1)
    }

    /// Wait before retry number `retry` (1-based)
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Duration {
        let retry = retry.max(1);
        match self.backoff {
            Backoff::Constant => self.delay,
            Backoff::Linear => self.delay.saturating_mul(retry),
            Backoff::Exponential => {
                let factor = 2u32.checked_pow(retry - 1).unwrap_or(u32::MAX);
                self.delay.saturating_mul(factor)
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

pub(crate) mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub(crate) fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
