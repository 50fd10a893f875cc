//! Error types for the tiered executor

use crate::executor::TierResult;
use std::time::Duration;

/// Tiered execution errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ExecutorError {
    /// Every configured tier failed
    #[error("all tiers failed: {}", summarize(.history))]
    AllTiersFailed {
        /// Ordered per-tier results, skipped tiers included
        history: Vec<TierResult>,
    },

    /// Total time budget exceeded before an attempt could start
    #[error("cascade timed out after {elapsed:?} (limit {limit:?})")]
    CascadeTimeout {
        /// Configured budget
        limit: Duration,
        /// Elapsed time when the check fired
        elapsed: Duration,
    },

    /// No tier has a handler
    #[error("no tiers configured")]
    NoTiersConfigured,
}

impl ExecutorError {
    /// Whether the error must end the whole cascade
    #[inline]
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::CascadeTimeout { .. } | Self::NoTiersConfigured)
    }

    /// Per-tier history, for `AllTiersFailed`
    #[must_use]
    pub fn history(&self) -> &[TierResult] {
        match self {
            Self::AllTiersFailed { history } => history,
            _ => &[],
        }
    }
}

fn summarize(history: &[TierResult]) -> String {
    let parts: Vec<String> = history
        .iter()
        .filter(|r| !r.skipped)
        .map(|r| {
            format!(
                "{} ({} attempts): {}",
                r.tier,
                r.attempts,
                r.error.as_deref().unwrap_or("unknown error")
            )
        })
        .collect();
    parts.join("; ")
}

/// A single attempt exceeded its tier timeout
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("attempt timed out after {limit:?}")]
pub struct AttemptTimedOut {
    /// Tier timeout in effect
    pub limit: Duration,
}

/// Audit trail errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuditError {
    /// Chain broken at `index`
    #[error("audit trail integrity violation at record {index}")]
    IntegrityViolation {
        /// First bad record
        index: usize,
    },
}
