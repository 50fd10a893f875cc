//! Error types for the generation context

/// Generation context errors
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    /// Token budget exceeded with compaction disabled, or a single entity
    /// larger than the whole budget
    #[error("context overflow: {used} tokens used, budget is {max}")]
    ContextOverflow {
        /// Estimate including the rejected entity
        used: usize,
        /// Configured budget
        max: usize,
    },

    /// Persisted state could not be decoded
    #[error("invalid context state: {0}")]
    InvalidState(#[from] serde_json::Error),
}

impl ContextError {
    /// Whether a caller can recover, e.g. with a larger budget or compaction
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::ContextOverflow { .. })
    }
}
