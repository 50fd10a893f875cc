//! Progress events and observers

use crate::error::CascadeError;
use serde::{Deserialize, Serialize};

/// Phase reported by a progress event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CascadePhase {
    /// Run accepted
    Starting,
    /// A type's generation is about to begin
    Generating,
    /// Run finished
    Complete,
    /// Run aborted
    Error,
}

/// Progress event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CascadeProgressEvent {
    /// Phase
    pub phase: CascadePhase,
    /// Type being generated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_type: Option<String>,
    /// Cascade depth of that type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth: Option<usize>,
    /// Entities created so far
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_entities_created: Option<usize>,
}

impl CascadeProgressEvent {
    /// Run start for `root`
    #[must_use]
    pub fn starting(root: &str) -> Self {
        Self {
            phase: CascadePhase::Starting,
            current_type: Some(root.to_string()),
            depth: Some(0),
            total_entities_created: None,
        }
    }

    /// Generation of `type_name` at `depth`
    #[must_use]
    pub fn generating(type_name: &str, depth: usize) -> Self {
        Self {
            phase: CascadePhase::Generating,
            current_type: Some(type_name.to_string()),
            depth: Some(depth),
            total_entities_created: None,
        }
    }

    /// Run end
    #[must_use]
    pub fn complete(total: usize) -> Self {
        Self {
            phase: CascadePhase::Complete,
            current_type: None,
            depth: None,
            total_entities_created: Some(total),
        }
    }

    /// Run abort
    #[must_use]
    pub fn error(total: usize) -> Self {
        Self {
            phase: CascadePhase::Error,
            current_type: None,
            depth: None,
            total_entities_created: Some(total),
        }
    }
}

/// Receiver of progress and absorbed errors
///
/// Both callbacks are fire-and-forget: returned errors are logged and never
/// abort the run.
pub trait CascadeObserver: Send + Sync {
    /// Progress update
    fn on_progress(&self, _event: &CascadeProgressEvent) -> anyhow::Result<()> {
        Ok(())
    }

    /// Child failure (absorbed, or about to abort the run)
    fn on_error(&self, _error: &CascadeError) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Observer that writes progress to `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl CascadeObserver for TracingObserver {
    fn on_progress(&self, event: &CascadeProgressEvent) -> anyhow::Result<()> {
        match event.phase {
            CascadePhase::Generating => tracing::info!(
                "Generating {} at depth {}",
                event.current_type.as_deref().unwrap_or("?"),
                event.depth.unwrap_or_default()
            ),
            phase => tracing::info!(
                "Cascade {:?} ({} entities)",
                phase,
                event.total_entities_created.unwrap_or_default()
            ),
        }
        Ok(())
    }

    fn on_error(&self, error: &CascadeError) -> anyhow::Result<()> {
        tracing::warn!("Cascade child failed: {}", error);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn serializes_sparse() {
        let value = serde_json::to_value(CascadeProgressEvent::generating("User", 1)).unwrap();
        assert_eq!(value, json!({"phase": "generating", "current_type": "User", "depth": 1}));
    }
}
