//! Run state machine
//!
//! `Idle → Generating → {Complete | Error}`; terminal states accept nothing.

use crate::error::CascadeError;
use serde::{Deserialize, Serialize};

/// Lifecycle of one cascade invocation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Not started
    #[default]
    Idle,
    /// Generating entities
    Generating,
    /// Finished, possibly with absorbed errors
    Complete,
    /// Aborted
    Error,
}

impl RunState {
    /// Whether no further transition is possible
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        allowed_transitions(self).is_empty()
    }
}

/// States reachable from `from`
#[must_use]
pub fn allowed_transitions(from: RunState) -> &'static [RunState] {
    use RunState::{Complete, Error, Generating, Idle};
    match from {
        Idle => &[Generating],
        Generating => &[Complete, Error],
        Complete | Error => &[],
    }
}

/// Check a transition
///
/// # Errors
/// `CascadeError::IllegalTransition` if `to` is not reachable from `from`.
pub fn validate_transition(from: RunState, to: RunState) -> Result<(), CascadeError> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(CascadeError::IllegalTransition { from, to })
    }
}

#[derive(Debug, Default)]
pub(crate) struct RunStateMachine {
    state: RunState,
}

impl RunStateMachine {
    pub(crate) fn state(&self) -> RunState {
        self.state
    }

    pub(crate) fn transition(&mut self, to: RunState) -> Result<(), CascadeError> {
        validate_transition(self.state, to)?;
        tracing::debug!("Run state {:?} -> {:?}", self.state, to);
        self.state = to;
        Ok(())
    }
}
