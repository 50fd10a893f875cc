//! Error types for the cascade scheduler
//!
//! Structural errors (schema, cycles, illegal state transitions) surface
//! immediately. Timeouts and context overflow end the run. Everything else is
//! a child failure, absorbed or fatal depending on `stop_on_error`.

use crate::state::RunState;
use cascade_context::ContextError;
use cascade_executor::ExecutorError;
use cascade_graph::GraphError;

/// Main cascade error type
#[derive(Debug, thiserror::Error)]
pub enum CascadeError {
    /// Schema validation or ordering failed
    #[error("graph error: {0}")]
    Graph(#[from] GraphError),

    /// Context budget or persisted state problem
    #[error("context error: {0}")]
    Context(#[from] ContextError),

    /// Tiered execution failed
    #[error("execution failed: {0}")]
    Executor(#[from] ExecutorError),

    /// Entity store call failed
    #[error("store {operation} failed: {message}")]
    Store {
        /// Store operation
        operation: &'static str,
        /// Collaborator message
        message: String,
    },

    /// A tier returned something that is not an object
    #[error("invalid output for {type_name}: {message}")]
    InvalidOutput {
        /// Type being generated
        type_name: String,
        /// What was wrong
        message: String,
    },

    /// Prompt template could not be rendered
    #[error("template error: {0}")]
    Template(#[from] TemplateError),

    /// Verb not declared on the type
    #[error("unknown verb {verb} on {type_name}")]
    UnknownVerb {
        /// Type
        type_name: String,
        /// Verb
        verb: String,
    },

    /// Run state machine violation
    #[error("illegal run state transition: {from:?} -> {to:?}")]
    IllegalTransition {
        /// Current state
        from: RunState,
        /// Requested state
        to: RunState,
    },

    /// Configuration could not be loaded
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl CascadeError {
    /// Wrap a store collaborator failure
    #[inline]
    pub fn store(operation: &'static str, err: &anyhow::Error) -> Self {
        Self::Store {
            operation,
            message: format!("{err:#}"),
        }
    }

    /// Whether the error ends the run regardless of `stop_on_error`
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Graph(_) | Self::IllegalTransition { .. } | Self::Config(_) => true,
            Self::Context(err) => matches!(err, ContextError::ContextOverflow { .. }),
            Self::Executor(err) => err.is_fatal(),
            _ => false,
        }
    }

    /// Whether a caller could reasonably retry the run
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Executor(ExecutorError::AllTiersFailed { .. } | ExecutorError::CascadeTimeout { .. })
                | Self::Store { .. }
        ) || matches!(self, Self::Context(err) if err.is_recoverable())
    }
}

/// Prompt template errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    /// Placeholder without a value
    #[error("no value for placeholder {{{0}}}")]
    MissingValue(String),
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("cannot read {path}: {source}")]
    Io {
        /// File path
        path: String,
        /// Underlying error
        source: std::io::Error,
    },

    /// File could not be parsed
    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
}
