//! Cascade configuration
//!
//! Loadable from TOML:
//!
//! ```toml
//! max_depth = 3
//! stop_on_error = false
//! cascade_types = ["User", "Tag"]
//!
//! [context]
//! max_context_tokens = 8000
//! auto_compact = true
//!
//! [executor]
//! total_timeout_ms = 60000
//! ```

use crate::error::ConfigError;
use cascade_context::ContextConfig;
use cascade_executor::ExecutorConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Depth used when cascading is enabled without an explicit limit
pub const DEFAULT_MAX_DEPTH: usize = 2;

/// Elements generated for an array field without an explicit count
pub const DEFAULT_ARRAY_COUNT: usize = 2;

/// Similarity threshold for fuzzy fields without their own
pub const DEFAULT_FUZZY_THRESHOLD: f32 = 0.75;

/// Scheduler configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CascadeConfig {
    /// Generate related entities at all
    pub cascade: bool,
    /// Recursion ceiling; children are generated while `depth < max_depth`
    pub max_depth: usize,
    /// Array element count fallback
    pub default_array_count: usize,
    /// Abort the whole run on the first child failure
    pub stop_on_error: bool,
    /// Allow-list of types that may be generated as children
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cascade_types: Option<Vec<String>>,
    /// Fuzzy match threshold fallback
    pub fuzzy_threshold: f32,
    /// Context budget
    pub context: ContextConfig,
    /// Tier overrides and total timeout
    pub executor: ExecutorConfig,
}

impl Default for CascadeConfig {
    fn default() -> Self {
        Self {
            cascade: true,
            max_depth: DEFAULT_MAX_DEPTH,
            default_array_count: DEFAULT_ARRAY_COUNT,
            stop_on_error: false,
            cascade_types: None,
            fuzzy_threshold: DEFAULT_FUZZY_THRESHOLD,
            context: ContextConfig::default(),
            executor: ExecutorConfig::default(),
        }
    }
}

impl CascadeConfig {
    /// Default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse TOML
    ///
    /// # Errors
    /// `ConfigError::Parse` on malformed input.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(input)?)
    }

    /// Read and parse a TOML file
    ///
    /// # Errors
    /// `ConfigError::Io` if the file cannot be read, `ConfigError::Parse` otherwise.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Depth in effect: 0 when cascading is off
    #[inline]
    #[must_use]
    pub fn effective_max_depth(&self) -> usize {
        if self.cascade {
            self.max_depth
        } else {
            0
        }
    }

    /// With depth ceiling
    #[inline]
    #[must_use]
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    /// With cascading enabled or disabled
    #[inline]
    #[must_use]
    pub fn with_cascade(mut self, enabled: bool) -> Self {
        self.cascade = enabled;
        self
    }

    /// With stop-on-error behaviour
    #[inline]
    #[must_use]
    pub fn with_stop_on_error(mut self, stop: bool) -> Self {
        self.stop_on_error = stop;
        self
    }

    /// Restrict child generation to these types
    #[must_use]
    pub fn with_cascade_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cascade_types = Some(types.into_iter().map(Into::into).collect());
        self
    }

    /// With array element count fallback
    #[inline]
    #[must_use]
    pub fn with_array_count(mut self, count: usize) -> Self {
        self.default_array_count = count;
        self
    }

    /// With context budget
    #[inline]
    #[must_use]
    pub fn with_context(mut self, context: ContextConfig) -> Self {
        self.context = context;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults() {
        let config = CascadeConfig::default();
        assert_eq!(config.max_depth, 2);
        assert_eq!(config.default_array_count, 2);
        assert!(!config.stop_on_error);
        assert_eq!(config.context.max_context_tokens, 32_000);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = CascadeConfig::from_toml_str(
            r#"
            max_depth = 4
            cascade_types = ["User"]

            [context]
            max_context_tokens = 500
            auto_compact = false

            [executor]
            total_timeout_ms = 1500
            "#,
        )
        .unwrap();

        assert_eq!(config.max_depth, 4);
        assert_eq!(config.cascade_types, Some(vec!["User".to_string()]));
        assert_eq!(config.default_array_count, DEFAULT_ARRAY_COUNT);
        assert_eq!(config.context.max_context_tokens, 500);
        assert!(!config.context.auto_compact);
        assert!((config.context.compaction_target - 0.5).abs() < f64::EPSILON);
        assert_eq!(config.executor.total_timeout_ms, Some(1500));
    }

    #[test]
    fn disabled_cascade_has_zero_depth() {
        assert_eq!(CascadeConfig::new().with_cascade(false).effective_max_depth(), 0);
    }

    #[test]
    fn load_reports_missing_files() {
        let err = CascadeConfig::load("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn load_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "stop_on_error = true").unwrap();
        let config = CascadeConfig::load(file.path()).unwrap();
        assert!(config.stop_on_error);
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        assert!(matches!(
            CascadeConfig::from_toml_str("max_depth = \"deep\""),
            Err(ConfigError::Parse(_))
        ));
    }
}
