//! Error types for schema validation and graph ordering

/// Schema validation errors
///
/// Raised before a dependency graph is built; never retried.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SchemaError {
    /// No types declared
    #[error("schema declares no types")]
    Empty,

    /// Relationship with an empty target list
    #[error("{type_name}.{field}: relationship has no target type")]
    NoTargets {
        /// Owning type
        type_name: String,
        /// Offending field
        field: String,
    },

    /// Relationship to a type the schema does not declare
    #[error("{type_name}.{field}: references undeclared type '{target}'")]
    UndeclaredType {
        /// Owning type
        type_name: String,
        /// Offending field
        field: String,
        /// Missing target
        target: String,
    },

    /// Fuzzy threshold outside `[0, 1]`
    #[error("{type_name}.{field}: threshold {threshold} is outside [0, 1]")]
    InvalidThreshold {
        /// Owning type
        type_name: String,
        /// Offending field
        field: String,
        /// Rejected value
        threshold: f32,
    },
}

/// Graph construction and ordering errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GraphError {
    /// Schema failed validation
    #[error("invalid schema: {0}")]
    Schema(#[from] SchemaError),

    /// Hard dependencies form a cycle
    #[error("circular dependency detected: {}", .cycle_path.join(" -> "))]
    CircularDependency {
        /// Closed path, first element repeated at the end (`A -> B -> A`)
        cycle_path: Vec<String>,
    },

    /// Root type not present in the graph
    #[error("unknown type '{0}'")]
    UnknownType(String),
}

impl GraphError {
    /// Cycle path, if this is a circular dependency
    #[inline]
    #[must_use]
    pub fn cycle_path(&self) -> Option<&[String]> {
        match self {
            Self::CircularDependency { cycle_path } => Some(cycle_path),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn circular_dependency_display() {
        let err = GraphError::CircularDependency {
            cycle_path: vec!["A".into(), "B".into(), "A".into()],
        };
        assert_eq!(err.to_string(), "circular dependency detected: A -> B -> A");
        assert_eq!(err.cycle_path().map(<[String]>::len), Some(3));
    }

    #[test]
    fn schema_error_converts() {
        let err: GraphError = SchemaError::Empty.into();
        assert!(err.to_string().contains("no types"));
        assert!(err.cycle_path().is_none());
    }
}
