//! Parsed schema model
//!
//! The schema is the already-parsed form of a type declaration set: for each
//! type, an ordered map of fields where every field is either a scalar to be
//! filled or a relationship to another declared type. Field order is
//! declaration order and drives every downstream ordering decision.

use crate::error::SchemaError;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Relationship direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// The owner points at the target (`->`, `~>`)
    #[default]
    Forward,
    /// Backlink owned by the target's forward field (`<-`, `<~`)
    Backward,
}

/// How a relationship target is resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    /// Always materialize a new target
    #[default]
    Exact,
    /// Reuse a similar existing target when one is found
    Fuzzy,
}

/// Relationship descriptor for one field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    /// Direction of the reference
    #[serde(default)]
    pub direction: Direction,

    /// Exact or fuzzy resolution
    #[serde(default, rename = "match")]
    pub match_mode: MatchMode,

    /// Target type names; more than one means a union
    pub targets: Vec<String>,

    /// Field holds a list of references
    #[serde(default, rename = "array")]
    pub is_array: bool,

    /// Field may stay unresolved
    #[serde(default, rename = "optional")]
    pub is_optional: bool,

    /// Similarity threshold for fuzzy matching
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f32>,

    /// Number of elements to generate for array fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,

    /// Name of the field on the target that links back
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backref: Option<String>,
}

impl Relationship {
    fn with_direction(direction: Direction, target: impl Into<String>) -> Self {
        Self {
            direction,
            match_mode: MatchMode::Exact,
            targets: vec![target.into()],
            is_array: false,
            is_optional: false,
            threshold: None,
            count: None,
            backref: None,
        }
    }

    /// Exact forward relationship to `target`
    #[inline]
    #[must_use]
    pub fn forward(target: impl Into<String>) -> Self {
        Self::with_direction(Direction::Forward, target)
    }

    /// Exact backward relationship to `target`
    #[inline]
    #[must_use]
    pub fn backward(target: impl Into<String>) -> Self {
        Self::with_direction(Direction::Backward, target)
    }

    /// Add a union member
    #[inline]
    #[must_use]
    pub fn or(mut self, target: impl Into<String>) -> Self {
        self.targets.push(target.into());
        self
    }

    /// Resolve by similarity instead of always generating
    #[inline]
    #[must_use]
    pub fn fuzzy(mut self) -> Self {
        self.match_mode = MatchMode::Fuzzy;
        self
    }

    /// Make this a list of references
    #[inline]
    #[must_use]
    pub fn array(mut self) -> Self {
        self.is_array = true;
        self
    }

    /// Allow the field to stay empty
    #[inline]
    #[must_use]
    pub fn optional(mut self) -> Self {
        self.is_optional = true;
        self
    }

    /// Set the fuzzy match threshold
    #[inline]
    #[must_use]
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = Some(threshold);
        self
    }

    /// Set the array element count
    #[inline]
    #[must_use]
    pub fn with_count(mut self, count: usize) -> Self {
        self.count = Some(count);
        self
    }

    /// Set the backlink field name
    #[inline]
    #[must_use]
    pub fn with_backref(mut self, field: impl Into<String>) -> Self {
        self.backref = Some(field.into());
        self
    }

    /// Operator notation for this relationship
    #[must_use]
    pub fn operator(&self) -> &'static str {
        match (self.direction, self.match_mode) {
            (Direction::Forward, MatchMode::Exact) => "->",
            (Direction::Forward, MatchMode::Fuzzy) => "~>",
            (Direction::Backward, MatchMode::Exact) => "<-",
            (Direction::Backward, MatchMode::Fuzzy) => "<~",
        }
    }

    /// Type the dependency edge points at.
    ///
    /// Unions resolve to their first listed member.
    #[must_use]
    pub fn primary_target(&self) -> Option<&str> {
        self.targets.first().map(String::as_str)
    }

    /// Whether this relationship blocks its owner's ordering
    ///
    /// Arrays never block: an empty list always satisfies them.
    #[must_use]
    pub fn is_hard(&self) -> bool {
        self.direction == Direction::Forward
            && self.match_mode == MatchMode::Exact
            && !self.is_optional
            && !self.is_array
    }
}

/// Field definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldDef {
    /// Plain value filled by generation or seeding
    Scalar {
        /// Type hint handed to the generator (`string`, `number`, ...)
        #[serde(default = "default_hint")]
        hint: String,
        /// Optional prompt template with `{placeholder}`s
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prompt: Option<String>,
    },
    /// Reference to other entities
    Relation(Relationship),
}

fn default_hint() -> String {
    "string".to_string()
}

impl FieldDef {
    /// Scalar field with a type hint
    #[inline]
    #[must_use]
    pub fn scalar(hint: impl Into<String>) -> Self {
        Self::Scalar {
            hint: hint.into(),
            prompt: None,
        }
    }

    /// Scalar field with a prompt template
    #[inline]
    #[must_use]
    pub fn prompted(hint: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self::Scalar {
            hint: hint.into(),
            prompt: Some(prompt.into()),
        }
    }

    /// Relationship field
    #[inline]
    #[must_use]
    pub fn relation(relationship: Relationship) -> Self {
        Self::Relation(relationship)
    }

    /// Relationship descriptor, if this is a relationship field
    #[inline]
    #[must_use]
    pub fn as_relation(&self) -> Option<&Relationship> {
        match self {
            Self::Relation(rel) => Some(rel),
            Self::Scalar { .. } => None,
        }
    }
}

/// One declared type
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TypeDef {
    /// Fields in declaration order
    #[serde(default)]
    pub fields: IndexMap<String, FieldDef>,

    /// Verbs callable on instances of this type
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub verbs: Vec<String>,
}

impl TypeDef {
    /// Empty type
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a field
    #[inline]
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, def: FieldDef) -> Self {
        self.fields.insert(name.into(), def);
        self
    }

    /// Declare a verb
    #[inline]
    #[must_use]
    pub fn verb(mut self, verb: impl Into<String>) -> Self {
        self.verbs.push(verb.into());
        self
    }

    /// Relationship fields in declaration order
    pub fn relations(&self) -> impl Iterator<Item = (&str, &Relationship)> + '_ {
        self.fields
            .iter()
            .filter_map(|(name, def)| def.as_relation().map(|rel| (name.as_str(), rel)))
    }

    /// Scalar fields in declaration order
    pub fn scalars(&self) -> impl Iterator<Item = (&str, &FieldDef)> + '_ {
        self.fields
            .iter()
            .filter(|(_, def)| def.as_relation().is_none())
            .map(|(name, def)| (name.as_str(), def))
    }
}

/// Full schema: every declared type in declaration order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    /// Declared types
    pub types: IndexMap<String, TypeDef>,
}

impl Schema {
    /// Empty schema
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a type
    #[inline]
    #[must_use]
    pub fn with_type(mut self, name: impl Into<String>, def: TypeDef) -> Self {
        self.types.insert(name.into(), def);
        self
    }

    /// Look up a type
    #[inline]
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&TypeDef> {
        self.types.get(name)
    }

    /// Whether `name` is declared
    #[inline]
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    /// Type names in declaration order
    pub fn type_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.types.keys().map(String::as_str)
    }

    /// Reject schemas that reference undeclared types
    ///
    /// # Errors
    /// - `SchemaError::Empty` if no type is declared
    /// - `SchemaError::NoTargets` for a relationship without targets
    /// - `SchemaError::UndeclaredType` for a target that is not declared
    /// - `SchemaError::InvalidThreshold` for a threshold outside `[0, 1]`
    pub fn validate(&self) -> Result<(), SchemaError> {
        if self.types.is_empty() {
            return Err(SchemaError::Empty);
        }

        for (type_name, def) in &self.types {
            for (field, rel) in def.relations() {
                if rel.targets.is_empty() {
                    return Err(SchemaError::NoTargets {
                        type_name: type_name.clone(),
                        field: field.to_string(),
                    });
                }
                if let Some(target) = rel.targets.iter().find(|t| !self.contains(t)) {
                    return Err(SchemaError::UndeclaredType {
                        type_name: type_name.clone(),
                        field: field.to_string(),
                        target: target.clone(),
                    });
                }
                if let Some(threshold) = rel.threshold {
                    if !(0.0..=1.0).contains(&threshold) {
                        return Err(SchemaError::InvalidThreshold {
                            type_name: type_name.clone(),
                            field: field.to_string(),
                            threshold,
                        });
                    }
                }
            }
        }

        Ok(())
    }
}
