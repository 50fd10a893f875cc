//! Entity record
//!
//! Opaque to the scheduler beyond `$id` and `$type`; everything else is an
//! insertion-ordered map of field values.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Generated or seeded record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Unique id
    #[serde(rename = "$id")]
    pub id: String,

    /// Declared type name
    #[serde(rename = "$type")]
    pub type_name: String,

    /// Field values in insertion order
    #[serde(flatten)]
    pub fields: IndexMap<String, Value>,
}

impl Entity {
    /// New entity with a fresh v4 id
    #[inline]
    #[must_use]
    pub fn new(type_name: impl Into<String>) -> Self {
        Self::with_id(type_name, uuid::Uuid::new_v4().to_string())
    }

    /// New entity with a caller-chosen id
    #[inline]
    #[must_use]
    pub fn with_id(type_name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            type_name: type_name.into(),
            fields: IndexMap::new(),
        }
    }

    /// Builder-style field assignment
    #[inline]
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Set a field
    #[inline]
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(name.into(), value.into());
    }

    /// Read a field
    #[inline]
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Whether a field holds a non-null value
    #[inline]
    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.fields.get(name).is_some_and(|v| !v.is_null())
    }

    /// Token estimate for this entity, see [`estimate_entity_tokens`]
    #[inline]
    #[must_use]
    pub fn estimate_tokens(&self) -> usize {
        estimate_entity_tokens(self)
    }
}

/// Keys the serialized form uses for identity; never valid field names
pub const RESERVED_KEYS: [&str; 2] = ["$id", "$type"];

/// Whether `name` collides with [`RESERVED_KEYS`]
#[inline]
#[must_use]
pub fn is_reserved_key(name: &str) -> bool {
    RESERVED_KEYS.contains(&name)
}

/// Size heuristic: one token per four bytes of compact JSON, rounded up
///
/// Not tied to any tokenizer; only relative magnitudes matter.
#[must_use]
pub fn estimate_entity_tokens(entity: &Entity) -> usize {
    let len = serde_json::to_string(entity).map_or(0, |s| s.len());
    len.div_ceil(4)
}
