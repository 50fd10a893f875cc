//! Verb dispatch tables
//!
//! Each type's declared verbs are enumerated once into a [`VerbTable`].
//! Invoking a verb records a relationship in the generation context and the
//! entity store.

use crate::error::CascadeError;
use crate::store::EntityStore;
use cascade_context::{Entity, GenerationContext};
use cascade_graph::Schema;
use indexmap::{IndexMap, IndexSet};

/// Verbs callable on one type
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerbTable {
    type_name: String,
    verbs: IndexSet<String>,
}

impl VerbTable {
    /// Table for one type's declared verbs
    #[must_use]
    pub fn new<I, S>(type_name: impl Into<String>, verbs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            type_name: type_name.into(),
            verbs: verbs.into_iter().map(Into::into).collect(),
        }
    }

    /// Tables for every type in `schema`
    #[must_use]
    pub fn for_schema(schema: &Schema) -> IndexMap<String, VerbTable> {
        schema
            .types
            .iter()
            .map(|(name, def)| (name.clone(), Self::new(name.clone(), def.verbs.iter().cloned())))
            .collect()
    }

    /// Owning type
    #[inline]
    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Whether `verb` is callable
    #[inline]
    #[must_use]
    pub fn contains(&self, verb: &str) -> bool {
        self.verbs.contains(verb)
    }

    /// Verbs in declaration order
    pub fn verbs(&self) -> impl Iterator<Item = &str> + '_ {
        self.verbs.iter().map(String::as_str)
    }

    /// `subject --verb--> object`
    ///
    /// # Errors
    /// - `UnknownVerb` if `verb` is not declared or `subject` is another type
    /// - `Store` if the store rejects the relation
    pub async fn invoke(
        &self,
        verb: &str,
        subject: &Entity,
        object: &Entity,
        context: &mut GenerationContext,
        store: &dyn EntityStore,
    ) -> Result<(), CascadeError> {
        if !self.contains(verb) || subject.type_name != self.type_name {
            return Err(CascadeError::UnknownVerb {
                type_name: subject.type_name.clone(),
                verb: verb.to_string(),
            });
        }
        store
            .relate(&subject.type_name, &subject.id, verb, &object.id)
            .await
            .map_err(|err| CascadeError::store("relate", &err))?;
        context.add_relationship(&subject.id, &object.id, verb);
        tracing::debug!("{} {} {} {}", subject.id, verb, object.type_name, object.id);
        Ok(())
    }
}
