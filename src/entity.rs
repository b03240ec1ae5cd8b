//! Entity identity tracking
//!
//! An entity is the in-memory projection of one storage row. Its identity is
//! either *transient* (no assigned primary key yet, identified only by its
//! arena token) or *persisted* (identified by entity type + key values).
//!
//! Identity rules:
//! - Two persisted entities are identity-equal iff type and key values match.
//! - A transient entity is identity-equal only to itself (its [`EntityId`]).
//! - The transient token never changes, so edges recorded before promotion
//!   are still recognized afterwards as long as keys are re-derived lazily.

use crate::value::Value;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Arena token identifying one entity instance within a [`crate::Session`].
///
/// Tokens are session-scoped: an `EntityId` from one session must not be
/// used with another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(pub(crate) usize);

impl EntityId {
    pub(crate) fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle of an entity instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lifecycle {
    /// No storage identity assigned yet
    New,
    /// Row exists in storage under the assigned key
    Persisted,
}

/// In-memory projection of one storage row.
#[derive(Debug, Clone)]
pub struct Entity {
    entity_type: String,
    fields: BTreeMap<String, Value>,
    key: Option<Vec<Value>>,
    lifecycle: Lifecycle,
}

impl Entity {
    /// Create a transient entity of the given type
    pub(crate) fn new(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            fields: BTreeMap::new(),
            key: None,
            lifecycle: Lifecycle::New,
        }
    }

    /// Create an entity already persisted under the given key
    pub(crate) fn persisted(entity_type: impl Into<String>, key: Vec<Value>) -> Self {
        Self {
            entity_type: entity_type.into(),
            fields: BTreeMap::new(),
            key: Some(key),
            lifecycle: Lifecycle::Persisted,
        }
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    /// Whether this entity has no assigned storage identity yet
    pub fn is_transient(&self) -> bool {
        self.lifecycle == Lifecycle::New
    }

    /// The assigned primary key values, if persisted
    pub fn key(&self) -> Option<&[Value]> {
        self.key.as_deref()
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn set_field(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(name.into(), value.into());
    }

    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.fields
    }

    /// Transition New -> Persisted with the assigned key. Called exactly once
    /// per logical entity, after the first successful insert.
    pub(crate) fn promote(&mut self, key: Vec<Value>) -> Result<()> {
        if !self.is_transient() {
            return Err(Error::IdentityRequired(format!(
                "entity of type '{}' promoted twice",
                self.entity_type
            )));
        }
        debug_assert!(!key.is_empty());
        self.key = Some(key);
        self.lifecycle = Lifecycle::Persisted;
        Ok(())
    }

    /// Undo a promotion after a failed save, so a retry re-runs the same plan
    pub(crate) fn demote(&mut self) {
        self.key = None;
        self.lifecycle = Lifecycle::New;
    }
}

/// Stable comparison key for identity equality and deduplication.
///
/// Persisted entities compare by value (type + key); transient entities
/// compare by arena token only, so two distinct new instances never
/// conflate even when their fields match.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IdentityKey {
    Persisted { entity_type: String, key: Vec<Value> },
    Transient(EntityId),
}

/// Derive the identity key for the entity at `id` in the arena.
///
/// Free function rather than a `Session` method so callers holding a
/// mutable borrow of another session field can still derive keys.
pub(crate) fn identity_key_of(entities: &[Entity], id: EntityId) -> IdentityKey {
    let entity = &entities[id.index()];
    match entity.key() {
        Some(key) if !entity.is_transient() => IdentityKey::Persisted {
            entity_type: entity.entity_type().to_string(),
            key: key.to_vec(),
        },
        _ => IdentityKey::Transient(id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_identity_is_token_bound() {
        // Two new entities with identical fields must not conflate
        let mut a = Entity::new("user");
        let mut b = Entity::new("user");
        a.set_field("name", "hans");
        b.set_field("name", "hans");

        let entities = vec![a, b];
        let key_a = identity_key_of(&entities, EntityId(0));
        let key_b = identity_key_of(&entities, EntityId(1));
        assert_ne!(key_a, key_b);
        assert_eq!(key_a, identity_key_of(&entities, EntityId(0)));
    }

    #[test]
    fn test_persisted_identity_is_value_bound() {
        let a = Entity::persisted("user", vec![Value::Integer(7)]);
        let b = Entity::persisted("user", vec![Value::Integer(7)]);
        let other_type = Entity::persisted("group", vec![Value::Integer(7)]);

        let entities = vec![a, b, other_type];
        assert_eq!(
            identity_key_of(&entities, EntityId(0)),
            identity_key_of(&entities, EntityId(1))
        );
        assert_ne!(
            identity_key_of(&entities, EntityId(0)),
            identity_key_of(&entities, EntityId(2))
        );
    }

    #[test]
    fn test_promote_once() {
        let mut entity = Entity::new("user");
        assert!(entity.is_transient());
        entity.promote(vec![Value::Integer(1)]).unwrap();
        assert!(!entity.is_transient());
        assert_eq!(entity.key(), Some(&[Value::Integer(1)][..]));
        assert!(entity.promote(vec![Value::Integer(2)]).is_err());
    }

    #[test]
    fn test_demote_restores_transient_state() {
        let mut entity = Entity::new("user");
        entity.promote(vec![Value::Integer(1)]).unwrap();
        entity.demote();
        assert!(entity.is_transient());
        assert_eq!(entity.key(), None);
        // Promotion is legal again after demotion
        entity.promote(vec![Value::Integer(3)]).unwrap();
    }
}
