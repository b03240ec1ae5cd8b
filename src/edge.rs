//! Edge model - one row of a many-to-many join table
//!
//! An edge is an ordered tuple `(owner, related, payload...)`. Every slot
//! participates in equality; comparison goes through identity keys, so a
//! persisted entity re-fetched as a different in-memory instance still
//! matches, while distinct transient instances never do.

use crate::entity::{Entity, EntityId, IdentityKey, identity_key_of};
use crate::value::Value;

/// One payload slot value: a scalar column, or a reference to another entity
/// whose key fills the column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadValue {
    Scalar(Value),
    Entity(EntityId),
}

impl From<Value> for PayloadValue {
    fn from(v: Value) -> Self {
        PayloadValue::Scalar(v)
    }
}

impl From<EntityId> for PayloadValue {
    fn from(id: EntityId) -> Self {
        PayloadValue::Entity(id)
    }
}

/// One row of a join table, held in memory as arena references.
///
/// Derived `PartialEq` compares raw arena tokens; reconciliation always
/// compares through [`EdgeKey`] instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub owner: EntityId,
    pub related: EntityId,
    pub payload: Vec<PayloadValue>,
}

impl Edge {
    pub fn new(owner: EntityId, related: EntityId, payload: Vec<PayloadValue>) -> Self {
        Self {
            owner,
            related,
            payload,
        }
    }

    /// All entity slots of this edge: owner, related, and entity payloads
    pub fn entity_slots(&self) -> impl Iterator<Item = EntityId> + '_ {
        [self.owner, self.related]
            .into_iter()
            .chain(self.payload.iter().filter_map(|p| match p {
                PayloadValue::Entity(id) => Some(*id),
                PayloadValue::Scalar(_) => None,
            }))
    }
}

/// Identity key of one payload slot
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PayloadKey {
    Scalar(Value),
    Entity(IdentityKey),
}

/// Identity-based comparison key for an edge.
///
/// Derived lazily at comparison time and never cached, so a promotion that
/// re-keys an entity is picked up by the next diff.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EdgeKey {
    pub owner: IdentityKey,
    pub related: IdentityKey,
    pub payload: Vec<PayloadKey>,
}

impl EdgeKey {
    /// Whether any slot still lacks a storage identity
    pub fn has_transient_slot(&self) -> bool {
        let transient = |k: &IdentityKey| matches!(k, IdentityKey::Transient(_));
        transient(&self.owner)
            || transient(&self.related)
            || self.payload.iter().any(|p| match p {
                PayloadKey::Entity(k) => transient(k),
                PayloadKey::Scalar(_) => false,
            })
    }
}

/// Derive the comparison key for `edge` against the entity arena.
pub(crate) fn edge_key_of(entities: &[Entity], edge: &Edge) -> EdgeKey {
    EdgeKey {
        owner: identity_key_of(entities, edge.owner),
        related: identity_key_of(entities, edge.related),
        payload: edge
            .payload
            .iter()
            .map(|p| match p {
                PayloadValue::Scalar(v) => PayloadKey::Scalar(v.clone()),
                PayloadValue::Entity(id) => PayloadKey::Entity(identity_key_of(entities, *id)),
            })
            .collect(),
    }
}
