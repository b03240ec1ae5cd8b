//! Session - unit-of-work arena and collection mutation API
//!
//! A session owns everything one unit of work touches: the entity arena, a
//! scoped identity map deduplicating persisted entities by (type, key), the
//! relation collections, the schema registry, and the storage adapter.
//!
//! The mutation API (`add` / `remove` / `set` / `get`) is purely in-memory
//! apart from the lazy committed-set load on first access to a persisted
//! owner's collection. Bidirectional relations are kept consistent here:
//! adding `(a, b)` to `a`'s collection also records the inverse edge on
//! `b`'s partner collection.

use crate::collection::RelationCollection;
use crate::edge::{Edge, EdgeKey, PayloadValue, edge_key_of};
use crate::entity::{Entity, EntityId, IdentityKey, identity_key_of};
use crate::schema::{PayloadKind, RelationDef, SchemaRegistry};
use crate::storage::StorageAdapter;
use crate::value::Value;
use crate::{Error, Result};
use std::collections::HashMap;

/// Unit of work over one storage adapter.
pub struct Session<S: StorageAdapter> {
    pub(crate) registry: SchemaRegistry,
    pub(crate) store: S,
    pub(crate) entities: Vec<Entity>,
    /// Scoped identity map: (entity type, key values) -> arena token
    pub(crate) identity_map: HashMap<(String, Vec<Value>), EntityId>,
    /// One collection per touched (owner, relation name) pair
    pub(crate) collections: HashMap<(EntityId, String), RelationCollection>,
}

impl<S: StorageAdapter> Session<S> {
    pub fn new(registry: SchemaRegistry, store: S) -> Self {
        Self {
            registry,
            store,
            entities: Vec::new(),
            identity_map: HashMap::new(),
            collections: HashMap::new(),
        }
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    // ========== Entity arena ==========

    /// Create a transient entity of the given declared type
    pub fn create(&mut self, entity_type: &str) -> Result<EntityId> {
        self.registry.entity(entity_type)?;
        let id = EntityId(self.entities.len());
        self.entities.push(Entity::new(entity_type));
        Ok(id)
    }

    /// Attach an entity known to be persisted under `key`. Repeated attaches
    /// of the same (type, key) return the same arena token.
    pub fn attach_persisted(&mut self, entity_type: &str, key: Vec<Value>) -> Result<EntityId> {
        let def = self.registry.entity(entity_type)?;
        if key.len() != def.key_columns.len() {
            return Err(Error::TypeMismatch(format!(
                "entity '{}' expects {} key value(s), got {}",
                entity_type,
                def.key_columns.len(),
                key.len()
            )));
        }
        let map_key = (entity_type.to_string(), key.clone());
        if let Some(id) = self.identity_map.get(&map_key) {
            return Ok(*id);
        }
        let id = EntityId(self.entities.len());
        self.entities.push(Entity::persisted(entity_type, key));
        self.identity_map.insert(map_key, id);
        Ok(id)
    }

    pub fn entity(&self, id: EntityId) -> Result<&Entity> {
        self.entities
            .get(id.index())
            .ok_or_else(|| Error::UnknownEntity(id.to_string()))
    }

    pub fn entity_mut(&mut self, id: EntityId) -> Result<&mut Entity> {
        self.entities
            .get_mut(id.index())
            .ok_or_else(|| Error::UnknownEntity(id.to_string()))
    }

    pub fn set_field(
        &mut self,
        id: EntityId,
        name: impl Into<String>,
        value: impl Into<Value>,
    ) -> Result<()> {
        self.entity_mut(id)?.set_field(name, value);
        Ok(())
    }

    pub fn is_transient(&self, id: EntityId) -> Result<bool> {
        Ok(self.entity(id)?.is_transient())
    }

    pub fn identity_key(&self, id: EntityId) -> Result<IdentityKey> {
        self.entity(id)?;
        Ok(identity_key_of(&self.entities, id))
    }

    /// Derive the identity-based comparison key for an edge
    pub fn edge_key(&self, edge: &Edge) -> EdgeKey {
        edge_key_of(&self.entities, edge)
    }

    /// Assign a storage identity and register it in the identity map
    pub(crate) fn promote_entity(&mut self, id: EntityId, key: Vec<Value>) -> Result<()> {
        let entity = self.entity_mut(id)?;
        entity.promote(key.clone())?;
        let entity_type = entity.entity_type().to_string();
        self.identity_map.entry((entity_type, key)).or_insert(id);
        Ok(())
    }

    /// Undo a promotion after a failed save
    pub(crate) fn demote_entity(&mut self, id: EntityId) -> Result<()> {
        let entity = self.entity(id)?;
        if let Some(key) = entity.key() {
            let map_key = (entity.entity_type().to_string(), key.to_vec());
            self.identity_map.remove(&map_key);
        }
        self.entity_mut(id)?.demote();
        Ok(())
    }

    // ========== Collection mutation API ==========

    /// Add an edge `(owner, related, payload...)` to the owner's collection
    /// for `relation`. A no-op if an identity-equal edge is already present.
    /// Maintains the inverse edge on the partner relation, in memory only.
    pub fn add(
        &mut self,
        owner: EntityId,
        relation: &str,
        related: EntityId,
        payload: Vec<PayloadValue>,
    ) -> Result<()> {
        let rel = self.relation_for(owner, relation)?;
        self.check_edge(&rel, related, &payload)?;
        self.ensure_loaded(owner, &rel)?;

        if !self.insert_working(owner, &rel, related, payload.clone()) {
            return Ok(()); // set semantics: re-add is a no-op, inverse included
        }
        if rel.inverse.is_some() {
            let partner = self.partner_of(&rel)?;
            self.ensure_loaded(related, &partner)?;
            self.insert_working(related, &partner, owner, payload);
        }
        Ok(())
    }

    /// Remove the identity-equal edge from the owner's working set, if
    /// present. Symmetrically removes the inverse edge from the partner side.
    pub fn remove(
        &mut self,
        owner: EntityId,
        relation: &str,
        related: EntityId,
        payload: Vec<PayloadValue>,
    ) -> Result<()> {
        let rel = self.relation_for(owner, relation)?;
        self.check_edge(&rel, related, &payload)?;
        self.ensure_loaded(owner, &rel)?;

        if !self.remove_working(owner, &rel, related, &payload) {
            return Ok(());
        }
        if rel.inverse.is_some() {
            let partner = self.partner_of(&rel)?;
            self.ensure_loaded(related, &partner)?;
            self.remove_working(related, &partner, owner, &payload);
        }
        Ok(())
    }

    /// Replace the owner's working set wholesale: clear, then add each entry
    /// in caller order with the usual deduplication. Inverse edges of
    /// dropped entries are removed from their partner collections.
    pub fn set(
        &mut self,
        owner: EntityId,
        relation: &str,
        entries: Vec<(EntityId, Vec<PayloadValue>)>,
    ) -> Result<()> {
        let rel = self.relation_for(owner, relation)?;
        // Validate everything up front so a bad entry mutates nothing
        for (related, payload) in &entries {
            self.check_edge(&rel, *related, payload)?;
        }
        self.ensure_loaded(owner, &rel)?;

        let current = match self.collections.get_mut(&(owner, rel.name.clone())) {
            Some(col) => col.clear_working(),
            None => Vec::new(),
        };
        if rel.inverse.is_some() {
            let partner = self.partner_of(&rel)?;
            for edge in &current {
                self.ensure_loaded(edge.related, &partner)?;
                self.remove_working(edge.related, &partner, owner, &edge.payload);
            }
        }

        for (related, payload) in entries {
            self.add(owner, relation, related, payload)?;
        }
        Ok(())
    }

    /// Snapshot of the owner's current working set, as (related entity,
    /// payload) pairs in first-insertion order.
    pub fn get(
        &mut self,
        owner: EntityId,
        relation: &str,
    ) -> Result<Vec<(EntityId, Vec<PayloadValue>)>> {
        let rel = self.relation_for(owner, relation)?;
        self.ensure_loaded(owner, &rel)?;
        let col = &self.collections[&(owner, rel.name.clone())];
        Ok(col
            .working()
            .iter()
            .map(|e| (e.related, e.payload.clone()))
            .collect())
    }

    // ========== Internals ==========

    /// Resolve a relation name against the owner's entity type
    fn relation_for(&self, owner: EntityId, relation: &str) -> Result<RelationDef> {
        let owner_type = self.entity(owner)?.entity_type().to_string();
        self.registry.relation(&owner_type, relation).cloned()
    }

    fn partner_of(&self, rel: &RelationDef) -> Result<RelationDef> {
        let name = rel
            .inverse
            .as_deref()
            .ok_or_else(|| Error::UnknownRelation(format!("{} has no inverse", rel.name)))?;
        self.registry.relation(&rel.related_entity, name).cloned()
    }

    /// Type-check an edge before it touches any state
    fn check_edge(
        &self,
        rel: &RelationDef,
        related: EntityId,
        payload: &[PayloadValue],
    ) -> Result<()> {
        let related_entity = self.entity(related)?;
        if related_entity.entity_type() != rel.related_entity {
            return Err(Error::TypeMismatch(format!(
                "relation '{}' expects related type '{}', got '{}'",
                rel.name,
                rel.related_entity,
                related_entity.entity_type()
            )));
        }
        if payload.len() != rel.payload.len() {
            return Err(Error::TypeMismatch(format!(
                "relation '{}' expects {} payload value(s), got {}",
                rel.name,
                rel.payload.len(),
                payload.len()
            )));
        }
        for (slot, value) in rel.payload.iter().zip(payload) {
            match (&slot.kind, value) {
                (PayloadKind::Scalar, PayloadValue::Scalar(v)) => {
                    if v.is_null() {
                        return Err(Error::TypeMismatch(format!(
                            "payload '{}' of relation '{}' is null",
                            slot.name, rel.name
                        )));
                    }
                }
                (PayloadKind::Entity(expected), PayloadValue::Entity(id)) => {
                    let entity = self.entity(*id)?;
                    if entity.entity_type() != expected {
                        return Err(Error::TypeMismatch(format!(
                            "payload '{}' of relation '{}' expects type '{}', got '{}'",
                            slot.name,
                            rel.name,
                            expected,
                            entity.entity_type()
                        )));
                    }
                }
                (PayloadKind::Scalar, PayloadValue::Entity(_)) => {
                    return Err(Error::TypeMismatch(format!(
                        "payload '{}' of relation '{}' expects a scalar",
                        slot.name, rel.name
                    )));
                }
                (PayloadKind::Entity(expected), PayloadValue::Scalar(_)) => {
                    return Err(Error::TypeMismatch(format!(
                        "payload '{}' of relation '{}' expects a '{}' entity",
                        slot.name, rel.name, expected
                    )));
                }
            }
        }
        Ok(())
    }

    /// Make sure the (owner, relation) collection exists, lazily loading the
    /// committed set from storage when the owner is already persisted.
    fn ensure_loaded(&mut self, owner: EntityId, rel: &RelationDef) -> Result<()> {
        let map_key = (owner, rel.name.clone());
        if self.collections.contains_key(&map_key) {
            return Ok(());
        }
        let owner_entity = self.entity(owner)?;
        let owner_key = if owner_entity.is_transient() {
            None
        } else {
            owner_entity.key().map(<[Value]>::to_vec)
        };

        let collection = match owner_key {
            None => RelationCollection::new_empty(),
            Some(key) => {
                let rows = self.store.load_edges(rel, &key)?;
                tracing::debug!(
                    relation = %rel.name,
                    owner = %owner,
                    rows = rows.len(),
                    "loaded committed edge set"
                );
                let mut edges = Vec::with_capacity(rows.len());
                for row in rows {
                    let related = self.attach_persisted(&rel.related_entity, row.related_key)?;
                    let mut payload = Vec::with_capacity(rel.payload.len());
                    for (slot, value) in rel.payload.iter().zip(row.payload) {
                        match &slot.kind {
                            PayloadKind::Scalar => payload.push(PayloadValue::Scalar(value)),
                            PayloadKind::Entity(target) => {
                                let target = target.clone();
                                payload.push(PayloadValue::Entity(
                                    self.attach_persisted(&target, vec![value])?,
                                ));
                            }
                        }
                    }
                    edges.push(Edge::new(owner, related, payload));
                }
                RelationCollection::new_loaded(edges)
            }
        };
        self.collections.insert(map_key, collection);
        Ok(())
    }

    /// Append an edge to a collection's working set unless an identity-equal
    /// edge is already there. Returns whether an insertion happened.
    fn insert_working(
        &mut self,
        col_owner: EntityId,
        rel: &RelationDef,
        related: EntityId,
        payload: Vec<PayloadValue>,
    ) -> bool {
        let edge = Edge::new(col_owner, related, payload);
        let key = edge_key_of(&self.entities, &edge);
        let Some(col) = self.collections.get_mut(&(col_owner, rel.name.clone())) else {
            return false;
        };
        let present = col
            .working()
            .iter()
            .any(|e| edge_key_of(&self.entities, e) == key);
        if present {
            return false;
        }
        col.push_working(edge);
        true
    }

    /// Remove the identity-equal edge from a collection's working set.
    /// Returns whether a removal happened.
    fn remove_working(
        &mut self,
        col_owner: EntityId,
        rel: &RelationDef,
        related: EntityId,
        payload: &[PayloadValue],
    ) -> bool {
        let probe = Edge::new(col_owner, related, payload.to_vec());
        let key = edge_key_of(&self.entities, &probe);
        let Some(col) = self.collections.get_mut(&(col_owner, rel.name.clone())) else {
            return false;
        };
        let index = col
            .working()
            .iter()
            .position(|e| edge_key_of(&self.entities, e) == key);
        match index {
            Some(i) => {
                col.remove_working_at(i);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{EntityDef, PayloadDef};
    use crate::storage::SqliteStore;

    fn registry() -> SchemaRegistry {
        SchemaRegistry::builder()
            .entity(EntityDef::new("user", "users").with_field("name"))
            .entity(EntityDef::new("group", "groups").with_field("name"))
            .relation(
                RelationDef::new("friends", "user", "user", "user_friend")
                    .with_owner_columns(&["user_id"])
                    .with_related_columns(&["friend_id"])
                    .with_inverse("whos"),
            )
            .relation(
                RelationDef::new("whos", "user", "user", "user_friend")
                    .with_owner_columns(&["friend_id"])
                    .with_related_columns(&["user_id"])
                    .with_inverse("friends"),
            )
            .relation(
                RelationDef::new("groups", "user", "group", "user_group")
                    .with_owner_columns(&["user_id"])
                    .with_related_columns(&["group_id"])
                    .with_payload(PayloadDef::scalar("role", "role")),
            )
            .build()
            .unwrap()
    }

    fn session() -> Session<SqliteStore> {
        let store = SqliteStore::open_in_memory().unwrap();
        store.initialize_schema(&registry()).unwrap();
        Session::new(registry(), store)
    }

    fn role(r: &str) -> Vec<PayloadValue> {
        vec![PayloadValue::Scalar(Value::from(r))]
    }

    #[test]
    fn test_idempotent_add() {
        let mut s = session();
        let hans = s.create("user").unwrap();
        let friend = s.create("user").unwrap();

        s.add(hans, "friends", friend, vec![]).unwrap();
        s.add(hans, "friends", friend, vec![]).unwrap();
        assert_eq!(s.get(hans, "friends").unwrap().len(), 1);
        assert_eq!(s.get(friend, "whos").unwrap().len(), 1);
    }

    #[test]
    fn test_add_remove_cancellation() {
        let mut s = session();
        let hans = s.create("user").unwrap();
        let f1 = s.create("user").unwrap();
        let f2 = s.create("user").unwrap();

        s.add(hans, "friends", f1, vec![]).unwrap();
        let before: Vec<_> = s.get(hans, "friends").unwrap();

        s.add(hans, "friends", f2, vec![]).unwrap();
        s.remove(hans, "friends", f2, vec![]).unwrap();
        assert_eq!(s.get(hans, "friends").unwrap(), before);
        assert!(s.get(f2, "whos").unwrap().is_empty());
    }

    #[test]
    fn test_remove_absent_is_noop() {
        let mut s = session();
        let hans = s.create("user").unwrap();
        let f1 = s.create("user").unwrap();
        s.remove(hans, "friends", f1, vec![]).unwrap();
        assert!(s.get(hans, "friends").unwrap().is_empty());
    }

    #[test]
    fn test_bidirectional_consistency() {
        let mut s = session();
        let hans = s.create("user").unwrap();
        let friend = s.create("user").unwrap();

        s.add(hans, "friends", friend, vec![]).unwrap();
        let whos = s.get(friend, "whos").unwrap();
        assert_eq!(whos, vec![(hans, vec![])]);

        s.remove(hans, "friends", friend, vec![]).unwrap();
        assert!(s.get(friend, "whos").unwrap().is_empty());
    }

    #[test]
    fn test_type_mismatch_rejected_without_mutation() {
        let mut s = session();
        let hans = s.create("user").unwrap();
        let admins = s.create("group").unwrap();

        let err = s.add(hans, "friends", admins, vec![]);
        assert!(matches!(err, Err(Error::TypeMismatch(_))));
        assert!(s.get(hans, "friends").unwrap().is_empty());
    }

    #[test]
    fn test_payload_arity_checked() {
        let mut s = session();
        let hans = s.create("user").unwrap();
        let admins = s.create("group").unwrap();

        assert!(matches!(
            s.add(hans, "groups", admins, vec![]),
            Err(Error::TypeMismatch(_))
        ));
        assert!(matches!(
            s.add(hans, "friends", hans, role("lead")),
            Err(Error::TypeMismatch(_))
        ));
    }

    #[test]
    fn test_composite_payload_distinct_edges() {
        let mut s = session();
        let hans = s.create("user").unwrap();
        let admins = s.create("group").unwrap();

        s.add(hans, "groups", admins, role("teamLeader")).unwrap();
        s.add(hans, "groups", admins, role("lead")).unwrap();
        assert_eq!(s.get(hans, "groups").unwrap().len(), 2);

        s.remove(hans, "groups", admins, role("teamLeader")).unwrap();
        let remaining = s.get(hans, "groups").unwrap();
        assert_eq!(remaining, vec![(admins, role("lead"))]);
    }

    #[test]
    fn test_set_collapses_duplicates() {
        let mut s = session();
        let hans = s.create("user").unwrap();
        let f1 = s.create("user").unwrap();
        let f2 = s.create("user").unwrap();

        s.set(
            hans,
            "friends",
            vec![(f1, vec![]), (f2, vec![]), (f1, vec![])],
        )
        .unwrap();
        assert_eq!(s.get(hans, "friends").unwrap(), vec![(f1, vec![]), (f2, vec![])]);
    }

    #[test]
    fn test_set_replaces_and_fixes_inverses() {
        let mut s = session();
        let hans = s.create("user").unwrap();
        let f1 = s.create("user").unwrap();
        let f2 = s.create("user").unwrap();
        let f3 = s.create("user").unwrap();

        s.add(hans, "friends", f1, vec![]).unwrap();
        s.add(hans, "friends", f2, vec![]).unwrap();
        s.set(hans, "friends", vec![(f2, vec![]), (f3, vec![])])
            .unwrap();

        assert_eq!(s.get(hans, "friends").unwrap(), vec![(f2, vec![]), (f3, vec![])]);
        assert!(s.get(f1, "whos").unwrap().is_empty());
        assert_eq!(s.get(f2, "whos").unwrap(), vec![(hans, vec![])]);
        assert_eq!(s.get(f3, "whos").unwrap(), vec![(hans, vec![])]);
    }

    #[test]
    fn test_lazy_load_from_storage() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        store.initialize_schema(&registry()).unwrap();
        for (group, role) in [(7, "lead"), (9, "member")] {
            store
                .insert_edge_row(
                    "user_group",
                    &[
                        ("user_id".to_string(), Value::Integer(1)),
                        ("group_id".to_string(), Value::Integer(group)),
                        ("role".to_string(), Value::from(role)),
                    ],
                )
                .unwrap();
        }

        let mut s = Session::new(registry(), store);
        let hans = s.attach_persisted("user", vec![Value::Integer(1)]).unwrap();
        let groups = s.get(hans, "groups").unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].1, role("lead"));
        assert_eq!(groups[1].1, role("member"));
    }

    #[test]
    fn test_identity_map_deduplicates_refetch() {
        let mut s = session();
        let a = s.attach_persisted("user", vec![Value::Integer(5)]).unwrap();
        let b = s.attach_persisted("user", vec![Value::Integer(5)]).unwrap();
        assert_eq!(a, b);

        let c = s.attach_persisted("user", vec![Value::Integer(6)]).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn test_transient_owner_skips_storage() {
        // No tables exist, so any storage access would fail
        let store = SqliteStore::open_in_memory().unwrap();
        let mut s = Session::new(registry(), store);
        let hans = s.create("user").unwrap();
        let friend = s.create("user").unwrap();
        s.add(hans, "friends", friend, vec![]).unwrap();
        assert_eq!(s.get(hans, "friends").unwrap().len(), 1);
    }
}
