//! Persistence orchestrator - the save state machine
//!
//! One save invocation sequences, per entity:
//!
//! 1. persist every transient entity referenced by the working edge sets
//!    (recursively, cascading through their own collections)
//! 2. persist the entity itself if transient, assigning its identity
//! 3. diff committed against working, now that every slot has an identity
//! 4. apply all deletes, then all inserts, on the join table
//! 5. after the transaction commits, promote working into committed
//!
//! The storage transaction wraps the entire outermost save, so a failing
//! edge operation rolls back entity inserts as well. On failure the
//! in-memory state is restored too: committed/working are untouched by
//! construction, and entities promoted during the failed save are demoted,
//! so a retry re-runs the same plan.
//!
//! Cycles are tolerated: re-entering an entity whose save is in progress is
//! skipped, and edge application for relations that still reference a
//! transient entity is deferred until the entity that initiated the save has
//! its identity. Bidirectional relations share one join table; rows already
//! written in this save are recognized by signature and not written twice.
//!
//! Re-entrant saves are impossible by construction: `save` holds `&mut self`
//! for its whole duration.

use crate::diff::diff;
use crate::edge::{Edge, PayloadValue, edge_key_of};
use crate::entity::EntityId;
use crate::schema::RelationDef;
use crate::session::Session;
use crate::storage::StorageAdapter;
use crate::value::Value;
use crate::{Error, Result};
use std::collections::HashSet;

/// Bookkeeping for one outermost save invocation
#[derive(Debug, Default)]
struct SavePlan {
    /// Entities whose save frame is on the stack (cycle detection)
    in_progress: HashSet<EntityId>,
    /// Entities whose save frame already ran in this invocation
    completed: HashSet<EntityId>,
    /// Entities promoted during this save, in promotion order
    promoted: Vec<EntityId>,
    /// Collections whose operations were applied; promoted on commit
    applied: Vec<(EntityId, String)>,
    /// Relations deferred because an insert still had a transient slot
    deferred: Vec<(EntityId, String)>,
    /// Join rows already written in this save (shared-table dedup)
    inserted_rows: HashSet<(String, Vec<(String, Value)>)>,
    deleted_rows: HashSet<(String, Vec<(String, Value)>)>,
}

/// Canonical signature of one join row, independent of column order
fn row_signature(table: &str, columns: &[(String, Value)]) -> (String, Vec<(String, Value)>) {
    let mut sorted = columns.to_vec();
    sorted.sort();
    (table.to_string(), sorted)
}

impl<S: StorageAdapter> Session<S> {
    /// Persist `owner` and its touched relation collections.
    ///
    /// All storage writes happen inside one transaction. On success the
    /// collections' committed sets are promoted; on failure everything is
    /// rolled back, in storage and in memory, and the error is returned
    /// unchanged.
    pub fn save(&mut self, owner: EntityId) -> Result<()> {
        self.entity(owner)?;
        self.store.begin()?;
        let mut plan = SavePlan::default();

        match self.save_graph(owner, &mut plan) {
            Ok(()) => match self.store.commit() {
                Ok(()) => {
                    for (id, relation) in &plan.applied {
                        if let Some(col) = self.collections.get_mut(&(*id, relation.clone())) {
                            col.promote();
                        }
                    }
                    Ok(())
                }
                Err(e) => {
                    self.abort_save(plan);
                    Err(e)
                }
            },
            Err(e) => {
                let _ = self.store.rollback();
                self.abort_save(plan);
                Err(e)
            }
        }
    }

    /// Undo in-memory promotions after a failed save
    fn abort_save(&mut self, plan: SavePlan) {
        for id in plan.promoted.iter().rev() {
            let _ = self.demote_entity(*id);
        }
    }

    fn save_graph(&mut self, owner: EntityId, plan: &mut SavePlan) -> Result<()> {
        self.save_entity(owner, plan)?;

        // Relations deferred mid-cycle: every entity now has its identity,
        // so a remaining transient slot is an ordering bug.
        let deferred = std::mem::take(&mut plan.deferred);
        for (id, relation) in deferred {
            let entity_type = self.entity(id)?.entity_type().to_string();
            let rel = self.registry.relation(&entity_type, &relation)?.clone();
            self.apply_relation(id, &rel, plan, false)?;
        }
        Ok(())
    }

    /// One save frame: endpoints, then the entity itself, then its edges
    fn save_entity(&mut self, id: EntityId, plan: &mut SavePlan) -> Result<()> {
        if plan.completed.contains(&id) {
            return Ok(());
        }
        if plan.in_progress.contains(&id) {
            tracing::debug!(entity = %id, "cyclic save detected, deferring to outer save");
            return Ok(());
        }
        plan.in_progress.insert(id);

        let entity_type = self.entity(id)?.entity_type().to_string();
        let touched = self.touched_relations(id, &entity_type);

        // 1. cascade into every entity referenced by working edges. This
        // persists transient endpoints and applies the mirror side of
        // bidirectional relations so both committed sets stay synchronized.
        for relation in &touched {
            let endpoints: Vec<EntityId> = self.collections[&(id, relation.clone())]
                .working()
                .iter()
                .flat_map(Edge::entity_slots)
                .filter(|slot| *slot != id)
                .collect();
            for endpoint in endpoints {
                self.save_entity(endpoint, plan)?;
            }
        }

        // 2. persist the entity itself
        if self.entity(id)?.is_transient() {
            let def = self.registry.entity(&entity_type)?.clone();
            let fields = self.entity(id)?.fields().clone();
            let key = self.store.persist_entity(&def, &fields)?;
            tracing::debug!(entity = %id, entity_type = %entity_type, "persisted entity");
            self.promote_entity(id, key)?;
            plan.promoted.push(id);
        }

        // 3 + 4. diff and apply every touched relation
        for relation in &touched {
            let rel = self.registry.relation(&entity_type, relation)?.clone();
            self.apply_relation(id, &rel, plan, true)?;
        }

        plan.in_progress.remove(&id);
        plan.completed.insert(id);
        Ok(())
    }

    /// Relation names of `entity_type` with a collection for this entity
    fn touched_relations(&self, id: EntityId, entity_type: &str) -> Vec<String> {
        self.registry
            .relations_of(entity_type)
            .filter(|r| self.collections.contains_key(&(id, r.name.clone())))
            .map(|r| r.name.clone())
            .collect()
    }

    /// Diff one collection and execute the resulting operations, or defer
    /// when an insert still references a transient entity mid-cycle.
    fn apply_relation(
        &mut self,
        id: EntityId,
        rel: &RelationDef,
        plan: &mut SavePlan,
        allow_defer: bool,
    ) -> Result<()> {
        let ops = {
            let col = &self.collections[&(id, rel.name.clone())];
            diff(col.committed(), col.working(), |e| {
                edge_key_of(&self.entities, e)
            })
        };

        let pending_identity = ops
            .to_insert
            .iter()
            .any(|e| edge_key_of(&self.entities, e).has_transient_slot());
        if pending_identity {
            if allow_defer {
                tracing::debug!(
                    entity = %id,
                    relation = %rel.name,
                    "edge application deferred until identities are assigned"
                );
                plan.deferred.push((id, rel.name.clone()));
                return Ok(());
            }
            debug_assert!(false, "transient slot survived endpoint persistence");
            return Err(Error::IdentityRequired(format!(
                "relation '{}' of entity {} still references a transient entity",
                rel.name, id
            )));
        }

        if !ops.is_empty() {
            tracing::debug!(
                entity = %id,
                relation = %rel.name,
                deletes = ops.to_delete.len(),
                inserts = ops.to_insert.len(),
                "applying edge operations"
            );
        }
        for edge in &ops.to_delete {
            let columns = self.edge_columns(rel, edge)?;
            if plan.deleted_rows.insert(row_signature(&rel.join_table, &columns)) {
                self.store.delete_edge_row(&rel.join_table, &columns)?;
            }
        }
        for edge in &ops.to_insert {
            let columns = self.edge_columns(rel, edge)?;
            if plan.inserted_rows.insert(row_signature(&rel.join_table, &columns)) {
                self.store.insert_edge_row(&rel.join_table, &columns)?;
            }
        }
        plan.applied.push((id, rel.name.clone()));
        Ok(())
    }

    /// Map an edge onto its join-table columns. Every slot must be persisted.
    fn edge_columns(&self, rel: &RelationDef, edge: &Edge) -> Result<Vec<(String, Value)>> {
        let mut columns = Vec::new();
        let require_key = |id: EntityId| -> Result<&[Value]> {
            self.entity(id)?.key().ok_or_else(|| {
                Error::IdentityRequired(format!(
                    "entity {} has no assigned key in relation '{}'",
                    id, rel.name
                ))
            })
        };

        for (column, value) in rel.owner_columns.iter().zip(require_key(edge.owner)?) {
            columns.push((column.clone(), value.clone()));
        }
        for (column, value) in rel.related_columns.iter().zip(require_key(edge.related)?) {
            columns.push((column.clone(), value.clone()));
        }
        for (slot, value) in rel.payload.iter().zip(&edge.payload) {
            match value {
                PayloadValue::Scalar(v) => columns.push((slot.column.clone(), v.clone())),
                PayloadValue::Entity(id) => {
                    let key = require_key(*id)?;
                    columns.push((slot.column.clone(), key[0].clone()));
                }
            }
        }
        Ok(columns)
    }
}
