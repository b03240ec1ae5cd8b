//! Storage Layer - SQLite-backed persistence
//!
//! The reconciliation engine talks to storage through [`StorageAdapter`]:
//! - `persist_entity`: insert one new entity row, returning its assigned key
//! - `insert_edge_row` / `delete_edge_row`: one join-table row each
//! - `load_edges`: the committed edge set for one owner and relation
//! - `begin` / `commit` / `rollback`: the atomic unit wrapping one save
//!
//! [`sqlite::SqliteStore`] is the bundled implementation; tests substitute
//! scripted adapters to exercise failure paths.

pub mod schema;
pub mod sqlite;

pub use sqlite::SqliteStore;

use crate::Result;
use crate::schema::{EntityDef, RelationDef};
use crate::value::Value;
use std::collections::BTreeMap;

/// One join-table row as loaded from storage: the related entity's key
/// values plus the raw payload column values, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeRow {
    pub related_key: Vec<Value>,
    pub payload: Vec<Value>,
}

/// Storage capability consumed by the session and the save orchestrator.
///
/// All mutating calls between `begin` and `commit`/`rollback` belong to one
/// atomic unit; a rollback must leave no partial edge mutation visible.
pub trait StorageAdapter {
    /// Open the atomic unit for one save invocation
    fn begin(&mut self) -> Result<()>;

    fn commit(&mut self) -> Result<()>;

    fn rollback(&mut self) -> Result<()>;

    /// Insert a new entity row, returning the assigned primary key values.
    /// For auto-increment entities the key is storage-assigned; otherwise it
    /// is taken from the key columns present in `fields`.
    fn persist_entity(
        &mut self,
        def: &EntityDef,
        fields: &BTreeMap<String, Value>,
    ) -> Result<Vec<Value>>;

    /// Insert one join-table row with the given column values
    fn insert_edge_row(&mut self, table: &str, columns: &[(String, Value)]) -> Result<()>;

    /// Delete the join-table row matching all given key columns
    fn delete_edge_row(&mut self, table: &str, key_columns: &[(String, Value)]) -> Result<()>;

    /// Load the committed edge set for one owner key and relation
    fn load_edges(&mut self, relation: &RelationDef, owner_key: &[Value]) -> Result<Vec<EdgeRow>>;
}
