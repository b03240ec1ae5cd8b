//! # Relink - Many-to-Many Relation Reconciliation Engine
//!
//! Relink keeps an in-memory graph of related entities consistent with
//! cross-reference ("join") tables in relational storage.
//!
//! Relink provides:
//! - A unit-of-work [`Session`] with a scoped identity map for entity deduplication
//! - A collection mutation API (add / remove / set / get) with bidirectional back-references
//! - A pure diff engine computing the minimal insert/delete set for a join table
//! - A save orchestrator that persists transient endpoints, promotes identities,
//!   and applies edge operations inside one storage transaction
//! - A config-driven schema registry mapping relation names to entity types and
//!   payload columns
//! - SQLite-backed storage with a pluggable adapter trait

pub mod collection;
pub mod config;
pub mod diff;
pub mod edge;
pub mod entity;
pub mod save;
pub mod schema;
pub mod session;
pub mod storage;
pub mod value;

// Re-exports for convenient access
pub use diff::{EdgeOps, diff};
pub use edge::{Edge, EdgeKey, PayloadValue};
pub use entity::{Entity, EntityId, IdentityKey, Lifecycle};
pub use schema::{EntityDef, PayloadDef, PayloadKind, RelationDef, SchemaRegistry};
pub use session::Session;
pub use storage::{SqliteStore, StorageAdapter};
pub use value::Value;

/// Result type alias for relink operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for relink operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An entity or payload value with the wrong declared type was passed to a
    /// collection mutation. Rejected before any state changes.
    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    /// A storage call failed. Surfaced unchanged; the save that triggered it
    /// rolls back completely.
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// An edge scheduled for insert still had a transient slot when the
    /// operations were applied. Indicates an orchestrator ordering bug.
    #[error("Identity required for edge insert: {0}")]
    IdentityRequired(String),

    #[error("Unknown relation: {0}")]
    UnknownRelation(String),

    #[error("Unknown entity type: {0}")]
    UnknownEntityType(String),

    #[error("Unknown entity: {0}")]
    UnknownEntity(String),

    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    #[error("Missing field: {0}")]
    MissingField(String),
}
