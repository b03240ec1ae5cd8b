//! Relation diff engine - minimal insert/delete computation
//!
//! Given the committed edge set (last known persisted state) and the working
//! edge set (current in-memory state), compute the ordered operations that
//! transform one into the other:
//!
//! - `to_delete = committed - working`
//! - `to_insert = working - committed`
//! - the intersection is left untouched
//!
//! Differences are computed by identity-key equality, not arena identity, so
//! a previously-loaded edge whose related entity was re-fetched as a
//! different in-memory instance (same primary key) is recognized as
//! unchanged. Keys are derived through the caller-supplied function at diff
//! time; nothing here is cached across a promotion boundary, and nothing
//! here touches storage.

use crate::edge::{Edge, EdgeKey};
use std::collections::HashSet;

/// Ordered edge operations produced by [`diff`].
///
/// Within each list, edges keep the first-insertion order of their source
/// set, so execution order is deterministic and reproducible.
#[derive(Debug, Clone, Default)]
pub struct EdgeOps {
    pub to_delete: Vec<Edge>,
    pub to_insert: Vec<Edge>,
}

impl EdgeOps {
    pub fn is_empty(&self) -> bool {
        self.to_delete.is_empty() && self.to_insert.is_empty()
    }

    pub fn len(&self) -> usize {
        self.to_delete.len() + self.to_insert.len()
    }
}

/// Compute the minimal insert/delete set between `committed` and `working`.
///
/// `key_of` derives the identity-based comparison key for an edge; it is
/// invoked once per edge per call, never cached.
pub fn diff<F>(committed: &[Edge], working: &[Edge], key_of: F) -> EdgeOps
where
    F: Fn(&Edge) -> EdgeKey,
{
    let committed_keys: Vec<EdgeKey> = committed.iter().map(&key_of).collect();
    let working_keys: Vec<EdgeKey> = working.iter().map(&key_of).collect();

    let committed_set: HashSet<&EdgeKey> = committed_keys.iter().collect();
    let working_set: HashSet<&EdgeKey> = working_keys.iter().collect();

    let to_delete = committed
        .iter()
        .zip(&committed_keys)
        .filter(|(_, key)| !working_set.contains(key))
        .map(|(edge, _)| edge.clone())
        .collect();

    let to_insert = working
        .iter()
        .zip(&working_keys)
        .filter(|(_, key)| !committed_set.contains(key))
        .map(|(edge, _)| edge.clone())
        .collect();

    EdgeOps {
        to_delete,
        to_insert,
    }
}
