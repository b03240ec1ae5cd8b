//! Relation endpoint collection - committed and working edge sets
//!
//! Each (owner entity, relation) pair owns one collection holding:
//! - `committed`: edges synchronized with storage as of the last load/save
//! - `working`: the current in-memory desired state
//!
//! Both vectors keep first-insertion order; deduplication by edge key is the
//! session's job, since keys require the entity arena. The save orchestrator
//! promotes `working` into `committed` after a successful save.

use crate::edge::Edge;

/// Committed/working edge sets for one owner's side of one relation.
#[derive(Debug, Clone, Default)]
pub struct RelationCollection {
    committed: Vec<Edge>,
    working: Vec<Edge>,
}

impl RelationCollection {
    /// Empty collection for a transient owner (nothing to load)
    pub fn new_empty() -> Self {
        Self::default()
    }

    /// Collection initialized from edges loaded out of storage. The working
    /// set starts as a copy of the committed set.
    pub fn new_loaded(edges: Vec<Edge>) -> Self {
        Self {
            committed: edges.clone(),
            working: edges,
        }
    }

    pub fn committed(&self) -> &[Edge] {
        &self.committed
    }

    pub fn working(&self) -> &[Edge] {
        &self.working
    }

    /// Append an edge to the working set. The caller has already checked
    /// that no identity-equal edge is present.
    pub(crate) fn push_working(&mut self, edge: Edge) {
        self.working.push(edge);
    }

    pub(crate) fn remove_working_at(&mut self, index: usize) -> Edge {
        self.working.remove(index)
    }

    /// Drain the working set, returning the removed edges for inverse-side
    /// cleanup. Committed is untouched.
    pub(crate) fn clear_working(&mut self) -> Vec<Edge> {
        std::mem::take(&mut self.working)
    }

    /// Replace committed with a copy of working after a successful save.
    pub(crate) fn promote(&mut self) {
        self.committed = self.working.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityId;

    fn edge(related: usize) -> Edge {
        Edge::new(EntityId(0), EntityId(related), vec![])
    }

    #[test]
    fn test_loaded_collection_starts_synchronized() {
        let col = RelationCollection::new_loaded(vec![edge(1), edge(2)]);
        assert_eq!(col.committed(), col.working());
        assert_eq!(col.committed().len(), 2);
    }

    #[test]
    fn test_mutations_leave_committed_untouched() {
        let mut col = RelationCollection::new_loaded(vec![edge(1)]);
        col.push_working(edge(2));
        col.remove_working_at(0);
        assert_eq!(col.working(), &[edge(2)]);
        assert_eq!(col.committed(), &[edge(1)]);

        let drained = col.clear_working();
        assert_eq!(drained, vec![edge(2)]);
        assert_eq!(col.committed(), &[edge(1)]);
    }

    #[test]
    fn test_promote_copies_working() {
        let mut col = RelationCollection::new_empty();
        col.push_working(edge(1));
        col.push_working(edge(2));
        assert!(col.committed().is_empty());

        col.promote();
        assert_eq!(col.committed(), col.working());
    }
}
