use std::sync::{Mutex, MutexGuard};

use crate::model::rb_tree::{NodeId, RbTree};

/// A resolved node together with where it starts in the document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheEntry {
    pub node: NodeId,
    pub node_start_offset: usize,
    /// 1-based line the node starts on, 0 when only the offset is known
    pub node_start_line_number: usize,
}

/// Small bounded cache of recently resolved offset and line lookups.
///
/// The entry list sits behind a mutex so concurrent readers never observe a
/// half-updated list. Writers to the tree must still be serialized externally.
#[derive(Debug)]
pub struct PieceTreeSearchCache {
    limit: usize,
    cache: Mutex<Vec<CacheEntry>>,
}

impl PieceTreeSearchCache {
    pub fn new(limit: usize) -> Self {
        PieceTreeSearchCache {
            limit: limit.max(1),
            cache: Mutex::new(Vec::with_capacity(limit.max(1))),
        }
    }

    fn entries(&self) -> MutexGuard<'_, Vec<CacheEntry>> {
        // a poisoned cache only ever holds stale hints, so keep using it
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Most recent entry whose node covers `offset` (its end included)
    pub fn get(&self, tree: &RbTree, offset: usize) -> Option<CacheEntry> {
        self.entries()
            .iter()
            .rev()
            .find(|entry| {
                entry.node_start_offset <= offset
                    && entry.node_start_offset + tree.piece(entry.node).length >= offset
            })
            .copied()
    }

    /// Most recent entry whose node holds the start of line `line_number`
    pub fn get2(&self, tree: &RbTree, line_number: usize) -> Option<CacheEntry> {
        self.entries()
            .iter()
            .rev()
            .find(|entry| {
                entry.node_start_line_number > 0
                    && entry.node_start_line_number < line_number
                    && entry.node_start_line_number + tree.piece(entry.node).line_feed_cnt
                        >= line_number
            })
            .copied()
    }

    /// Remember an entry, evicting the oldest one when full
    pub fn set(&self, entry: CacheEntry) {
        let mut cache = self.entries();
        if cache.len() >= self.limit {
            cache.remove(0);
        }
        cache.push(entry);
    }

    /// Drop entries at or past `offset` and entries whose node left the tree
    pub fn validate(&self, tree: &RbTree, offset: usize) {
        self.entries()
            .retain(|entry| tree.is_attached(entry.node) && entry.node_start_offset < offset);
    }

    /// Forget every entry pointing at `node`
    pub fn forget(&self, node: NodeId) {
        self.entries().retain(|entry| entry.node != node);
    }

    pub fn clear(&self) {
        self.entries().clear();
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

impl Clone for PieceTreeSearchCache {
    fn clone(&self) -> Self {
        PieceTreeSearchCache {
            limit: self.limit,
            cache: Mutex::new(self.entries().clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::buffer::{BufferCursor, Piece};
    use crate::model::rb_tree::SENTINEL;

    fn two_node_tree() -> (RbTree, NodeId, NodeId) {
        let mut tree = RbTree::new();
        let a = tree.insert_right(
            SENTINEL,
            Piece::new(1, BufferCursor::new(0, 0), BufferCursor::new(2, 1), 2, 10),
        );
        let b = tree.insert_right(
            a,
            Piece::new(1, BufferCursor::new(2, 1), BufferCursor::new(3, 0), 1, 5),
        );
        (tree, a, b)
    }

    #[test]
    fn test_get_by_offset_includes_node_end() {
        let (tree, a, _) = two_node_tree();
        let cache = PieceTreeSearchCache::new(1);
        cache.set(CacheEntry {
            node: a,
            node_start_offset: 0,
            node_start_line_number: 0,
        });
        assert!(cache.get(&tree, 0).is_some());
        assert!(cache.get(&tree, 10).is_some());
        assert!(cache.get(&tree, 11).is_none());
    }

    #[test]
    fn test_get2_requires_known_line() {
        let (tree, a, b) = two_node_tree();
        let cache = PieceTreeSearchCache::new(2);
        cache.set(CacheEntry {
            node: a,
            node_start_offset: 0,
            node_start_line_number: 0,
        });
        assert!(cache.get2(&tree, 2).is_none());

        cache.set(CacheEntry {
            node: b,
            node_start_offset: 10,
            node_start_line_number: 3,
        });
        assert!(cache.get2(&tree, 3).is_none());
        assert_eq!(cache.get2(&tree, 4).map(|e| e.node), Some(b));
        assert!(cache.get2(&tree, 5).is_none());
    }

    #[test]
    fn test_set_evicts_oldest() {
        let (_, a, b) = two_node_tree();
        let cache = PieceTreeSearchCache::new(1);
        cache.set(CacheEntry {
            node: a,
            node_start_offset: 0,
            node_start_line_number: 0,
        });
        cache.set(CacheEntry {
            node: b,
            node_start_offset: 10,
            node_start_line_number: 0,
        });
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_validate_drops_entries_past_offset_and_detached_nodes() {
        let (mut tree, a, b) = two_node_tree();
        let cache = PieceTreeSearchCache::new(4);
        cache.set(CacheEntry {
            node: a,
            node_start_offset: 0,
            node_start_line_number: 1,
        });
        cache.set(CacheEntry {
            node: b,
            node_start_offset: 10,
            node_start_line_number: 3,
        });
        cache.validate(&tree, 10);
        assert_eq!(cache.len(), 1);

        tree.delete(a);
        cache.validate(&tree, 100);
        assert!(cache.is_empty());
    }
}
