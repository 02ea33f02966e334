//! Arena-backed red-black tree ordered by document position.
//!
//! There is no key: a node is always inserted immediately before or after an
//! existing node, so in-order traversal *is* document order. Every node caches
//! two aggregates over its left subtree, `size_left` (bytes) and `lf_left`
//! (line breaks), which lets offset and line lookups descend in O(log n).
//!
//! Nodes live in a per-tree `Vec`. Slot 0 is the sentinel: a black leaf whose
//! `parent` link may be written during deletion and is reset afterwards.
//! Removed slots go to a free list and are handed out again by later inserts.

use crate::model::buffer::Piece;

/// Index of a node inside its tree's arena
pub type NodeId = usize;

/// The per-tree sentinel standing in for every missing child and the root's parent
pub const SENTINEL: NodeId = 0;

/// Link value of a node that was removed from the tree
const DETACHED: NodeId = usize::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeColor {
    Black,
    Red,
}

/// A tree vertex holding one piece plus its left-subtree aggregates
#[derive(Debug, Clone)]
pub struct TreeNode {
    pub piece: Piece,
    pub color: NodeColor,
    /// Total byte length of the left subtree
    pub size_left: usize,
    /// Total line-feed count of the left subtree
    pub lf_left: usize,
    pub parent: NodeId,
    pub left: NodeId,
    pub right: NodeId,
}

impl TreeNode {
    fn sentinel() -> Self {
        TreeNode {
            piece: Piece::default(),
            color: NodeColor::Black,
            size_left: 0,
            lf_left: 0,
            parent: SENTINEL,
            left: SENTINEL,
            right: SENTINEL,
        }
    }
}

#[inline]
fn apply_delta(value: usize, delta: isize) -> usize {
    value.wrapping_add_signed(delta)
}

/// Statistics about the tree shape, used by tests and diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeStats {
    pub node_count: usize,
    pub black_height: usize,
    pub total_bytes: usize,
    pub line_feed_count: usize,
}

#[derive(Debug, Clone)]
pub struct RbTree {
    nodes: Vec<TreeNode>,
    free: Vec<NodeId>,
    pub root: NodeId,
}

impl Default for RbTree {
    fn default() -> Self {
        Self::new()
    }
}

impl RbTree {
    pub fn new() -> Self {
        RbTree {
            nodes: vec![TreeNode::sentinel()],
            free: Vec::new(),
            root: SENTINEL,
        }
    }

    #[inline]
    pub fn node(&self, id: NodeId) -> &TreeNode {
        &self.nodes[id]
    }

    #[inline]
    pub fn piece(&self, id: NodeId) -> &Piece {
        &self.nodes[id].piece
    }

    #[inline]
    pub fn left(&self, id: NodeId) -> NodeId {
        self.nodes[id].left
    }

    #[inline]
    pub fn right(&self, id: NodeId) -> NodeId {
        self.nodes[id].right
    }

    #[inline]
    pub fn parent(&self, id: NodeId) -> NodeId {
        self.nodes[id].parent
    }

    #[inline]
    fn color(&self, id: NodeId) -> NodeColor {
        self.nodes[id].color
    }

    #[inline]
    fn set_color(&mut self, id: NodeId, color: NodeColor) {
        self.nodes[id].color = color;
    }

    pub fn is_empty(&self) -> bool {
        self.root == SENTINEL
    }

    /// True while `id` is linked into the tree
    pub fn is_attached(&self, id: NodeId) -> bool {
        id != SENTINEL && id < self.nodes.len() && self.nodes[id].parent != DETACHED
    }

    /// Replace the piece held by a node, leaving aggregates untouched
    pub fn set_piece(&mut self, id: NodeId, piece: Piece) {
        self.nodes[id].piece = piece;
    }

    fn alloc(&mut self, piece: Piece) -> NodeId {
        let node = TreeNode {
            piece,
            color: NodeColor::Red,
            size_left: 0,
            lf_left: 0,
            parent: SENTINEL,
            left: SENTINEL,
            right: SENTINEL,
        };
        match self.free.pop() {
            Some(id) => {
                self.nodes[id] = node;
                id
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        }
    }

    fn detach(&mut self, id: NodeId) {
        let node = &mut self.nodes[id];
        node.parent = DETACHED;
        node.left = DETACHED;
        node.right = DETACHED;
        self.free.push(id);
    }

    fn reset_sentinel(&mut self) {
        self.nodes[SENTINEL].parent = SENTINEL;
    }

    pub fn leftest(&self, mut x: NodeId) -> NodeId {
        while self.left(x) != SENTINEL {
            x = self.left(x);
        }
        x
    }

    pub fn rightest(&self, mut y: NodeId) -> NodeId {
        while self.right(y) != SENTINEL {
            y = self.right(y);
        }
        y
    }

    /// In-order successor, `SENTINEL` after the last node
    pub fn next(&self, id: NodeId) -> NodeId {
        if self.right(id) != SENTINEL {
            return self.leftest(self.right(id));
        }

        let mut node = id;
        while self.parent(node) != SENTINEL {
            if self.left(self.parent(node)) == node {
                break;
            }
            node = self.parent(node);
        }
        self.parent(node)
    }

    /// In-order predecessor, `SENTINEL` before the first node
    pub fn prev(&self, id: NodeId) -> NodeId {
        if self.left(id) != SENTINEL {
            return self.rightest(self.left(id));
        }

        let mut node = id;
        while self.parent(node) != SENTINEL {
            if self.right(self.parent(node)) == node {
                break;
            }
            node = self.parent(node);
        }
        self.parent(node)
    }

    /// Total byte length of the subtree rooted at `node`
    pub fn calculate_size(&self, mut node: NodeId) -> usize {
        let mut size = 0;
        while node != SENTINEL {
            size += self.nodes[node].size_left + self.nodes[node].piece.length;
            node = self.right(node);
        }
        size
    }

    /// Total line-feed count of the subtree rooted at `node`
    pub fn calculate_lf(&self, mut node: NodeId) -> usize {
        let mut count = 0;
        while node != SENTINEL {
            count += self.nodes[node].lf_left + self.nodes[node].piece.line_feed_cnt;
            node = self.right(node);
        }
        count
    }

    /// Document offset at which the piece of `id` starts
    pub fn offset_of(&self, id: NodeId) -> usize {
        if id == SENTINEL {
            return 0;
        }
        let mut node = id;
        let mut pos = self.nodes[node].size_left;
        while node != self.root {
            let parent = self.parent(node);
            if self.right(parent) == node {
                pos += self.nodes[parent].size_left + self.nodes[parent].piece.length;
            }
            node = parent;
        }
        pos
    }

    /// Iterate node ids in document order without recursion
    pub fn iter(&self) -> InOrder<'_> {
        let next = if self.root == SENTINEL {
            SENTINEL
        } else {
            self.leftest(self.root)
        };
        InOrder { tree: self, next }
    }

    fn left_rotate(&mut self, x: NodeId) {
        let y = self.right(x);

        // y gains x and x's left subtree on its left
        let gained_size = self.nodes[x].size_left + self.nodes[x].piece.length;
        let gained_lf = self.nodes[x].lf_left + self.nodes[x].piece.line_feed_cnt;
        self.nodes[y].size_left += gained_size;
        self.nodes[y].lf_left += gained_lf;

        let y_left = self.left(y);
        self.nodes[x].right = y_left;
        if y_left != SENTINEL {
            self.nodes[y_left].parent = x;
        }
        let x_parent = self.parent(x);
        self.nodes[y].parent = x_parent;
        if x_parent == SENTINEL {
            self.root = y;
        } else if self.left(x_parent) == x {
            self.nodes[x_parent].left = y;
        } else {
            self.nodes[x_parent].right = y;
        }
        self.nodes[y].left = x;
        self.nodes[x].parent = y;
    }

    fn right_rotate(&mut self, y: NodeId) {
        let x = self.left(y);
        let x_right = self.right(x);
        self.nodes[y].left = x_right;
        if x_right != SENTINEL {
            self.nodes[x_right].parent = y;
        }
        let y_parent = self.parent(y);
        self.nodes[x].parent = y_parent;

        // y loses x and x's left subtree
        let lost_size = self.nodes[x].size_left + self.nodes[x].piece.length;
        let lost_lf = self.nodes[x].lf_left + self.nodes[x].piece.line_feed_cnt;
        self.nodes[y].size_left -= lost_size;
        self.nodes[y].lf_left -= lost_lf;

        if y_parent == SENTINEL {
            self.root = x;
        } else if y == self.right(y_parent) {
            self.nodes[y_parent].right = x;
        } else {
            self.nodes[y_parent].left = x;
        }

        self.nodes[x].right = y;
        self.nodes[y].parent = x;
    }

    /// Insert `piece` as the in-order successor of `node`.
    ///
    /// ```text
    ///      node            node
    ///     /  \              /  \
    ///    a   b    <----   a    b
    ///                         /
    ///                        z
    /// ```
    pub fn insert_right(&mut self, node: NodeId, piece: Piece) -> NodeId {
        let z = self.alloc(piece);

        if self.root == SENTINEL {
            self.root = z;
            self.set_color(z, NodeColor::Black);
        } else if self.right(node) == SENTINEL {
            self.nodes[node].right = z;
            self.nodes[z].parent = node;
        } else {
            let next_node = self.leftest(self.right(node));
            self.nodes[next_node].left = z;
            self.nodes[z].parent = next_node;
        }

        self.fix_insert(z);
        z
    }

    /// Insert `piece` as the in-order predecessor of `node`.
    ///
    /// ```text
    ///      node            node
    ///     /  \              /  \
    ///    a   b     ---->   a    b
    ///                       \
    ///                        z
    /// ```
    pub fn insert_left(&mut self, node: NodeId, piece: Piece) -> NodeId {
        let z = self.alloc(piece);

        if self.root == SENTINEL {
            self.root = z;
            self.set_color(z, NodeColor::Black);
        } else if self.left(node) == SENTINEL {
            self.nodes[node].left = z;
            self.nodes[z].parent = node;
        } else {
            let prev_node = self.rightest(self.left(node));
            self.nodes[prev_node].right = z;
            self.nodes[z].parent = prev_node;
        }

        self.fix_insert(z);
        z
    }

    /// Unlink node `z` from the tree and recycle its slot
    pub fn delete(&mut self, z: NodeId) {
        let (mut x, y);

        if self.left(z) == SENTINEL {
            y = z;
            x = self.right(y);
        } else if self.right(z) == SENTINEL {
            y = z;
            x = self.left(y);
        } else {
            y = self.leftest(self.right(z));
            x = self.right(y);
        }

        if y == self.root {
            self.root = x;
            // x may be the sentinel when removing the only node
            self.set_color(x, NodeColor::Black);
            self.detach(z);
            self.reset_sentinel();
            let root = self.root;
            self.nodes[root].parent = SENTINEL;
            return;
        }

        let y_was_red = self.color(y) == NodeColor::Red;

        let y_parent = self.parent(y);
        if y == self.left(y_parent) {
            self.nodes[y_parent].left = x;
        } else {
            self.nodes[y_parent].right = x;
        }

        if y == z {
            self.nodes[x].parent = y_parent;
            self.recompute_tree_metadata(x);
        } else {
            if y_parent == z {
                self.nodes[x].parent = y;
            } else {
                self.nodes[x].parent = y_parent;
            }

            // x's subtree changed shape, settle its aggregates first
            self.recompute_tree_metadata(x);

            let (z_left, z_right, z_parent, z_color) = {
                let zn = &self.nodes[z];
                (zn.left, zn.right, zn.parent, zn.color)
            };
            self.nodes[y].left = z_left;
            self.nodes[y].right = z_right;
            self.nodes[y].parent = z_parent;
            self.nodes[y].color = z_color;

            if z == self.root {
                self.root = y;
            } else if z == self.left(z_parent) {
                self.nodes[z_parent].left = y;
            } else {
                self.nodes[z_parent].right = y;
            }

            if z_left != SENTINEL {
                self.nodes[z_left].parent = y;
            }
            if z_right != SENTINEL {
                self.nodes[z_right].parent = y;
            }
            // y takes z's place, so it inherits z's left aggregates
            self.nodes[y].size_left = self.nodes[z].size_left;
            self.nodes[y].lf_left = self.nodes[z].lf_left;
            self.recompute_tree_metadata(y);
        }

        self.detach(z);

        let x_parent = self.parent(x);
        if self.left(x_parent) == x {
            let new_size_left = self.calculate_size(x);
            let new_lf_left = self.calculate_lf(x);
            let parent = &self.nodes[x_parent];
            if new_size_left != parent.size_left || new_lf_left != parent.lf_left {
                let delta = new_size_left as isize - parent.size_left as isize;
                let lf_delta = new_lf_left as isize - parent.lf_left as isize;
                self.nodes[x_parent].size_left = new_size_left;
                self.nodes[x_parent].lf_left = new_lf_left;
                self.update_tree_metadata(x_parent, delta, lf_delta);
            }
        }

        self.recompute_tree_metadata(x_parent);

        if y_was_red {
            self.reset_sentinel();
            return;
        }

        self.delete_fixup(x);
        self.reset_sentinel();
    }

    fn delete_fixup(&mut self, mut x: NodeId) {
        while x != self.root && self.color(x) == NodeColor::Black {
            let x_parent = self.parent(x);
            if x == self.left(x_parent) {
                let mut w = self.right(x_parent);

                if self.color(w) == NodeColor::Red {
                    self.set_color(w, NodeColor::Black);
                    self.set_color(x_parent, NodeColor::Red);
                    self.left_rotate(x_parent);
                    w = self.right(self.parent(x));
                }

                if self.color(self.left(w)) == NodeColor::Black
                    && self.color(self.right(w)) == NodeColor::Black
                {
                    self.set_color(w, NodeColor::Red);
                    x = self.parent(x);
                } else {
                    if self.color(self.right(w)) == NodeColor::Black {
                        let w_left = self.left(w);
                        self.set_color(w_left, NodeColor::Black);
                        self.set_color(w, NodeColor::Red);
                        self.right_rotate(w);
                        w = self.right(self.parent(x));
                    }

                    let parent = self.parent(x);
                    let parent_color = self.color(parent);
                    self.set_color(w, parent_color);
                    self.set_color(parent, NodeColor::Black);
                    let w_right = self.right(w);
                    self.set_color(w_right, NodeColor::Black);
                    self.left_rotate(parent);
                    x = self.root;
                }
            } else {
                let mut w = self.left(x_parent);

                if self.color(w) == NodeColor::Red {
                    self.set_color(w, NodeColor::Black);
                    self.set_color(x_parent, NodeColor::Red);
                    self.right_rotate(x_parent);
                    w = self.left(self.parent(x));
                }

                if self.color(self.left(w)) == NodeColor::Black
                    && self.color(self.right(w)) == NodeColor::Black
                {
                    self.set_color(w, NodeColor::Red);
                    x = self.parent(x);
                } else {
                    if self.color(self.left(w)) == NodeColor::Black {
                        let w_right = self.right(w);
                        self.set_color(w_right, NodeColor::Black);
                        self.set_color(w, NodeColor::Red);
                        self.left_rotate(w);
                        w = self.left(self.parent(x));
                    }

                    let parent = self.parent(x);
                    let parent_color = self.color(parent);
                    self.set_color(w, parent_color);
                    self.set_color(parent, NodeColor::Black);
                    let w_left = self.left(w);
                    self.set_color(w_left, NodeColor::Black);
                    self.right_rotate(parent);
                    x = self.root;
                }
            }
        }
        self.set_color(x, NodeColor::Black);
    }

    fn fix_insert(&mut self, node: NodeId) {
        let mut x = node;
        self.recompute_tree_metadata(x);

        while x != self.root && self.color(self.parent(x)) == NodeColor::Red {
            let parent = self.parent(x);
            let grandparent = self.parent(parent);
            if parent == self.left(grandparent) {
                let y = self.right(grandparent);

                if self.color(y) == NodeColor::Red {
                    self.set_color(parent, NodeColor::Black);
                    self.set_color(y, NodeColor::Black);
                    self.set_color(grandparent, NodeColor::Red);
                    x = grandparent;
                } else {
                    if x == self.right(parent) {
                        x = parent;
                        self.left_rotate(x);
                    }
                    let parent = self.parent(x);
                    let grandparent = self.parent(parent);
                    self.set_color(parent, NodeColor::Black);
                    self.set_color(grandparent, NodeColor::Red);
                    self.right_rotate(grandparent);
                }
            } else {
                let y = self.left(grandparent);

                if self.color(y) == NodeColor::Red {
                    self.set_color(parent, NodeColor::Black);
                    self.set_color(y, NodeColor::Black);
                    self.set_color(grandparent, NodeColor::Red);
                    x = grandparent;
                } else {
                    if x == self.left(parent) {
                        x = parent;
                        self.right_rotate(x);
                    }
                    let parent = self.parent(x);
                    let grandparent = self.parent(parent);
                    self.set_color(parent, NodeColor::Black);
                    self.set_color(grandparent, NodeColor::Red);
                    self.left_rotate(grandparent);
                }
            }
        }
        let root = self.root;
        self.set_color(root, NodeColor::Black);
    }

    /// Propagate a length / line-feed change of `node`'s piece to every
    /// ancestor that holds it in its left subtree.
    pub fn update_tree_metadata(&mut self, node: NodeId, delta: isize, lf_delta: isize) {
        let mut x = node;
        while x != self.root && x != SENTINEL {
            let parent = self.parent(x);
            if self.left(parent) == x {
                let p = &mut self.nodes[parent];
                p.size_left = apply_delta(p.size_left, delta);
                p.lf_left = apply_delta(p.lf_left, lf_delta);
            }
            x = parent;
        }
    }

    /// Recount the left aggregates of the first ancestor reached through a
    /// left link, then push the difference up to the root.
    pub fn recompute_tree_metadata(&mut self, node: NodeId) {
        let mut x = node;

        if x == self.root {
            return;
        }

        // go upwards till the node whose left subtree is changed
        while x != self.root && x == self.right(self.parent(x)) {
            x = self.parent(x);
        }

        if x == self.root {
            // appended at the end in order: no left subtree changed
            return;
        }

        x = self.parent(x);

        let delta = self.calculate_size(self.left(x)) as isize - self.nodes[x].size_left as isize;
        let lf_delta = self.calculate_lf(self.left(x)) as isize - self.nodes[x].lf_left as isize;
        self.nodes[x].size_left = apply_delta(self.nodes[x].size_left, delta);
        self.nodes[x].lf_left = apply_delta(self.nodes[x].lf_left, lf_delta);

        while x != self.root && (delta != 0 || lf_delta != 0) {
            let parent = self.parent(x);
            if self.left(parent) == x {
                let p = &mut self.nodes[parent];
                p.size_left = apply_delta(p.size_left, delta);
                p.lf_left = apply_delta(p.lf_left, lf_delta);
            }
            x = parent;
        }
    }

    /// Walk the whole tree and verify the red-black rules and the cached
    /// aggregates against a full recount.
    pub fn check_invariants(&self) -> Result<TreeStats, String> {
        if self.color(self.root) != NodeColor::Black {
            return Err("root is not black".to_string());
        }
        if self.root != SENTINEL && self.parent(self.root) != SENTINEL {
            return Err("root has a parent".to_string());
        }
        let (black_height, total_bytes, line_feed_count, node_count) =
            self.check_subtree(self.root)?;
        Ok(TreeStats {
            node_count,
            black_height,
            total_bytes,
            line_feed_count,
        })
    }

    // Returns (black height, bytes, line feeds, node count) of the subtree
    fn check_subtree(&self, id: NodeId) -> Result<(usize, usize, usize, usize), String> {
        if id == SENTINEL {
            return Ok((1, 0, 0, 0));
        }
        let node = &self.nodes[id];
        if node.parent == DETACHED {
            return Err(format!("node {id} is reachable but detached"));
        }
        if node.color == NodeColor::Red
            && (self.color(node.left) == NodeColor::Red || self.color(node.right) == NodeColor::Red)
        {
            return Err(format!("red node {id} has a red child"));
        }
        for child in [node.left, node.right] {
            if child != SENTINEL && self.parent(child) != id {
                return Err(format!("child {child} of node {id} has a wrong parent link"));
            }
        }

        let (left_bh, left_size, left_lf, left_count) = self.check_subtree(node.left)?;
        let (right_bh, right_size, right_lf, right_count) = self.check_subtree(node.right)?;
        if left_bh != right_bh {
            return Err(format!(
                "black height mismatch under node {id}: {left_bh} vs {right_bh}"
            ));
        }
        if left_size != node.size_left {
            return Err(format!(
                "size_left of node {id} is {} but the left subtree holds {left_size}",
                node.size_left
            ));
        }
        if left_lf != node.lf_left {
            return Err(format!(
                "lf_left of node {id} is {} but the left subtree holds {left_lf}",
                node.lf_left
            ));
        }

        let bh = left_bh + usize::from(node.color == NodeColor::Black);
        Ok((
            bh,
            left_size + node.piece.length + right_size,
            left_lf + node.piece.line_feed_cnt + right_lf,
            left_count + 1 + right_count,
        ))
    }
}

/// In-order iterator over node ids
pub struct InOrder<'a> {
    tree: &'a RbTree,
    next: NodeId,
}

impl Iterator for InOrder<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        if self.next == SENTINEL {
            return None;
        }
        let current = self.next;
        self.next = self.tree.next(current);
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::buffer::BufferCursor;

    fn piece(length: usize, line_feed_cnt: usize) -> Piece {
        Piece::new(
            1,
            BufferCursor::new(0, 0),
            BufferCursor::new(line_feed_cnt, 0),
            line_feed_cnt,
            length,
        )
    }

    fn lengths(tree: &RbTree) -> Vec<usize> {
        tree.iter().map(|id| tree.piece(id).length).collect()
    }

    #[test]
    fn test_insert_right_keeps_order() {
        let mut tree = RbTree::new();
        let mut last = SENTINEL;
        for len in 1..=20 {
            last = tree.insert_right(last, piece(len, len % 3));
        }
        assert_eq!(lengths(&tree), (1..=20).collect::<Vec<_>>());
        let stats = tree.check_invariants().unwrap();
        assert_eq!(stats.node_count, 20);
        assert_eq!(stats.total_bytes, (1..=20).sum::<usize>());
    }

    #[test]
    fn test_insert_left_prepends() {
        let mut tree = RbTree::new();
        let mut first = tree.insert_left(SENTINEL, piece(10, 0));
        for len in (1..10).rev() {
            first = tree.insert_left(first, piece(len, 1));
        }
        assert_eq!(lengths(&tree), (1..=10).collect::<Vec<_>>());
        tree.check_invariants().unwrap();
    }

    #[test]
    fn test_next_prev_walk() {
        let mut tree = RbTree::new();
        let mut ids = Vec::new();
        let mut last = SENTINEL;
        for len in 1..=8 {
            last = tree.insert_right(last, piece(len, 0));
            ids.push(last);
        }
        for pair in ids.windows(2) {
            assert_eq!(tree.next(pair[0]), pair[1]);
            assert_eq!(tree.prev(pair[1]), pair[0]);
        }
        assert_eq!(tree.next(ids[7]), SENTINEL);
        assert_eq!(tree.prev(ids[0]), SENTINEL);
    }

    #[test]
    fn test_offset_of() {
        let mut tree = RbTree::new();
        let mut last = SENTINEL;
        let mut ids = Vec::new();
        for len in 1..=10 {
            last = tree.insert_right(last, piece(len, 0));
            ids.push(last);
        }
        let mut expected = 0;
        for (i, id) in ids.iter().enumerate() {
            assert_eq!(tree.offset_of(*id), expected);
            expected += i + 1;
        }
    }

    #[test]
    fn test_delete_keeps_invariants() {
        let mut tree = RbTree::new();
        let mut last = SENTINEL;
        let mut ids = Vec::new();
        for len in 1..=32 {
            last = tree.insert_right(last, piece(len, len % 2));
            ids.push(last);
        }
        for id in ids.iter().step_by(3) {
            tree.delete(*id);
            tree.check_invariants().unwrap();
            assert!(!tree.is_attached(*id));
        }
        let expected: Vec<usize> = (1..=32).filter(|len| (len - 1) % 3 != 0).collect();
        assert_eq!(lengths(&tree), expected);
    }

    #[test]
    fn test_delete_everything_then_reuse_slots() {
        let mut tree = RbTree::new();
        let mut last = SENTINEL;
        let mut ids = Vec::new();
        for len in 1..=5 {
            last = tree.insert_right(last, piece(len, 0));
            ids.push(last);
        }
        for id in ids {
            tree.delete(id);
        }
        assert!(tree.is_empty());
        tree.check_invariants().unwrap();

        let a = tree.insert_right(SENTINEL, piece(7, 0));
        tree.insert_right(a, piece(8, 0));
        assert_eq!(lengths(&tree), vec![7, 8]);
        // only the sentinel plus the original five slots were ever allocated
        assert_eq!(tree.nodes.len(), 6);
    }

    #[test]
    fn test_update_tree_metadata_propagates() {
        let mut tree = RbTree::new();
        let mut last = SENTINEL;
        let mut ids = Vec::new();
        for _ in 0..16 {
            last = tree.insert_right(last, piece(4, 1));
            ids.push(last);
        }
        let target = ids[3];
        let mut p = *tree.piece(target);
        p.length += 6;
        p.line_feed_cnt += 2;
        tree.set_piece(target, p);
        tree.update_tree_metadata(target, 6, 2);
        let stats = tree.check_invariants().unwrap();
        assert_eq!(stats.total_bytes, 16 * 4 + 6);
        assert_eq!(stats.line_feed_count, 16 + 2);
    }
}
