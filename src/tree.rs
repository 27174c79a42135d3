//! Per-thread timing tree
//!
//! An n-ary tree of [`Node`]s (leaves and internal nodes) rooted at a
//! sentinel internal node. A cursor (`tail`) designates the innermost open
//! internal node; new nodes are always appended under it.
//!
//! Nodes live in a [`StableStore`] arena and refer to their father by
//! [`NodeId`]. Only the cursor's child list ever grows, and the arena never
//! relocates elements, so ids and record addresses handed out earlier stay
//! valid for the lifetime of the tree.

use crate::record::Record;
use crate::stable_store::{StableStore, StoreError, DEFAULT_CHUNK_CAPACITY};
use std::time::Duration;
use thiserror::Error;

/// Handle to a node of a [`Tree`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    /// The sentinel root
    pub const ROOT: NodeId = NodeId(0);

    pub fn is_root(self) -> bool {
        self == Self::ROOT
    }

    fn slot(self) -> Option<usize> {
        self.0.checked_sub(1)
    }
}

/// Errors raised by tree mutations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TreeError {
    #[error("invalid state: no open subtree to close")]
    InvalidState,

    #[error("subtree closed out of order: expected {expected:?}, cursor is at {actual:?}")]
    OutOfOrder { expected: NodeId, actual: NodeId },

    #[error("unknown node {0:?}")]
    UnknownNode(NodeId),

    #[error("subtree {0:?} is not open")]
    NotOpen(NodeId),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A tree node: either a leaf or an internal node with children
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Leaf {
        father: NodeId,
        value: Record,
    },
    Internal {
        /// `None` only for the sentinel root
        father: Option<NodeId>,
        value: Record,
        children: Vec<NodeId>,
    },
}

impl Node {
    fn internal(father: Option<NodeId>, value: Record) -> Self {
        Node::Internal {
            father,
            value,
            children: Vec::new(),
        }
    }

    pub fn value(&self) -> &Record {
        match self {
            Node::Leaf { value, .. } | Node::Internal { value, .. } => value,
        }
    }

    pub fn value_mut(&mut self) -> &mut Record {
        match self {
            Node::Leaf { value, .. } | Node::Internal { value, .. } => value,
        }
    }

    pub fn father(&self) -> Option<NodeId> {
        match self {
            Node::Leaf { father, .. } => Some(*father),
            Node::Internal { father, .. } => *father,
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf { .. })
    }

    /// Children in insertion order; empty for leaves
    pub fn children(&self) -> &[NodeId] {
        match self {
            Node::Leaf { .. } => &[],
            Node::Internal { children, .. } => children,
        }
    }

    pub fn as_internal(&self) -> Option<&Record> {
        match self {
            Node::Internal { value, .. } => Some(value),
            Node::Leaf { .. } => None,
        }
    }

    pub fn as_leaf(&self) -> Option<&Record> {
        match self {
            Node::Leaf { value, .. } => Some(value),
            Node::Internal { .. } => None,
        }
    }
}

/// Callbacks driven by [`Tree::traverse`]
///
/// Internal nodes are reported by a matching `enter_internal` /
/// `leave_internal` pair around their children.
pub trait TreeVisitor {
    type Error;

    fn visit_leaf(&mut self, record: &Record) -> Result<(), Self::Error>;

    fn enter_internal(&mut self, record: &Record) -> Result<(), Self::Error>;

    fn leave_internal(&mut self, _record: &Record) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Timing tree with a cursor on the innermost open internal node
#[derive(Debug)]
pub struct Tree {
    root: Node,
    nodes: StableStore<Node>,
    tail: NodeId,
}

impl Tree {
    /// Create an empty tree (only the sentinel root)
    pub fn new() -> Self {
        Self::with_chunk_capacity(DEFAULT_CHUNK_CAPACITY)
    }

    /// Create an empty tree whose node arena starts with `capacity` slots
    pub fn with_chunk_capacity(capacity: usize) -> Self {
        Tree {
            root: Node::internal(None, Record::default()),
            nodes: StableStore::with_chunk_capacity(capacity),
            tail: NodeId::ROOT,
        }
    }

    /// Append an internal node under the cursor and move the cursor onto it
    pub fn open_subtree(&mut self, record: Record) -> Result<NodeId, TreeError> {
        let id = self.attach(Node::internal(Some(self.tail), record))?;
        self.tail = id;
        Ok(id)
    }

    /// Append a leaf under the cursor; the cursor does not move
    pub fn add_leaf(&mut self, record: Record) -> Result<NodeId, TreeError> {
        self.attach(Node::Leaf {
            father: self.tail,
            value: record,
        })
    }

    fn attach(&mut self, node: Node) -> Result<NodeId, TreeError> {
        let father = self.tail;
        // Reserve room in the father's child list first so that a failed
        // allocation leaves the tree untouched.
        match self.node_mut(father) {
            Some(Node::Internal { children, .. }) => children
                .try_reserve(1)
                .map_err(|_| StoreError::OutOfMemory { requested: 1 })?,
            _ => return Err(TreeError::UnknownNode(father)),
        }

        let id = NodeId(self.nodes.emplace(node)? + 1);
        if let Some(Node::Internal { children, .. }) = self.node_mut(father) {
            children.push(id);
        }
        Ok(id)
    }

    /// Move the cursor back to its father
    ///
    /// Fails with [`TreeError::InvalidState`] when no subtree is open: every
    /// `open_subtree` must be matched by exactly one `close_subtree`.
    pub fn close_subtree(&mut self) -> Result<NodeId, TreeError> {
        let closed = self.tail;
        let father = self
            .node(closed)
            .and_then(Node::father)
            .ok_or(TreeError::InvalidState)?;
        self.tail = father;
        Ok(closed)
    }

    /// Close the subtree `expected`, which must be the innermost open one
    pub fn close_subtree_at(&mut self, expected: NodeId) -> Result<(), TreeError> {
        if self.tail.is_root() {
            return Err(TreeError::InvalidState);
        }
        if self.tail != expected {
            return Err(TreeError::OutOfOrder {
                expected,
                actual: self.tail,
            });
        }
        self.close_subtree().map(|_| ())
    }

    /// Close `expected` together with every subtree still open inside it
    ///
    /// Returns the number of subtrees closed. Fails with
    /// [`TreeError::NotOpen`] (leaving the cursor untouched) when `expected`
    /// is not on the open path.
    pub fn unwind_to(&mut self, expected: NodeId) -> Result<usize, TreeError> {
        if expected.is_root() || !self.open_path().contains(&expected) {
            return Err(TreeError::NotOpen(expected));
        }
        let mut closed = 0;
        loop {
            let id = self.close_subtree()?;
            closed += 1;
            if id == expected {
                return Ok(closed);
            }
        }
    }

    /// Add `elapsed` to `from` and every ancestor above it, root excluded
    ///
    /// Totals saturate at `Duration::MAX`.
    pub fn bubble(&mut self, from: NodeId, elapsed: Duration) {
        let mut cursor = from;
        while !cursor.is_root() {
            let Some(node) = self.node_mut(cursor) else {
                return;
            };
            let total = &mut node.value_mut().elapsed;
            *total = total.saturating_add(elapsed);
            cursor = node.father().unwrap_or(NodeId::ROOT);
        }
    }

    /// True when no subtree is open
    pub fn is_root(&self) -> bool {
        self.tail.is_root()
    }

    /// Number of nodes ever added (the root is not counted)
    pub fn size(&self) -> usize {
        self.nodes.len()
    }

    /// The innermost open internal node
    pub fn cursor(&self) -> NodeId {
        self.tail
    }

    /// Ids of the open internal nodes, innermost first, root excluded
    pub fn open_path(&self) -> Vec<NodeId> {
        let mut path = Vec::new();
        let mut cursor = self.tail;
        while !cursor.is_root() {
            path.push(cursor);
            cursor = self
                .node(cursor)
                .and_then(Node::father)
                .unwrap_or(NodeId::ROOT);
        }
        path
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        match id.slot() {
            None => Some(&self.root),
            Some(slot) => self.nodes.get(slot),
        }
    }

    fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        match id.slot() {
            None => Some(&mut self.root),
            Some(slot) => self.nodes.get_mut(slot),
        }
    }

    pub fn record(&self, id: NodeId) -> Option<&Record> {
        self.node(id).map(Node::value)
    }

    /// Mutable access to a record, e.g. to annotate an open subtree
    pub fn record_mut(&mut self, id: NodeId) -> Option<&mut Record> {
        self.node_mut(id).map(Node::value_mut)
    }

    /// Most recently added node
    pub fn last(&self) -> Option<(NodeId, &Node)> {
        let len = self.nodes.len();
        self.nodes.last().map(|node| (NodeId(len), node))
    }

    /// Top level nodes (children of the sentinel root)
    pub fn top_level(&self) -> &[NodeId] {
        self.root.children()
    }

    /// Depth-first, pre-order walk starting below the root
    ///
    /// Children are visited in insertion order. The sentinel root itself is
    /// never reported.
    pub fn traverse<V: TreeVisitor>(&self, visitor: &mut V) -> Result<(), V::Error> {
        let mut stack: Vec<(Option<&Record>, std::slice::Iter<'_, NodeId>)> =
            vec![(None, self.root.children().iter())];

        loop {
            let Some((_, pending)) = stack.last_mut() else {
                break;
            };
            let Some(id) = pending.next().copied() else {
                if let Some((Some(finished), _)) = stack.pop() {
                    visitor.leave_internal(finished)?;
                }
                continue;
            };

            match self.node(id) {
                Some(Node::Leaf { value, .. }) => visitor.visit_leaf(value)?,
                Some(Node::Internal {
                    value, children, ..
                }) => {
                    visitor.enter_internal(value)?;
                    stack.push((Some(value), children.iter()));
                }
                None => {}
            }
        }
        Ok(())
    }
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;

    /// Records the visit order as `(depth, kind, name)`
    #[derive(Default)]
    struct Collect {
        depth: usize,
        seen: Vec<(usize, char, String)>,
    }

    impl TreeVisitor for Collect {
        type Error = Infallible;

        fn visit_leaf(&mut self, record: &Record) -> Result<(), Infallible> {
            self.seen.push((self.depth, 'L', record.name.to_string()));
            Ok(())
        }

        fn enter_internal(&mut self, record: &Record) -> Result<(), Infallible> {
            self.seen.push((self.depth, 'I', record.name.to_string()));
            self.depth += 1;
            Ok(())
        }

        fn leave_internal(&mut self, _record: &Record) -> Result<(), Infallible> {
            self.depth -= 1;
            Ok(())
        }
    }

    fn ns(n: u64) -> Duration {
        Duration::from_nanos(n)
    }

    #[test]
    fn test_new_tree_is_at_root() {
        let tree = Tree::new();
        assert!(tree.is_root());
        assert_eq!(tree.size(), 0);
        assert_eq!(tree.cursor(), NodeId::ROOT);
        assert!(tree.top_level().is_empty());
        assert!(tree.last().is_none());
    }

    #[test]
    fn test_open_add_close() {
        let mut tree = Tree::new();
        let bunch = tree.open_subtree(Record::new("bunch")).unwrap();
        assert_eq!(tree.cursor(), bunch);
        assert!(!tree.is_root());

        let leaf = tree.add_leaf(Record::new("scope")).unwrap();
        assert_eq!(tree.cursor(), bunch);
        assert_eq!(tree.node(leaf).unwrap().father(), Some(bunch));

        assert_eq!(tree.close_subtree().unwrap(), bunch);
        assert!(tree.is_root());
        assert_eq!(tree.size(), 2);
        assert_eq!(tree.node(bunch).unwrap().children(), &[leaf]);
    }

    #[test]
    fn test_close_on_root_is_invalid_state() {
        let mut tree = Tree::new();
        assert_eq!(tree.close_subtree(), Err(TreeError::InvalidState));

        tree.open_subtree(Record::new("a")).unwrap();
        tree.close_subtree().unwrap();
        assert_eq!(tree.close_subtree(), Err(TreeError::InvalidState));
    }

    #[test]
    fn test_close_subtree_at_checks_order() {
        let mut tree = Tree::new();
        let outer = tree.open_subtree(Record::new("outer")).unwrap();
        let inner = tree.open_subtree(Record::new("inner")).unwrap();

        assert_eq!(
            tree.close_subtree_at(outer),
            Err(TreeError::OutOfOrder {
                expected: outer,
                actual: inner
            })
        );
        // A rejected close leaves the cursor where it was
        assert_eq!(tree.cursor(), inner);

        tree.close_subtree_at(inner).unwrap();
        tree.close_subtree_at(outer).unwrap();
        assert_eq!(tree.close_subtree_at(outer), Err(TreeError::InvalidState));
    }

    #[test]
    fn test_bubble_stops_below_root() {
        let mut tree = Tree::new();
        let a = tree.open_subtree(Record::new("a")).unwrap();
        let b = tree.open_subtree(Record::new("b")).unwrap();
        tree.add_leaf(Record::new("leaf").with_elapsed(ns(40))).unwrap();
        tree.bubble(tree.cursor(), ns(40));

        assert_eq!(tree.record(a).unwrap().elapsed, ns(40));
        assert_eq!(tree.record(b).unwrap().elapsed, ns(40));
        assert_eq!(tree.record(NodeId::ROOT).unwrap().elapsed, Duration::ZERO);
    }

    #[test]
    fn test_bubble_saturates() {
        let mut tree = Tree::new();
        let a = tree.open_subtree(Record::new("a")).unwrap();
        tree.add_leaf(Record::new("huge").with_elapsed(Duration::MAX))
            .unwrap();
        tree.bubble(a, Duration::MAX);
        tree.add_leaf(Record::new("more").with_elapsed(ns(1))).unwrap();
        tree.bubble(a, ns(1));
        assert_eq!(tree.record(a).unwrap().elapsed, Duration::MAX);
    }

    #[test]
    fn test_unwind_to_closes_nested_subtrees() {
        let mut tree = Tree::new();
        let outer = tree.open_subtree(Record::new("outer")).unwrap();
        let middle = tree.open_subtree(Record::new("middle")).unwrap();
        tree.open_subtree(Record::new("inner")).unwrap();

        assert_eq!(tree.unwind_to(middle), Ok(2));
        assert_eq!(tree.cursor(), outer);

        // Already closed: rejected, cursor untouched
        assert_eq!(tree.unwind_to(middle), Err(TreeError::NotOpen(middle)));
        assert_eq!(tree.unwind_to(NodeId::ROOT), Err(TreeError::NotOpen(NodeId::ROOT)));
        assert_eq!(tree.cursor(), outer);

        assert_eq!(tree.unwind_to(outer), Ok(1));
        assert!(tree.is_root());
    }

    #[test]
    fn test_open_path_innermost_first() {
        let mut tree = Tree::new();
        let a = tree.open_subtree(Record::new("a")).unwrap();
        tree.add_leaf(Record::new("x")).unwrap();
        let b = tree.open_subtree(Record::new("b")).unwrap();
        assert_eq!(tree.open_path(), vec![b, a]);
    }

    #[test]
    fn test_traverse_pre_order() {
        let mut tree = Tree::new();
        tree.add_leaf(Record::new("first")).unwrap();
        tree.open_subtree(Record::new("outer")).unwrap();
        tree.add_leaf(Record::new("o1")).unwrap();
        tree.open_subtree(Record::new("inner")).unwrap();
        tree.add_leaf(Record::new("i1")).unwrap();
        tree.close_subtree().unwrap();
        tree.add_leaf(Record::new("o2")).unwrap();
        tree.close_subtree().unwrap();
        tree.open_subtree(Record::new("empty")).unwrap();

        let mut visitor = Collect::default();
        tree.traverse(&mut visitor).unwrap();

        let expected = [
            (0, 'L', "first"),
            (0, 'I', "outer"),
            (1, 'L', "o1"),
            (1, 'I', "inner"),
            (2, 'L', "i1"),
            (1, 'L', "o2"),
            (0, 'I', "empty"),
        ];
        let seen: Vec<_> = visitor
            .seen
            .iter()
            .map(|(d, k, n)| (*d, *k, n.as_str()))
            .collect();
        assert_eq!(seen, expected);
        assert_eq!(visitor.depth, 0);
    }

    #[test]
    fn test_record_addresses_survive_growth() {
        let mut tree = Tree::with_chunk_capacity(1);
        let bunch = tree.open_subtree(Record::new("bunch")).unwrap();
        let before = tree.record(bunch).unwrap() as *const Record;

        for i in 0..1_000 {
            tree.add_leaf(Record::new(format!("leaf-{i}"))).unwrap();
        }

        let after = tree.record(bunch).unwrap() as *const Record;
        assert!(std::ptr::eq(before, after));
        assert_eq!(tree.record(bunch).unwrap().name, "bunch");
    }

    #[test]
    fn test_last_reports_most_recent_node() {
        let mut tree = Tree::new();
        tree.open_subtree(Record::new("bunch")).unwrap();
        let leaf = tree.add_leaf(Record::new("scope")).unwrap();

        let (id, node) = tree.last().unwrap();
        assert_eq!(id, leaf);
        assert_eq!(node.as_leaf().map(|r| &*r.name), Some("scope"));
        assert!(node.as_internal().is_none());
    }

    #[test]
    fn test_record_mut_annotates_open_subtree() {
        let mut tree = Tree::new();
        let bunch = tree.open_subtree(Record::new("bunch")).unwrap();
        tree.add_leaf(Record::new("scope")).unwrap();
        tree.record_mut(bunch).unwrap().add_comment("N", 3);
        assert_eq!(tree.record(bunch).unwrap().comment("N"), Some("3"));
    }
}
