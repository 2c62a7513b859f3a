//! Persistent AVL tree
//!
//! Keys are codec [`BitSequence`]s, values are [`Stored`] slots. The tree is
//! copy-on-write: a mutation copies every node on the root-to-leaf path into
//! a new pending node and rebalances on the way back up. Committed nodes are
//! never touched; they are loaded from storage on first use and cached for
//! the life of the handle.
//!
//! ## Lifecycle
//!
//! ```text
//! open(root_ref) ─▶ get / set / del / scan ─▶ commit() ─▶ new root_ref
//! ```
//!
//! `commit` saves pending nodes children-first and swaps the root link for
//! the committed one. Nothing is changed if a save fails, so a commit can be
//! retried. Mutations build their new path off to the side and install it
//! only on success, so a storage failure while loading a node leaves the
//! tree exactly as it was.
//!
//! A handle is owned by one serialized owner; it is `Send` but offers no
//! internal synchronization for concurrent mutation.

use crate::node::{Link, Node, NodeRecord};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::cmp::Ordering;
use std::collections::VecDeque;
use std::sync::Arc;
use tessera_core::{codec, BitSequence, Error, ObjectRef, Result, Stored};
use tessera_storage::{Storage, StorageExt};
use tracing::{debug, trace};

/// Visitor verdict during a scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scan {
    /// Visit the next entry
    Continue,
    /// End the scan
    Stop,
}

/// Traversal direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    /// Ascending key order
    #[default]
    Forward,
    /// Descending key order
    Backward,
}

/// Copy-on-write AVL tree backed by a [`Storage`]
pub struct PersistentTree {
    storage: Arc<dyn Storage>,
    root: Link,
    root_ref: Option<ObjectRef>,
    original_root_ref: Option<ObjectRef>,
    modified: bool,
    cache: Mutex<FxHashMap<ObjectRef, Arc<Node>>>,
}

impl PersistentTree {
    /// Create an empty tree
    pub fn empty(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            root: Link::Empty,
            root_ref: None,
            original_root_ref: None,
            modified: false,
            cache: Mutex::new(FxHashMap::default()),
        }
    }

    /// Open the tree rooted at `root_ref` (`None` = empty)
    ///
    /// The root node is loaded eagerly so a dangling ref fails here rather
    /// than on first use.
    pub fn open(storage: Arc<dyn Storage>, root_ref: Option<ObjectRef>) -> Result<Self> {
        let mut tree = Self::empty(storage);
        if let Some(id) = root_ref {
            let node = tree.load(id)?;
            tree.root = Link::Committed {
                id,
                height: node.height,
            };
        }
        tree.root_ref = root_ref;
        tree.original_root_ref = root_ref;
        Ok(tree)
    }

    /// Storage this tree reads from and commits to
    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Whether any set/del has changed the content since the tree was opened
    pub fn modified(&self) -> bool {
        self.modified
    }

    /// Root ref this handle was opened at
    pub fn original_root_ref(&self) -> Option<ObjectRef> {
        self.original_root_ref
    }

    /// Root ref of the last commit (or of the open, if never committed)
    pub fn root_ref(&self) -> Option<ObjectRef> {
        self.root_ref
    }

    /// Whether the tree has no entries
    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    /// Height of the tree (0 when empty)
    pub fn height(&self) -> u32 {
        self.root.height()
    }

    // ========================================================================
    // Point operations
    // ========================================================================

    /// Look up a key
    pub fn get(&self, key: &BitSequence) -> Result<Option<Stored>> {
        let mut link = self.root.clone();
        while let Some(node) = self.resolve(&link)? {
            link = match codec::compare(key, &node.key) {
                Ordering::Less => node.left.clone(),
                Ordering::Greater => node.right.clone(),
                Ordering::Equal => return Ok(Some(node.value.clone())),
            };
        }
        Ok(None)
    }

    /// Insert or replace a key, returning the previous value
    ///
    /// Rewriting a key with the same version it already holds leaves the
    /// tree (and `modified`) untouched.
    pub fn set(&mut self, key: BitSequence, value: Stored) -> Result<Option<Stored>> {
        if let Some(current) = self.get(&key)? {
            if current.same_version(&value) {
                return Ok(Some(current));
            }
        }
        let (root, previous) = self.insert(&self.root, key, value)?;
        self.root = root;
        self.modified = true;
        Ok(previous)
    }

    /// Remove a key, returning its value
    ///
    /// Removing an absent key leaves the tree (and `modified`) untouched.
    pub fn del(&mut self, key: &BitSequence) -> Result<Option<Stored>> {
        match self.remove(&self.root, key)? {
            Some((root, previous)) => {
                self.root = root;
                self.modified = true;
                Ok(Some(previous))
            }
            None => Ok(None),
        }
    }

    // ========================================================================
    // Traversal
    // ========================================================================

    /// Visit entries in ascending order starting at `from` (inclusive)
    pub fn scan_forward<F>(&self, from: Option<&BitSequence>, visit: F) -> Result<()>
    where
        F: FnMut(&BitSequence, &Stored) -> Result<Scan>,
    {
        self.scan(from, Direction::Forward, visit)
    }

    /// Visit entries in descending order starting at `to` (inclusive)
    pub fn scan_backward<F>(&self, to: Option<&BitSequence>, visit: F) -> Result<()>
    where
        F: FnMut(&BitSequence, &Stored) -> Result<Scan>,
    {
        self.scan(to, Direction::Backward, visit)
    }

    /// Visit entries in `direction` starting at `start` (inclusive)
    ///
    /// Only the nodes on the current path are held; a visitor returning
    /// [`Scan::Stop`] ends the walk without touching the rest of the tree.
    pub fn scan<F>(&self, start: Option<&BitSequence>, direction: Direction, mut visit: F) -> Result<()>
    where
        F: FnMut(&BitSequence, &Stored) -> Result<Scan>,
    {
        let mut stack = Vec::new();
        self.descend(&self.root, start, direction, &mut stack)?;
        while let Some(node) = stack.pop() {
            if visit(&node.key, &node.value)? == Scan::Stop {
                return Ok(());
            }
            let next = match direction {
                Direction::Forward => &node.right,
                Direction::Backward => &node.left,
            };
            self.descend(next, None, direction, &mut stack)?;
        }
        Ok(())
    }

    /// Nearest entry after `after` in `direction`
    ///
    /// With `after = None` this is the first (or last) entry. With
    /// `inclusive`, an entry equal to `after` qualifies. Cursors call this
    /// once per step so the tree may change between steps.
    pub fn seek(
        &self,
        after: Option<&BitSequence>,
        direction: Direction,
        inclusive: bool,
    ) -> Result<Option<(BitSequence, Stored)>> {
        let mut best: Option<Arc<Node>> = None;
        let mut link = self.root.clone();
        while let Some(node) = self.resolve(&link)? {
            let qualifies = match after {
                None => true,
                Some(bound) => {
                    let ord = codec::compare(&node.key, bound);
                    let beyond = match direction {
                        Direction::Forward => ord == Ordering::Greater,
                        Direction::Backward => ord == Ordering::Less,
                    };
                    beyond || (inclusive && ord == Ordering::Equal)
                }
            };
            let (toward, away) = match direction {
                Direction::Forward => (&node.left, &node.right),
                Direction::Backward => (&node.right, &node.left),
            };
            link = if qualifies { toward.clone() } else { away.clone() };
            if qualifies {
                best = Some(node);
            }
        }
        Ok(best.map(|node| (node.key.clone(), node.value.clone())))
    }

    /// Keys in breadth-first order
    pub fn level_order(&self) -> Result<Vec<BitSequence>> {
        let mut keys = Vec::new();
        let mut queue = VecDeque::from([self.root.clone()]);
        while let Some(link) = queue.pop_front() {
            if let Some(node) = self.resolve(&link)? {
                keys.push(node.key.clone());
                queue.push_back(node.left.clone());
                queue.push_back(node.right.clone());
            }
        }
        Ok(keys)
    }

    /// Check ordering, recorded heights and AVL balance of every node
    ///
    /// Returns the number of entries.
    pub fn validate(&self) -> Result<usize> {
        self.validate_link(&self.root, None, None).map(|(count, _)| count)
    }

    // ========================================================================
    // Commit
    // ========================================================================

    /// Save every pending node and return the new root ref
    ///
    /// Nodes are saved children first. On failure the tree keeps its pending
    /// state and the call can be repeated. With `release_node_cache` the
    /// loaded nodes are dropped and later reads go back to storage.
    pub fn commit(&mut self, release_node_cache: bool) -> Result<Option<ObjectRef>> {
        let mut saved = 0usize;
        let root = self.persist(&self.root, &mut saved)?;
        let root_ref = match &root {
            Link::Empty => None,
            Link::Committed { id, .. } => Some(*id),
            Link::Pending(_) => {
                return Err(Error::Corrupted(
                    "root still pending after commit".to_string(),
                ))
            }
        };
        self.root = root;
        self.root_ref = root_ref;
        if release_node_cache {
            self.cache.lock().clear();
        }
        debug!(root = ?root_ref, saved, "Committed index tree");
        Ok(root_ref)
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn load(&self, id: ObjectRef) -> Result<Arc<Node>> {
        if let Some(node) = self.cache.lock().get(&id) {
            return Ok(Arc::clone(node));
        }
        let record: NodeRecord = self.storage.load_record(id)?;
        let node = Arc::new(Node::from_record(record));
        trace!(node = %id, "Loaded index node");
        self.cache.lock().insert(id, Arc::clone(&node));
        Ok(node)
    }

    fn resolve(&self, link: &Link) -> Result<Option<Arc<Node>>> {
        match link {
            Link::Empty => Ok(None),
            Link::Pending(node) => Ok(Some(Arc::clone(node))),
            Link::Committed { id, .. } => self.load(*id).map(Some),
        }
    }

    fn child(&self, link: &Link) -> Result<Arc<Node>> {
        self.resolve(link)?
            .ok_or_else(|| Error::Corrupted("missing child during rebalance".to_string()))
    }

    fn insert(&self, link: &Link, key: BitSequence, value: Stored) -> Result<(Link, Option<Stored>)> {
        let Some(node) = self.resolve(link)? else {
            return Ok((Link::leaf(key, value), None));
        };
        let mut copy = Node::clone(&node);
        let previous = match codec::compare(&key, &node.key) {
            Ordering::Less => {
                let (left, previous) = self.insert(&node.left, key, value)?;
                copy.left = left;
                previous
            }
            Ordering::Greater => {
                let (right, previous) = self.insert(&node.right, key, value)?;
                copy.right = right;
                previous
            }
            Ordering::Equal => {
                copy.value = value;
                return Ok((Link::pending(copy), Some(node.value.clone())));
            }
        };
        Ok((Link::pending(self.rebalance(copy)?), previous))
    }

    /// `None` when the key is absent; the link is then unchanged.
    fn remove(&self, link: &Link, key: &BitSequence) -> Result<Option<(Link, Stored)>> {
        let Some(node) = self.resolve(link)? else {
            return Ok(None);
        };
        match codec::compare(key, &node.key) {
            Ordering::Less => {
                let Some((left, previous)) = self.remove(&node.left, key)? else {
                    return Ok(None);
                };
                let mut copy = Node::clone(&node);
                copy.left = left;
                Ok(Some((Link::pending(self.rebalance(copy)?), previous)))
            }
            Ordering::Greater => {
                let Some((right, previous)) = self.remove(&node.right, key)? else {
                    return Ok(None);
                };
                let mut copy = Node::clone(&node);
                copy.right = right;
                Ok(Some((Link::pending(self.rebalance(copy)?), previous)))
            }
            Ordering::Equal => {
                let replacement = if node.left.is_empty() {
                    node.right.clone()
                } else if node.right.is_empty() {
                    node.left.clone()
                } else {
                    let (right, key, value) = self.pop_min(&node.right)?;
                    let mut copy = Node::clone(&node);
                    copy.key = key;
                    copy.value = value;
                    copy.right = right;
                    Link::pending(self.rebalance(copy)?)
                };
                Ok(Some((replacement, node.value.clone())))
            }
        }
    }

    /// Detach the smallest entry of a non-empty subtree
    fn pop_min(&self, link: &Link) -> Result<(Link, BitSequence, Stored)> {
        let node = self.child(link)?;
        if node.left.is_empty() {
            return Ok((node.right.clone(), node.key.clone(), node.value.clone()));
        }
        let (left, key, value) = self.pop_min(&node.left)?;
        let mut copy = Node::clone(&node);
        copy.left = left;
        Ok((Link::pending(self.rebalance(copy)?), key, value))
    }

    fn rebalance(&self, mut node: Node) -> Result<Node> {
        node.update_height();
        let balance = node.balance();
        if balance > 1 {
            let left = self.child(&node.left)?;
            if left.left.height() < left.right.height() {
                node.left = Link::pending(self.rotate_left(Node::clone(&left))?);
            }
            return self.rotate_right(node);
        }
        if balance < -1 {
            let right = self.child(&node.right)?;
            if right.right.height() < right.left.height() {
                node.right = Link::pending(self.rotate_right(Node::clone(&right))?);
            }
            return self.rotate_left(node);
        }
        Ok(node)
    }

    fn rotate_right(&self, mut node: Node) -> Result<Node> {
        let pivot = self.child(&node.left)?;
        let mut top = Node::clone(&pivot);
        node.left = pivot.right.clone();
        node.update_height();
        top.right = Link::pending(node);
        top.update_height();
        Ok(top)
    }

    fn rotate_left(&self, mut node: Node) -> Result<Node> {
        let pivot = self.child(&node.right)?;
        let mut top = Node::clone(&pivot);
        node.right = pivot.left.clone();
        node.update_height();
        top.left = Link::pending(node);
        top.update_height();
        Ok(top)
    }

    /// Push the path toward `bound` (or the extreme end) onto `stack`
    fn descend(
        &self,
        link: &Link,
        bound: Option<&BitSequence>,
        direction: Direction,
        stack: &mut Vec<Arc<Node>>,
    ) -> Result<()> {
        let mut link = link.clone();
        while let Some(node) = self.resolve(&link)? {
            let within = match (bound, direction) {
                (None, _) => true,
                (Some(b), Direction::Forward) => node.key >= *b,
                (Some(b), Direction::Backward) => node.key <= *b,
            };
            let (toward, away) = match direction {
                Direction::Forward => (&node.left, &node.right),
                Direction::Backward => (&node.right, &node.left),
            };
            link = if within { toward.clone() } else { away.clone() };
            if within {
                stack.push(node);
            }
        }
        Ok(())
    }

    fn persist(&self, link: &Link, saved: &mut usize) -> Result<Link> {
        let Link::Pending(node) = link else {
            return Ok(link.clone());
        };
        let mut node = Node::clone(node);
        node.left = self.persist(&node.left, saved)?;
        node.right = self.persist(&node.right, saved)?;
        let id = self.storage.save_record(&node.to_record())?;
        *saved += 1;
        let height = node.height;
        self.cache.lock().insert(id, Arc::new(node));
        Ok(Link::Committed { id, height })
    }

    fn validate_link(
        &self,
        link: &Link,
        lower: Option<&BitSequence>,
        upper: Option<&BitSequence>,
    ) -> Result<(usize, u32)> {
        let Some(node) = self.resolve(link)? else {
            return Ok((0, 0));
        };
        if lower.is_some_and(|l| node.key <= *l) || upper.is_some_and(|u| node.key >= *u) {
            return Err(Error::Corrupted(format!("key {:?} out of order", node.key)));
        }
        let (left_count, left_height) = self.validate_link(&node.left, lower, Some(&node.key))?;
        let (right_count, right_height) = self.validate_link(&node.right, Some(&node.key), upper)?;

        let height = 1 + left_height.max(right_height);
        if height != node.height || left_height != node.left.height() || right_height != node.right.height() {
            return Err(Error::Corrupted(format!("stale height at key {:?}", node.key)));
        }
        if left_height.abs_diff(right_height) > 1 {
            return Err(Error::Corrupted(format!("unbalanced at key {:?}", node.key)));
        }
        Ok((left_count + right_count + 1, height))
    }
}

impl std::fmt::Debug for PersistentTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentTree")
            .field("root_ref", &self.root_ref)
            .field("original_root_ref", &self.original_root_ref)
            .field("modified", &self.modified)
            .field("height", &self.root.height())
            .finish()
    }
}
