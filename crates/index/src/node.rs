//! Tree nodes and their stored form

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tessera_core::{BitSequence, ObjectRef, Stored};

/// Child pointer of a node
#[derive(Debug, Clone)]
pub(crate) enum Link {
    Empty,
    /// Saved node, loaded on first touch
    Committed { id: ObjectRef, height: u32 },
    /// In-memory node not yet saved
    Pending(Arc<Node>),
}

impl Link {
    pub(crate) fn pending(node: Node) -> Self {
        Link::Pending(Arc::new(node))
    }

    pub(crate) fn leaf(key: BitSequence, value: Stored) -> Self {
        Link::pending(Node {
            key,
            value,
            left: Link::Empty,
            right: Link::Empty,
            height: 1,
        })
    }

    pub(crate) fn height(&self) -> u32 {
        match self {
            Link::Empty => 0,
            Link::Committed { height, .. } => *height,
            Link::Pending(node) => node.height,
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        matches!(self, Link::Empty)
    }

    fn to_record(&self) -> Option<ChildRecord> {
        match self {
            Link::Committed { id, height } => Some(ChildRecord {
                id: *id,
                height: *height,
            }),
            _ => None,
        }
    }
}

/// Index node
///
/// Nodes are never mutated once shared; edits clone the node first.
#[derive(Debug, Clone)]
pub(crate) struct Node {
    pub(crate) key: BitSequence,
    pub(crate) value: Stored,
    pub(crate) left: Link,
    pub(crate) right: Link,
    pub(crate) height: u32,
}

impl Node {
    pub(crate) fn update_height(&mut self) {
        self.height = 1 + self.left.height().max(self.right.height());
    }

    /// Left height minus right height
    pub(crate) fn balance(&self) -> i64 {
        self.left.height() as i64 - self.right.height() as i64
    }

    /// Stored form; both children must already be committed or empty
    pub(crate) fn to_record(&self) -> NodeRecord {
        NodeRecord {
            key: self.key.clone(),
            value: self.value.clone(),
            left: self.left.to_record(),
            right: self.right.to_record(),
        }
    }

    pub(crate) fn from_record(record: NodeRecord) -> Self {
        let child = |c: Option<ChildRecord>| match c {
            Some(ChildRecord { id, height }) => Link::Committed { id, height },
            None => Link::Empty,
        };
        let mut node = Node {
            key: record.key,
            value: record.value,
            left: child(record.left),
            right: child(record.right),
            height: 0,
        };
        node.update_height();
        node
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub(crate) struct ChildRecord {
    pub(crate) id: ObjectRef,
    pub(crate) height: u32,
}

/// On-disk node (MessagePack)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct NodeRecord {
    pub(crate) key: BitSequence,
    pub(crate) value: Stored,
    pub(crate) left: Option<ChildRecord>,
    pub(crate) right: Option<ChildRecord>,
}
