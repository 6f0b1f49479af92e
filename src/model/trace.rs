//! Lineage of generation nodes.
//!
//! Nodes never hold their parent. Every node creation is recorded here as
//! `(id, parent_id, chunk)`, and lineage queries walk the parent ids back to the
//! root.

use dashmap::DashMap;

use super::chunk::Chunk;

pub type NodeId = u64;

#[derive(Debug, Clone, PartialEq)]
pub struct TraceNode {
    pub id: NodeId,
    pub parent_id: Option<NodeId>,
    /// The chunk that produced the node; `None` for nodes created by capture
    /// edits, block bookkeeping or echo changes.
    pub attr: Option<Chunk>,
}

/// Notification sent to a [`Renderer`] when an echoing node is created.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceMessage {
    pub trace_id: NodeId,
    pub parent_trace_id: Option<NodeId>,
    pub attr: Option<Chunk>,
}

/// Display sink for generation progress.
pub trait Renderer: Send + Sync {
    fn update(&self, message: TraceMessage);
}

/// Arena of trace nodes shared by a root and all its descendants.
#[derive(Debug, Default)]
pub struct TraceArena {
    nodes: DashMap<NodeId, TraceNode>,
}

impl TraceArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, id: NodeId, parent_id: Option<NodeId>, attr: Option<Chunk>) {
        self.nodes.insert(
            id,
            TraceNode {
                id,
                parent_id,
                attr,
            },
        );
    }

    pub fn get(&self, id: NodeId) -> Option<TraceNode> {
        self.nodes.get(&id).map(|node| node.value().clone())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes from `id` back to its root, child first.
    pub fn lineage(&self, id: NodeId) -> Vec<TraceNode> {
        let mut out = Vec::new();
        let mut next = Some(id);
        while let Some(id) = next {
            let Some(node) = self.get(id) else {
                break;
            };
            // Parents are always created before their children.
            if node.parent_id.is_some_and(|p| p >= id) {
                tracing::warn!(id, parent = ?node.parent_id, "trace parent is not older than its child");
                out.push(node);
                break;
            }
            next = node.parent_id;
            out.push(node);
        }
        out
    }
}
