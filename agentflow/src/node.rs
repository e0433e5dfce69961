//! Trace nodes and the arena that owns them.
//!
//! Each step of a run is recorded as a [`TraceNode`]: a lifecycle state, the
//! time of its most recent transition, open metadata, and its children. Nodes
//! live in a per-flow [`TraceArena`] and refer to each other by [`NodeId`];
//! `children` lists are owning, `parent` is a non-owning back-reference.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, error, info};

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate a process-unique node id.
///
/// Ids come from a monotonic counter, so they stay unique even when nodes are
/// constructed concurrently from several threads.
fn next_node_id() -> String {
    let n = NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed);
    format!("node-{n}")
}

/// Handle to a node within its flow's [`TraceArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

/// Lifecycle state of a trace node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeState {
    Idle,
    Active,
    Processing,
    Waiting,
    Completed,
    Error,
}

/// One recorded step of execution.
#[derive(Debug, Clone)]
pub struct TraceNode {
    /// Process-unique id, assigned at construction.
    pub id: String,
    /// Caller-supplied label. Not unique.
    pub name: String,
    pub state: NodeState,
    /// Time of the most recent state transition.
    pub timestamp: DateTime<Utc>,
    /// Open key/value annotations. No schema is enforced here.
    pub metadata: Map<String, Value>,
    /// Child nodes in activation order.
    pub children: Vec<NodeId>,
    /// Back-reference to the owning parent. Maintained for structural
    /// integrity; not used for traversal today.
    pub parent: Option<NodeId>,
}

impl TraceNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: next_node_id(),
            name: name.into(),
            state: NodeState::Idle,
            timestamp: Utc::now(),
            metadata: Map::new(),
            children: Vec::new(),
            parent: None,
        }
    }

    /// Unchecked assignment: any state may move to any other state.
    fn set_state(&mut self, state: NodeState) {
        self.state = state;
        self.timestamp = Utc::now();
    }

    pub fn activate(&mut self) {
        self.set_state(NodeState::Active);
        info!(name = %self.name, id = %self.id, "node activated");
    }

    pub fn start_processing(&mut self) {
        self.set_state(NodeState::Processing);
        debug!(name = %self.name, "node processing");
    }

    pub fn wait(&mut self) {
        self.set_state(NodeState::Waiting);
        debug!(name = %self.name, "node waiting");
    }

    pub fn complete(&mut self) {
        self.set_state(NodeState::Completed);
        info!(name = %self.name, "node completed");
    }

    pub fn fail(&mut self) {
        self.set_state(NodeState::Error);
        error!(name = %self.name, "node errored");
    }
}

/// Owns every node recorded for one flow.
///
/// Ids are only issued by [`TraceArena::insert`] and nodes are never removed,
/// so lookups by id are infallible.
#[derive(Debug, Default)]
pub struct TraceArena {
    nodes: Vec<TraceNode>,
}

impl TraceArena {
    pub fn insert(&mut self, node: TraceNode) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(node);
        id
    }

    pub fn get(&self, id: NodeId) -> &TraceNode {
        &self.nodes[id.0]
    }

    pub fn get_mut(&mut self, id: NodeId) -> &mut TraceNode {
        &mut self.nodes[id.0]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Attach `child` under `parent`: set the back-reference and append to the
    /// parent's children. The caller must not attach a node twice or under one
    /// of its own descendants; no cycle check is performed.
    pub fn attach(&mut self, parent: NodeId, child: NodeId) {
        self.nodes[child.0].parent = Some(parent);
        self.nodes[parent.0].children.push(child);
    }

    /// Render the subtree rooted at `id`.
    ///
    /// Pure: timestamps are formatted, never re-stamped, so repeated snapshots
    /// of an unchanged tree are identical.
    pub fn snapshot(&self, id: NodeId) -> NodeSnapshot {
        let node = self.get(id);
        NodeSnapshot {
            node_id: node.id.clone(),
            name: node.name.clone(),
            state: node.state,
            timestamp: node.timestamp.to_rfc3339(),
            metadata: node.metadata.clone(),
            children: node.children.iter().map(|&c| self.snapshot(c)).collect(),
        }
    }
}

/// Serialized form of a node subtree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub node_id: String,
    pub name: String,
    pub state: NodeState,
    /// RFC 3339 rendering of the node's last transition time.
    pub timestamp: String,
    pub metadata: Map<String, Value>,
    pub children: Vec<NodeSnapshot>,
}

impl NodeSnapshot {
    /// Total nodes in this subtree, including self.
    pub fn node_count(&self) -> usize {
        1 + self
            .children
            .iter()
            .map(NodeSnapshot::node_count)
            .sum::<usize>()
    }
}
