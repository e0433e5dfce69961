//! Flow controller: concurrency-safe mutation of one trace tree.
//!
//! Every public operation locks a single coarse mutex for its full duration
//! and delegates to an unlocked inner core, so nested operations never
//! re-acquire the lock. Reads take the same lock as mutations and therefore
//! observe every completed write.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::export::{TraceDocument, write_trace};
use crate::node::{NodeId, NodeSnapshot, TraceArena, TraceNode};

/// Sequencing errors for flow mutations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowError {
    /// `start()` was called on a flow that already started.
    AlreadyStarted,
    /// A node operation was attempted before `start()`.
    NotStarted,
}

impl std::fmt::Display for FlowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlreadyStarted => write!(f, "flow already started"),
            Self::NotStarted => write!(f, "flow not started"),
        }
    }
}

impl std::error::Error for FlowError {}

/// Result of a trace read: the rendered tree, or a sentinel for a flow that
/// was queried before `start()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TraceBody {
    Tree(NodeSnapshot),
    NotStarted { error: String },
}

impl TraceBody {
    fn not_started() -> Self {
        Self::NotStarted {
            error: "flow not started".to_string(),
        }
    }

    /// The rendered tree, if the flow had started at read time.
    pub fn tree(&self) -> Option<&NodeSnapshot> {
        match self {
            Self::Tree(root) => Some(root),
            Self::NotStarted { .. } => None,
        }
    }
}

struct FlowInner {
    arena: TraceArena,
    root: Option<NodeId>,
    /// Node new steps attach under; advances to each newly created node.
    cursor: Option<NodeId>,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
}

impl FlowInner {
    /// Core of `add_node`, called with the flow lock already held.
    fn add_node(&mut self, name: &str) -> Result<NodeId, FlowError> {
        let cursor = self.cursor.ok_or(FlowError::NotStarted)?;
        let id = self.arena.insert(TraceNode::new(name));
        self.arena.attach(cursor, id);
        self.arena.get_mut(id).activate();
        self.cursor = Some(id);
        info!(name, "node added");
        Ok(id)
    }

    fn trace_body(&self) -> TraceBody {
        match self.root {
            Some(root) => TraceBody::Tree(self.arena.snapshot(root)),
            None => TraceBody::not_started(),
        }
    }
}

/// Controller for one run's trace tree.
pub struct Flow {
    name: String,
    inner: Mutex<FlowInner>,
}

impl Flow {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(FlowInner {
                arena: TraceArena::default(),
                root: None,
                cursor: None,
                start_time: None,
                end_time: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Acquire the flow lock. The guard is recovered even if a holder
    /// panicked; the tree stays structurally valid across any single call.
    fn lock(&self) -> MutexGuard<'_, FlowInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Start the flow: create and activate the root node and record the start
    /// time. A second call is rejected.
    pub fn start(&self) -> Result<(), FlowError> {
        let mut inner = self.lock();
        if inner.start_time.is_some() {
            return Err(FlowError::AlreadyStarted);
        }
        inner.start_time = Some(Utc::now());
        let root = inner
            .arena
            .insert(TraceNode::new(format!("{}_root", self.name)));
        inner.arena.get_mut(root).activate();
        inner.root = Some(root);
        inner.cursor = Some(root);
        info!(flow = %self.name, "flow started");
        Ok(())
    }

    /// Append a node under the cursor, activate it, and advance the cursor to
    /// it. Fails with [`FlowError::NotStarted`] before `start()`.
    pub fn add_node(&self, name: &str) -> Result<NodeId, FlowError> {
        self.lock().add_node(name)
    }

    /// Add a node and process it.
    ///
    /// A positive `wait` suspends the calling thread (holding the flow lock)
    /// and leaves the node `waiting`; a zero wait completes it immediately. A
    /// waited node is only swept to `completed` by a later `end()`, and then
    /// only if it is still the cursor.
    pub fn process_node(&self, name: &str, wait: Duration) -> Result<NodeId, FlowError> {
        let mut inner = self.lock();
        let id = inner.add_node(name)?;
        inner.arena.get_mut(id).start_processing();
        if wait > Duration::ZERO {
            thread::sleep(wait);
            inner.arena.get_mut(id).wait();
        } else {
            inner.arena.get_mut(id).complete();
        }
        Ok(id)
    }

    /// Suspend the calling thread for `duration`, then mark the cursor
    /// `waiting` if one exists. Does not create a node. The sleep happens
    /// outside the lock, so other threads may mutate the tree meanwhile.
    pub fn wait(&self, duration: Duration) {
        debug!(seconds = duration.as_secs_f64(), "waiting");
        thread::sleep(duration);
        let mut inner = self.lock();
        if let Some(cursor) = inner.cursor {
            inner.arena.get_mut(cursor).wait();
        }
    }

    /// End the flow: record the end time and complete the cursor and the root
    /// independently. Nodes between root and cursor keep whatever state they
    /// were left in. Safe before `start()` and safe to call twice.
    pub fn end(&self) {
        let mut inner = self.lock();
        inner.end_time = Some(Utc::now());
        if let Some(cursor) = inner.cursor {
            inner.arena.get_mut(cursor).complete();
        }
        if let Some(root) = inner.root {
            inner.arena.get_mut(root).complete();
        }
        let duration_secs = match (inner.start_time, inner.end_time) {
            (Some(start), Some(end)) => (end - start).num_milliseconds() as f64 / 1000.0,
            _ => 0.0,
        };
        info!(flow = %self.name, duration_secs, "flow ended");
    }

    /// Mark the cursor node `Error`, if one exists.
    pub fn fail_current(&self) {
        let mut inner = self.lock();
        if let Some(cursor) = inner.cursor {
            inner.arena.get_mut(cursor).fail();
        }
    }

    /// Attach an open metadata value to a node of this flow. No schema is
    /// enforced; the id must have been issued by this flow.
    pub fn set_metadata(&self, id: NodeId, key: impl Into<String>, value: Value) {
        let mut inner = self.lock();
        inner.arena.get_mut(id).metadata.insert(key.into(), value);
    }

    /// Render the full trace tree, or the "not started" sentinel if the flow
    /// has no root yet. Takes the flow lock, so a snapshot never observes a
    /// mutation in flight.
    pub fn get_trace(&self) -> TraceBody {
        self.lock().trace_body()
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.lock().start_time
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.lock().end_time
    }

    /// Export the trace document for this flow to `path`, overwriting any
    /// existing file. The snapshot and both times are read under one lock
    /// acquisition. I/O failures propagate to the caller.
    pub fn export_trace(&self, path: &Path) -> Result<()> {
        let document = {
            let inner = self.lock();
            TraceDocument {
                agent_name: self.name.clone(),
                start_time: inner.start_time.map(|t| t.to_rfc3339()),
                end_time: inner.end_time.map(|t| t.to_rfc3339()),
                trace: inner.trace_body(),
            }
        };
        write_trace(path, &document)?;
        info!(path = %path.display(), "trace exported");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::node::NodeState;

    #[test]
    fn start_creates_activated_root() {
        let flow = Flow::new("demo");
        flow.start().expect("start");

        let trace = flow.get_trace();
        let root = trace.tree().expect("tree");
        assert_eq!(root.name, "demo_root");
        assert_eq!(root.state, NodeState::Active);
        assert!(root.children.is_empty());
        assert!(flow.start_time().is_some());
        assert!(flow.end_time().is_none());
    }

    #[test]
    fn start_twice_is_rejected() {
        let flow = Flow::new("demo");
        flow.start().expect("start");
        assert_eq!(flow.start(), Err(FlowError::AlreadyStarted));
    }

    #[test]
    fn add_node_before_start_is_rejected() {
        let flow = Flow::new("demo");
        assert_eq!(flow.add_node("orphan").unwrap_err(), FlowError::NotStarted);
        assert_eq!(
            flow.process_node("orphan", Duration::ZERO).unwrap_err(),
            FlowError::NotStarted
        );
    }

    #[test]
    fn get_trace_before_start_returns_sentinel() {
        let flow = Flow::new("demo");
        let trace = flow.get_trace();
        assert!(trace.tree().is_none());
        let value = serde_json::to_value(&trace).expect("to value");
        assert_eq!(value, serde_json::json!({"error": "flow not started"}));
    }

    #[test]
    fn nodes_nest_under_the_previous_step() {
        let flow = Flow::new("demo");
        flow.start().expect("start");
        flow.add_node("first").expect("add first");
        flow.add_node("second").expect("add second");

        let trace = flow.get_trace();
        let root = trace.tree().expect("tree");
        assert_eq!(root.children.len(), 1);
        assert_eq!(root.children[0].name, "first");
        assert_eq!(root.children[0].children.len(), 1);
        assert_eq!(root.children[0].children[0].name, "second");
    }

    #[test]
    fn process_node_without_wait_completes() {
        let flow = Flow::new("demo");
        flow.start().expect("start");
        flow.process_node("X", Duration::ZERO).expect("process");

        let trace = flow.get_trace();
        let node = &trace.tree().expect("tree").children[0];
        assert_eq!(node.state, NodeState::Completed);
    }

    #[test]
    fn process_node_with_wait_is_left_waiting() {
        let flow = Flow::new("demo");
        flow.start().expect("start");
        flow.process_node("X", Duration::from_millis(50))
            .expect("process");

        let trace = flow.get_trace();
        let node = &trace.tree().expect("tree").children[0];
        assert_eq!(node.state, NodeState::Waiting);
    }

    #[test]
    fn wait_marks_cursor_waiting() {
        let flow = Flow::new("demo");
        flow.start().expect("start");
        flow.add_node("step").expect("add");
        flow.wait(Duration::from_millis(10));

        let trace = flow.get_trace();
        let node = &trace.tree().expect("tree").children[0];
        assert_eq!(node.state, NodeState::Waiting);
    }

    #[test]
    fn end_completes_cursor_and_root_only() {
        let flow = Flow::new("demo");
        flow.start().expect("start");
        flow.process_node("middle", Duration::from_millis(10))
            .expect("process");
        flow.add_node("last").expect("add");
        flow.end();

        let trace = flow.get_trace();
        let root = trace.tree().expect("tree");
        assert_eq!(root.state, NodeState::Completed);
        // The intermediate node keeps its last state; only cursor and root
        // are swept.
        assert_eq!(root.children[0].state, NodeState::Waiting);
        assert_eq!(root.children[0].children[0].state, NodeState::Completed);
    }

    #[test]
    fn full_run_yields_completed_three_node_chain() {
        let flow = Flow::new("agent");
        flow.start().expect("start");
        flow.process_node("Initialize", Duration::ZERO)
            .expect("process");
        flow.process_node("LoadConfig", Duration::ZERO)
            .expect("process");
        flow.end();

        let trace = flow.get_trace();
        let root = trace.tree().expect("tree");
        assert_eq!(root.node_count(), 3);
        assert_eq!(root.children.len(), 1);
        let init = &root.children[0];
        assert_eq!(init.name, "Initialize");
        assert_eq!(init.state, NodeState::Completed);
        assert_eq!(init.children.len(), 1);
        let load = &init.children[0];
        assert_eq!(load.name, "LoadConfig");
        assert_eq!(load.state, NodeState::Completed);
        assert!(load.children.is_empty());
    }

    #[test]
    fn end_twice_is_safe_and_duration_never_negative() {
        let flow = Flow::new("demo");
        flow.start().expect("start");
        flow.end();
        let first_end = flow.end_time().expect("end time");
        flow.end();
        let second_end = flow.end_time().expect("end time");
        assert!(second_end >= first_end);
        assert!(second_end >= flow.start_time().expect("start time"));
    }

    #[test]
    fn end_before_start_sets_end_time_without_nodes() {
        let flow = Flow::new("demo");
        flow.end();
        assert!(flow.end_time().is_some());
        assert!(flow.get_trace().tree().is_none());
    }

    #[test]
    fn metadata_round_trips_through_snapshot() {
        let flow = Flow::new("demo");
        flow.start().expect("start");
        let id = flow.add_node("step").expect("add");
        flow.set_metadata(id, "attempt", serde_json::json!(1));

        let trace = flow.get_trace();
        let node = &trace.tree().expect("tree").children[0];
        assert_eq!(node.metadata["attempt"], serde_json::json!(1));
    }

    #[test]
    fn timestamps_do_not_change_on_serialization() {
        let flow = Flow::new("demo");
        flow.start().expect("start");
        flow.add_node("step").expect("add");

        let first = flow.get_trace();
        let second = flow.get_trace();
        assert_eq!(first, second);
    }

    #[test]
    fn concurrent_add_node_keeps_the_tree_valid() {
        let flow = Arc::new(Flow::new("demo"));
        flow.start().expect("start");

        let handles: Vec<_> = ["left", "right"]
            .into_iter()
            .map(|name| {
                let flow = Arc::clone(&flow);
                std::thread::spawn(move || flow.add_node(name).expect("add"))
            })
            .collect();
        for handle in handles {
            handle.join().expect("join");
        }

        // The lock serializes both insertions: whichever lands first becomes
        // the cursor, so the second nests under it.
        let trace = flow.get_trace();
        let root = trace.tree().expect("tree");
        assert_eq!(root.node_count(), 3);
        assert_eq!(root.children.len(), 1);
        let first = &root.children[0];
        assert_eq!(first.children.len(), 1);
        let names: Vec<&str> = vec![first.name.as_str(), first.children[0].name.as_str()];
        assert!(names.contains(&"left") && names.contains(&"right"));
        assert!(crate::invariants::validate_invariants(root).is_empty());
    }
}
