//! Test-only helpers for building configs and inspecting traces.

use std::path::Path;

use crate::config::{AgentConfig, StepSpec};
use crate::node::NodeSnapshot;

/// Step with no wait: completes immediately.
pub fn step(name: &str) -> StepSpec {
    StepSpec::new(name, 0)
}

/// Config writing all artifacts under `dir`, running the given steps.
pub fn config_in(dir: &Path, steps: Vec<StepSpec>) -> AgentConfig {
    AgentConfig {
        trace_path: dir.join("trace.json"),
        log_path: dir.join("agent.log"),
        poll_interval_ms: 10,
        steps,
    }
}

/// Names along the first-child chain from `root` downward.
pub fn chain_names(root: &NodeSnapshot) -> Vec<String> {
    let mut names = vec![root.name.clone()];
    let mut node = root;
    while let Some(child) = node.children.first() {
        names.push(child.name.clone());
        node = child;
    }
    names
}

/// The deepest node along the first-child chain.
pub fn deepest(root: &NodeSnapshot) -> &NodeSnapshot {
    let mut node = root;
    while let Some(child) = node.children.first() {
        node = child;
    }
    node
}
