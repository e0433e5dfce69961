//! Structural invariants not expressible via JSON Schema.

use std::collections::HashSet;

use crate::node::NodeSnapshot;

/// Check semantic invariants over a rendered trace tree:
/// - No duplicate node ids
/// - Non-empty node names
/// - Timestamps parse as RFC 3339
pub fn validate_invariants(root: &NodeSnapshot) -> Vec<String> {
    let mut errors = Vec::new();
    let mut seen = HashSet::new();
    validate_node(root, &mut seen, &mut errors, root.node_id.as_str());
    errors
}

fn validate_node(
    node: &NodeSnapshot,
    seen: &mut HashSet<String>,
    errors: &mut Vec<String>,
    path: &str,
) {
    if !seen.insert(node.node_id.clone()) {
        errors.push(format!("duplicate node id '{}' at {}", node.node_id, path));
    }

    if node.name.trim().is_empty() {
        errors.push(format!("{}: name must be non-empty", path));
    }

    if chrono::DateTime::parse_from_rfc3339(&node.timestamp).is_err() {
        errors.push(format!(
            "{}: timestamp '{}' is not RFC 3339",
            path, node.timestamp
        ));
    }

    for child in &node.children {
        let child_path = format!("{}/{}", path, child.node_id);
        validate_node(child, seen, errors, &child_path);
    }
}
