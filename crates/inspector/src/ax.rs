//! Accessibility snapshot builder.
//!
//! The protocol hands back one flat list of nodes linked by string ids. This
//! module rebuilds the tree, prunes ignored branches, and derives the two
//! lookup maps the tagging pass and the walker consume.

use std::collections::{HashMap, HashSet};

use fiberscope_core_types::SnapshotId;
use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::InspectorError;
use crate::model::{AdjacencyMap, AxNode, AxSnapshot, CorrelationEntry, CorrelationMap};
use crate::ports::InspectorPage;

/// Upper bound on nodes visited while rebuilding; malformed payloads with
/// cyclic child links terminate here instead of spinning.
const MAX_VISITED: usize = 50_000;

/// Fetch the full accessibility tree and rebuild it. Returns `None` when the
/// page exposes no accessibility tree at all (empty node list).
pub async fn take_snapshot(
    page: &dyn InspectorPage,
    verbose: bool,
) -> Result<Option<AxSnapshot>, InspectorError> {
    let nodes = page.full_ax_tree().await?;
    build_snapshot(&nodes, verbose)
}

/// Pure rebuild of a flat node list. Separated from the transport round trip
/// so tests can drive it with captured fixtures.
pub fn build_snapshot(
    nodes: &[Value],
    verbose: bool,
) -> Result<Option<AxSnapshot>, InspectorError> {
    if nodes.is_empty() {
        return Ok(None);
    }

    let mut by_id: HashMap<&str, &Value> = HashMap::with_capacity(nodes.len());
    let mut referenced: HashSet<&str> = HashSet::new();
    for node in nodes {
        let Some(id) = node.get("nodeId").and_then(Value::as_str) else {
            continue;
        };
        by_id.insert(id, node);
        if let Some(children) = node.get("childIds").and_then(Value::as_array) {
            for child in children {
                if let Some(child_id) = child.as_str() {
                    referenced.insert(child_id);
                }
            }
        }
    }

    // The root is the one node nobody lists as a child. Payloads that fail
    // to yield one are unusable.
    let root_raw = nodes.iter().find(|node| {
        node.get("nodeId")
            .and_then(Value::as_str)
            .is_some_and(|id| !referenced.contains(id))
    });
    let Some(root_raw) = root_raw else {
        return Err(InspectorError::Payload(
            "accessibility node list has no root".into(),
        ));
    };

    let snapshot_id = SnapshotId::new();
    let mut builder = TreeBuilder {
        by_id: &by_id,
        snapshot_id: &snapshot_id,
        verbose,
        counter: 0,
        visited: HashSet::new(),
        correlation: CorrelationMap::new(),
    };

    let Some(root) = builder.build(root_raw) else {
        // Root itself ignored with nothing underneath it worth keeping.
        return Ok(None);
    };

    let mut adjacency = AdjacencyMap::new();
    collect_adjacency(&root, &mut adjacency);

    debug!(
        target: "inspector",
        snapshot = %snapshot_id,
        nodes = builder.counter,
        correlated = builder.correlation.len(),
        "accessibility snapshot built"
    );

    let correlation = builder.correlation;
    Ok(Some(AxSnapshot {
        snapshot_id,
        root,
        correlation,
        adjacency,
    }))
}

struct TreeBuilder<'a> {
    by_id: &'a HashMap<&'a str, &'a Value>,
    snapshot_id: &'a SnapshotId,
    verbose: bool,
    counter: u64,
    visited: HashSet<String>,
    correlation: CorrelationMap,
}

impl TreeBuilder<'_> {
    fn build(&mut self, raw: &Value) -> Option<AxNode> {
        let node_id = raw.get("nodeId").and_then(Value::as_str)?;
        if !self.visited.insert(node_id.to_owned()) {
            warn!(target: "inspector", node = node_id, "cyclic accessibility child link, skipping");
            return None;
        }
        if self.visited.len() > MAX_VISITED {
            return None;
        }

        let ignored = raw
            .get("ignored")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if ignored && !self.verbose {
            return None;
        }

        let role = string_field(raw, "role").unwrap_or_else(|| "generic".into());
        let name = string_field(raw, "name").unwrap_or_default();
        let backend_ref = raw.get("backendDOMNodeId").and_then(Value::as_u64);

        if let Some(reference) = backend_ref {
            // First node wins; later duplicates keep their own tree position
            // but never overwrite the recorded role/name facts.
            self.correlation
                .entry(reference)
                .or_insert_with(|| CorrelationEntry {
                    role: role.clone(),
                    name: name.clone(),
                });
        }

        self.counter += 1;
        let id = format!("{}_{}", self.snapshot_id, self.counter);

        let mut children = Vec::new();
        if let Some(child_ids) = raw.get("childIds").and_then(Value::as_array) {
            for child_id in child_ids {
                let Some(child_id) = child_id.as_str() else {
                    continue;
                };
                // Dangling child ids are silently dropped.
                let Some(child_raw) = self.by_id.get(child_id) else {
                    continue;
                };
                if let Some(child) = self.build(child_raw) {
                    children.push(child);
                }
            }
        }

        Some(AxNode {
            id,
            role,
            name,
            value: string_field(raw, "value"),
            description: string_field(raw, "description"),
            disabled: bool_property(raw, "disabled"),
            focused: bool_property(raw, "focused"),
            expanded: bool_property(raw, "expanded"),
            selected: bool_property(raw, "selected"),
            required: bool_property(raw, "required"),
            backend_ref,
            children,
        })
    }
}

/// `{"role": {"value": "button"}}` style nested value extraction.
fn string_field(raw: &Value, field: &str) -> Option<String> {
    let text = raw.get(field)?.get("value")?.as_str()?;
    if text.is_empty() {
        None
    } else {
        Some(text.to_owned())
    }
}

fn bool_property(raw: &Value, name: &str) -> bool {
    let Some(properties) = raw.get("properties").and_then(Value::as_array) else {
        return false;
    };
    properties.iter().any(|prop| {
        prop.get("name").and_then(Value::as_str) == Some(name)
            && prop
                .get("value")
                .and_then(|v| v.get("value"))
                .and_then(Value::as_bool)
                == Some(true)
    })
}

/// For every node carrying a backend reference, record the backend
/// references of its nearest referenced descendants. Unreferenced
/// intermediate nodes are transparent.
fn collect_adjacency(node: &AxNode, adjacency: &mut AdjacencyMap) {
    if let Some(reference) = node.backend_ref {
        let mut children = Vec::new();
        for child in &node.children {
            nearest_refs(child, &mut children);
        }
        adjacency.entry(reference).or_insert(children);
    }
    for child in &node.children {
        collect_adjacency(child, adjacency);
    }
}

fn nearest_refs(node: &AxNode, out: &mut Vec<u64>) {
    if let Some(reference) = node.backend_ref {
        out.push(reference);
        return;
    }
    for child in &node.children {
        nearest_refs(child, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ax(node_id: &str, role: &str, name: &str, backend: Option<u64>, children: &[&str]) -> Value {
        json!({
            "nodeId": node_id,
            "ignored": false,
            "role": {"value": role},
            "name": {"value": name},
            "backendDOMNodeId": backend,
            "childIds": children,
        })
    }

    #[test]
    fn rebuilds_tree_and_maps_from_flat_list() {
        let nodes = vec![
            ax("1", "RootWebArea", "Demo", Some(10), &["2", "3"]),
            ax("2", "button", "Sign up", Some(20), &[]),
            ax("3", "link", "Docs", Some(30), &[]),
        ];

        let snapshot = build_snapshot(&nodes, false)
            .expect("valid payload")
            .expect("non-empty tree");

        assert_eq!(snapshot.root.role, "RootWebArea");
        assert_eq!(snapshot.root.children.len(), 2);
        assert_eq!(snapshot.root.children[0].name, "Sign up");
        assert_eq!(snapshot.correlation[&20].role, "button");
        assert_eq!(snapshot.adjacency[&10], vec![20, 30]);
        assert!(snapshot.adjacency[&20].is_empty());
    }

    #[test]
    fn node_ids_are_scoped_to_the_snapshot() {
        let nodes = vec![
            ax("1", "RootWebArea", "", None, &["2"]),
            ax("2", "button", "Go", Some(5), &[]),
        ];
        let snapshot = build_snapshot(&nodes, false).unwrap().unwrap();
        let prefix = format!("{}_", snapshot.snapshot_id);
        assert!(snapshot.root.id.starts_with(&prefix));
        assert!(snapshot.root.children[0].id.starts_with(&prefix));
        assert_ne!(snapshot.root.id, snapshot.root.children[0].id);
    }

    #[test]
    fn ignored_nodes_are_pruned_with_their_subtree() {
        let mut hidden = ax("2", "generic", "", Some(20), &["3"]);
        hidden["ignored"] = json!(true);
        let nodes = vec![
            ax("1", "RootWebArea", "", Some(10), &["2", "4"]),
            hidden,
            ax("3", "button", "Hidden", Some(30), &[]),
            ax("4", "link", "Visible", Some(40), &[]),
        ];

        let snapshot = build_snapshot(&nodes, false).unwrap().unwrap();
        assert_eq!(snapshot.root.children.len(), 1);
        assert_eq!(snapshot.root.children[0].name, "Visible");
        assert!(!snapshot.correlation.contains_key(&30));
    }

    #[test]
    fn verbose_keeps_ignored_nodes() {
        let mut hidden = ax("2", "generic", "", None, &[]);
        hidden["ignored"] = json!(true);
        let nodes = vec![ax("1", "RootWebArea", "", None, &["2"]), hidden];

        let snapshot = build_snapshot(&nodes, true).unwrap().unwrap();
        assert_eq!(snapshot.root.children.len(), 1);
    }

    #[test]
    fn empty_list_yields_none() {
        assert!(build_snapshot(&[], false).unwrap().is_none());
    }

    #[test]
    fn first_backend_ref_claims_the_correlation_entry() {
        let nodes = vec![
            ax("1", "RootWebArea", "", None, &["2", "3"]),
            ax("2", "button", "First", Some(7), &[]),
            ax("3", "generic", "Second", Some(7), &[]),
        ];
        let snapshot = build_snapshot(&nodes, false).unwrap().unwrap();
        assert_eq!(snapshot.correlation[&7].name, "First");
    }

    #[test]
    fn dangling_and_cyclic_child_ids_are_dropped() {
        let nodes = vec![
            ax("1", "RootWebArea", "", None, &["2", "99"]),
            ax("2", "group", "", None, &["1"]),
        ];
        let snapshot = build_snapshot(&nodes, false).unwrap().unwrap();
        assert_eq!(snapshot.root.children.len(), 1);
        assert!(snapshot.root.children[0].children.is_empty());
    }

    #[test]
    fn state_flags_come_from_properties() {
        let mut button = ax("2", "button", "Save", Some(5), &[]);
        button["properties"] = json!([
            {"name": "disabled", "value": {"value": true}},
            {"name": "focused", "value": {"value": false}},
        ]);
        let nodes = vec![ax("1", "RootWebArea", "", None, &["2"]), button];
        let snapshot = build_snapshot(&nodes, false).unwrap().unwrap();
        let node = &snapshot.root.children[0];
        assert!(node.disabled);
        assert!(!node.focused);
    }
}
