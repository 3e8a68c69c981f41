//! Component tree walker and correlator.
//!
//! The page-side script serializes each fiber root into a JSON tree; all
//! classification, naming, claiming and text rendering happens here, where
//! it is pure and cheap to test.

use std::collections::{HashMap, HashSet};

use serde::Deserialize;
use tracing::debug;

use crate::errors::InspectorError;
use crate::model::{AxSnapshot, ComponentKind, ComponentNode, PropEntry, PropValue};
use crate::ports::InspectorPage;
use crate::tagging::role_passes_filter;

const COLLECT_TREE_JS: &str = include_str!("js/collect_tree.js");

/// Props shown inline per component before eliding the rest.
const MAX_INLINE_PROPS: usize = 3;

#[derive(Debug, Deserialize)]
struct CollectResult {
    hook: bool,
    #[serde(default)]
    roots: Vec<ComponentNode>,
    #[serde(default)]
    error: Option<String>,
}

/// Serialize the fiber forest out of the page and render the correlated
/// component map. The snapshot, when present, supplies the accessibility
/// annotations; without it the map is plain component structure.
pub async fn component_map(
    page: &dyn InspectorPage,
    snapshot: Option<&AxSnapshot>,
    include_state: bool,
) -> Result<String, InspectorError> {
    let expression = format!("{}({include_state})", COLLECT_TREE_JS.trim_end());
    let raw = page.evaluate(&expression).await?;
    let collected: CollectResult = serde_json::from_value(raw)
        .map_err(|err| InspectorError::Payload(format!("malformed fiber forest: {err}")))?;

    if !collected.hook {
        return Err(InspectorError::NotAttached);
    }
    if let Some(error) = collected.error {
        return Err(InspectorError::Eval(error));
    }
    if collected.roots.is_empty() {
        return Err(InspectorError::NoRoots);
    }

    debug!(
        target: "inspector",
        roots = collected.roots.len(),
        annotated = snapshot.is_some(),
        "rendering component map"
    );
    Ok(render_forest(&collected.roots, snapshot))
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum VisitState {
    Visiting,
    Emitted,
}

struct Renderer<'a> {
    snapshot: Option<&'a AxSnapshot>,
    visited: HashMap<u64, VisitState>,
    claimed: HashSet<u64>,
    out: String,
}

/// Pure rendering of an already-serialized forest.
pub fn render_forest(roots: &[ComponentNode], snapshot: Option<&AxSnapshot>) -> String {
    let mut renderer = Renderer {
        snapshot,
        visited: HashMap::new(),
        claimed: HashSet::new(),
        out: String::new(),
    };
    for root in roots {
        let items = renderer.project(std::slice::from_ref(root));
        for item in &items {
            renderer.render_item(item, "", "");
        }
    }
    renderer.out
}

/// One renderable line: an authored component, or a host element whose
/// semantic annotation stands on its own.
enum Item<'a> {
    Component(&'a ComponentNode),
    BareHost(&'a ComponentNode),
}

impl<'a> Renderer<'a> {
    /// Flatten transparent nodes. Authored components and unclaimed annotated
    /// hosts become lines; everything else promotes its children.
    fn project(&self, nodes: &'a [ComponentNode]) -> Vec<Item<'a>> {
        let mut items = Vec::new();
        for node in nodes {
            match node.kind {
                ComponentKind::Component => items.push(Item::Component(node)),
                ComponentKind::Host => {
                    let own_annotation = node
                        .marker
                        .as_ref()
                        .is_some_and(|m| !self.claimed.contains(&m.ref_id));
                    if own_annotation {
                        items.push(Item::BareHost(node));
                    } else {
                        items.extend(self.project(&node.children));
                    }
                }
                ComponentKind::Other => items.extend(self.project(&node.children)),
            }
        }
        items
    }

    fn render_item(&mut self, item: &Item<'a>, own_prefix: &str, child_prefix: &str) {
        match item {
            Item::Component(node) => self.render_component(node, own_prefix, child_prefix),
            Item::BareHost(node) => self.render_bare_host(node, own_prefix, child_prefix),
        }
    }

    fn render_component(&mut self, node: &'a ComponentNode, own_prefix: &str, child_prefix: &str) {
        match self.visited.get(&node.id) {
            Some(VisitState::Visiting) | Some(VisitState::Emitted) => return,
            None => {}
        }
        self.visited.insert(node.id, VisitState::Visiting);

        let mut line = format!("{own_prefix}{}", display_name(node));
        if let Some(props) = format_entries(&node.props) {
            line.push(' ');
            line.push_str(&props);
        }
        if let Some(state) = format_entries(&node.state) {
            line.push_str(" state=");
            line.push_str(&state);
        }

        // Claim the annotation before walking children so nested lines
        // cannot reuse it.
        let claimed_ref = self.claim_host_annotation(node);
        if let Some((_, annotation)) = &claimed_ref {
            line.push(' ');
            line.push_str(annotation);
        }
        if let Some(source) = &node.source {
            line.push_str(&format!(" ({}:{}:{})", source.file, source.line, source.column));
        }
        self.out.push_str(&line);
        self.out.push('\n');

        let child_items = self.project(&node.children);
        let ax_leaves = self.take_ax_leaves(claimed_ref.map(|(r, _)| r));

        let total = child_items.len() + ax_leaves.len();
        for (index, item) in child_items.iter().enumerate() {
            let (own, child) = branch_prefixes(child_prefix, index + 1 == total);
            self.render_item(item, &own, &child);
        }
        for (index, leaf) in ax_leaves.iter().enumerate() {
            let position = child_items.len() + index + 1;
            let (own, _) = branch_prefixes(child_prefix, position == total);
            self.out.push_str(&format!("{own}{leaf}\n"));
        }

        self.visited.insert(node.id, VisitState::Emitted);
    }

    fn render_bare_host(&mut self, node: &'a ComponentNode, own_prefix: &str, child_prefix: &str) {
        let annotation = match &node.marker {
            Some(marker) if self.claimed.insert(marker.ref_id) => {
                annotation_text(&marker.role, &marker.name)
            }
            _ => {
                // Claimed between projection and rendering; treat the host
                // as transparent after all.
                let items = self.project(&node.children);
                for item in &items {
                    self.render_item(item, own_prefix, child_prefix);
                }
                return;
            }
        };
        self.out.push_str(&format!("{own_prefix}{annotation}\n"));

        let items = self.project(&node.children);
        let count = items.len();
        for (index, item) in items.iter().enumerate() {
            let (own, child) = branch_prefixes(child_prefix, index + 1 == count);
            self.render_item(item, &own, &child);
        }
    }

    /// First host descendant, first-child-then-sibling, not crossing into
    /// nested authored components. Its unclaimed marker becomes this
    /// component's annotation.
    fn claim_host_annotation(&mut self, node: &ComponentNode) -> Option<(u64, String)> {
        let host = first_marked_host(&node.children)?;
        let marker = host.marker.as_ref()?;
        if !self.claimed.insert(marker.ref_id) {
            return None;
        }
        Some((marker.ref_id, annotation_text(&marker.role, &marker.name)))
    }

    /// Accessibility-only children of the element this line was associated
    /// with: adjacency children that pass the role filter and are still
    /// unclaimed. Claiming here makes the first writer win.
    fn take_ax_leaves(&mut self, reference: Option<u64>) -> Vec<String> {
        let Some(reference) = reference else {
            return Vec::new();
        };
        let Some(snapshot) = self.snapshot else {
            return Vec::new();
        };
        let Some(children) = snapshot.adjacency.get(&reference) else {
            return Vec::new();
        };
        let mut leaves = Vec::new();
        for child_ref in children {
            let Some(entry) = snapshot.correlation.get(child_ref) else {
                continue;
            };
            if !role_passes_filter(&entry.role) {
                continue;
            }
            if !self.claimed.insert(*child_ref) {
                continue;
            }
            leaves.push(annotation_text(&entry.role, &entry.name));
        }
        leaves
    }
}

fn branch_prefixes(child_prefix: &str, last: bool) -> (String, String) {
    if last {
        (format!("{child_prefix}└─ "), format!("{child_prefix}   "))
    } else {
        (format!("{child_prefix}├─ "), format!("{child_prefix}│  "))
    }
}

fn first_marked_host<'a>(nodes: &'a [ComponentNode]) -> Option<&'a ComponentNode> {
    for node in nodes {
        match node.kind {
            ComponentKind::Component => continue,
            ComponentKind::Host => {
                if node.marker.is_some() {
                    return Some(node);
                }
                if let Some(found) = first_marked_host(&node.children) {
                    return Some(found);
                }
            }
            ComponentKind::Other => {
                if let Some(found) = first_marked_host(&node.children) {
                    return Some(found);
                }
            }
        }
    }
    None
}

fn display_name(node: &ComponentNode) -> &str {
    node.display_name
        .as_deref()
        .or(node.type_name.as_deref())
        .or(node.wrapped_name.as_deref())
        .unwrap_or("Anonymous")
}

fn annotation_text(role: &str, name: &str) -> String {
    if name.is_empty() {
        format!("[role=\"{role}\"]")
    } else {
        format!("[role=\"{role}\" name=\"{name}\"]")
    }
}

fn format_entries(entries: &[PropEntry]) -> Option<String> {
    if entries.is_empty() {
        return None;
    }
    let mut parts: Vec<String> = entries
        .iter()
        .take(MAX_INLINE_PROPS)
        .map(|entry| format!("{}={}", entry.key, format_value(&entry.value)))
        .collect();
    if entries.len() > MAX_INLINE_PROPS {
        parts.push("…".into());
    }
    Some(format!("{{{}}}", parts.join(", ")))
}

fn format_value(value: &PropValue) -> String {
    match value {
        PropValue::Str(s) => format!("\"{s}\""),
        PropValue::Num(n) => format_number(*n),
        PropValue::Bool(b) => b.to_string(),
        PropValue::Null => "null".into(),
        PropValue::Undefined => "undefined".into(),
        PropValue::Func => "fn()".into(),
        PropValue::Object => "{…}".into(),
        PropValue::Array => "[…]".into(),
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AxNode, CorrelationEntry, Marker, SourceLocation};
    use crate::testutil::MockPage;
    use fiberscope_core_types::SnapshotId;
    use serde_json::json;

    fn comp(id: u64, name: &str, children: Vec<ComponentNode>) -> ComponentNode {
        ComponentNode {
            id,
            kind: ComponentKind::Component,
            display_name: Some(name.to_owned()),
            type_name: None,
            wrapped_name: None,
            props: Vec::new(),
            state: Vec::new(),
            source: None,
            marker: None,
            children,
        }
    }

    fn host(id: u64, marker: Option<Marker>, children: Vec<ComponentNode>) -> ComponentNode {
        ComponentNode {
            id,
            kind: ComponentKind::Host,
            display_name: None,
            type_name: Some("div".to_owned()),
            wrapped_name: None,
            props: Vec::new(),
            state: Vec::new(),
            source: None,
            marker,
            children,
        }
    }

    fn root(id: u64, children: Vec<ComponentNode>) -> ComponentNode {
        ComponentNode {
            id,
            kind: ComponentKind::Other,
            display_name: None,
            type_name: None,
            wrapped_name: None,
            props: Vec::new(),
            state: Vec::new(),
            source: None,
            marker: None,
            children,
        }
    }

    fn marker(reference: u64, role: &str, name: &str) -> Marker {
        Marker {
            ref_id: reference,
            role: role.to_owned(),
            name: name.to_owned(),
        }
    }

    fn snapshot_with(
        correlation: &[(u64, &str, &str)],
        adjacency: &[(u64, &[u64])],
    ) -> AxSnapshot {
        AxSnapshot {
            snapshot_id: SnapshotId::new(),
            root: AxNode {
                id: "ax-test_1".into(),
                role: "RootWebArea".into(),
                name: String::new(),
                value: None,
                description: None,
                disabled: false,
                focused: false,
                expanded: false,
                selected: false,
                required: false,
                backend_ref: None,
                children: Vec::new(),
            },
            correlation: correlation
                .iter()
                .map(|(r, role, name)| {
                    (
                        *r,
                        CorrelationEntry {
                            role: (*role).to_owned(),
                            name: (*name).to_owned(),
                        },
                    )
                })
                .collect(),
            adjacency: adjacency
                .iter()
                .map(|(r, children)| (*r, children.to_vec()))
                .collect(),
        }
    }

    #[test]
    fn annotated_button_under_app() {
        let mut button = comp(
            2,
            "Button",
            vec![host(3, Some(marker(20, "button", "Sign up")), vec![])],
        );
        button.props = vec![PropEntry {
            key: "variant".into(),
            value: PropValue::Str("primary".into()),
        }];
        button.source = Some(SourceLocation {
            file: "src/Button.tsx".into(),
            line: 42,
            column: 8,
        });
        let app = comp(1, "App", vec![host(4, None, vec![button])]);
        let forest = vec![root(0, vec![app])];

        let snapshot = snapshot_with(&[(20, "button", "Sign up")], &[(20, &[])]);
        let rendered = render_forest(&forest, Some(&snapshot));

        assert_eq!(
            rendered,
            "App\n└─ Button {variant=\"primary\"} [role=\"button\" name=\"Sign up\"] (src/Button.tsx:42:8)\n"
        );
    }

    #[test]
    fn prefix_glyphs_follow_sibling_position() {
        let app = comp(
            1,
            "App",
            vec![
                comp(2, "Header", vec![comp(5, "Logo", vec![])]),
                comp(3, "Body", vec![]),
                comp(4, "Footer", vec![]),
            ],
        );
        let rendered = render_forest(&[root(0, vec![app])], None);

        let expected = "App\n\
                        ├─ Header\n\
                        │  └─ Logo\n\
                        ├─ Body\n\
                        └─ Footer\n";
        assert_eq!(rendered, expected);
    }

    #[test]
    fn annotation_is_claimed_at_most_once() {
        // Parent and child would both associate with the same host element.
        let inner = comp(
            2,
            "Inner",
            vec![host(3, Some(marker(20, "button", "Go")), vec![])],
        );
        let outer = comp(1, "Outer", vec![inner]);
        let rendered = render_forest(&[root(0, vec![outer])], None);

        let annotated_lines = rendered
            .lines()
            .filter(|line| line.contains("[role=\"button\""))
            .count();
        assert_eq!(annotated_lines, 1);
        assert!(rendered.contains("Inner"));
    }

    #[test]
    fn first_component_wins_the_shared_annotation() {
        // The outer component's own host carries the marker, so the outer
        // line claims it before the inner component is walked.
        let inner = comp(2, "Inner", vec![]);
        let outer = comp(
            1,
            "Outer",
            vec![host(3, Some(marker(20, "button", "Go")), vec![inner])],
        );
        let rendered = render_forest(&[root(0, vec![outer])], None);

        let lines: Vec<&str> = rendered.lines().collect();
        assert!(lines[0].starts_with("Outer [role=\"button\""));
        assert_eq!(lines[1], "└─ Inner");
    }

    #[test]
    fn unclaimed_annotated_host_emits_a_bare_line() {
        let app = comp(
            1,
            "App",
            vec![
                host(2, Some(marker(20, "navigation", "")), vec![]),
                comp(3, "Body", vec![host(4, Some(marker(30, "main", "")), vec![])]),
            ],
        );
        let rendered = render_forest(&[root(0, vec![app])], None);

        // App associates with the nav (its first marked host); Body takes
        // the main region; nothing is duplicated.
        let expected = "App [role=\"navigation\"]\n\
                        └─ Body [role=\"main\"]\n";
        assert_eq!(rendered, expected);
    }

    #[test]
    fn accessibility_only_children_surface_as_leaves() {
        let list = comp(
            1,
            "TodoList",
            vec![host(2, Some(marker(10, "list", "Todos")), vec![])],
        );
        let snapshot = snapshot_with(
            &[
                (10, "list", "Todos"),
                (11, "listitem", "Buy milk"),
                (12, "listitem", "Ship it"),
                (13, "generic", ""),
            ],
            &[(10, &[11, 12, 13])],
        );
        let rendered = render_forest(&[root(0, vec![list])], Some(&snapshot));

        let expected = "TodoList [role=\"list\" name=\"Todos\"]\n\
                        ├─ [role=\"listitem\" name=\"Buy milk\"]\n\
                        └─ [role=\"listitem\" name=\"Ship it\"]\n";
        assert_eq!(rendered, expected);
    }

    #[test]
    fn identical_walks_render_identically() {
        let app = comp(
            1,
            "App",
            vec![comp(2, "A", vec![]), comp(3, "B", vec![]), comp(4, "C", vec![])],
        );
        let forest = vec![root(0, vec![app])];
        let snapshot = snapshot_with(&[(20, "button", "Go")], &[]);

        let first = render_forest(&forest, Some(&snapshot));
        let second = render_forest(&forest, Some(&snapshot));
        assert_eq!(first, second);
    }

    #[test]
    fn props_cap_at_three_with_ellipsis() {
        let mut node = comp(1, "Form", vec![]);
        node.props = vec![
            PropEntry { key: "a".into(), value: PropValue::Num(1.0) },
            PropEntry { key: "b".into(), value: PropValue::Bool(true) },
            PropEntry { key: "c".into(), value: PropValue::Object },
            PropEntry { key: "d".into(), value: PropValue::Func },
        ];
        let rendered = render_forest(&[root(0, vec![node])], None);
        assert_eq!(rendered, "Form {a=1, b=true, c={…}, …}\n");
    }

    #[test]
    fn state_renders_in_its_own_block() {
        let mut node = comp(1, "Counter", vec![]);
        node.state = vec![PropEntry {
            key: "count".into(),
            value: PropValue::Num(3.0),
        }];
        let rendered = render_forest(&[root(0, vec![node])], None);
        assert_eq!(rendered, "Counter state={count=3}\n");
    }

    #[test]
    fn display_name_falls_back_through_hints() {
        let mut anon = comp(1, "x", vec![]);
        anon.display_name = None;
        anon.type_name = None;
        anon.wrapped_name = Some("FancyInput".into());
        let rendered = render_forest(&[root(0, vec![anon])], None);
        assert_eq!(rendered, "FancyInput\n");

        let mut bare = comp(2, "x", vec![]);
        bare.display_name = None;
        let rendered = render_forest(&[root(0, vec![bare])], None);
        assert_eq!(rendered, "Anonymous\n");
    }

    #[test]
    fn repeated_node_ids_are_emitted_once() {
        let twin_a = comp(7, "Twin", vec![]);
        let twin_b = comp(7, "Twin", vec![]);
        let app = comp(1, "App", vec![twin_a, twin_b]);
        let rendered = render_forest(&[root(0, vec![app])], None);
        assert_eq!(rendered.matches("Twin").count(), 1);
    }

    #[tokio::test]
    async fn missing_hook_maps_to_not_attached() {
        let page = MockPage::new();
        page.push_eval(json!({"hook": false, "roots": []}));
        let err = component_map(&page, None, false).await.unwrap_err();
        assert!(matches!(err, InspectorError::NotAttached));
    }

    #[tokio::test]
    async fn empty_forest_maps_to_no_roots() {
        let page = MockPage::new();
        page.push_eval(json!({"hook": true, "roots": []}));
        let err = component_map(&page, None, false).await.unwrap_err();
        assert!(matches!(err, InspectorError::NoRoots));
    }

    #[tokio::test]
    async fn forest_payload_renders_end_to_end() {
        let page = MockPage::new();
        page.push_eval(json!({
            "hook": true,
            "roots": [{
                "id": 1,
                "kind": "other",
                "children": [{
                    "id": 2,
                    "kind": "component",
                    "displayName": "App",
                    "children": [],
                }],
            }],
        }));
        let rendered = component_map(&page, None, false).await.unwrap();
        assert_eq!(rendered, "App\n");
    }
}
