use std::collections::HashMap;

use fiberscope_core_types::SnapshotId;
use serde::{Deserialize, Serialize};

fn is_false(flag: &bool) -> bool {
    !flag
}

/// One node of the reconstructed accessibility tree. Immutable after the
/// snapshot builder produces it.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AxNode {
    /// Session-scoped identifier (`<snapshotId>_<counter>`).
    pub id: String,
    pub role: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "is_false")]
    pub disabled: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub focused: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub expanded: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub selected: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub required: bool,
    /// Stable external reference for later correlation, valid for one
    /// page-load generation only.
    #[serde(rename = "backendRef", skip_serializing_if = "Option::is_none")]
    pub backend_ref: Option<u64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<AxNode>,
}

/// Role and computed name recorded per backend reference.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CorrelationEntry {
    pub role: String,
    pub name: String,
}

/// backend reference -> role/name facts, written onto DOM elements during
/// the tagging pass.
pub type CorrelationMap = HashMap<u64, CorrelationEntry>;

/// backend reference -> child backend references, used to surface
/// accessibility-only children under a correlated component.
pub type AdjacencyMap = HashMap<u64, Vec<u64>>;

/// One coherent accessibility snapshot plus its derived lookup maps. Built
/// fresh per request and discarded when the enclosing tool call completes.
#[derive(Clone, Debug)]
pub struct AxSnapshot {
    pub snapshot_id: SnapshotId,
    pub root: AxNode,
    pub correlation: CorrelationMap,
    pub adjacency: AdjacencyMap,
}

/// Classification of one fiber as reported by the page-side serializer.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ComponentKind {
    Component,
    Host,
    Other,
}

/// Typed, size-capped descriptor for a single prop or state value. The page
/// serializer never ships full objects; composites arrive pre-elided.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(tag = "t", content = "v", rename_all = "lowercase")]
pub enum PropValue {
    Str(String),
    Num(f64),
    Bool(bool),
    Null,
    Undefined,
    Func,
    Object,
    Array,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct PropEntry {
    pub key: String,
    pub value: PropValue,
}

/// Correlation markers read back from a host element's attributes.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Marker {
    #[serde(rename = "ref")]
    pub ref_id: u64,
    pub role: String,
    pub name: String,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SourceLocation {
    pub file: String,
    pub line: u64,
    pub column: u64,
}

/// One fiber as serialized out of the page. The engine only ever reads this
/// structure; the runtime owns the real thing.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentNode {
    pub id: u64,
    pub kind: ComponentKind,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub type_name: Option<String>,
    #[serde(default)]
    pub wrapped_name: Option<String>,
    #[serde(default)]
    pub props: Vec<PropEntry>,
    #[serde(default)]
    pub state: Vec<PropEntry>,
    #[serde(default)]
    pub source: Option<SourceLocation>,
    #[serde(default)]
    pub marker: Option<Marker>,
    #[serde(default)]
    pub children: Vec<ComponentNode>,
}

/// Metadata a renderer handed to the hook at registration time.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RendererInfo {
    pub id: u64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub bundle_type: Option<u64>,
}

/// Outcome of the hook bootstrap sequence. Soft-failing: `attached: false`
/// plus a message, never an error across the tool boundary.
#[derive(Clone, Debug, Serialize)]
pub struct AttachReport {
    pub attached: bool,
    pub renderers: Vec<RendererInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// One authored ancestor in an ownership chain, closest first.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct OwnerEntry {
    pub name: String,
    pub kind: ComponentKind,
    #[serde(default)]
    pub source: Option<SourceLocation>,
}

/// Full description of the component owning one element.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ComponentDetail {
    pub name: String,
    pub kind: ComponentKind,
    pub props: serde_json::Value,
    #[serde(default)]
    pub state: serde_json::Value,
    #[serde(default)]
    pub source: Option<SourceLocation>,
    #[serde(default)]
    pub owners: Vec<OwnerEntry>,
}

/// Result of the single-node fast path.
#[derive(Clone, Debug, Serialize)]
pub struct ComponentQuery {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub component: Option<ComponentDetail>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ComponentQuery {
    pub fn found(component: ComponentDetail) -> Self {
        Self {
            success: true,
            component: Some(component),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            component: None,
            error: Some(error.into()),
        }
    }
}
