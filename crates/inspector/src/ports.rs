use async_trait::async_trait;
use serde_json::Value;

use crate::errors::InspectorError;

/// Page access surface the correlation engine runs against. The adapter
/// crate provides the real implementation; tests script a mock.
///
/// Every method is one or more asynchronous round trips to the page's own
/// event loop over the CDP transport.
#[async_trait]
pub trait InspectorPage: Send + Sync {
    /// Evaluate an expression in the page and return its JSON value.
    async fn evaluate(&self, expression: &str) -> Result<Value, InspectorError>;

    /// Install a script that runs in every new document before page scripts.
    async fn add_preload_script(&self, source: &str) -> Result<(), InspectorError>;

    /// Enable or disable content-security-policy enforcement bypass.
    async fn set_bypass_csp(&self, enabled: bool) -> Result<(), InspectorError>;

    /// Reload the page and wait for the new document to become interactive.
    async fn reload(&self) -> Result<(), InspectorError>;

    /// Fetch the full flat accessibility node list in one call.
    async fn full_ax_tree(&self) -> Result<Vec<Value>, InspectorError>;

    /// Resolve a backend reference to a live remote object id.
    async fn resolve_backend_node(&self, backend_ref: u64) -> Result<String, InspectorError>;

    /// Call `declaration` with the resolved object as `this`.
    async fn call_function_on(
        &self,
        object_id: &str,
        declaration: &str,
        args: &[Value],
    ) -> Result<Value, InspectorError>;
}
