//! Adapter-to-inspector bridge.
//!
//! Binds one adapter page to the inspector's page trait and maps the
//! transport error taxonomy onto the inspector's.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use cdp_adapter::ids::PageId;
use cdp_adapter::{AdapterError, AdapterErrorKind, CdpAdapter, PageOps};
use fiberscope_inspector::ports::InspectorPage;
use fiberscope_inspector::InspectorError;

pub struct AdapterPage {
    adapter: Arc<CdpAdapter>,
    page: PageId,
}

impl AdapterPage {
    pub fn new(adapter: Arc<CdpAdapter>, page: PageId) -> Self {
        Self { adapter, page }
    }

    pub fn page(&self) -> PageId {
        self.page
    }
}

fn map_error(err: AdapterError) -> InspectorError {
    let detail = err.to_string();
    match err.kind {
        AdapterErrorKind::EvalFailed => InspectorError::Eval(detail),
        _ => InspectorError::Transport(detail),
    }
}

#[async_trait]
impl InspectorPage for AdapterPage {
    async fn evaluate(&self, expression: &str) -> Result<Value, InspectorError> {
        self.adapter
            .evaluate(self.page, expression)
            .await
            .map_err(map_error)
    }

    async fn add_preload_script(&self, source: &str) -> Result<(), InspectorError> {
        self.adapter
            .add_preload_script(self.page, source)
            .await
            .map(|_| ())
            .map_err(map_error)
    }

    async fn set_bypass_csp(&self, enabled: bool) -> Result<(), InspectorError> {
        self.adapter
            .set_bypass_csp(self.page, enabled)
            .await
            .map_err(map_error)
    }

    async fn reload(&self) -> Result<(), InspectorError> {
        self.adapter.reload(self.page).await.map_err(map_error)
    }

    async fn full_ax_tree(&self) -> Result<Vec<Value>, InspectorError> {
        self.adapter
            .full_ax_tree(self.page)
            .await
            .map_err(map_error)
    }

    async fn resolve_backend_node(&self, backend_ref: u64) -> Result<String, InspectorError> {
        self.adapter
            .resolve_backend_node(self.page, backend_ref)
            .await
            .map_err(|err| match err.kind {
                AdapterErrorKind::TargetNotFound => InspectorError::Resolution {
                    reference: backend_ref,
                    reason: err.to_string(),
                },
                _ => map_error(err),
            })
    }

    async fn call_function_on(
        &self,
        object_id: &str,
        declaration: &str,
        args: &[Value],
    ) -> Result<Value, InspectorError> {
        self.adapter
            .call_function_on(self.page, object_id, declaration, args)
            .await
            .map_err(map_error)
    }
}
