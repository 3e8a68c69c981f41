//! Tool gate over the correlation engine.
//!
//! Four operations, one `tokio::sync::Mutex` held for the duration of each
//! invocation. The page is a single shared resource; interleaving a tagging
//! pass with a snapshot would corrupt both.

use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::debug;

use fiberscope_inspector::hook::HookBootstrap;
use fiberscope_inspector::ports::InspectorPage;
use fiberscope_inspector::{ax, resolver, tagging, walker};
use fiberscope_inspector::{AttachReport, ComponentQuery, InspectorError};

struct ToolState {
    bootstrap: HookBootstrap,
}

pub struct InspectorTools<P> {
    page: P,
    state: Mutex<ToolState>,
}

impl<P: InspectorPage> InspectorTools<P> {
    pub fn new(page: P) -> Self {
        Self {
            page,
            state: Mutex::new(ToolState {
                bootstrap: HookBootstrap::new(),
            }),
        }
    }

    pub fn page(&self) -> &P {
        &self.page
    }

    /// Install the introspection hook and report registered renderers.
    pub async fn ensure_attached(&self) -> Result<AttachReport, InspectorError> {
        let mut state = self.state.lock().await;
        state.bootstrap.ensure_attached(&self.page).await
    }

    /// Take an accessibility snapshot and return it as JSON, or `null` when
    /// the page exposes no accessibility tree.
    pub async fn take_snapshot(&self, verbose: bool) -> Result<Value, InspectorError> {
        let _state = self.state.lock().await;
        match ax::take_snapshot(&self.page, verbose).await? {
            Some(snapshot) => Ok(json!({
                "snapshotId": snapshot.snapshot_id.to_string(),
                "root": snapshot.root,
            })),
            None => Ok(Value::Null),
        }
    }

    /// Render the correlated component map. Every failure is a descriptive
    /// string so the result is always printable.
    pub async fn get_component_map(&self, verbose: bool, include_state: bool) -> String {
        let _state = self.state.lock().await;
        match self.component_map_inner(verbose, include_state).await {
            Ok(map) => map,
            Err(err) => format!("Error: {err}"),
        }
    }

    async fn component_map_inner(
        &self,
        verbose: bool,
        include_state: bool,
    ) -> Result<String, InspectorError> {
        let snapshot = ax::take_snapshot(&self.page, verbose).await?;
        if let Some(snapshot) = &snapshot {
            let report = tagging::tag_elements(&self.page, &snapshot.correlation).await?;
            debug!(
                target: "fiberscope",
                tagged = report.tagged,
                skipped = report.skipped,
                "correlation markers written"
            );
        }
        walker::component_map(&self.page, snapshot.as_ref(), include_state).await
    }

    /// Resolve one backend reference to its owning component chain.
    pub async fn get_component_from_backend_reference(&self, reference: u64) -> ComponentQuery {
        let _state = self.state.lock().await;
        match resolver::resolve_backend_reference(&self.page, reference).await {
            Ok(query) => query,
            Err(err) => ComponentQuery::failed(err.to_string()),
        }
    }
}
