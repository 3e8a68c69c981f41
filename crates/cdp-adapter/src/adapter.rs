//! Adapter wiring the raw transport to a typed page-operation surface.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{json, Value};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio::{select, spawn};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{AdapterError, AdapterErrorKind};
use crate::events::RawEvent;
use crate::ids::{BrowserId, PageId, SessionId};
use crate::registry::Registry;
use crate::transport::{CdpTransport, ChromiumTransport, CommandTarget, TransportEvent};
use crate::config::CdpConfig;

/// Shared event bus type alias used by the adapter.
pub type EventBus = broadcast::Sender<RawEvent>;

/// Page-scoped operations the inspector layers consume. Every call is one or
/// more asynchronous round trips to the browser; nothing here blocks the
/// page's own thread of execution.
#[async_trait]
pub trait PageOps: Send + Sync {
    /// Evaluate an expression in the page, returning its JSON value
    /// (`returnByValue` semantics, promises awaited).
    async fn evaluate(&self, page: PageId, expression: &str) -> Result<Value, AdapterError>;

    /// Register a script to run in every new document before page scripts.
    /// Returns the script identifier.
    async fn add_preload_script(&self, page: PageId, source: &str)
        -> Result<String, AdapterError>;

    /// Enable or disable content-security-policy bypass for the page.
    async fn set_bypass_csp(&self, page: PageId, enabled: bool) -> Result<(), AdapterError>;

    /// Reload the page.
    async fn reload(&self, page: PageId) -> Result<(), AdapterError>;

    /// Fetch the full flat accessibility node list for the page.
    async fn full_ax_tree(&self, page: PageId) -> Result<Vec<Value>, AdapterError>;

    /// Resolve a backend DOM node id to a live remote object id.
    async fn resolve_backend_node(
        &self,
        page: PageId,
        backend_node_id: u64,
    ) -> Result<String, AdapterError>;

    /// Call a function with the resolved object as `this`, returning its
    /// JSON result.
    async fn call_function_on(
        &self,
        page: PageId,
        object_id: &str,
        declaration: &str,
        args: &[Value],
    ) -> Result<Value, AdapterError>;

    /// Navigate the page and wait for the document to become interactive.
    async fn navigate(&self, page: PageId, url: &str) -> Result<(), AdapterError>;
}

/// Adapter implementation with pluggable transport.
pub struct CdpAdapter {
    pub browser_id: BrowserId,
    pub cfg: CdpConfig,
    pub bus: EventBus,
    pub registry: Arc<Registry>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    transport: Arc<dyn CdpTransport>,
    targets: DashMap<String, PageId>,
    sessions: DashMap<String, PageId>,
}

impl CdpAdapter {
    pub fn new(cfg: CdpConfig, bus: EventBus) -> Self {
        let transport: Arc<dyn CdpTransport> = Arc::new(ChromiumTransport::new(cfg.clone()));
        Self::with_transport(cfg, bus, transport)
    }

    pub fn with_transport(cfg: CdpConfig, bus: EventBus, transport: Arc<dyn CdpTransport>) -> Self {
        Self {
            browser_id: BrowserId::new(),
            cfg,
            bus,
            registry: Arc::new(Registry::new()),
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
            transport,
            targets: DashMap::new(),
            sessions: DashMap::new(),
        }
    }

    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Start the transport and the event loop. Idempotent.
    pub async fn start(self: Arc<Self>) -> Result<(), AdapterError> {
        {
            let guard = self.tasks.lock().await;
            if !guard.is_empty() {
                return Ok(());
            }
        }

        self.transport.start().await?;
        let loop_task = spawn(Self::event_loop(Arc::clone(&self)));
        let mut guard = self.tasks.lock().await;
        guard.push(loop_task);
        info!(target: "cdp-adapter", "event loop started");
        Ok(())
    }

    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let mut handles = self.tasks.lock().await;
        while let Some(handle) = handles.pop() {
            let _ = handle.await;
        }
    }

    pub fn register_page(
        &self,
        page: PageId,
        session: SessionId,
        target_id: Option<String>,
        cdp_session: Option<String>,
    ) {
        if let Some(target) = target_id.as_ref() {
            self.targets.insert(target.clone(), page);
        }
        if let Some(cdp) = cdp_session.as_ref() {
            self.sessions.insert(cdp.clone(), page);
        }
        self.registry
            .insert(page, session, target_id, cdp_session);
    }

    /// Open a new page and wait until its session is attached.
    pub async fn create_page(&self, url: &str) -> Result<PageId, AdapterError> {
        let response = self
            .send_command("Target.createTarget", json!({ "url": url }))
            .await?;
        let target_id = response
            .get("targetId")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                AdapterError::new(AdapterErrorKind::Internal)
                    .with_hint("createTarget missing targetId")
            })?
            .to_string();

        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if let Some(entry) = self.targets.get(&target_id) {
                let page = *entry.value();
                if self
                    .registry
                    .lookup(&page)
                    .map(|rec| rec.cdp_session.is_some())
                    .unwrap_or(false)
                {
                    return Ok(page);
                }
            }

            if Instant::now() >= deadline {
                return Err(AdapterError::new(AdapterErrorKind::Internal)
                    .with_hint("timed out waiting for target attach"));
            }

            sleep(Duration::from_millis(50)).await;
        }
    }

    async fn event_loop(self: Arc<Self>) {
        debug!(target: "cdp-adapter", "event loop entered");
        loop {
            select! {
                _ = self.shutdown.cancelled() => {
                    break;
                }
                event = self.transport.next_event() => {
                    match event {
                        Some(ev) => self.handle_event(ev).await,
                        None => {
                            if self.shutdown.is_cancelled() {
                                break;
                            }
                            warn!(target: "cdp-adapter", "transport stream ended; attempting restart");
                            if let Err(err) = self.transport.start().await {
                                warn!(target: "cdp-adapter", ?err, "transport restart failed");
                            }
                            sleep(Duration::from_millis(250)).await;
                        }
                    }
                }
            }
        }
        debug!(target: "cdp-adapter", "event loop exiting");
    }

    async fn handle_event(&self, event: TransportEvent) {
        if let Err(err) = self.process_event(event) {
            let _ = self.bus.send(RawEvent::Error {
                page: None,
                message: format!("cdp event handling error: {:?}", err),
            });
        }
    }

    fn process_event(&self, event: TransportEvent) -> Result<(), AdapterError> {
        match event.method.as_str() {
            "Target.attachedToTarget" => self.on_attached(event.params)?,
            "Target.detachedFromTarget" => self.on_detached(event.params)?,
            "Target.targetDestroyed" => self.on_target_destroyed(event.params)?,
            "Target.targetInfoChanged" => self.on_target_info_changed(event.params)?,
            _ => {}
        }
        Ok(())
    }

    fn on_attached(&self, params: Value) -> Result<(), AdapterError> {
        let session = params
            .get("sessionId")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                AdapterError::new(AdapterErrorKind::Internal)
                    .with_hint("attachedToTarget missing sessionId")
            })?
            .to_string();
        let info = params.get("targetInfo").cloned().unwrap_or(Value::Null);
        let target_type = info.get("type").and_then(|v| v.as_str()).unwrap_or("");
        if target_type != "page" {
            return Ok(());
        }
        let target_id = info
            .get("targetId")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());

        let page = target_id
            .as_ref()
            .and_then(|tid| self.targets.get(tid).map(|e| *e.value()))
            .unwrap_or_else(PageId::new);

        self.register_page(page, SessionId::new(), target_id, Some(session));
        if let Some(url) = info.get("url").and_then(|v| v.as_str()) {
            self.registry.note_url(&page, url.to_string());
        }
        let _ = self.bus.send(RawEvent::PageAttached { page });
        Ok(())
    }

    fn on_detached(&self, params: Value) -> Result<(), AdapterError> {
        if let Some(session) = params.get("sessionId").and_then(|v| v.as_str()) {
            if let Some((_, page)) = self.sessions.remove(session) {
                self.registry.remove(&page);
                self.targets.retain(|_, p| *p != page);
                let _ = self.bus.send(RawEvent::PageDetached { page });
            }
        }
        Ok(())
    }

    fn on_target_destroyed(&self, params: Value) -> Result<(), AdapterError> {
        if let Some(target) = params.get("targetId").and_then(|v| v.as_str()) {
            if let Some((_, page)) = self.targets.remove(target) {
                self.registry.remove(&page);
                self.sessions.retain(|_, p| *p != page);
                let _ = self.bus.send(RawEvent::PageDetached { page });
            }
        }
        Ok(())
    }

    fn on_target_info_changed(&self, params: Value) -> Result<(), AdapterError> {
        let info = params.get("targetInfo").cloned().unwrap_or(Value::Null);
        let target = info.get("targetId").and_then(|v| v.as_str());
        let url = info.get("url").and_then(|v| v.as_str());
        if let (Some(target), Some(url)) = (target, url) {
            if let Some(entry) = self.targets.get(target) {
                let page = *entry.value();
                self.registry.note_url(&page, url.to_string());
                let _ = self.bus.send(RawEvent::PageNavigated {
                    page,
                    url: url.to_string(),
                });
            }
        }
        Ok(())
    }

    async fn send_command(&self, method: &str, params: Value) -> Result<Value, AdapterError> {
        self.transport
            .send_command(CommandTarget::Browser, method, params)
            .await
    }

    async fn send_page_command(
        &self,
        page: PageId,
        method: &str,
        params: Value,
    ) -> Result<Value, AdapterError> {
        let session = self.registry.session_for(&page).ok_or_else(|| {
            AdapterError::new(AdapterErrorKind::TargetNotFound)
                .with_hint(format!("page {} has no attached cdp session", page.0))
        })?;
        self.transport
            .send_command(CommandTarget::Session(session), method, params)
            .await
    }

    async fn wait_for_page_ready(&self, page: PageId) -> Result<(), AdapterError> {
        let deadline = Instant::now() + Duration::from_millis(self.cfg.default_deadline_ms);
        loop {
            let state = self
                .send_page_command(
                    page,
                    "Runtime.evaluate",
                    json!({ "expression": "document.readyState", "returnByValue": true }),
                )
                .await
                .ok()
                .and_then(|v| {
                    v.pointer("/result/value")
                        .and_then(|s| s.as_str())
                        .map(|s| s.to_string())
                });

            match state.as_deref() {
                Some("interactive") | Some("complete") => return Ok(()),
                _ => {}
            }

            if Instant::now() >= deadline {
                return Err(AdapterError::new(AdapterErrorKind::Timeout)
                    .with_hint("timed out waiting for document ready"));
            }
            sleep(Duration::from_millis(100)).await;
        }
    }

    fn extract_eval_result(response: Value) -> Result<Value, AdapterError> {
        if let Some(details) = response.get("exceptionDetails") {
            let text = details
                .pointer("/exception/description")
                .and_then(|v| v.as_str())
                .or_else(|| details.get("text").and_then(|v| v.as_str()))
                .unwrap_or("unknown page exception");
            return Err(
                AdapterError::new(AdapterErrorKind::EvalFailed).with_hint(text.to_string())
            );
        }
        Ok(response
            .pointer("/result/value")
            .cloned()
            .unwrap_or(Value::Null))
    }
}

#[async_trait]
impl PageOps for CdpAdapter {
    async fn evaluate(&self, page: PageId, expression: &str) -> Result<Value, AdapterError> {
        let response = self
            .send_page_command(
                page,
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": true,
                }),
            )
            .await?;
        Self::extract_eval_result(response)
    }

    async fn add_preload_script(
        &self,
        page: PageId,
        source: &str,
    ) -> Result<String, AdapterError> {
        let response = self
            .send_page_command(
                page,
                "Page.addScriptToEvaluateOnNewDocument",
                json!({ "source": source }),
            )
            .await?;
        response
            .get("identifier")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| {
                AdapterError::new(AdapterErrorKind::Internal)
                    .with_hint("addScriptToEvaluateOnNewDocument missing identifier")
            })
    }

    async fn set_bypass_csp(&self, page: PageId, enabled: bool) -> Result<(), AdapterError> {
        self.send_page_command(page, "Page.setBypassCSP", json!({ "enabled": enabled }))
            .await?;
        Ok(())
    }

    async fn reload(&self, page: PageId) -> Result<(), AdapterError> {
        let _ = self
            .send_page_command(page, "Page.enable", Value::Object(Default::default()))
            .await;
        self.send_page_command(page, "Page.reload", Value::Object(Default::default()))
            .await?;
        // Give the navigation a moment to begin before readiness polling.
        sleep(Duration::from_millis(200)).await;
        self.wait_for_page_ready(page).await
    }

    async fn full_ax_tree(&self, page: PageId) -> Result<Vec<Value>, AdapterError> {
        self.wait_for_page_ready(page).await?;
        let _ = self
            .send_page_command(
                page,
                "Accessibility.enable",
                Value::Object(Default::default()),
            )
            .await;
        let response = self
            .send_page_command(
                page,
                "Accessibility.getFullAXTree",
                Value::Object(Default::default()),
            )
            .await?;
        let nodes = response
            .get("nodes")
            .and_then(|v| v.as_array())
            .ok_or_else(|| {
                AdapterError::new(AdapterErrorKind::Internal)
                    .with_hint("Accessibility.getFullAXTree missing 'nodes' array")
            })?
            .to_vec();
        Ok(nodes)
    }

    async fn resolve_backend_node(
        &self,
        page: PageId,
        backend_node_id: u64,
    ) -> Result<String, AdapterError> {
        let response = self
            .send_page_command(
                page,
                "DOM.resolveNode",
                json!({ "backendNodeId": backend_node_id }),
            )
            .await
            .map_err(|err| match err.kind {
                // DOM.resolveNode rejecting the id means the node is gone.
                // Anything else (timeout, lost connection) is not a verdict
                // on the reference and keeps its own classification.
                AdapterErrorKind::Protocol => AdapterError::new(AdapterErrorKind::TargetNotFound)
                    .with_hint(format!(
                        "backend node {backend_node_id} could not be resolved: {err}"
                    )),
                _ => err,
            })?;
        response
            .pointer("/object/objectId")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| {
                AdapterError::new(AdapterErrorKind::TargetNotFound).with_hint(format!(
                    "backend node {backend_node_id} resolved without an object id"
                ))
            })
    }

    async fn call_function_on(
        &self,
        page: PageId,
        object_id: &str,
        declaration: &str,
        args: &[Value],
    ) -> Result<Value, AdapterError> {
        let arguments: Vec<Value> = args.iter().map(|v| json!({ "value": v })).collect();
        let response = self
            .send_page_command(
                page,
                "Runtime.callFunctionOn",
                json!({
                    "functionDeclaration": declaration,
                    "objectId": object_id,
                    "arguments": arguments,
                    "returnByValue": true,
                }),
            )
            .await?;
        Self::extract_eval_result(response)
    }

    async fn navigate(&self, page: PageId, url: &str) -> Result<(), AdapterError> {
        let _ = self
            .send_page_command(page, "Page.enable", Value::Object(Default::default()))
            .await;
        self.send_page_command(page, "Page.navigate", json!({ "url": url }))
            .await?;
        sleep(Duration::from_millis(200)).await;
        self.wait_for_page_ready(page).await
    }
}
