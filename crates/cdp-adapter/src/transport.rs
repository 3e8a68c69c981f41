//! Websocket transport to the browser.
//!
//! A single pump task owns the chromiumoxide connection. Callers hand it
//! commands over an mpsc channel with a oneshot responder each; decoded
//! events flow out on a second channel. When the pump dies the next caller
//! transparently gets a fresh connection.

use std::collections::HashMap;
use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::async_process::Child;
use chromiumoxide::browser::BrowserConfig;
use chromiumoxide::cdp::browser_protocol::target::SessionId as CdpSessionId;
use chromiumoxide::cdp::events::CdpEventMessage;
use chromiumoxide::conn::Connection;
use chromiumoxide::error::CdpError;
use chromiumoxide_types::{CallId, CdpJsonEventMessage, Message, MethodId, Response};
use futures::{future::BoxFuture, StreamExt};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot, Mutex, OnceCell};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::CdpConfig;
use crate::error::{AdapterError, AdapterErrorKind};
use crate::util::extract_ws_url;

/// One decoded CDP event, before any adapter-level interpretation.
#[derive(Clone, Debug)]
pub struct TransportEvent {
    pub method: String,
    pub params: Value,
    pub session_id: Option<String>,
}

/// Routing for an outgoing command: the browser connection itself or one
/// attached flat session.
#[derive(Clone, Debug)]
pub enum CommandTarget {
    Browser,
    Session(String),
}

#[async_trait]
pub trait CdpTransport: Send + Sync {
    async fn start(&self) -> Result<(), AdapterError>;
    async fn next_event(&self) -> Option<TransportEvent>;
    async fn send_command(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
    ) -> Result<Value, AdapterError>;
}

type PumpFactory = Arc<
    dyn Fn(CdpConfig) -> BoxFuture<'static, Result<Arc<ConnectionPump>, AdapterError>>
        + Send
        + Sync,
>;

/// Transport over a live chromium websocket. The pump is created on first
/// use and replaced whenever its task has stopped.
#[derive(Clone)]
pub struct ChromiumTransport {
    cfg: CdpConfig,
    pump: Arc<OnceCell<Mutex<Option<Arc<ConnectionPump>>>>>,
    factory: PumpFactory,
}

impl ChromiumTransport {
    pub fn new(cfg: CdpConfig) -> Self {
        let factory: PumpFactory = Arc::new(|cfg: CdpConfig| {
            Box::pin(async move { ConnectionPump::connect(cfg).await.map(Arc::new) })
        });
        Self {
            cfg,
            pump: Arc::new(OnceCell::new()),
            factory,
        }
    }

    #[cfg(test)]
    fn with_factory(cfg: CdpConfig, factory: PumpFactory) -> Self {
        Self {
            cfg,
            pump: Arc::new(OnceCell::new()),
            factory,
        }
    }

    async fn pump(&self) -> Result<Arc<ConnectionPump>, AdapterError> {
        let cell = self.pump.get_or_init(|| async { Mutex::new(None) }).await;
        let mut slot = cell.lock().await;

        if let Some(pump) = slot.as_ref() {
            if pump.is_running() {
                return Ok(Arc::clone(pump));
            }
            warn!(target: "cdp-transport", "connection pump stopped, reconnecting");
        }

        let fresh = (self.factory)(self.cfg.clone()).await?;
        *slot = Some(Arc::clone(&fresh));
        Ok(fresh)
    }

    fn deadline(&self) -> Duration {
        Duration::from_millis(self.cfg.default_deadline_ms)
    }
}

#[async_trait]
impl CdpTransport for ChromiumTransport {
    /// Connect and turn on target discovery with flat auto-attach. Until
    /// this runs, no `Target.attachedToTarget` events arrive.
    async fn start(&self) -> Result<(), AdapterError> {
        let pump = self.pump().await?;
        pump.submit(
            CommandTarget::Browser,
            "Target.setDiscoverTargets",
            json!({ "discover": true }),
            self.deadline(),
        )
        .await?;
        pump.submit(
            CommandTarget::Browser,
            "Target.setAutoAttach",
            json!({
                "autoAttach": true,
                "waitForDebuggerOnStart": false,
                "flatten": true,
            }),
            self.deadline(),
        )
        .await?;
        Ok(())
    }

    async fn next_event(&self) -> Option<TransportEvent> {
        match self.pump().await {
            Ok(pump) => pump.recv_event().await,
            Err(err) => {
                warn!(target: "cdp-transport", ?err, "transport not ready");
                None
            }
        }
    }

    async fn send_command(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
    ) -> Result<Value, AdapterError> {
        let pump = self.pump().await?;
        pump.submit(target, method, params, self.deadline()).await
    }
}

struct OutboundCommand {
    target: CommandTarget,
    method: String,
    params: Value,
    reply: oneshot::Sender<Result<Value, AdapterError>>,
}

type InflightMap = HashMap<CallId, oneshot::Sender<Result<Value, AdapterError>>>;

/// A running connection: command intake, event output, the pump task, and
/// the launched browser process if we own one.
struct ConnectionPump {
    commands: mpsc::Sender<OutboundCommand>,
    events: Mutex<mpsc::Receiver<TransportEvent>>,
    task: JoinHandle<()>,
    browser_process: Mutex<Option<Child>>,
    running: Arc<AtomicBool>,
}

impl ConnectionPump {
    async fn connect(cfg: CdpConfig) -> Result<Self, AdapterError> {
        let (process, ws_url) = match cfg.websocket_url.clone() {
            Some(url) => (None, url),
            None => spawn_browser(&cfg).await?,
        };

        let conn = Connection::<CdpEventMessage>::connect(&ws_url)
            .await
            .map_err(|err| {
                AdapterError::new(AdapterErrorKind::CdpIo)
                    .with_hint(format!("websocket connect failed: {err}"))
            })?;
        info!(target: "cdp-transport", url = %ws_url, "connected to browser");

        let (command_tx, command_rx) = mpsc::channel(128);
        let (event_tx, event_rx) = mpsc::channel(512);
        let running = Arc::new(AtomicBool::new(true));

        let task = {
            let running = Arc::clone(&running);
            tokio::spawn(async move {
                if let Err(err) = pump_loop(conn, command_rx, event_tx).await {
                    error!(target: "cdp-transport", ?err, "connection pump failed");
                }
                running.store(false, Ordering::Relaxed);
            })
        };

        Ok(Self {
            commands: command_tx,
            events: Mutex::new(event_rx),
            task,
            browser_process: Mutex::new(process),
            running,
        })
    }

    #[cfg(test)]
    fn test_stub() -> (Arc<Self>, Arc<AtomicBool>) {
        let (command_tx, _command_rx) = mpsc::channel(8);
        let (_event_tx, event_rx) = mpsc::channel(8);
        let running = Arc::new(AtomicBool::new(true));
        let task = tokio::spawn(futures::future::pending::<()>());
        (
            Arc::new(Self {
                commands: command_tx,
                events: Mutex::new(event_rx),
                task,
                browser_process: Mutex::new(None),
                running: Arc::clone(&running),
            }),
            running,
        )
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    async fn submit(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
        deadline: Duration,
    ) -> Result<Value, AdapterError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(OutboundCommand {
                target,
                method: method.to_owned(),
                params,
                reply: reply_tx,
            })
            .await
            .map_err(|_| {
                AdapterError::new(AdapterErrorKind::CdpIo).with_hint("connection pump is gone")
            })?;

        match tokio::time::timeout(deadline, reply_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(AdapterError::new(AdapterErrorKind::CdpIo)
                .with_hint("reply channel dropped mid-command")),
            Err(_) => Err(AdapterError::new(AdapterErrorKind::Timeout)
                .with_hint(format!("{method} exceeded its deadline"))
                .retriable(true)),
        }
    }

    async fn recv_event(&self) -> Option<TransportEvent> {
        self.events.lock().await.recv().await
    }
}

impl Drop for ConnectionPump {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        self.task.abort();

        if let Ok(mut slot) = self.browser_process.try_lock() {
            if let Some(mut child) = slot.take() {
                if let Ok(handle) = tokio::runtime::Handle::try_current() {
                    handle.spawn(async move {
                        if let Err(err) = child.kill().await {
                            warn!(target: "cdp-transport", ?err, "browser process did not die cleanly");
                        }
                    });
                }
            }
        }
    }
}

async fn pump_loop(
    mut conn: Connection<CdpEventMessage>,
    mut commands: mpsc::Receiver<OutboundCommand>,
    events: mpsc::Sender<TransportEvent>,
) -> Result<(), AdapterError> {
    let mut inflight: InflightMap = HashMap::new();

    loop {
        tokio::select! {
            Some(cmd) = commands.recv() => {
                submit_outbound(&mut conn, cmd, &mut inflight)?;
            }
            message = conn.next() => match message {
                Some(Ok(Message::Response(response))) => {
                    if let Some(reply) = inflight.remove(&response.id) {
                        let _ = reply.send(decode_response(response));
                    }
                }
                Some(Ok(Message::Event(event))) => {
                    forward_event(event, &events).await;
                }
                Some(Err(err)) => {
                    let mapped = classify_cdp_error(err);
                    fail_inflight(&mut inflight, &mapped);
                    return Err(mapped);
                }
                None => {
                    let closed = AdapterError::new(AdapterErrorKind::CdpIo)
                        .with_hint("browser closed the connection");
                    fail_inflight(&mut inflight, &closed);
                    return Ok(());
                }
            }
        }
    }
}

fn submit_outbound(
    conn: &mut Connection<CdpEventMessage>,
    cmd: OutboundCommand,
    inflight: &mut InflightMap,
) -> Result<(), AdapterError> {
    let session = match cmd.target {
        CommandTarget::Browser => None,
        CommandTarget::Session(id) => Some(CdpSessionId::from(id)),
    };
    let method: MethodId = cmd.method.clone().into();

    match conn.submit_command(method, session, cmd.params) {
        Ok(call_id) => {
            inflight.insert(call_id, cmd.reply);
            Ok(())
        }
        Err(err) => {
            let mapped = AdapterError::new(AdapterErrorKind::CdpIo)
                .with_hint(format!("{} submit failed: {err}", cmd.method));
            let _ = cmd.reply.send(Err(mapped.clone()));
            Err(mapped)
        }
    }
}

async fn forward_event(event: CdpEventMessage, events: &mpsc::Sender<TransportEvent>) {
    let raw: CdpJsonEventMessage = match event.try_into() {
        Ok(raw) => raw,
        Err(err) => {
            warn!(target: "cdp-transport", ?err, "undecodable cdp event dropped");
            return;
        }
    };
    let _ = events
        .send(TransportEvent {
            method: raw.method.into_owned(),
            params: raw.params,
            session_id: raw.session_id,
        })
        .await;
}

fn fail_inflight(inflight: &mut InflightMap, err: &AdapterError) {
    for (_, reply) in inflight.drain() {
        let _ = reply.send(Err(err.clone()));
    }
}

fn decode_response(response: Response) -> Result<Value, AdapterError> {
    if let Some(result) = response.result {
        return Ok(result);
    }
    if let Some(error) = response.error {
        // The browser answered, so the link is healthy; only the command
        // itself was rejected.
        return Err(AdapterError::new(AdapterErrorKind::Protocol)
            .with_hint(format!("cdp error {}: {}", error.code, error.message))
            .retriable(error.code >= 500));
    }
    Err(AdapterError::new(AdapterErrorKind::Internal).with_hint("response had neither result nor error"))
}

fn classify_cdp_error(err: CdpError) -> AdapterError {
    let hint = err.to_string();
    match err {
        CdpError::Timeout => AdapterError::new(AdapterErrorKind::Timeout)
            .with_hint(hint)
            .retriable(true),
        CdpError::JavascriptException(_) => {
            AdapterError::new(AdapterErrorKind::EvalFailed).with_hint(hint)
        }
        CdpError::Serde(_) | CdpError::FrameNotFound(_) => {
            AdapterError::new(AdapterErrorKind::Internal).with_hint(hint)
        }
        _ => AdapterError::new(AdapterErrorKind::CdpIo)
            .with_hint(hint)
            .retriable(true),
    }
}

async fn spawn_browser(cfg: &CdpConfig) -> Result<(Option<Child>, String), AdapterError> {
    let browser_cfg = build_browser_config(cfg)?;
    let mut child = browser_cfg.launch().map_err(|err| {
        AdapterError::new(AdapterErrorKind::Internal)
            .with_hint(format!("browser launch failed: {err}"))
    })?;

    let ws_url = extract_ws_url(&mut child)
        .await
        .map_err(|err| AdapterError::new(AdapterErrorKind::CdpIo).with_hint(err.to_string()))?;

    Ok((Some(child), ws_url))
}

fn build_browser_config(cfg: &CdpConfig) -> Result<BrowserConfig, AdapterError> {
    if !cfg.executable.as_os_str().is_empty() && !cfg.executable.exists() {
        return Err(AdapterError::new(AdapterErrorKind::CdpIo).with_hint(format!(
            "no browser executable at {} (set FIBERSCOPE_CHROME)",
            cfg.executable.display()
        )));
    }

    let profile_dir = if cfg.user_data_dir.is_absolute() {
        cfg.user_data_dir.clone()
    } else {
        std::env::current_dir()
            .map_err(|err| {
                AdapterError::new(AdapterErrorKind::Internal)
                    .with_hint(format!("cannot resolve working directory: {err}"))
            })?
            .join(&cfg.user_data_dir)
    };
    fs::create_dir_all(&profile_dir).map_err(|err| {
        AdapterError::new(AdapterErrorKind::Internal)
            .with_hint(format!("cannot create profile directory: {err}"))
    })?;

    let mut builder = BrowserConfig::builder()
        .request_timeout(Duration::from_millis(cfg.default_deadline_ms))
        .launch_timeout(Duration::from_secs(20))
        .user_data_dir(profile_dir);

    if !cfg.headless {
        builder = builder.with_head();
    }
    if !cfg.executable.as_os_str().is_empty() {
        builder = builder.chrome_executable(cfg.executable.clone());
    }
    if std::env::var("FIBERSCOPE_DISABLE_SANDBOX")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
    {
        builder = builder.no_sandbox();
    }

    let mut flags = vec![
        "--no-first-run",
        "--no-default-browser-check",
        "--disable-background-networking",
        "--disable-component-update",
        "--disable-default-apps",
        "--disable-extensions",
        "--disable-popup-blocking",
        "--disable-sync",
        "--remote-allow-origins=*",
    ];
    if cfg.headless {
        flags.extend(["--headless=new", "--hide-scrollbars", "--mute-audio"]);
    }
    builder = builder.args(flags);

    builder.build().map_err(|err| {
        AdapterError::new(AdapterErrorKind::Internal)
            .with_hint(format!("invalid browser configuration: {err}"))
    })
}
