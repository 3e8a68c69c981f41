//! Hook bootstrap.
//!
//! React renderers register themselves with a well-known global hook at
//! startup. If nothing installed that hook before the renderer loaded, the
//! registration is lost for good, so attaching to an already-running page
//! requires installing the hook as a preload script and reloading once.

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::errors::InspectorError;
use crate::model::{AttachReport, RendererInfo};
use crate::ports::InspectorPage;

pub const HOOK_INSTALL_JS: &str = include_str!("js/hook_install.js");
const HOOK_PROBE_JS: &str = include_str!("js/hook_probe.js");

#[derive(Debug, Deserialize)]
struct ProbeResult {
    installed: bool,
    #[serde(default)]
    renderers: Vec<RendererInfo>,
}

/// Drives the attach sequence for one page. Remembers whether the preload
/// script has been registered and whether the single allowed reload has
/// already been spent.
#[derive(Debug, Default)]
pub struct HookBootstrap {
    preload_installed: bool,
    reloaded: bool,
}

impl HookBootstrap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the devtools hook present and report registered renderers.
    ///
    /// The sequence is bounded: register the preload, probe, patch the live
    /// document and probe again, then at most ONE reload. A page that simply
    /// does not run React yields `attached: false` with an explanatory
    /// message, never an error.
    pub async fn ensure_attached(
        &mut self,
        page: &dyn InspectorPage,
    ) -> Result<AttachReport, InspectorError> {
        // The preload goes in before anything else so the hook survives
        // navigations the page performs on its own, even when this very
        // probe already finds live renderers.
        if !self.preload_installed {
            page.add_preload_script(HOOK_INSTALL_JS).await?;
            self.preload_installed = true;
        }

        let probe = self.probe(page).await?;
        if probe.installed && !probe.renderers.is_empty() {
            debug!(
                target: "inspector",
                renderers = probe.renderers.len(),
                "hook already live, skipping install"
            );
            return Ok(AttachReport {
                attached: true,
                renderers: probe.renderers,
                message: None,
            });
        }

        // Patch the document that is already loaded. Renderers that register
        // lazily pick this up without losing page state to a reload.
        page.evaluate(HOOK_INSTALL_JS).await?;
        let probe = self.probe(page).await?;
        if probe.installed && !probe.renderers.is_empty() {
            return Ok(AttachReport {
                attached: true,
                renderers: probe.renderers,
                message: None,
            });
        }

        if self.reloaded {
            // Already spent the one reload. More of them will not conjure a
            // renderer out of a non-React page.
            return Ok(AttachReport {
                attached: false,
                renderers: probe.renderers,
                message: Some(
                    "hook installed but no React renderers registered; the page may not use React"
                        .into(),
                ),
            });
        }

        info!(target: "inspector", "hook not live, reloading with the preload in place");
        page.set_bypass_csp(true).await?;
        self.reloaded = true;
        page.reload().await?;

        let probe = self.probe(page).await?;
        if probe.installed && !probe.renderers.is_empty() {
            Ok(AttachReport {
                attached: true,
                renderers: probe.renderers,
                message: None,
            })
        } else {
            Ok(AttachReport {
                attached: false,
                renderers: probe.renderers,
                message: Some(
                    "hook installed but no React renderers registered; the page may not use React"
                        .into(),
                ),
            })
        }
    }

    async fn probe(&self, page: &dyn InspectorPage) -> Result<ProbeResult, InspectorError> {
        let raw = page.evaluate(HOOK_PROBE_JS).await?;
        parse_probe(&raw)
    }
}

fn parse_probe(raw: &Value) -> Result<ProbeResult, InspectorError> {
    serde_json::from_value(raw.clone())
        .map_err(|err| InspectorError::Payload(format!("malformed hook probe result: {err}")))
}
