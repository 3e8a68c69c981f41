//! Flag and environment resolution into the adapter configuration.
//!
//! Environment (`FIBERSCOPE_*`) supplies the defaults; command-line flags
//! win over it.

use std::path::PathBuf;

use cdp_adapter::config::CdpConfig;

use crate::cli::Cli;

pub fn resolve(args: &Cli) -> CdpConfig {
    let mut cfg = CdpConfig::default();

    if let Some(path) = &args.chrome_path {
        cfg.executable = PathBuf::from(path);
    }
    if let Some(ws) = &args.ws_url {
        cfg.websocket_url = Some(ws.clone());
    }
    if args.headful {
        cfg.headless = false;
    }
    if let Some(deadline) = args.deadline_ms {
        cfg.default_deadline_ms = deadline;
    }

    cfg
}
