//! Command-line surface and dispatch.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cdp_adapter::{event_bus, CdpAdapter};

use crate::bridge::AdapterPage;
use crate::config;
use crate::session;
use crate::tools::InspectorTools;

#[derive(Parser)]
#[command(name = "fiberscope", author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Navigate the inspected page to this URL first
    #[arg(long, global = true)]
    pub url: Option<String>,

    /// Attach to a running browser over this DevTools websocket URL
    #[arg(long, global = true)]
    pub ws_url: Option<String>,

    /// Chrome/Chromium executable to launch
    #[arg(long, global = true)]
    pub chrome_path: Option<String>,

    /// Launch the browser with a visible window
    #[arg(long, global = true)]
    pub headful: bool,

    /// Per-command deadline in milliseconds
    #[arg(long, global = true)]
    pub deadline_ms: Option<u64>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    pub log_level: String,

    /// Enable debug mode
    #[arg(short, long)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Install the introspection hook and report registered renderers
    Attach,
    /// Print the accessibility snapshot as JSON
    Snapshot {
        /// Keep platform-ignored nodes
        #[arg(short, long)]
        verbose: bool,
    },
    /// Print the correlated component map
    Map {
        /// Keep platform-ignored accessibility nodes
        #[arg(short, long)]
        verbose: bool,
        /// Include component state alongside props
        #[arg(long)]
        include_state: bool,
    },
    /// Resolve one backend reference to its owning component
    Component {
        /// Backend reference from a previous snapshot
        reference: u64,
    },
}

pub fn init_logging(level: &str, debug: bool) -> Result<()> {
    let level = if debug {
        tracing::Level::DEBUG
    } else {
        level.parse().context("Invalid log level")?
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.to_string())),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

pub async fn run(args: Cli) -> Result<()> {
    info!("Starting fiberscope v{}", env!("CARGO_PKG_VERSION"));

    let cfg = config::resolve(&args);
    let (bus, _rx) = event_bus(64);
    let adapter = Arc::new(CdpAdapter::new(cfg, bus));
    Arc::clone(&adapter)
        .start()
        .await
        .context("failed to start browser transport")?;

    let page = session::current_page(&adapter, args.url.as_deref())
        .await
        .context("failed to select a page")?;
    let tools = InspectorTools::new(AdapterPage::new(Arc::clone(&adapter), page));

    let outcome = dispatch(&args.command, &tools).await;
    adapter.shutdown().await;

    match outcome {
        Ok(output) => {
            println!("{output}");
            Ok(())
        }
        Err(err) => {
            error!("Command failed: {}", err);
            Err(err)
        }
    }
}

async fn dispatch(command: &Commands, tools: &InspectorTools<AdapterPage>) -> Result<String> {
    match command {
        Commands::Attach => {
            let report = tools.ensure_attached().await?;
            Ok(serde_json::to_string_pretty(&report)?)
        }
        Commands::Snapshot { verbose } => {
            let snapshot = tools.take_snapshot(*verbose).await?;
            Ok(serde_json::to_string_pretty(&snapshot)?)
        }
        Commands::Map {
            verbose,
            include_state,
        } => {
            tools.ensure_attached().await?;
            Ok(tools.get_component_map(*verbose, *include_state).await)
        }
        Commands::Component { reference } => {
            let query = tools.get_component_from_backend_reference(*reference).await;
            Ok(serde_json::to_string_pretty(&query)?)
        }
    }
}
