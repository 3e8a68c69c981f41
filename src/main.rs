use anyhow::Result;
use clap::Parser;

use fiberscope_cli::cli::{self, Cli};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    cli::init_logging(&args.log_level, args.debug)?;
    cli::run(args).await
}
