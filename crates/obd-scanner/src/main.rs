//! OBD-II Scanner - Main Entry Point

use anyhow::Context;
use clap::Parser;
use obd_scanner::{init_logging, run_scanner, Cli};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.load_config().context("Failed to load configuration")?;
    init_logging(&config)?;

    info!("=== OBD-II Scanner v{} ===", env!("CARGO_PKG_VERSION"));
    run_scanner(config).await
}
