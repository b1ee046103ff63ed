//! # butterfly-reach CLI
//!
//! Prepares a core-contracted index over a JSON road graph and answers route,
//! isochrone and matrix queries against it.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn main() -> Result<()> {
    let cli = cli::Cli::parse();
    init_logging(cli.log_json);

    if let Err(e) = cli.run() {
        tracing::error!(error = %format!("{:#}", e), "command failed");
        return Err(e);
    }
    Ok(())
}
