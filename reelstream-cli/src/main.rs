//! Reelstream CLI - Command-line interface
//!
//! Runs the streaming API and gives operators access to the catalog and
//! per-variant download state.

mod commands;

use std::path::PathBuf;

use clap::Parser;
use reelstream_core::tracing_setup::{CliLogLevel, init_tracing};

#[derive(Parser)]
#[command(name = "reelstream")]
#[command(about = "Progressive playback of swarm-downloaded media")]
struct Cli {
    /// Console log level (RUST_LOG takes precedence when set)
    #[arg(long, value_enum, default_value_t = CliLogLevel::Info, global = true)]
    log_level: CliLogLevel,

    /// Directory for the per-run trace log
    #[arg(long, default_value = "logs", global = true)]
    logs_dir: PathBuf,

    /// Catalog store file (overrides REELSTREAM_STORE_PATH)
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: commands::Commands,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.log_level.as_tracing_level(), Some(&cli.logs_dir))
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    commands::handle_command(cli.command, cli.store).await
}
