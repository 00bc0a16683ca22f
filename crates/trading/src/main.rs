//! Trading session binary.
//!
//! Loads configuration, initializes tracing and runs a [`TradingSession`]
//! against the paper venue until interrupted.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use tq_core::config::AppConfig;
use tq_trading::handler::LoggingHandler;
use tq_trading::session::TradingSession;

#[derive(Parser, Debug)]
#[command(name = "tq-trading", about = "Order lifecycle session")]
struct Args {
    /// Path to TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Place a few demo orders on start.
    #[arg(long)]
    demo: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = AppConfig::load(args.config)?;

    tq_core::logging::init_tracing(&config.logging)?;

    tracing::info!(
        mode = ?config.trading.mode,
        platform = %config.venue.platform,
        strategy = %config.venue.strategy,
        symbol = %config.venue.symbol,
        "starting tq-trading"
    );

    let session = TradingSession::new(config, Arc::new(LoggingHandler::new()))?;
    session.run(args.demo).await
}
