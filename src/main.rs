// =============================================================================
// Meridian — Main Entry Point
// =============================================================================
//
// Autonomous multi-agent trading platform: each agent is bound to one asset
// and runs a recurring decision cycle (market data -> sentiment + technical
// -> decision -> risk gate -> execution -> durable log). The CLI is the only
// surface; all components are constructed once here and passed explicitly.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod backtest;
mod broker;
mod cli;
mod config;
mod cycle;
mod decision;
mod error;
mod executor;
mod market_data;
mod market_hours;
mod risk_validator;
mod scheduler;
mod sentiment;
mod store;
mod technical;
mod types;

use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = cli::Cli::parse();
    cli::run(args).await
}
