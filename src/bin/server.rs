//! CherryQuant orchestrator server — headless, no UI, no HTTP surface (§6:
//! the operator-facing API is a set of plain async handles, not a bound
//! port; a thin HTTP layer wrapping them lives outside this crate).
//!
//! # Usage
//! ```sh
//! cargo run --bin cherryquant-server
//! ```

use anyhow::Result;
use cherryquant_orchestrator::application::bootstrap;
use cherryquant_orchestrator::config::OrchestratorConfig;
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::prelude::*;

/// Most configuration is environment-driven (§6); these flags only cover
/// what's awkward to set per-invocation through the environment.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to a `.env` file to load before reading the environment.
    #[arg(long)]
    env_file: Option<std::path::PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match &cli.env_file {
        Some(path) => {
            dotenvy::from_path(path).ok();
        }
        None => {
            dotenvy::dotenv().ok();
        }
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    info!("CherryQuant orchestrator {} starting...", env!("CARGO_PKG_VERSION"));

    let config = OrchestratorConfig::from_env()?;
    info!(
        max_agents = config.max_agents,
        llm_requests_per_minute = config.llm_requests_per_minute,
        "configuration loaded"
    );

    let orchestrator = bootstrap::init(&config).await?;
    info!("orchestrator running");

    // Agent creation/start/stop is an operator-facing concern driven from
    // outside this crate; `orchestrator` is the set of handles a thin
    // control-plane layer would wrap. This binary just keeps the runtime
    // alive until told to stop.
    let _ = &orchestrator;

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, exiting");

    Ok(())
}
