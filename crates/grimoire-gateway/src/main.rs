mod bootstrap;
mod cli;
mod config;
mod facade;
mod server;

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => run_server().await,
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,grimoire=debug")))
        .json()
        .init();
}

async fn run_server() -> anyhow::Result<()> {
    let (gateway_config, config_path) = config::load_config()?;
    tracing::info!(path = config_path, "loaded gateway configuration");

    let (state, events) = bootstrap::build_app_state(&gateway_config).await?;
    bootstrap::spawn_background_tasks(state.clone(), events);

    let facade = Arc::new(facade::GatewayFacade::new(state.clone()));
    tracing::info!("grimoire gateway ready, serving on stdio");

    let result = server::run(facade).await;

    tracing::info!("shutting down, killing every active spell");
    state.lifecycle.kill_all().await;

    result
}
