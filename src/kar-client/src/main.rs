mod archipelago;
mod cli;
mod commands;
mod config;
mod memory;
mod sync;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cli::*;

const DEFAULT_LOG_FILTER: &str = "kar_client=info,kar_bridge=info";

fn init_tracing(filter: Option<&str>) {
    let filter = match filter {
        Some(filter) => EnvFilter::new(filter),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log.as_deref());

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => commands::run::handle(&cli.run).await?,
        Commands::Configure(args) => commands::configure::handle(&args)?,
        Commands::Probe { json } => commands::probe::handle(&cli.run, json)?,
        Commands::Profiles { name } => commands::profiles::handle(name.as_deref())?,
    }

    Ok(())
}
