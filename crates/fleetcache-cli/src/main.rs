mod cli;
mod commands;
mod output;

use anyhow::Result;
use clap::Parser;
use fleetcache::config::loader::load_config;
use fleetcache::observability::init_tracing_with_level;
use fleetcache::{BusError, CacheContext, CacheError};

use cli::{Cli, Commands};
use output::print_error;

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    if let Err(e) = run().await {
        print_error(&format!("{e:#}"));
        std::process::exit(exit_code(&e));
    }
}

/// Configuration problems exit with 2, everything else with 1.
fn exit_code(err: &anyhow::Error) -> i32 {
    let config_error = matches!(err.downcast_ref::<BusError>(), Some(BusError::Config(_)))
        || matches!(err.downcast_ref::<CacheError>(), Some(CacheError::Config(_)));
    if config_error { 2 } else { 1 }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref()).map_err(CacheError::Config)?;
    init_tracing_with_level(&config.logging.level);

    let ctx = CacheContext::from_config(config)?;

    match &cli.command {
        Commands::Listen(args) => commands::bus::listen(&ctx, args).await?,
        Commands::Send(args) => commands::bus::send(&ctx, args).await?,
        Commands::Notify(args) => commands::bus::notify(&ctx, args).await?,
        Commands::Get(args) => commands::cache::get(&ctx, args).await?,
        Commands::Scan(args) => commands::cache::scan(&ctx, args).await?,
        Commands::Status => commands::cache::status(&ctx).await?,
    }

    Ok(())
}
