mod cities;
mod cli;
mod dispatcher;
mod service;
mod shutdown;
mod storage;

use anyhow::Result;
use clap::Parser;
use cli::{Args, Command, GridConfig};
use std::path::Path;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logging; RUST_LOG takes precedence over --verbose
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let _subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match args.command {
        Command::Serve(serve_args) => {
            serve(&args.config, serve_args).await?;
        }
        Command::Dispatch(dispatch_args) => {
            dispatch(&args.config, dispatch_args).await?;
        }
        Command::Init(init_args) => {
            generate_sample_config(init_args)?;
        }
    }

    Ok(())
}

async fn serve(config_path: &Path, args: cli::ServeArgs) -> Result<()> {
    info!("Loading config from {:?}", config_path);
    let mut config = GridConfig::load(config_path)?;

    if let Some(address) = args.address {
        config.server.address = address;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(enabled) = args.backup_override() {
        config.backup.enabled = enabled;
    }

    service::run_instance(config, args.supervised).await
}

async fn dispatch(config_path: &Path, args: cli::DispatchArgs) -> Result<()> {
    info!("Loading config from {:?}", config_path);
    let mut config = GridConfig::load(config_path)?;

    if args.spawn {
        config.dispatcher.spawn_backends = true;
    }
    if let Some(pool_size) = args.pool_size {
        config.dispatcher.pool_size = pool_size;
    }

    dispatcher::run_dispatcher(config, config_path).await
}

fn generate_sample_config(args: cli::InitArgs) -> Result<()> {
    let config = GridConfig::sample();

    config.save(&args.output)?;
    println!("Generated sample config at: {:?}", args.output);

    Ok(())
}
