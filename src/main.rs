//! toolhub CLI - runs the provider hub.
//!
//! This is the binary entry point. See the `toolhub` library for the core
//! functionality; the MCP request layer connects to the running hub
//! through the library surface.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use toolhub::{Config, HotReloadCoordinator, ProviderManager};

#[derive(Parser)]
#[command(name = "toolhub", version, about = "Tool provider hub")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the hub and all configured providers.
    Serve {
        /// Path to the JSON configuration file.
        #[arg(short, long, default_value = "toolhub.json")]
        config: PathBuf,

        /// Socket path override (defaults to the uid-scoped temp dir).
        #[arg(long)]
        socket: Option<PathBuf>,
    },
    /// Print the tools a configuration would expose, without starting
    /// providers.
    Check {
        /// Path to the JSON configuration file.
        #[arg(short, long, default_value = "toolhub.json")]
        config: PathBuf,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve { config, socket } => serve(&config, socket),
        Command::Check { config } => check(&config),
    }
}

fn serve(config_path: &PathBuf, socket: Option<PathBuf>) -> Result<()> {
    let mut config = Config::load(config_path)?;
    if let Some(socket) = socket {
        config.socket_path = Some(socket);
    }

    let runtime = tokio::runtime::Runtime::new().context("Failed to create tokio runtime")?;
    runtime.block_on(async {
        let manager = Arc::new(ProviderManager::start(config.clone())?);
        log::info!("Hub socket: {}", manager.socket_path().display());

        manager.start_all().await;

        let reload = HotReloadCoordinator::start(Arc::clone(&manager), &config)?;
        if reload.is_some() {
            log::info!("Hot reload active");
        }

        let count = manager.list_tools().len();
        log::info!("Serving {count} tool(s)");

        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for ctrl-c")?;
        log::info!("Interrupt received, shutting down");

        if let Some(reload) = reload {
            reload.shutdown();
        }
        manager.shutdown().await;
        Ok(())
    })
}

fn check(config_path: &PathBuf) -> Result<()> {
    let config = Config::load(config_path)?;
    println!("Configuration OK: {} provider(s)", config.providers.len());
    for (name, entry) in &config.providers {
        let runtime = entry.runtime.clone().unwrap_or_else(|| "inferred".to_string());
        println!("  {name}: {} (runtime: {runtime})", entry.path.display());
    }
    Ok(())
}
