use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tokio::signal;
use tracing::{error, info};

use sqlmask_proxy::commands;
use sqlmask_proxy::config::{self, Config};
use sqlmask_proxy::logging;
use sqlmask_proxy::{ProxyManager, RuleStore};

#[derive(Parser, Debug)]
#[command(name = "sqlmask-proxy")]
#[command(about = "MySQL proxy that masks sensitive columns by rewriting queries", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file (YAML/JSON/TOML)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Debug, clap::Subcommand)]
enum Command {
    /// Run the masking proxy (default)
    Run,
    /// Validate configuration and print the resolved target and rules
    Check {
        /// Also try to open a TCP connection to the upstream database
        #[arg(long)]
        probe: bool,
    },
    /// Print the statement the interceptor would produce
    Rewrite {
        #[arg(long)]
        sql: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = load_config(args.config.as_ref()).await?;
    logging::init(&config.logging, args.debug);

    match args.command.unwrap_or(Command::Run) {
        Command::Check { probe } => {
            commands::run_config_check(config, probe).await?;
            return Ok(());
        }
        Command::Rewrite { sql } => {
            println!("{}", commands::run_rewrite(&config, &sql));
            return Ok(());
        }
        Command::Run => {}
    }

    info!("Starting SQL masking proxy");

    let rules = RuleStore::shared();
    rules.load(&config.rules);
    info!("Loaded masking rules for {} table(s)", rules.table_count());

    let manager = ProxyManager::new(config, rules)?;
    // The resolved target only; the datasource URL may carry credentials
    info!(
        "Proxy will listen on {} and forward to {}",
        manager.config().proxy.listen_address(),
        manager.get_status().target
    );
    // `run` serves regardless of autoStart
    manager.start_proxy().await?;

    shutdown_signal().await;

    info!("Shutting down SQL masking proxy");
    if let Err(e) = manager.stop_proxy().await {
        error!("Error while stopping proxy: {}", e);
    }
    info!("Graceful shutdown completed");

    Ok(())
}

async fn load_config(path: Option<&PathBuf>) -> anyhow::Result<Config> {
    let config = match path {
        Some(path) => config::load_from_path(path)
            .await
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => config::load_from_env_or_file()
            .await
            .context("Failed to load configuration")?,
    };
    Ok(config)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }
}
