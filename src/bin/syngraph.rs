/// Syngraph server entrypoint.
///
/// Usage:
///   syngraph                      - serve the graph session on 127.0.0.1:9000
///   syngraph -c server.yaml       - serve with the given configuration
///
/// Exit codes follow the supervisor contract: a keyboard interrupt exits 0,
/// any other end of the serve loop exits 3 ("restart requested") so a
/// wrapping reloader knows to start a fresh process.
use anyhow::{Context, Result};
use clap::Parser;
use colored::*;
use std::path::PathBuf;
use syngraph::{Config, SessionServer};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Collaborative graph-editing server.
#[derive(Parser)]
#[command(name = "syngraph")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the config file (YAML)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

/// Exit code asking the supervisor to restart the process.
const EXIT_RESTART: i32 = 3;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => Config::default(),
    };

    println!(
        "{} {} session at {}",
        "syngraph".bold(),
        format!("{:?}", config.server.model).to_lowercase().cyan(),
        format!("ws://{}", config.addr()).green()
    );
    info!(model = ?config.server.model, addr = %config.addr(), "starting server");

    let server = SessionServer::new(config.addr());
    let model = config.build_model();

    tokio::select! {
        result = server.run(model) => {
            // The serve loop only returns on failure; ask for a restart.
            if let Err(err) = result {
                error!(%err, "server stopped");
            }
            std::process::exit(EXIT_RESTART);
        }
        _ = signal::ctrl_c() => {
            println!();
            println!("{}", "Interrupted by user.".yellow());
            Ok(())
        }
    }
}
