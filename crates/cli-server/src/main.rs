//! cli-server - local development server
//!
//! Serves the UI, the session registry and the admin control channel, then
//! exits when asked to via `POST /admin-api/commands {"type":"shutdown"}` or
//! on SIGINT/SIGTERM.

use anyhow::{Context, Result};
use clap::Parser;
use cli_server::{telemetry, CliServer, ServerConfig};
use std::net::IpAddr;
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "cli-server")]
#[command(about = "Local development server for the API workspace UI")]
#[command(version)]
struct Cli {
    /// Config file, used in place of ./cli-server.toml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Interface to listen on
    #[arg(long)]
    host: Option<IpAddr>,

    /// Preferred port; a free port is used if it is taken
    #[arg(short, long)]
    port: Option<u16>,

    /// Resources directory containing react/index.html
    #[arg(long)]
    resource_root: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (mut config, sources) = cliconf::CliConfig::load_with_sources_from(cli.config.as_deref())
        .context("Failed to load configuration")?;
    if let Some(host) = cli.host {
        config.bind.host = host;
    }
    if let Some(port) = cli.port {
        config.bind.preferred_port = port;
    }
    if let Some(root) = cli.resource_root {
        config.paths.resource_root = root;
    }

    let telemetry_guard =
        telemetry::init(&config.telemetry).context("Failed to initialize telemetry")?;
    for file in &sources.files {
        info!("Loaded config from {}", file.display());
    }
    if !sources.env_overrides.is_empty() {
        info!(overrides = ?sources.env_overrides, "Applied environment overrides");
    }

    let mut server = CliServer::new(ServerConfig::from(&config));
    let shutdown_requested = server.events().shutdown_requested();

    let started = server.start().await.context("Failed to start server")?;
    info!("🚀 cli-server ready on http://{}:{}", config.bind.host, started.port);
    info!("   UI root: {}", config.paths.resource_root.join("react").display());

    tokio::select! {
        _ = shutdown_requested => {
            info!("Shutdown requested via admin api, shutting down...");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received SIGINT, shutting down...");
        }
        _ = terminate() => {
            info!("Received SIGTERM, shutting down...");
        }
    }

    server.stop().await;
    info!("Shutdown complete");

    telemetry_guard.shutdown();
    Ok(())
}

async fn terminate() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        std::future::pending::<()>().await;
    }
}
