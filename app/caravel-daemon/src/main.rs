//! Caravel daemon entry point.
//!
//! Wires the core orchestrator to a REST surface on a per-user Unix
//! socket, manages the pid file, and shuts down cleanly on SIGINT or
//! SIGTERM. Any in-flight lifecycle operation finishes or dies at its
//! envelope timeout; nothing is cancelled mid-command.

use caravel_daemon::server;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use caravel_core::{ColimaCli, ConfigManager, Envelope, Orchestrator, Redactor};
use clap::Parser;
use tokio::net::UnixListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "caravel-daemon")]
#[command(author, version, about, long_about = None)]
struct DaemonArgs {
    /// Unix socket path for the API (default: <state_dir>/caravel.sock).
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Configuration file path (default: ~/.config/caravel/config.toml).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Colima executable override.
    #[arg(long)]
    colima_binary: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = DaemonArgs::parse();

    let config_manager = Arc::new(ConfigManager::new(
        args.config.clone().unwrap_or_else(ConfigManager::default_path),
    ));
    let config = config_manager.load().context("Failed to load configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("caravel={level},caravel_daemon={level}", level = config.daemon.log_level.as_str())
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    run(args, config_manager).await
}

async fn run(args: DaemonArgs, config_manager: Arc<ConfigManager>) -> Result<()> {
    info!("Starting Caravel daemon...");

    let config = config_manager.load()?;
    let state_dir = config.paths.state_dir.clone();
    std::fs::create_dir_all(&state_dir).context("Failed to create state directory")?;

    let pid_file = state_dir.join("daemon.pid");
    std::fs::write(&pid_file, format!("{}\n", std::process::id()))
        .context("Failed to write daemon PID file")?;

    let socket_path = args.socket.unwrap_or_else(|| state_dir.join("caravel.sock"));

    let binary = args
        .colima_binary
        .unwrap_or_else(|| config.paths.colima_binary.clone());
    let envelope = Envelope::new(Redactor::default());
    let adapter = ColimaCli::new(binary, envelope);
    let orchestrator = Arc::new(Orchestrator::new(Arc::new(adapter), config_manager));

    // Seed state from external truth before accepting requests; the VM
    // may have been started or stopped manually while we were down.
    match orchestrator.status().await {
        Ok(status) => info!(state = status.state.as_str(), "initial VM state"),
        Err(e) => warn!(error = %e, "initial status query failed"),
    }

    let _ = std::fs::remove_file(&socket_path);
    let listener = UnixListener::bind(&socket_path)
        .with_context(|| format!("Failed to bind socket: {}", socket_path.display()))?;
    info!(socket = %socket_path.display(), "API listening");

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            info!("Shutdown signal received");
            shutdown.cancel();
        });
    }

    let app = server::router(Arc::clone(&orchestrator));
    axum::serve(listener, app)
        .with_graceful_shutdown({
            let shutdown = shutdown.clone();
            async move { shutdown.cancelled().await }
        })
        .await
        .context("API server error")?;

    info!("Shutting down...");
    for path in [&socket_path, &pid_file] {
        if let Err(e) = std::fs::remove_file(path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove {}: {}", path.display(), e);
            }
        }
    }

    info!("Caravel daemon stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
