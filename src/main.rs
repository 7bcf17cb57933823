//! Sluice Binary Entry Point
//!
//! Runs the edge acquisition pipeline against the bundled `mock` protocol
//! family and in-memory store. Deployments with real controllers or a real
//! time-series store embed the `sluice` library and inject their own
//! [`sluice::PlcClientFactory`] / [`sluice::PrimaryStore`] implementations.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use sluice::{AppConfig, MemoryStore, MockPlcFactory, PipelineBuilder};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Sluice - Edge Acquisition Gateway
#[derive(Parser, Debug)]
#[command(name = "sluice", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        default_value = "configs/config.yaml",
        env = "SLUICE_CONFIG"
    )]
    config: String,

    /// WAL directory (overrides config file)
    #[arg(long, env = "SLUICE_WAL_DIR")]
    wal_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sluice=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Sluice - Edge Acquisition Gateway");

    let cli = Cli::parse();

    tracing::info!("Loading configuration from: {}", cli.config);
    let mut config = AppConfig::load_with_device_path(&cli.config)?;

    // Apply CLI/env overrides (CLI > ENV > config file)
    if let Some(wal_dir) = cli.wal_dir {
        config.wal.dir = wal_dir;
    }

    tracing::info!(
        "Devices: {} ({} enabled), WAL: {}",
        config.devices.len(),
        config.enabled_devices().count(),
        config.wal.dir.display(),
    );

    let factory = Arc::new(MockPlcFactory::new());
    let store = Arc::new(MemoryStore::new());

    let mut pipeline = PipelineBuilder::new(config, factory, store).build()?;
    pipeline.start().await;

    tracing::info!("Press Ctrl+C to shutdown");
    shutdown_signal().await;

    tracing::info!("Shutting down pipeline...");
    pipeline.shutdown().await;

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Wait for a shutdown signal.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal");
        }
    }
}
