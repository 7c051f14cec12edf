mod config;
mod connector;
mod logging;
mod monitor;

use anyhow::{Context, Result};
use config::AppConfig;
use monitor::Components;
use std::path::PathBuf;
use tokio::sync::watch;
use tracing::{error, info, warn};

const DEFAULT_CONFIG_PATH: &str = "monitor.yaml";

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

    let config = AppConfig::load(&config_path)?;
    let _logging = logging::init(config.log_file.as_deref())?;

    info!("IoW monitor starting");
    info!("  Config: {}", config_path.display());
    info!("  Database: {}", config.database_location.display());
    info!("  Connection: {}", config.connection_type);

    let components = Components::build(&config).context("Failed to start monitor")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl-C received, stopping after the current tick");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => warn!("Failed to listen for Ctrl-C: {}", e),
        }
    });

    let mut monitor = components.into_monitor(shutdown_rx);
    if let Err(e) = monitor.run().await {
        error!("Storage failure, stopping: {}", e);
        return Err(e).context("Monitor stopped on storage failure");
    }

    info!("IoW monitor stopped");
    Ok(())
}
