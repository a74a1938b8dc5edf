//! Kiosk Daemon - Runs committed installs and dispatches completions

use anyhow::Result;
use kiosk_common::config::{config_path, KioskConfig};
use kioskd::{CommandHostActions, Daemon};
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let path = config_path();
    let config = KioskConfig::load_from(&path);

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log.level)),
        )
        .init();

    info!("[BOOT] kioskd v{} starting", env!("CARGO_PKG_VERSION"));
    info!("[BOOT] Config {}, data in {}", path.display(), config.storage.data_dir.display());

    let host = Arc::new(CommandHostActions::new(config.host.clone()));
    let daemon = Daemon::new(&config, host);

    let (recovery, sweep) = daemon.startup().await;
    info!(
        "[READY] {} interrupted install(s) requeued, {} install(s) run, {} ticket(s) handled",
        recovery.interrupted, sweep.installed, sweep.tickets.handled
    );

    daemon.run(shutdown_signal()).await
}

async fn shutdown_signal() {
    let term = async {
        match signal(SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                warn!("Failed to register SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term => {}
    }
}
