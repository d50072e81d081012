//! Signal handling for graceful shutdown and config reload.

use crate::config::ConfigLoader;
use crate::config::runtime::StoragePaths;
use crate::state::AppState;
use skinvault_core::config::{ConfigStore, ProcessorConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::Notify;

/// Completes on SIGTERM or SIGINT (Ctrl+C).
pub async fn shutdown_signal() {
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        }
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Failed to listen for SIGINT");
            }
            tracing::info!("Received SIGINT, initiating graceful shutdown");
        }
    }
}

/// Settings fixed for the lifetime of the process.
pub struct BootSettings {
    pub listen: SocketAddr,
    pub storage: StoragePaths,
}

/// Spawns a task that reloads the configuration on SIGHUP.
///
/// Processor tunables and bridge settings are swapped in place. The returned
/// `Notify` stops the task.
pub fn spawn_config_reload_handler(
    state: AppState,
    config_loader: Arc<ConfigLoader>,
    processor_config: ConfigStore<ProcessorConfig>,
    boot: BootSettings,
) -> Arc<Notify> {
    let shutdown_notify = Arc::new(Notify::new());
    let shutdown_notify_clone = shutdown_notify.clone();

    tokio::spawn(async move {
        let mut sighup = match signal(SignalKind::hangup()) {
            Ok(sighup) => sighup,
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGHUP handler, reload disabled");
                return;
            }
        };

        loop {
            tokio::select! {
                _ = sighup.recv() => {
                    tracing::info!("Received SIGHUP, reloading configuration");
                    match config_loader.reload() {
                        Ok(loaded) => {
                            if loaded.listen != boot.listen || loaded.storage != boot.storage {
                                tracing::warn!("Listen address and storage paths only change on restart");
                            }
                            processor_config.update(loaded.processor).await;
                            state.update_bridge(loaded.bridge).await;
                            tracing::info!(
                                path = %config_loader.path().display(),
                                version = processor_config.version(),
                                "Configuration reloaded successfully"
                            );
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "Failed to reload configuration, keeping previous");
                        }
                    }
                }
                _ = shutdown_notify_clone.notified() => {
                    tracing::debug!("Config reload handler shutting down");
                    break;
                }
            }
        }
    });

    shutdown_notify
}
