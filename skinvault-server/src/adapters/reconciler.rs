//! Reconciliation trigger.

use super::command::run_command;
use crate::config::runtime::CommandSettings;
use skinvault_core::ports::Reconciler;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Spawns the configured reconciliation command after each trade.
///
/// Runs are not serialized; a slow pass may overlap the next one.
pub struct CommandReconciler {
    settings: Arc<CommandSettings>,
}

impl CommandReconciler {
    pub fn new(settings: CommandSettings) -> Self {
        Self {
            settings: Arc::new(settings),
        }
    }
}

impl Reconciler for CommandReconciler {
    fn trigger(&self, trade_id: &str) {
        let settings = self.settings.clone();
        let trade_id = trade_id.to_owned();
        tokio::spawn(async move {
            match run_command(&settings, &[]).await {
                Ok(output) if output.status.success() => {
                    info!(trade_id = %trade_id, "Reconciliation pass finished");
                }
                Ok(output) => {
                    warn!(
                        trade_id = %trade_id,
                        status = %output.status,
                        stderr = %output.stderr.trim(),
                        "Reconciliation pass failed"
                    );
                }
                Err(e) => warn!(trade_id = %trade_id, error = %e, "Reconciliation pass could not run"),
            }
        });
    }
}

/// Used when no reconciliation command is configured.
pub struct NoopReconciler;

impl Reconciler for NoopReconciler {
    fn trigger(&self, trade_id: &str) {
        debug!(trade_id, "No reconciliation command configured");
    }
}
