//! Application state shared across all request handlers.

use crate::adapters::OfferDesk;
use crate::config::runtime::BridgeSettings;
use skinvault_core::entities::ledger::CsvLedger;
use skinvault_core::entities::trade_queue::TradeQueue;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Cheap to clone; everything is behind `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<TradeQueue>,
    /// Read-only from the HTTP side; only the processor writes it.
    pub ledger: Arc<CsvLedger>,
    pub offers: Arc<dyn OfferDesk>,
    /// Replaced on SIGHUP.
    pub bridge: Arc<RwLock<BridgeSettings>>,
}

impl AppState {
    pub fn new(
        queue: Arc<TradeQueue>,
        ledger: Arc<CsvLedger>,
        offers: Arc<dyn OfferDesk>,
        bridge: Arc<RwLock<BridgeSettings>>,
    ) -> Self {
        Self {
            queue,
            ledger,
            offers,
            bridge,
        }
    }

    pub async fn update_bridge(&self, settings: BridgeSettings) {
        *self.bridge.write().await = settings;
    }
}
