//! Validated runtime configuration.
//!
//! Built from [`super::file::FileConfig`] by the loader. Durations are real
//! `Duration`s and secrets are bytes from here on.

use skinvault_core::config::ProcessorConfig;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub listen: SocketAddr,
    pub storage: StoragePaths,
    pub processor: ProcessorConfig,
    pub pricing: PricingSettings,
    pub settlement: SettlementSettings,
    pub bridge: BridgeSettings,
    pub reconciliation: Option<CommandSettings>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoragePaths {
    pub queue: PathBuf,
    pub dead_letters: PathBuf,
    pub ledger: PathBuf,
    pub settlement_journal: PathBuf,
}

#[derive(Debug, Clone)]
pub struct PricingSettings {
    pub quote: CommandSettings,
    pub rate_url: Url,
}

/// An external program invocation with a deadline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSettings {
    pub program: String,
    pub args: Vec<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct SettlementSettings {
    pub relay_url: Url,
    pub bearer_token: Option<String>,
}

/// Bridge settings; reloadable at runtime.
#[derive(Clone)]
pub struct BridgeSettings {
    pub offer_url: Url,
    pub notify_secret: Box<[u8]>,
    pub app_id: u32,
    pub context_id: String,
}

impl std::fmt::Debug for BridgeSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeSettings")
            .field("offer_url", &self.offer_url.as_str())
            .field("notify_secret", &"<redacted>")
            .field("app_id", &self.app_id)
            .field("context_id", &self.context_id)
            .finish()
    }
}
