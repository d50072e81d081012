//! TOML file configuration structures.
//!
//! These structs map one-to-one onto `skinvault.toml`. Everything with a
//! sensible default may be omitted; the bridge, pricing and settlement
//! endpoints have to be spelled out.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::PathBuf;
use url::Url;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub processor: ProcessorConfig,
    pub pricing: PricingConfig,
    pub settlement: SettlementConfig,
    pub bridge: BridgeConfig,
    /// Omitted means no reconciliation pass is run.
    #[serde(default)]
    pub reconciliation: Option<ReconciliationConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 3000))
}

/// Where the durable files live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_queue_path")]
    pub queue: PathBuf,
    #[serde(default = "default_dead_letter_path")]
    pub dead_letters: PathBuf,
    #[serde(default = "default_ledger_path")]
    pub ledger: PathBuf,
    #[serde(default = "default_journal_path")]
    pub settlement_journal: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            queue: default_queue_path(),
            dead_letters: default_dead_letter_path(),
            ledger: default_ledger_path(),
            settlement_journal: default_journal_path(),
        }
    }
}

fn default_queue_path() -> PathBuf {
    PathBuf::from("data/pending_trades.json")
}

fn default_dead_letter_path() -> PathBuf {
    PathBuf::from("data/dead_letters.json")
}

fn default_ledger_path() -> PathBuf {
    PathBuf::from("data/inventory.csv")
}

fn default_journal_path() -> PathBuf {
    PathBuf::from("data/settlements.json")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// `0` retries forever.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            retry_backoff_ms: default_retry_backoff_ms(),
            max_attempts: default_max_attempts(),
            call_timeout_secs: default_call_timeout_secs(),
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_retry_backoff_ms() -> u64 {
    5000
}

fn default_max_attempts() -> u32 {
    skinvault_core::config::DEFAULT_MAX_ATTEMPTS
}

fn default_call_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingConfig {
    /// Quote program and its leading arguments; the item name is appended.
    pub quote_command: Vec<String>,
    #[serde(default = "default_quote_timeout_secs")]
    pub quote_timeout_secs: u64,
    #[serde(default = "default_rate_url")]
    pub rate_url: Url,
    #[serde(default = "default_fallback_rate")]
    pub fallback_rate: Decimal,
}

fn default_quote_timeout_secs() -> u64 {
    20
}

fn default_rate_url() -> Url {
    Url::parse("https://api.coingecko.com/api/v3/simple/price?ids=ethereum&vs_currencies=usd")
        .expect("valid default rate url")
}

fn default_fallback_rate() -> Decimal {
    skinvault_core::config::DEFAULT_FALLBACK_RATE
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementConfig {
    /// Base URL of the settlement relay that signs and broadcasts.
    pub relay_url: Url,
    #[serde(default)]
    pub bearer_token: Option<String>,
}

/// The trading-platform bridge: where offers go and who signs notifications.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    pub offer_url: Url,
    pub notify_secret: String,
    #[serde(default = "default_app_id")]
    pub app_id: u32,
    #[serde(default = "default_context_id")]
    pub context_id: String,
}

fn default_app_id() -> u32 {
    730
}

fn default_context_id() -> String {
    "2".to_owned()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationConfig {
    pub command: Vec<String>,
    #[serde(default = "default_reconciliation_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_reconciliation_timeout_secs() -> u64 {
    120
}
