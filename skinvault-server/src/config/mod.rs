//! Configuration loading for skinvault-server.
//!
//! Reads the TOML file, applies CLI overrides, validates, and produces a
//! [`RuntimeConfig`]. The same loader is used again on SIGHUP.

pub mod file;
pub mod runtime;

use crate::config::file::{FileConfig, ReconciliationConfig};
use crate::config::runtime::{
    BridgeSettings, CommandSettings, PricingSettings, RuntimeConfig, SettlementSettings,
    StoragePaths,
};
use rust_decimal::Decimal;
use skinvault_core::config::ProcessorConfig;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    Validation(String),
}

pub struct ConfigLoader {
    config_path: PathBuf,
    listen_override: Option<SocketAddr>,
}

impl ConfigLoader {
    pub fn new(config_path: impl AsRef<Path>, listen_override: Option<SocketAddr>) -> Self {
        Self {
            config_path: config_path.as_ref().to_path_buf(),
            listen_override,
        }
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }

    pub fn load(&self) -> Result<RuntimeConfig, ConfigError> {
        let content =
            std::fs::read_to_string(&self.config_path).map_err(|source| ConfigError::Io {
                path: self.config_path.clone(),
                source,
            })?;
        self.load_str(&content)
    }

    /// Re-read the file after SIGHUP.
    pub fn reload(&self) -> Result<RuntimeConfig, ConfigError> {
        self.load()
    }

    fn load_str(&self, content: &str) -> Result<RuntimeConfig, ConfigError> {
        let mut file_config: FileConfig = toml::from_str(content)?;
        if let Some(listen) = self.listen_override {
            file_config.server.listen = listen;
        }
        validate(&file_config)?;
        Ok(build_runtime_config(file_config))
    }
}

fn validate(config: &FileConfig) -> Result<(), ConfigError> {
    let invalid = |msg: &str| Err(ConfigError::Validation(msg.to_owned()));

    if config.processor.poll_interval_ms == 0 {
        return invalid("processor.poll_interval_ms must be greater than zero");
    }
    if config.processor.retry_backoff_ms == 0 {
        return invalid("processor.retry_backoff_ms must be greater than zero");
    }
    if config.processor.call_timeout_secs == 0 {
        return invalid("processor.call_timeout_secs must be greater than zero");
    }
    if !has_program(&config.pricing.quote_command) {
        return invalid("pricing.quote_command must name a program");
    }
    if config.pricing.quote_timeout_secs == 0 {
        return invalid("pricing.quote_timeout_secs must be greater than zero");
    }
    if config.pricing.fallback_rate <= Decimal::ZERO {
        return invalid("pricing.fallback_rate must be positive");
    }
    if config.bridge.notify_secret.is_empty() {
        return invalid("bridge.notify_secret must not be empty");
    }
    if let Some(reconciliation) = &config.reconciliation {
        if !has_program(&reconciliation.command) {
            return invalid("reconciliation.command must name a program");
        }
        if reconciliation.timeout_secs == 0 {
            return invalid("reconciliation.timeout_secs must be greater than zero");
        }
    }
    Ok(())
}

fn has_program(argv: &[String]) -> bool {
    argv.first().is_some_and(|program| !program.trim().is_empty())
}

fn command_settings(argv: Vec<String>, timeout_secs: u64) -> CommandSettings {
    let mut argv = argv.into_iter();
    CommandSettings {
        program: argv.next().unwrap_or_default(),
        args: argv.collect(),
        timeout: Duration::from_secs(timeout_secs),
    }
}

fn build_runtime_config(file: FileConfig) -> RuntimeConfig {
    RuntimeConfig {
        listen: file.server.listen,
        storage: StoragePaths {
            queue: file.storage.queue,
            dead_letters: file.storage.dead_letters,
            ledger: file.storage.ledger,
            settlement_journal: file.storage.settlement_journal,
        },
        processor: ProcessorConfig {
            poll_interval: Duration::from_millis(file.processor.poll_interval_ms),
            retry_backoff: Duration::from_millis(file.processor.retry_backoff_ms),
            max_attempts: file.processor.max_attempts,
            call_timeout: Duration::from_secs(file.processor.call_timeout_secs),
            fallback_rate: file.pricing.fallback_rate,
        },
        pricing: PricingSettings {
            quote: command_settings(file.pricing.quote_command, file.pricing.quote_timeout_secs),
            rate_url: file.pricing.rate_url,
        },
        settlement: SettlementSettings {
            relay_url: file.settlement.relay_url,
            bearer_token: file.settlement.bearer_token.filter(|t| !t.is_empty()),
        },
        bridge: BridgeSettings {
            offer_url: file.bridge.offer_url,
            notify_secret: file.bridge.notify_secret.into_bytes().into_boxed_slice(),
            app_id: file.bridge.app_id,
            context_id: file.bridge.context_id,
        },
        reconciliation: file
            .reconciliation
            .map(|ReconciliationConfig { command, timeout_secs }| {
                command_settings(command, timeout_secs)
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = r#"
[pricing]
quote_command = ["python3", "scripts/quote.py", "--json"]

[settlement]
relay_url = "http://127.0.0.1:8545/"

[bridge]
offer_url = "http://127.0.0.1:4000/offers"
notify_secret = "bridge-secret"
"#;

    fn loader() -> ConfigLoader {
        ConfigLoader::new("unused.toml", None)
    }

    #[test]
    fn test_runtime_config_conversion() {
        let config = loader().load_str(BASE).unwrap();
        assert_eq!(config.processor, ProcessorConfig::default());
        assert_eq!(config.pricing.quote.program, "python3");
        assert_eq!(config.pricing.quote.args, vec!["scripts/quote.py", "--json"]);
        assert_eq!(&*config.bridge.notify_secret, b"bridge-secret");
        assert!(config.reconciliation.is_none());
    }

    #[test]
    fn test_listen_override() {
        let listen: SocketAddr = "127.0.0.1:9999".parse().unwrap();
        let config = ConfigLoader::new("unused.toml", Some(listen))
            .load_str(BASE)
            .unwrap();
        assert_eq!(config.listen, listen);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let cases = [
            BASE.replace("notify_secret = \"bridge-secret\"", "notify_secret = \"\""),
            BASE.replace(
                "quote_command = [\"python3\", \"scripts/quote.py\", \"--json\"]",
                "quote_command = []",
            ),
            format!("{BASE}\n[processor]\npoll_interval_ms = 0\n"),
            BASE.replace(
                "[settlement]",
                "fallback_rate = 0\n\n[settlement]",
            ),
            format!("{BASE}\n[reconciliation]\ncommand = [\"\"]\n"),
        ];
        for case in cases {
            assert!(
                matches!(loader().load_str(&case), Err(ConfigError::Validation(_))),
                "accepted: {case}"
            );
        }
    }

    #[test]
    fn test_load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("skinvault.toml");
        std::fs::write(&path, BASE).unwrap();
        let config = ConfigLoader::new(&path, None).load().unwrap();
        assert_eq!(config.bridge.app_id, 730);

        let missing = ConfigLoader::new(dir.path().join("missing.toml"), None).load();
        assert!(matches!(missing, Err(ConfigError::Io { .. })));
    }
}
