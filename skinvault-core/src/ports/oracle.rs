use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OracleError {
    /// The lookup could not be performed (process, network, timeout).
    #[error("price lookup failed: {0}")]
    Unavailable(String),

    /// The source answered but the answer could not be understood.
    #[error("unparseable price output: {0}")]
    Parse(String),

    /// The source has no price for this item.
    #[error("no price available for {0}")]
    NotFound(String),
}

/// Market price source.
#[async_trait]
pub trait PriceOracle: Send + Sync {
    /// USD unit price of the named item.
    async fn quote(&self, item_name: &str) -> Result<Decimal, OracleError>;

    /// USD per whole native coin.
    ///
    /// Callers substitute a configured fallback on error.
    async fn reference_rate(&self) -> Result<Decimal, OracleError>;
}
