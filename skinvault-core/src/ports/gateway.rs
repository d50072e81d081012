use crate::settlement::NativeAmount;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use skinvault_sdk::objects::SettlementAddress;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// Network failure or timeout; the call may or may not have landed.
    #[error("transient settlement failure: {0}")]
    Transient(String),

    /// The call was refused (reverted, unauthorized, invalid arguments).
    #[error("settlement call rejected: {0}")]
    Rejected(String),
}

/// Identifier of a submitted transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxReference(pub String);

impl fmt::Display for TxReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The settlement contract binding.
///
/// `idempotency_key` is derived from the trade id and the step, so an
/// implementation that deduplicates on it makes retries safe.
#[async_trait]
pub trait SettlementGateway: Send + Sync {
    /// Credit `amount` to `address`.
    async fn credit(
        &self,
        idempotency_key: &str,
        address: &SettlementAddress,
        amount: NativeAmount,
    ) -> Result<TxReference, GatewayError>;

    /// Trigger the exchange/redemption step for `amount`.
    async fn settle(
        &self,
        idempotency_key: &str,
        amount: NativeAmount,
    ) -> Result<TxReference, GatewayError>;
}
