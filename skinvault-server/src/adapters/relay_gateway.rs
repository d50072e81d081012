//! Settlement through an HTTP relay.
//!
//! The relay holds the signing key and talks to the contract. Two calls are
//! used: `POST v1/mint` credits the user, `POST v1/redeem` performs the
//! redemption. Both carry an `Idempotency-Key` header.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use skinvault_core::ports::{GatewayError, SettlementGateway, TxReference};
use skinvault_core::settlement::NativeAmount;
use skinvault_sdk::objects::SettlementAddress;
use tracing::debug;
use url::Url;

pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

#[derive(Debug, Serialize)]
struct MintRequest<'a> {
    to: &'a str,
    amount_wei: NativeAmount,
}

#[derive(Debug, Serialize)]
struct RedeemRequest {
    amount_wei: NativeAmount,
}

#[derive(Debug, Deserialize)]
struct RelayResponse {
    tx_hash: String,
}

pub struct RelaySettlementGateway {
    client: reqwest::Client,
    base_url: Url,
    bearer_token: Option<String>,
}

impl RelaySettlementGateway {
    pub fn new(client: reqwest::Client, mut base_url: Url, bearer_token: Option<String>) -> Self {
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Self {
            client,
            base_url,
            bearer_token,
        }
    }

    async fn submit<B: Serialize + ?Sized>(
        &self,
        path: &str,
        idempotency_key: &str,
        body: &B,
    ) -> Result<TxReference, GatewayError> {
        let url = self
            .base_url
            .join(path)
            .map_err(|e| GatewayError::Rejected(format!("invalid relay url: {e}")))?;

        let mut request = self
            .client
            .post(url)
            .header(IDEMPOTENCY_HEADER, idempotency_key)
            .json(body);
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| GatewayError::Transient(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_failure(status, body));
        }

        // The call went through; if the receipt is unreadable a retry with the
        // same key is the safe way to learn the outcome.
        let receipt: RelayResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Transient(format!("unreadable relay response: {e}")))?;
        debug!(path, tx = %receipt.tx_hash, "Relay accepted call");
        Ok(TxReference(receipt.tx_hash))
    }
}

/// Server-side trouble and throttling may succeed later; anything else the
/// relay refused outright.
pub fn classify_failure(status: StatusCode, body: String) -> GatewayError {
    let message = if body.is_empty() {
        status.to_string()
    } else {
        format!("{status}: {body}")
    };
    if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::CONFLICT
    {
        GatewayError::Transient(message)
    } else {
        GatewayError::Rejected(message)
    }
}

#[async_trait]
impl SettlementGateway for RelaySettlementGateway {
    async fn credit(
        &self,
        idempotency_key: &str,
        address: &SettlementAddress,
        amount: NativeAmount,
    ) -> Result<TxReference, GatewayError> {
        self.submit(
            "v1/mint",
            idempotency_key,
            &MintRequest {
                to: address.as_str(),
                amount_wei: amount,
            },
        )
        .await
    }

    async fn settle(
        &self,
        idempotency_key: &str,
        amount: NativeAmount,
    ) -> Result<TxReference, GatewayError> {
        self.submit("v1/redeem", idempotency_key, &RedeemRequest { amount_wei: amount })
            .await
    }
}
