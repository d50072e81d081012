//! Outgoing trade offers for the deposit flow.

use crate::config::runtime::BridgeSettings;
use async_trait::async_trait;
use skinvault_sdk::objects::OfferRequest;
use skinvault_sdk::signature::{SIGNATURE_HEADER, SignedObject};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::info;

#[derive(Debug, Error)]
pub enum OfferError {
    #[error("failed to sign offer: {0}")]
    Sign(#[from] serde_json::Error),

    #[error("bridge request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("bridge refused offer with status {status}: {body}")]
    Refused { status: u16, body: String },
}

/// Something that can put a trade offer in front of a user.
#[async_trait]
pub trait OfferDesk: Send + Sync {
    async fn send_offer(&self, offer: OfferRequest) -> Result<(), OfferError>;
}

/// Posts signed offers to the trading bridge.
pub struct BridgeOfferDesk {
    client: reqwest::Client,
    bridge: Arc<RwLock<BridgeSettings>>,
}

impl BridgeOfferDesk {
    pub fn new(client: reqwest::Client, bridge: Arc<RwLock<BridgeSettings>>) -> Self {
        Self { client, bridge }
    }
}

#[async_trait]
impl OfferDesk for BridgeOfferDesk {
    async fn send_offer(&self, offer: OfferRequest) -> Result<(), OfferError> {
        let (url, signed) = {
            let bridge = self.bridge.read().await;
            (
                bridge.offer_url.clone(),
                SignedObject::new(offer, &bridge.notify_secret)?,
            )
        };

        let response = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .header(SIGNATURE_HEADER, signed.to_header())
            .body(signed.json)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            info!(trade_url = %signed.body.trade_url, items = signed.body.their_items.len(), "Trade offer sent");
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(OfferError::Refused {
                status: status.as_u16(),
                body,
            })
        }
    }
}
