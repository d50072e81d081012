//! Deposit ingress payloads and the offer forwarded to the bridge.

use crate::signature::Signature;
use serde::{Deserialize, Serialize};

/// Request body of `POST /deposit`.
///
/// Fields are optional at the serde layer so that missing values produce a
/// validation error rather than a deserialization failure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepositRequest {
    pub trade_url: Option<String>,
    #[serde(rename = "assetids")]
    pub asset_ids: Option<Vec<String>>,
    pub eth_address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositResponse {
    pub status: String,
}

/// An item requested from the counterparty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferItem {
    #[serde(rename = "appid")]
    pub app_id: u32,
    #[serde(rename = "contextid")]
    pub context_id: String,
    #[serde(rename = "assetid")]
    pub asset_id: String,
}

/// Outgoing trade offer handed to the bridge's offer-creation primitive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferRequest {
    pub trade_url: String,
    pub their_items: Vec<OfferItem>,
    pub message: String,
}

/// Offers are signed with the bridge secret, like the notifications coming
/// back from it.
impl Signature for OfferRequest {}
