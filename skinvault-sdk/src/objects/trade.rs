//! Trade notifications emitted by the trading-platform bridge and the
//! immutable events queued for processing.

use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;

use crate::signature::Signature;

/// Which side initiated the trade offer.
///
/// For both directions `items_received` is what the counterparty sent us and
/// `items_given` is what left our inventory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeDirection {
    /// An offer we sent, e.g. a deposit requested through the ingress API.
    #[serde(alias = "sent")]
    Outbound,
    /// An offer a counterparty sent to us.
    #[serde(alias = "received")]
    Inbound,
}

impl fmt::Display for TradeDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeDirection::Outbound => f.write_str("outbound"),
            TradeDirection::Inbound => f.write_str("inbound"),
        }
    }
}

/// Offer state as reported by the trading platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TradeOfferState {
    Active,
    Accepted,
    Countered,
    Expired,
    Canceled,
    Declined,
    InvalidItems,
    CreatedNeedsConfirmation,
    CanceledBySecondFactor,
    InEscrow,
    #[serde(other)]
    Unknown,
}

impl TradeOfferState {
    /// Only accepted offers move items and are worth processing.
    pub fn is_accepted(self) -> bool {
        matches!(self, TradeOfferState::Accepted)
    }
}

/// One item moved by a trade.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TradeItem {
    /// Market name used for pricing and as the ledger key.
    #[serde(alias = "market_hash_name")]
    pub name: String,
    #[serde(default, alias = "assetid", skip_serializing_if = "Option::is_none")]
    pub asset_id: Option<String>,
    #[serde(default, alias = "appid", skip_serializing_if = "Option::is_none")]
    pub app_id: Option<u32>,
    #[serde(default, alias = "contextid", skip_serializing_if = "Option::is_none")]
    pub context_id: Option<String>,
}

impl TradeItem {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            asset_id: None,
            app_id: None,
            context_id: None,
        }
    }
}

/// A trade state transition as posted by the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeNotification {
    pub id: String,
    pub direction: TradeDirection,
    pub state: TradeOfferState,
    #[serde(default)]
    pub memo: String,
    #[serde(default)]
    pub items_received: Vec<TradeItem>,
    #[serde(default)]
    pub items_given: Vec<TradeItem>,
}

impl Signature for TradeNotification {}

impl TradeNotification {
    /// Capture this notification as a queueable event.
    pub fn into_event(self, enqueued_at: OffsetDateTime) -> TradeEvent {
        TradeEvent {
            id: self.id,
            direction: self.direction,
            state: self.state,
            memo: self.memo,
            items_received: self.items_received,
            items_given: self.items_given,
            enqueued_at,
        }
    }
}

/// A captured trade, immutable once enqueued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeEvent {
    pub id: String,
    pub direction: TradeDirection,
    pub state: TradeOfferState,
    #[serde(default)]
    pub memo: String,
    #[serde(default)]
    pub items_received: Vec<TradeItem>,
    #[serde(default)]
    pub items_given: Vec<TradeItem>,
    #[serde(with = "time::serde::rfc3339")]
    pub enqueued_at: OffsetDateTime,
}
