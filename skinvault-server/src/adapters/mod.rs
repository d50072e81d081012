//! Concrete implementations of the collaborator ports.
//!
//! - [`command`]: bounded subprocess execution shared by the quoter and the
//!   reconciler
//! - [`MarketOracle`]: quote command plus HTTP exchange-rate feed
//! - [`RelaySettlementGateway`]: HTTP settlement relay
//! - [`BridgeOfferDesk`]: forwards deposit offers to the trading bridge
//! - [`CommandReconciler`]: fire-and-forget reconciliation command

pub mod command;
pub mod offer_desk;
pub mod oracle;
pub mod quoter;
pub mod rate_feed;
pub mod reconciler;
pub mod relay_gateway;

pub use offer_desk::{BridgeOfferDesk, OfferDesk, OfferError};
pub use oracle::MarketOracle;
pub use quoter::CommandPriceQuoter;
pub use rate_feed::HttpRateFeed;
pub use reconciler::{CommandReconciler, NoopReconciler};
pub use relay_gateway::RelaySettlementGateway;

/// Shared HTTP client for all outbound calls.
pub fn http_client(timeout: std::time::Duration) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("skinvault-server/", env!("CARGO_PKG_VERSION")))
        .build()
}
