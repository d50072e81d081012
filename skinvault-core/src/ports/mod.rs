//! Interfaces to the external collaborators the trade processor drives.
//!
//! - [`PriceOracle`]: per-item USD quotes and the native/USD reference rate
//! - [`SettlementGateway`]: the two-step on-chain credit and redemption
//! - [`Reconciler`]: the best-effort refresh run after each processed trade
//!
//! Concrete adapters live in the server crate; tests use in-memory fakes.

pub mod gateway;
pub mod oracle;
pub mod reconciler;

pub use gateway::{GatewayError, SettlementGateway, TxReference};
pub use oracle::{OracleError, PriceOracle};
pub use reconciler::Reconciler;
