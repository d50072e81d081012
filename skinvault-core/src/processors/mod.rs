//! Long-running tasks.
//!
//! - `TradeProcessor`: drains the trade queue one trade at a time, settling
//!   and recording each before removing it

pub mod trade_processor;

pub use trade_processor::{
    Collaborators, ProcessError, SettlementOutcome, SettlementStep, TradeOutcome, TradeProcessor,
    TradeStores,
};
