//! Durable stores: the trade queue, the inventory ledger and the settlement
//! journal. Each one persists a whole file through
//! [`crate::utils::atomic_file`].

pub mod ledger;
pub mod settlement_journal;
pub mod trade_queue;
