pub mod address;
pub mod deposit;
pub mod trade;

pub use address::{AddressError, SettlementAddress};
pub use deposit::{DepositRequest, DepositResponse, OfferItem, OfferRequest};
pub use trade::{TradeDirection, TradeEvent, TradeItem, TradeNotification, TradeOfferState};
