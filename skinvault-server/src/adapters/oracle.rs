use super::{CommandPriceQuoter, HttpRateFeed};
use async_trait::async_trait;
use rust_decimal::Decimal;
use skinvault_core::ports::{OracleError, PriceOracle};

/// [`PriceOracle`] backed by the quote command and the HTTP rate feed.
pub struct MarketOracle {
    quoter: CommandPriceQuoter,
    rate_feed: HttpRateFeed,
}

impl MarketOracle {
    pub fn new(quoter: CommandPriceQuoter, rate_feed: HttpRateFeed) -> Self {
        Self { quoter, rate_feed }
    }
}

#[async_trait]
impl PriceOracle for MarketOracle {
    async fn quote(&self, item_name: &str) -> Result<Decimal, OracleError> {
        self.quoter.quote(item_name).await
    }

    async fn reference_rate(&self) -> Result<Decimal, OracleError> {
        self.rate_feed.fetch().await
    }
}
