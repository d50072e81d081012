//! TradeProcessor: the single consumer of the trade queue.
//!
//! Each iteration takes one trade, prices what was received, settles
//! outbound trades that carry an address, applies the ledger deltas and
//! kicks the reconciler. Only then is the trade removed from the queue, so a
//! failure or crash anywhere before that point means the trade is processed
//! again from the start.

use crate::config::{ConfigStore, ConfigWatcher, ProcessorConfig};
use crate::entities::ledger::{ApplyLedgerDelta, CsvLedger, LedgerError};
use crate::entities::settlement_journal::{JournalError, SettlementJournal, SettlementRecord};
use crate::entities::trade_queue::{QueueError, QueuedTrade, TradeQueue};
use crate::ports::{GatewayError, PriceOracle, Reconciler, SettlementGateway};
use crate::settlement::{
    NativeAmount, SettlementMathError, SettlementSkip, settlement_amount, settlement_target,
};
use kanau::processor::Processor;
use rust_decimal::{Decimal, RoundingStrategy};
use skinvault_sdk::objects::{SettlementAddress, TradeDirection, TradeEvent, TradeItem};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{Instrument, debug, error, info, info_span, warn};

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("ledger update failed: {0}")]
    Ledger(#[from] LedgerError),

    #[error("settlement journal failed: {0}")]
    Journal(#[from] JournalError),

    #[error("settlement {step} failed: {source}")]
    Settlement {
        step: SettlementStep,
        source: GatewayError,
    },

    #[error("settlement {0} timed out")]
    SettlementTimeout(SettlementStep),

    #[error(transparent)]
    Math(#[from] SettlementMathError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementStep {
    Credit,
    Redeem,
}

impl SettlementStep {
    fn idempotency_key(self, trade_id: &str) -> String {
        format!("{trade_id}:{self}")
    }
}

impl std::fmt::Display for SettlementStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SettlementStep::Credit => f.write_str("credit"),
            SettlementStep::Redeem => f.write_str("redeem"),
        }
    }
}

/// What processing one trade did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradeOutcome {
    pub total_usd: Decimal,
    pub priced_items: usize,
    pub unpriced_items: usize,
    pub settlement: SettlementOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementOutcome {
    /// Inbound trades never settle.
    NotApplicable,
    Skipped(SettlementSkip),
    Settled {
        address: SettlementAddress,
        amount: NativeAmount,
    },
}

/// Durable state the processor reads and writes.
pub struct TradeStores {
    pub queue: Arc<TradeQueue>,
    pub ledger: Arc<CsvLedger>,
    pub journal: Arc<SettlementJournal>,
}

/// External systems the processor calls out to.
pub struct Collaborators {
    pub oracle: Arc<dyn PriceOracle>,
    pub gateway: Arc<dyn SettlementGateway>,
    pub reconciler: Arc<dyn Reconciler>,
}

/// Unit prices for one pass. Every distinct name is looked up once, and a
/// failed lookup is not repeated within the pass.
struct PriceSheet {
    prices: HashMap<String, Option<Decimal>>,
}

impl PriceSheet {
    fn price(&self, name: &str) -> Option<Decimal> {
        self.prices.get(name).copied().flatten()
    }
}

/// Round a quote to cents for the ledger, always keeping two places.
fn ledger_price(price: Decimal) -> Decimal {
    let mut cents = price.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    cents.rescale(2);
    cents
}

pub struct TradeProcessor {
    stores: TradeStores,
    collaborators: Collaborators,
    config: ConfigStore<ProcessorConfig>,
    config_watcher: ConfigWatcher,
    shutdown_rx: watch::Receiver<bool>,
}

impl TradeProcessor {
    pub fn new(
        stores: TradeStores,
        collaborators: Collaborators,
        config: ConfigStore<ProcessorConfig>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            stores,
            collaborators,
            config_watcher: config.subscribe(),
            config,
            shutdown_rx,
        }
    }

    /// Run until shutdown is signalled.
    ///
    /// Shutdown is only observed between trades; a trade in hand is always
    /// carried through to completion or requeue.
    pub async fn run(mut self) {
        info!("TradeProcessor started");
        // Set when a trade was processed but removing it from the queue failed.
        let mut unacked: Option<String> = None;

        loop {
            if *self.shutdown_rx.borrow() {
                break;
            }
            self.config_watcher.mark_seen();
            let config = self.config.snapshot().await;

            if let Some(id) = unacked.take() {
                if let Err(e) = self.finish(&id).await {
                    error!(trade_id = %id, error = %e, "Still unable to remove processed trade from queue");
                    unacked = Some(id);
                    if self.pause(config.retry_backoff).await {
                        break;
                    }
                }
                continue;
            }

            let trade = match self.stores.queue.dequeue().await {
                Ok(Some(trade)) => trade,
                Ok(None) => {
                    let queue = self.stores.queue.clone();
                    if self
                        .wait_or_shutdown(queue.wait_for_work(config.poll_interval))
                        .await
                    {
                        break;
                    }
                    continue;
                }
                Err(e) => {
                    error!(error = %e, "Failed to take the next trade from the queue");
                    if self.pause(config.retry_backoff).await {
                        break;
                    }
                    continue;
                }
            };

            let span = info_span!(
                "trade",
                trade_id = %trade.id(),
                attempt = trade.attempts.saturating_add(1),
            );
            match self
                .process_trade(&trade.event, &config)
                .instrument(span.clone())
                .await
            {
                Ok(outcome) => {
                    span.in_scope(|| {
                        info!(
                            total_usd = %outcome.total_usd,
                            priced = outcome.priced_items,
                            unpriced = outcome.unpriced_items,
                            settlement = ?outcome.settlement,
                            "Trade processed"
                        )
                    });
                    if let Err(e) = self.finish(trade.id()).await {
                        error!(trade_id = %trade.id(), error = %e, "Failed to remove processed trade from queue");
                        unacked = Some(trade.id().to_owned());
                        if self.pause(config.retry_backoff).await {
                            break;
                        }
                    }
                }
                Err(e) => {
                    let backoff = self
                        .handle_failure(&trade, e, &config)
                        .instrument(span)
                        .await;
                    if let Some(backoff) = backoff {
                        if self.pause(backoff).await {
                            break;
                        }
                    }
                }
            }
        }

        info!("TradeProcessor stopped");
    }

    /// Process one trade. Does not touch the queue.
    pub async fn process_trade(
        &self,
        event: &TradeEvent,
        config: &ProcessorConfig,
    ) -> Result<TradeOutcome, ProcessError> {
        let sheet = self.price_items(&event.items_received, config.call_timeout).await;

        let mut total_usd = Decimal::ZERO;
        let mut priced_items = 0;
        for item in &event.items_received {
            if let Some(price) = sheet.price(&item.name) {
                total_usd += price;
                priced_items += 1;
            }
        }
        let unpriced_items = event.items_received.len() - priced_items;
        debug!(%total_usd, priced_items, unpriced_items, "Received items priced");

        let settlement = match event.direction {
            TradeDirection::Outbound => self.settle(event, total_usd, config).await?,
            TradeDirection::Inbound => SettlementOutcome::NotApplicable,
        };

        for item in &event.items_received {
            self.stores
                .ledger
                .process(ApplyLedgerDelta {
                    skin: item.name.clone(),
                    delta: 1,
                    price_usd: sheet.price(&item.name).map(ledger_price),
                })
                .await?;
        }
        for item in &event.items_given {
            self.stores
                .ledger
                .process(ApplyLedgerDelta {
                    skin: item.name.clone(),
                    delta: -1,
                    price_usd: None,
                })
                .await?;
        }

        self.collaborators.reconciler.trigger(&event.id);

        Ok(TradeOutcome {
            total_usd,
            priced_items,
            unpriced_items,
            settlement,
        })
    }

    async fn price_items(&self, items: &[TradeItem], timeout: Duration) -> PriceSheet {
        let mut prices: HashMap<String, Option<Decimal>> = HashMap::new();
        for item in items {
            if prices.contains_key(&item.name) {
                continue;
            }
            let quote =
                tokio::time::timeout(timeout, self.collaborators.oracle.quote(&item.name)).await;
            let price = match quote {
                Ok(Ok(price)) => Some(price),
                Ok(Err(e)) => {
                    warn!(item = %item.name, error = %e, "Price lookup failed, excluding item from total");
                    None
                }
                Err(_) => {
                    warn!(item = %item.name, timeout_ms = timeout.as_millis() as u64, "Price lookup timed out, excluding item from total");
                    None
                }
            };
            prices.insert(item.name.clone(), price);
        }
        PriceSheet { prices }
    }

    async fn reference_rate(&self, config: &ProcessorConfig) -> Decimal {
        let rate = tokio::time::timeout(
            config.call_timeout,
            self.collaborators.oracle.reference_rate(),
        )
        .await;
        match rate {
            Ok(Ok(rate)) if rate > Decimal::ZERO => rate,
            Ok(Ok(rate)) => {
                warn!(%rate, fallback = %config.fallback_rate, "Non-positive reference rate, using fallback");
                config.fallback_rate
            }
            Ok(Err(e)) => {
                warn!(error = %e, fallback = %config.fallback_rate, "Reference rate unavailable, using fallback");
                config.fallback_rate
            }
            Err(_) => {
                warn!(fallback = %config.fallback_rate, "Reference rate lookup timed out, using fallback");
                config.fallback_rate
            }
        }
    }

    async fn settle(
        &self,
        event: &TradeEvent,
        total_usd: Decimal,
        config: &ProcessorConfig,
    ) -> Result<SettlementOutcome, ProcessError> {
        let journal = &self.stores.journal;

        // A journalled settlement is resumed as recorded, whatever this
        // pass priced the items at.
        let mut record = match journal.get(&event.id).await {
            Some(record) => {
                info!(
                    amount = %record.amount,
                    credited = record.credited.is_some(),
                    redeemed = record.redeemed.is_some(),
                    "Resuming journalled settlement"
                );
                record
            }
            None => {
                let address = match settlement_target(&event.memo, total_usd) {
                    Ok(address) => address,
                    Err(skip) => {
                        info!(reason = %skip, "Settlement skipped");
                        return Ok(SettlementOutcome::Skipped(skip));
                    }
                };
                let rate = self.reference_rate(config).await;
                let amount = match settlement_amount(total_usd, rate)? {
                    Ok(amount) => amount,
                    Err(skip) => {
                        info!(reason = %skip, %rate, "Settlement skipped");
                        return Ok(SettlementOutcome::Skipped(skip));
                    }
                };
                let record = SettlementRecord::new(address, amount);
                journal.record(&event.id, record.clone()).await?;
                record
            }
        };

        if record.credited.is_none() {
            let step = SettlementStep::Credit;
            let key = step.idempotency_key(&event.id);
            let tx = self
                .gateway_call(
                    step,
                    config.call_timeout,
                    self.collaborators
                        .gateway
                        .credit(&key, &record.address, record.amount),
                )
                .await?;
            info!(address = %record.address, amount = %record.amount, tx = %tx, "Settlement credited");
            record.credited = Some(tx.0);
            journal.record(&event.id, record.clone()).await?;
        }

        if record.redeemed.is_none() {
            let step = SettlementStep::Redeem;
            let key = step.idempotency_key(&event.id);
            let tx = self
                .gateway_call(
                    step,
                    config.call_timeout,
                    self.collaborators.gateway.settle(&key, record.amount),
                )
                .await?;
            info!(amount = %record.amount, tx = %tx, "Settlement redeemed");
            record.redeemed = Some(tx.0);
            journal.record(&event.id, record.clone()).await?;
        }

        Ok(SettlementOutcome::Settled {
            address: record.address,
            amount: record.amount,
        })
    }

    async fn gateway_call<T>(
        &self,
        step: SettlementStep,
        timeout: Duration,
        call: impl Future<Output = Result<T, GatewayError>>,
    ) -> Result<T, ProcessError> {
        match tokio::time::timeout(timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(source)) => Err(ProcessError::Settlement { step, source }),
            Err(_) => Err(ProcessError::SettlementTimeout(step)),
        }
    }

    /// Requeue or dead-letter a failed trade. Returns the delay to wait
    /// before the next iteration, if any.
    async fn handle_failure(
        &self,
        trade: &QueuedTrade,
        failure: ProcessError,
        config: &ProcessorConfig,
    ) -> Option<Duration> {
        let queue = &self.stores.queue;

        if config.exhausted(trade.attempts) {
            error!(
                error = %failure,
                max_attempts = config.max_attempts,
                "Trade failed too many times, moving to dead letters"
            );
            return match queue.dead_letter(trade.id(), failure.to_string()).await {
                Ok(()) => {
                    if let Err(e) = self.stores.journal.prune(trade.id()).await {
                        warn!(error = %e, "Failed to prune settlement journal");
                    }
                    None
                }
                Err(e) => {
                    error!(error = %e, "Failed to dead-letter trade");
                    Some(config.retry_backoff)
                }
            };
        }

        match queue.requeue(trade.id()).await {
            Ok(attempts) => warn!(
                error = %failure,
                attempts,
                backoff_ms = config.retry_backoff.as_millis() as u64,
                "Trade processing failed, requeued"
            ),
            Err(e) => error!(
                error = %failure,
                requeue_error = %e,
                "Trade processing failed and could not be requeued"
            ),
        }
        Some(config.retry_backoff)
    }

    async fn finish(&self, trade_id: &str) -> Result<(), QueueError> {
        self.stores.queue.complete(trade_id).await?;
        if let Err(e) = self.stores.journal.prune(trade_id).await {
            warn!(trade_id, error = %e, "Failed to prune settlement journal");
        }
        Ok(())
    }

    /// Sleep for `delay`, waking early only on shutdown. Returns `true` when
    /// the loop should exit.
    async fn pause(&mut self, delay: Duration) -> bool {
        tokio::select! {
            biased;
            stop = Self::shutdown_requested(&mut self.shutdown_rx) => stop,
            _ = tokio::time::sleep(delay) => false,
        }
    }

    /// Idle wait. A config reload also ends it, so a shortened interval
    /// applies immediately.
    async fn wait_or_shutdown(&mut self, wait: impl Future<Output = ()>) -> bool {
        tokio::select! {
            biased;
            stop = Self::shutdown_requested(&mut self.shutdown_rx) => stop,
            Ok(()) = self.config_watcher.changed() => {
                info!("Processor configuration reloaded");
                false
            }
            _ = wait => false,
        }
    }

    async fn shutdown_requested(shutdown_rx: &mut watch::Receiver<bool>) -> bool {
        let changed = shutdown_rx.changed().await;
        if changed.is_err() || *shutdown_rx.borrow() {
            info!("TradeProcessor received shutdown signal");
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::ledger::{LedgerEntry, ReadLedger};
    use crate::ports::{OracleError, TxReference};
    use async_trait::async_trait;
    use skinvault_sdk::objects::TradeOfferState;
    use std::str::FromStr;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use time::OffsetDateTime;

    const ADDR: &str = "0x52908400098527886E0F7030069857D2E4169EE7";
    const REDLINE: &str = "AK-47 | Redline (Field-Tested)";

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[derive(Default)]
    struct FakeOracle {
        prices: HashMap<String, Decimal>,
        rate: Mutex<Option<Decimal>>,
        quotes: Mutex<Vec<String>>,
    }

    impl FakeOracle {
        fn with(prices: &[(&str, &str)], rate: Option<&str>) -> Self {
            Self {
                prices: prices
                    .iter()
                    .map(|(name, price)| (name.to_string(), dec(price)))
                    .collect(),
                rate: Mutex::new(rate.map(dec)),
                quotes: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl PriceOracle for FakeOracle {
        async fn quote(&self, item_name: &str) -> Result<Decimal, OracleError> {
            self.quotes.lock().unwrap().push(item_name.to_owned());
            self.prices
                .get(item_name)
                .copied()
                .ok_or_else(|| OracleError::NotFound(item_name.to_owned()))
        }

        async fn reference_rate(&self) -> Result<Decimal, OracleError> {
            (*self.rate.lock().unwrap()).ok_or_else(|| OracleError::Unavailable("offline".into()))
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum GatewayCall {
        Credit {
            key: String,
            address: String,
            amount: NativeAmount,
        },
        Settle {
            key: String,
            amount: NativeAmount,
        },
    }

    #[derive(Default)]
    struct FakeGateway {
        calls: Mutex<Vec<GatewayCall>>,
        /// Number of upcoming `settle` calls that fail transiently.
        settle_failures: AtomicUsize,
        reject_credit: bool,
    }

    #[async_trait]
    impl SettlementGateway for FakeGateway {
        async fn credit(
            &self,
            idempotency_key: &str,
            address: &SettlementAddress,
            amount: NativeAmount,
        ) -> Result<TxReference, GatewayError> {
            self.calls.lock().unwrap().push(GatewayCall::Credit {
                key: idempotency_key.to_owned(),
                address: address.to_string(),
                amount,
            });
            if self.reject_credit {
                return Err(GatewayError::Rejected("execution reverted".into()));
            }
            Ok(TxReference("0xcredit".into()))
        }

        async fn settle(
            &self,
            idempotency_key: &str,
            amount: NativeAmount,
        ) -> Result<TxReference, GatewayError> {
            self.calls.lock().unwrap().push(GatewayCall::Settle {
                key: idempotency_key.to_owned(),
                amount,
            });
            let remaining = self.settle_failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.settle_failures.store(remaining - 1, Ordering::SeqCst);
                return Err(GatewayError::Transient("connection reset".into()));
            }
            Ok(TxReference("0xredeem".into()))
        }
    }

    #[derive(Default)]
    struct FakeReconciler {
        triggered: Mutex<Vec<String>>,
    }

    impl Reconciler for FakeReconciler {
        fn trigger(&self, trade_id: &str) {
            self.triggered.lock().unwrap().push(trade_id.to_owned());
        }
    }

    struct Harness {
        _dir: tempfile::TempDir,
        queue: Arc<TradeQueue>,
        ledger: Arc<CsvLedger>,
        journal: Arc<SettlementJournal>,
        oracle: Arc<FakeOracle>,
        gateway: Arc<FakeGateway>,
        reconciler: Arc<FakeReconciler>,
        config: ConfigStore<ProcessorConfig>,
        shutdown_tx: watch::Sender<bool>,
    }

    impl Harness {
        async fn new(oracle: FakeOracle, gateway: FakeGateway) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let queue = TradeQueue::open(
                dir.path().join("pending_trades.json"),
                dir.path().join("dead_letters.json"),
            )
            .await
            .unwrap();
            let ledger = CsvLedger::open(dir.path().join("inventory.csv"))
                .await
                .unwrap();
            let journal = SettlementJournal::open(dir.path().join("settlements.json"))
                .await
                .unwrap();
            let config = ConfigStore::new(ProcessorConfig {
                poll_interval: Duration::from_millis(10),
                retry_backoff: Duration::from_millis(10),
                max_attempts: 3,
                call_timeout: Duration::from_secs(5),
                ..Default::default()
            });
            let (shutdown_tx, _) = watch::channel(false);
            Self {
                _dir: dir,
                queue: Arc::new(queue),
                ledger: Arc::new(ledger),
                journal: Arc::new(journal),
                oracle: Arc::new(oracle),
                gateway: Arc::new(gateway),
                reconciler: Arc::new(FakeReconciler::default()),
                config,
                shutdown_tx,
            }
        }

        fn processor(&self) -> TradeProcessor {
            TradeProcessor::new(
                TradeStores {
                    queue: self.queue.clone(),
                    ledger: self.ledger.clone(),
                    journal: self.journal.clone(),
                },
                Collaborators {
                    oracle: self.oracle.clone(),
                    gateway: self.gateway.clone(),
                    reconciler: self.reconciler.clone(),
                },
                self.config.clone(),
                self.shutdown_tx.subscribe(),
            )
        }

        async fn process(&self, event: &TradeEvent) -> Result<TradeOutcome, ProcessError> {
            let config = self.config.snapshot().await;
            self.processor().process_trade(event, &config).await
        }

        async fn ledger_rows(&self) -> Vec<LedgerEntry> {
            self.ledger.process(ReadLedger).await.unwrap()
        }

        fn gateway_calls(&self) -> Vec<GatewayCall> {
            self.gateway.calls.lock().unwrap().clone()
        }
    }

    fn event(id: &str, direction: TradeDirection, memo: &str, received: &[&str]) -> TradeEvent {
        TradeEvent {
            id: id.to_owned(),
            direction,
            state: TradeOfferState::Accepted,
            memo: memo.to_owned(),
            items_received: received.iter().map(|n| TradeItem::named(*n)).collect(),
            items_given: vec![],
            enqueued_at: OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap(),
        }
    }

    fn memo_with_address() -> String {
        format!("Ethereum address: {ADDR}")
    }

    #[tokio::test]
    async fn test_outbound_trade_settles_priced_total() {
        let h = Harness::new(
            FakeOracle::with(&[(REDLINE, "12.5")], Some("2500")),
            FakeGateway::default(),
        )
        .await;
        let trade = event("7001", TradeDirection::Outbound, &memo_with_address(), &[REDLINE]);

        let outcome = h.process(&trade).await.unwrap();

        let expected = NativeAmount::from_base_units(5_000_000_000_000_000);
        assert_eq!(outcome.total_usd, dec("12.5"));
        assert_eq!(
            outcome.settlement,
            SettlementOutcome::Settled {
                address: SettlementAddress::parse(ADDR).unwrap(),
                amount: expected,
            }
        );
        assert_eq!(expected.to_string(), "0.005000000000000000");
        assert_eq!(
            h.gateway_calls(),
            vec![
                GatewayCall::Credit {
                    key: "7001:credit".into(),
                    address: ADDR.into(),
                    amount: expected,
                },
                GatewayCall::Settle {
                    key: "7001:redeem".into(),
                    amount: expected,
                },
            ]
        );

        let rows = h.ledger_rows().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].skin, REDLINE);
        assert_eq!(rows[0].quantity, 1);
        assert_eq!(rows[0].price_usd.unwrap().to_string(), "12.50");
        assert_eq!(*h.reconciler.triggered.lock().unwrap(), vec!["7001"]);
    }

    #[tokio::test]
    async fn test_no_address_skips_settlement_but_updates_ledger() {
        let h = Harness::new(
            FakeOracle::with(&[(REDLINE, "12.50")], Some("2500")),
            FakeGateway::default(),
        )
        .await;
        let trade = event("7002", TradeDirection::Outbound, "thanks!", &[REDLINE]);

        let outcome = h.process(&trade).await.unwrap();

        assert_eq!(
            outcome.settlement,
            SettlementOutcome::Skipped(SettlementSkip::NoAddress)
        );
        assert!(h.gateway_calls().is_empty());
        assert_eq!(h.ledger_rows().await[0].quantity, 1);
    }

    #[tokio::test]
    async fn test_failed_price_lookup_skips_settlement() {
        let h = Harness::new(FakeOracle::with(&[], Some("2500")), FakeGateway::default()).await;
        let trade = event("7003", TradeDirection::Outbound, &memo_with_address(), &[REDLINE]);

        let outcome = h.process(&trade).await.unwrap();

        assert_eq!(outcome.total_usd, Decimal::ZERO);
        assert_eq!(outcome.unpriced_items, 1);
        assert_eq!(
            outcome.settlement,
            SettlementOutcome::Skipped(SettlementSkip::NothingPriced)
        );
        assert!(h.gateway_calls().is_empty());
        let rows = h.ledger_rows().await;
        assert_eq!(rows[0].quantity, 1);
        assert_eq!(rows[0].price_usd, None);
    }

    #[tokio::test]
    async fn test_inbound_trade_never_settles() {
        let h = Harness::new(
            FakeOracle::with(&[(REDLINE, "12.50")], Some("2500")),
            FakeGateway::default(),
        )
        .await;
        h.ledger
            .process(ApplyLedgerDelta {
                skin: "AWP | Asiimov".into(),
                delta: 1,
                price_usd: None,
            })
            .await
            .unwrap();
        let mut trade = event("7004", TradeDirection::Inbound, &memo_with_address(), &[REDLINE]);
        trade.items_given = vec![TradeItem::named("AWP | Asiimov")];

        let outcome = h.process(&trade).await.unwrap();

        assert_eq!(outcome.settlement, SettlementOutcome::NotApplicable);
        assert!(h.gateway_calls().is_empty());
        let rows = h.ledger_rows().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].skin, REDLINE);
    }

    #[tokio::test]
    async fn test_rate_failure_uses_fallback() {
        let h = Harness::new(
            FakeOracle::with(&[(REDLINE, "35")], None),
            FakeGateway::default(),
        )
        .await;
        let trade = event("7005", TradeDirection::Outbound, &memo_with_address(), &[REDLINE]);

        let outcome = h.process(&trade).await.unwrap();

        // 35 USD at the 3500 fallback is 0.01 of a coin.
        assert!(matches!(
            outcome.settlement,
            SettlementOutcome::Settled { amount, .. }
                if amount == NativeAmount::from_base_units(10_000_000_000_000_000)
        ));
    }

    #[tokio::test]
    async fn test_repeated_item_is_quoted_once() {
        let h = Harness::new(
            FakeOracle::with(&[(REDLINE, "2.25")], Some("2500")),
            FakeGateway::default(),
        )
        .await;
        let trade = event(
            "7006",
            TradeDirection::Inbound,
            "",
            &[REDLINE, REDLINE, "Sticker | Unknown"],
        );

        let outcome = h.process(&trade).await.unwrap();

        assert_eq!(outcome.total_usd, dec("4.50"));
        assert_eq!(outcome.priced_items, 2);
        assert_eq!(outcome.unpriced_items, 1);
        assert_eq!(h.oracle.quotes.lock().unwrap().len(), 2);
        let rows = h.ledger_rows().await;
        assert_eq!(rows[0].quantity, 2);
        assert_eq!(rows[1].price_usd, None);
    }

    #[tokio::test]
    async fn test_retry_resumes_journalled_settlement() {
        let gateway = FakeGateway {
            settle_failures: AtomicUsize::new(1),
            ..Default::default()
        };
        let h = Harness::new(FakeOracle::with(&[(REDLINE, "12.50")], Some("2500")), gateway).await;
        let trade = event("7007", TradeDirection::Outbound, &memo_with_address(), &[REDLINE]);

        let err = h.process(&trade).await.unwrap_err();
        assert!(matches!(
            err,
            ProcessError::Settlement {
                step: SettlementStep::Redeem,
                source: GatewayError::Transient(_)
            }
        ));
        assert!(h.ledger_rows().await.is_empty());
        let record = h.journal.get("7007").await.unwrap();
        assert_eq!(record.credited.as_deref(), Some("0xcredit"));

        // The rate moves before the retry; the journalled amount still wins.
        *h.oracle.rate.lock().unwrap() = Some(dec("5000"));
        h.process(&trade).await.unwrap();
        // Items are priced again on every attempt.
        assert_eq!(*h.oracle.quotes.lock().unwrap(), vec![REDLINE, REDLINE]);

        let calls = h.gateway_calls();
        let credits = calls
            .iter()
            .filter(|c| matches!(c, GatewayCall::Credit { .. }))
            .count();
        assert_eq!(credits, 1);
        assert_eq!(
            calls.last(),
            Some(&GatewayCall::Settle {
                key: "7007:redeem".into(),
                amount: NativeAmount::from_base_units(5_000_000_000_000_000),
            })
        );
        assert!(h.journal.get("7007").await.unwrap().is_finished());
    }

    async fn wait_until<F, Fut>(mut condition: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        tokio::time::timeout(Duration::from_secs(10), async {
            while !condition().await {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_run_loop_retries_then_completes() {
        let gateway = FakeGateway {
            settle_failures: AtomicUsize::new(1),
            ..Default::default()
        };
        let h = Harness::new(FakeOracle::with(&[(REDLINE, "12.50")], Some("2500")), gateway).await;
        h.queue
            .enqueue(event("8001", TradeDirection::Outbound, &memo_with_address(), &[REDLINE]))
            .await
            .unwrap();
        h.queue
            .enqueue(event("8002", TradeDirection::Inbound, "", &[REDLINE]))
            .await
            .unwrap();

        let handle = tokio::spawn(h.processor().run());
        let queue = h.queue.clone();
        wait_until(|| {
            let queue = queue.clone();
            async move {
                let snapshot = queue.snapshot().await;
                snapshot.pending == 0 && snapshot.in_flight.is_none()
            }
        })
        .await;
        h.shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        // The failed trade was retried before the one behind it.
        assert_eq!(*h.reconciler.triggered.lock().unwrap(), vec!["8001", "8002"]);
        assert_eq!(h.ledger_rows().await[0].quantity, 2);
        assert!(h.journal.get("8001").await.is_none());
        assert_eq!(h.queue.snapshot().await.dead_letters, 0);
    }

    #[tokio::test]
    async fn test_run_loop_dead_letters_after_max_attempts() {
        let gateway = FakeGateway {
            reject_credit: true,
            ..Default::default()
        };
        let h = Harness::new(FakeOracle::with(&[(REDLINE, "12.50")], Some("2500")), gateway).await;
        h.queue
            .enqueue(event("8003", TradeDirection::Outbound, &memo_with_address(), &[REDLINE]))
            .await
            .unwrap();

        let handle = tokio::spawn(h.processor().run());
        let queue = h.queue.clone();
        wait_until(|| {
            let queue = queue.clone();
            async move { queue.snapshot().await.dead_letters == 1 }
        })
        .await;
        h.shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(h.gateway_calls().len(), 3);
        let dead = h.queue.dead_letters().await;
        assert_eq!(dead[0].trade.attempts, 3);
        assert!(dead[0].reason.contains("rejected"));
        assert!(h.ledger_rows().await.is_empty());
        assert!(h.journal.get("8003").await.is_none());
    }

    /// Fails every credit, and reloads the processor config while doing so.
    struct ReloadingGateway {
        config: ConfigStore<ProcessorConfig>,
        credits: Mutex<Vec<std::time::Instant>>,
    }

    #[async_trait]
    impl SettlementGateway for ReloadingGateway {
        async fn credit(
            &self,
            _idempotency_key: &str,
            _address: &SettlementAddress,
            _amount: NativeAmount,
        ) -> Result<TxReference, GatewayError> {
            self.credits.lock().unwrap().push(std::time::Instant::now());
            let current = self.config.snapshot().await;
            self.config.update(current).await;
            Err(GatewayError::Transient("relay unreachable".into()))
        }

        async fn settle(
            &self,
            _idempotency_key: &str,
            _amount: NativeAmount,
        ) -> Result<TxReference, GatewayError> {
            Ok(TxReference("0xsettle".into()))
        }
    }

    #[tokio::test]
    async fn test_reload_during_processing_keeps_backoff() {
        let h = Harness::new(
            FakeOracle::with(&[(REDLINE, "12.50")], Some("2500")),
            FakeGateway::default(),
        )
        .await;
        let backoff = Duration::from_millis(200);
        let mut config = h.config.snapshot().await;
        config.retry_backoff = backoff;
        config.max_attempts = 0;
        h.config.update(config).await;

        let gateway = Arc::new(ReloadingGateway {
            config: h.config.clone(),
            credits: Mutex::new(Vec::new()),
        });
        let processor = TradeProcessor::new(
            TradeStores {
                queue: h.queue.clone(),
                ledger: h.ledger.clone(),
                journal: h.journal.clone(),
            },
            Collaborators {
                oracle: h.oracle.clone(),
                gateway: gateway.clone(),
                reconciler: h.reconciler.clone(),
            },
            h.config.clone(),
            h.shutdown_tx.subscribe(),
        );
        h.queue
            .enqueue(event("8004", TradeDirection::Outbound, &memo_with_address(), &[REDLINE]))
            .await
            .unwrap();

        let handle = tokio::spawn(processor.run());
        let credits = gateway.clone();
        wait_until(|| {
            let credits = credits.clone();
            async move { credits.credits.lock().unwrap().len() >= 2 }
        })
        .await;
        h.shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        let credits = gateway.credits.lock().unwrap().clone();
        assert!(credits[1].duration_since(credits[0]) >= backoff);
    }

    #[tokio::test]
    async fn test_shutdown_stops_idle_loop() {
        let h = Harness::new(FakeOracle::default(), FakeGateway::default()).await;
        let handle = tokio::spawn(h.processor().run());
        tokio::time::sleep(Duration::from_millis(20)).await;
        h.shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
