//! Skinvault server
//!
//! Queues completed item trades, prices them, settles outbound trades on
//! chain and keeps the inventory ledger.

mod adapters;
mod api;
mod config;
mod server;
mod shutdown;
mod state;

use adapters::{
    BridgeOfferDesk, CommandPriceQuoter, CommandReconciler, HttpRateFeed, MarketOracle,
    NoopReconciler, RelaySettlementGateway, http_client,
};
use anyhow::Context;
use clap::Parser;
use config::ConfigLoader;
use server::{build_router, run_server};
use shutdown::{BootSettings, shutdown_signal, spawn_config_reload_handler};
use skinvault_core::config::ConfigStore;
use skinvault_core::entities::ledger::CsvLedger;
use skinvault_core::entities::settlement_journal::SettlementJournal;
use skinvault_core::entities::trade_queue::TradeQueue;
use skinvault_core::ports::Reconciler;
use skinvault_core::processors::{Collaborators, TradeProcessor, TradeStores};
use state::AppState;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{RwLock, watch};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "skinvault-server")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "./skinvault.toml", env = "SKINVAULT_CONFIG")]
    config: PathBuf,

    /// Override the listen address (e.g., 0.0.0.0:3000)
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Emit logs as JSON lines
    #[arg(long, default_value = "false")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    tracing::info!("Starting skinvault-server v{}", env!("CARGO_PKG_VERSION"));

    let config_loader = Arc::new(ConfigLoader::new(&args.config, args.listen));
    let config = config_loader.load().map_err(|e| {
        tracing::error!("Failed to load configuration: {}", e);
        e
    })?;
    tracing::info!("Configuration loaded from {:?}", args.config);

    let queue = Arc::new(TradeQueue::open(&config.storage.queue, &config.storage.dead_letters).await?);
    let ledger = Arc::new(CsvLedger::open(&config.storage.ledger).await?);
    let journal = Arc::new(SettlementJournal::open(&config.storage.settlement_journal).await?);

    let client = http_client(config.processor.call_timeout)
        .context("Failed to build the HTTP client")?;
    let oracle = MarketOracle::new(
        CommandPriceQuoter::new(config.pricing.quote.clone()),
        HttpRateFeed::new(client.clone(), config.pricing.rate_url.clone()),
    );
    let gateway = RelaySettlementGateway::new(
        client.clone(),
        config.settlement.relay_url.clone(),
        config.settlement.bearer_token.clone(),
    );
    let reconciler: Arc<dyn Reconciler> = match config.reconciliation.clone() {
        Some(settings) => Arc::new(CommandReconciler::new(settings)),
        None => Arc::new(NoopReconciler),
    };

    let processor_config = ConfigStore::new(config.processor.clone());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let processor = TradeProcessor::new(
        TradeStores {
            queue: queue.clone(),
            ledger: ledger.clone(),
            journal,
        },
        Collaborators {
            oracle: Arc::new(oracle),
            gateway: Arc::new(gateway),
            reconciler,
        },
        processor_config.clone(),
        shutdown_rx,
    );
    let processor_handle = tokio::spawn(processor.run());

    let bridge = Arc::new(RwLock::new(config.bridge.clone()));
    let offers = Arc::new(BridgeOfferDesk::new(client, bridge.clone()));
    let state = AppState::new(queue, ledger, offers, bridge);

    let reload_notify = spawn_config_reload_handler(
        state.clone(),
        config_loader,
        processor_config,
        BootSettings {
            listen: config.listen,
            storage: config.storage.clone(),
        },
    );

    let router = build_router(state);

    tracing::info!("Starting HTTP server on {}", config.listen);
    let server_shutdown_tx = shutdown_tx.clone();
    let result = run_server(router, config.listen, async move {
        shutdown_signal().await;
        let _ = server_shutdown_tx.send(true);
    })
    .await;

    // Covers the server failing to start as well as a normal stop.
    let _ = shutdown_tx.send(true);
    reload_notify.notify_one();

    tracing::info!("Waiting for the trade processor to finish");
    if let Err(e) = processor_handle.await {
        tracing::error!(error = %e, "Trade processor task failed");
    }
    tracing::info!("Server shutdown complete");

    result.map_err(Into::into)
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
