//! Deposit Sentinel service entry point.
//!
//! ```text
//! ┌──────────┐    ┌─────────┐    ┌──────────┐    ┌──────────┐
//! │  Walker  │───▶│ Ingestor│───▶│  Ledger  │───▶│ Notifier │
//! │ (blocks) │    │ (filter)│    │ (commit) │    │ (broker) │
//! └──────────┘    └─────────┘    └──────────┘    └──────────┘
//! ```
//!
//! One sync loop and one notifier task per configured chain, wired through
//! a bounded wake queue so deposits are pushed right after their block
//! commits.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

use deposit_sentinel::adapter::{AdapterRegistry, ChainAdapter, EvmAdapter, MockAdapter};
use deposit_sentinel::broker::{BrokerApi, HttpBroker};
use deposit_sentinel::cache::BlockCache;
use deposit_sentinel::config::AppConfig;
use deposit_sentinel::ingest::TxIngestor;
use deposit_sentinel::logging::init_logging;
use deposit_sentinel::notify::{Notifier, wake_channel};
use deposit_sentinel::registry::StaticCurrencyRegistry;
use deposit_sentinel::store::{LedgerStore, MemoryLedgerStore, PgLedgerStore};
use deposit_sentinel::sync::SyncLoop;
use deposit_sentinel::walker::ChainWalker;

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let config = AppConfig::load(&env)?;
    let _guard = init_logging(&config);

    info!(
        "deposit-sentinel starting (env: {}, build: {})",
        env,
        env!("GIT_HASH")
    );

    let store: Arc<dyn LedgerStore> = match &config.postgres_url {
        Some(url) => Arc::new(PgLedgerStore::connect(url).await?),
        None => {
            warn!("no postgres_url configured, using in-memory store (state is not durable)");
            Arc::new(MemoryLedgerStore::new())
        }
    };

    let currencies = Arc::new(StaticCurrencyRegistry::new(
        config.currencies.iter().map(Into::into).collect(),
    ));
    let broker: Arc<dyn BrokerApi> =
        Arc::new(HttpBroker::new(&config.broker.url, config.broker.token.clone())?);

    let mut registry = AdapterRegistry::new();
    for chain in &config.chains {
        let adapter: Arc<dyn ChainAdapter> = match chain.kind.as_str() {
            "evm" => Arc::new(EvmAdapter::new(&chain.symbol, &chain.rpc_url, chain.decimals)?),
            "mock" => Arc::new(MockAdapter::new(&chain.symbol)),
            other => anyhow::bail!("unsupported chain kind {:?} for {}", other, chain.symbol),
        };
        registry.register(adapter);
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = Vec::new();

    for chain in &config.chains {
        let Some(adapter) = registry.get(&chain.symbol) else {
            continue;
        };

        let (wake_tx, wake_rx) = wake_channel();
        let cache = BlockCache::new(adapter.clone());
        let walker =
            ChainWalker::bootstrap(adapter.clone(), cache, store.clone(), chain.start_height)
                .await?;
        let ingestor = TxIngestor::new(store.clone(), currencies.clone());
        let sync_loop = SyncLoop::new(
            adapter.clone(),
            walker,
            ingestor,
            store.clone(),
            wake_tx,
            Duration::from_millis(chain.poll_interval_ms),
            Duration::from_millis(chain.retry_interval_ms),
            shutdown_rx.clone(),
        );

        if !chain.force_txs.is_empty() {
            info!(
                chain = %chain.symbol,
                count = chain.force_txs.len(),
                "running one-time force-process list"
            );
            sync_loop.force_process(&chain.force_txs).await;
        }

        let notifier = Notifier::new(
            adapter,
            store.clone(),
            broker.clone(),
            chain.required_confirmations,
            Duration::from_millis(chain.notify_interval_ms),
            wake_rx,
            shutdown_rx.clone(),
        );

        tasks.push(tokio::spawn(sync_loop.run()));
        tasks.push(tokio::spawn(notifier.run()));
    }

    info!("{} chains running, waiting for shutdown signal", config.chains.len());
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, draining tasks");

    let _ = shutdown_tx.send(true);
    for task in tasks {
        let _ = task.await;
    }

    info!("deposit-sentinel stopped");
    Ok(())
}
