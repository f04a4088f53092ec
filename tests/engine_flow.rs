//! End-to-end engine scenarios: mock chain, in-memory ledger, mock broker.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tokio::sync::watch;

use deposit_sentinel::adapter::{ChainAdapter, MockAdapter, MockTx};
use deposit_sentinel::broker::MockBroker;
use deposit_sentinel::cache::BlockCache;
use deposit_sentinel::ingest::TxIngestor;
use deposit_sentinel::model::{BlockRecord, NotifyStatus};
use deposit_sentinel::notify::{Notifier, wake_channel};
use deposit_sentinel::registry::{CurrencyDetail, StaticCurrencyRegistry};
use deposit_sentinel::store::{LedgerStore, MemoryLedgerStore};
use deposit_sentinel::sync::SyncLoop;
use deposit_sentinel::walker::ChainWalker;

fn currencies() -> Arc<StaticCurrencyRegistry> {
    Arc::new(StaticCurrencyRegistry::new(vec![CurrencyDetail {
        symbol: "MOCK".to_string(),
        decimals: 8,
        min_deposit: Decimal::new(1, 2), // 0.01
        requires_tag: false,
        contract_address: None,
    }]))
}

struct Engine {
    chain: Arc<MockAdapter>,
    store: Arc<MemoryLedgerStore>,
    broker: Arc<MockBroker>,
    sync: SyncLoop,
    notifier: Notifier,
}

/// Wire a complete single-chain engine around a scripted chain.
async fn engine(chain: Arc<MockAdapter>, start: u64, required_confirmations: u16) -> Engine {
    let store = Arc::new(MemoryLedgerStore::new());
    store.add_address("addr1");
    store.add_address("addr2");
    engine_over(chain, store, start, required_confirmations).await
}

/// Same, but over an existing store (replay scenarios).
async fn engine_over(
    chain: Arc<MockAdapter>,
    store: Arc<MemoryLedgerStore>,
    start: u64,
    required_confirmations: u16,
) -> Engine {
    let broker = Arc::new(MockBroker::new());

    let cache = BlockCache::new(chain.clone() as Arc<dyn ChainAdapter>);
    let walker = ChainWalker::bootstrap(chain.clone(), cache, store.clone(), Some(start))
        .await
        .unwrap();
    let ingestor = TxIngestor::new(store.clone(), currencies());
    let (wake_tx, wake_rx) = wake_channel();
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    let sync = SyncLoop::new(
        chain.clone(),
        walker,
        ingestor,
        store.clone(),
        wake_tx,
        Duration::from_millis(10),
        Duration::from_millis(10),
        shutdown_rx.clone(),
    );
    let notifier = Notifier::new(
        chain.clone(),
        store.clone(),
        broker.clone(),
        required_confirmations,
        Duration::from_millis(10),
        wake_rx,
        shutdown_rx,
    );

    Engine {
        chain,
        store,
        broker,
        sync,
        notifier,
    }
}

async fn drain(sync: &mut SyncLoop) -> u64 {
    let mut committed = 0;
    while sync.step().await.unwrap() {
        committed += 1;
    }
    committed
}

#[tokio::test]
async fn deposit_flows_from_block_to_finished_notification() {
    let chain = Arc::new(MockAdapter::with_base("MOCK", 100));
    chain.mine(vec![MockTx::new("tx1", "addr1", Decimal::new(5, 0))]); // 101
    let mut e = engine(chain.clone(), 101, 3).await;

    assert_eq!(drain(&mut e.sync).await, 1);

    // one pending row with a single confirmation
    let pending = e.store.unfinished_transfers("MOCK").await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].confirmations, 1);

    // first cycle: broker hears about it, threshold not reached yet
    assert_eq!(e.notifier.cycle().await.unwrap(), 0);
    assert_eq!(e.broker.notice_count(), 1);

    // two more blocks push the deposit to 3 confirmations
    e.chain.mine_empty(2);
    assert_eq!(drain(&mut e.sync).await, 2);
    assert_eq!(e.notifier.cycle().await.unwrap(), 1);

    let row = e.store.transfers_by_hash("tx1").await.unwrap().remove(0);
    assert_eq!(row.notify_status, NotifyStatus::Finished);
    assert_eq!(row.confirmations, 3);
    assert_eq!(row.retry_count, 2);

    // the finished transfer leaves the pending queue for good
    assert!(e.store.unfinished_transfers("MOCK").await.unwrap().is_empty());
    e.notifier.cycle().await.unwrap();
    assert_eq!(e.broker.notice_count(), 2);
}

#[tokio::test]
async fn replayed_blocks_never_double_credit() {
    let chain = Arc::new(MockAdapter::with_base("MOCK", 100));
    chain.mine(vec![
        MockTx::new("tx1", "addr1", Decimal::new(5, 0)),
        MockTx::new("tx2", "addr2", Decimal::new(3, 0)),
    ]);
    let mut e = engine(chain.clone(), 101, 1).await;

    assert_eq!(drain(&mut e.sync).await, 1);
    assert_eq!(e.store.transfer_count(), 2);

    // wind the checkpoint back and replay the same block twice more over
    // the same store
    for _ in 0..2 {
        e.store
            .save_checkpoint(&deposit_sentinel::model::Checkpoint {
                chain: "MOCK".to_string(),
                height: 100,
                hash: chain.hash_at(100).unwrap(),
            })
            .await
            .unwrap();
        let mut replay = engine_over(chain.clone(), e.store.clone(), 101, 1).await;
        assert_eq!(drain(&mut replay.sync).await, 1);
    }

    // exactly one row per sequence id survived every replay
    assert_eq!(e.store.transfer_count(), 2);
}

#[tokio::test]
async fn reorg_drops_orphaned_transfers_and_reingests_new_branch() {
    let chain = Arc::new(MockAdapter::with_base("MOCK", 100));
    chain.mine(vec![MockTx::new("tx1", "addr1", Decimal::new(5, 0))]); // 101
    chain.mine_empty(1); // 102
    let mut e = engine(chain.clone(), 101, 2).await;

    // anchor record so rollback can step below the start height
    e.store
        .insert_block_record(&BlockRecord {
            chain: "MOCK".to_string(),
            height: 100,
            hash: chain.hash_at(100).unwrap(),
        })
        .await
        .unwrap();

    assert_eq!(drain(&mut e.sync).await, 2);
    assert_eq!(e.store.transfer_count(), 1);

    // the chain abandons both blocks; the deposit reappears in the new 101
    // under a different transaction
    e.chain.fork_at(101);
    e.chain.mine(vec![MockTx::new("tx1-replayed", "addr1", Decimal::new(5, 0))]);
    e.chain.mine_empty(2);

    assert_eq!(drain(&mut e.sync).await, 3);

    // orphaned row went away with its block; the new branch's row is live
    assert!(e.store.transfers_by_hash("tx1").await.unwrap().is_empty());
    let rows = e.store.transfers_by_hash("tx1-replayed").await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].notify_status, NotifyStatus::Pending);

    // block records re-link across the repaired range
    for h in 101..=103 {
        let record = e.store.block_record_at("MOCK", h).await.unwrap().unwrap();
        assert_eq!(record.hash, e.chain.hash_at(h).unwrap());
    }
}

#[tokio::test]
async fn dust_deposit_is_recorded_but_never_notified() {
    let chain = Arc::new(MockAdapter::with_base("MOCK", 100));
    // 0.0000001, far below the 0.01 minimum
    chain.mine(vec![MockTx::new("dust", "addr1", Decimal::new(1, 7))]);
    let mut e = engine(chain, 101, 1).await;

    drain(&mut e.sync).await;

    let rows = e.store.transfers_by_hash("dust").await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].notify_status, NotifyStatus::Finished);

    // notifier has nothing to do and the broker never hears about it
    assert_eq!(e.notifier.cycle().await.unwrap(), 0);
    assert_eq!(e.broker.notice_count(), 0);
}

#[tokio::test]
async fn broker_outage_retries_until_delivered() {
    let chain = Arc::new(MockAdapter::with_base("MOCK", 100));
    chain.mine(vec![MockTx::new("tx1", "addr1", Decimal::new(5, 0))]);
    let mut e = engine(chain, 101, 1).await;
    drain(&mut e.sync).await;

    e.broker.fail_next(3);
    let mut attempts = Vec::new();
    for _ in 0..4 {
        e.notifier.cycle().await.unwrap();
        attempts.push(e.store.transfers_by_hash("tx1").await.unwrap()[0].retry_count);
    }

    // attempt counter grows through the outage and delivery eventually lands
    assert_eq!(attempts, vec![1, 2, 3, 4]);
    let row = e.store.transfers_by_hash("tx1").await.unwrap().remove(0);
    assert_eq!(row.notify_status, NotifyStatus::Finished);
    assert_eq!(e.broker.notice_count(), 1);
}

#[tokio::test]
async fn force_processed_transaction_reaches_broker() {
    let chain = Arc::new(MockAdapter::new("MOCK"));
    chain.mine(vec![MockTx::new("missed", "addr1", Decimal::new(2, 0))]);
    chain.mine_empty(5);
    let e = engine(chain, 1, 3).await;

    // operator recovers a deposit the walker never saw
    e.sync.force_process(&["missed".to_string()]).await;

    let rows = e.store.transfers_by_hash("missed").await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].confirmations, 6);

    assert_eq!(e.notifier.cycle().await.unwrap(), 1);
    assert_eq!(e.broker.notices()[0].tx_hash, "missed");
}
