//! Per-chain sync loop.
//!
//! Drives walker → ingestor → atomic block commit forever. Strictly
//! sequential within a chain: never two blocks in flight at once. Every
//! failure path resolves to log-and-retry from the same height; the loop
//! never terminates the process.

use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::{Duration, sleep};
use tracing::{error, info};

use crate::adapter::ChainAdapter;
use crate::error::SentinelError;
use crate::ingest::TxIngestor;
use crate::model::{BlockRecord, Checkpoint};
use crate::store::LedgerStore;
use crate::walker::ChainWalker;

pub struct SyncLoop {
    chain: String,
    adapter: Arc<dyn ChainAdapter>,
    walker: ChainWalker,
    ingestor: TxIngestor,
    store: Arc<dyn LedgerStore>,
    notify_wake: mpsc::Sender<()>,
    poll_interval: Duration,
    retry_interval: Duration,
    shutdown: watch::Receiver<bool>,
}

impl SyncLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        adapter: Arc<dyn ChainAdapter>,
        walker: ChainWalker,
        ingestor: TxIngestor,
        store: Arc<dyn LedgerStore>,
        notify_wake: mpsc::Sender<()>,
        poll_interval: Duration,
        retry_interval: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            chain: adapter.chain_symbol().to_string(),
            adapter,
            walker,
            ingestor,
            store,
            notify_wake,
            poll_interval,
            retry_interval,
            shutdown,
        }
    }

    pub fn checkpoint(&self) -> &Checkpoint {
        self.walker.checkpoint()
    }

    pub async fn run(mut self) {
        info!(
            chain = %self.chain,
            height = self.walker.checkpoint().height,
            "sync loop starting"
        );

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            let pause = match self.step().await {
                // a block landed; go straight for the next one
                Ok(true) => continue,
                Ok(false) => self.poll_interval,
                Err(e) => {
                    error!(chain = %self.chain, error = %e, "sync iteration failed");
                    self.retry_interval
                }
            };

            tokio::select! {
                _ = sleep(pause) => {}
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!(chain = %self.chain, "sync loop stopped");
    }

    /// One iteration: fetch, ingest and commit the next block. `Ok(true)`
    /// when a block was committed, `Ok(false)` when caught up. On error the
    /// checkpoint is untouched and the same height is retried.
    pub async fn step(&mut self) -> Result<bool, SentinelError> {
        let Some(block) = self.walker.next_block().await? else {
            return Ok(false);
        };

        let transfers = self
            .ingestor
            .extract_block(self.adapter.as_ref(), &block)
            .await?;

        let record = BlockRecord {
            chain: self.chain.clone(),
            height: block.height,
            hash: block.hash.clone(),
        };
        let checkpoint = Checkpoint {
            chain: self.chain.clone(),
            height: block.height,
            hash: block.hash.clone(),
        };
        self.store
            .commit_block(&record, &checkpoint, &transfers)
            .await?;
        self.walker.commit(&block);

        info!(
            chain = %self.chain,
            height = block.height,
            transfers = transfers.len(),
            "block committed"
        );

        // coalesced wake-up; a full queue already has one pending
        let _ = self.notify_wake.try_send(());

        Ok(true)
    }

    /// One-time manual recovery: run configured transaction hashes through
    /// the ingestor, bypassing block walking. Failures are logged and
    /// skipped; this path is operator-driven.
    pub async fn force_process(&self, tx_hashes: &[String]) {
        for tx_hash in tx_hashes {
            match self
                .ingestor
                .ingest_forced(self.adapter.as_ref(), tx_hash)
                .await
            {
                Ok(inserted) => info!(
                    chain = %self.chain,
                    %tx_hash,
                    inserted,
                    "force-processed transaction"
                ),
                Err(e) => error!(
                    chain = %self.chain,
                    %tx_hash,
                    error = %e,
                    "force-process failed"
                ),
            }
        }
        if !tx_hashes.is_empty() {
            let _ = self.notify_wake.try_send(());
        }
    }
}
