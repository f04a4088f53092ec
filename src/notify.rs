//! Deposit notifier.
//!
//! Independent task per chain. Wakes on the bounded work queue (fed by the
//! sync loop after each committed block) or on its periodic fallback timer,
//! so freshly committed deposits are pushed immediately and anything missed
//! is eventually caught. Delivery is at-least-once; the persisted retry
//! counter counts delivery attempts, not failures.

use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::{Duration, sleep};
use tracing::{debug, error, info, warn};

use crate::adapter::ChainAdapter;
use crate::broker::{BrokerApi, DepositNotice};
use crate::error::SentinelError;
use crate::model::{NotifyStatus, Transfer};
use crate::store::LedgerStore;

/// Bounded wake queue between a chain's sync loop and its notifier. A full
/// queue means a wake-up is already pending, so sends coalesce.
pub fn wake_channel() -> (mpsc::Sender<()>, mpsc::Receiver<()>) {
    mpsc::channel(1)
}

pub struct Notifier {
    chain: String,
    adapter: Arc<dyn ChainAdapter>,
    store: Arc<dyn LedgerStore>,
    broker: Arc<dyn BrokerApi>,
    required_confirmations: u16,
    interval: Duration,
    wake: mpsc::Receiver<()>,
    shutdown: watch::Receiver<bool>,
}

impl Notifier {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        adapter: Arc<dyn ChainAdapter>,
        store: Arc<dyn LedgerStore>,
        broker: Arc<dyn BrokerApi>,
        required_confirmations: u16,
        interval: Duration,
        wake: mpsc::Receiver<()>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            chain: adapter.chain_symbol().to_string(),
            adapter,
            store,
            broker,
            required_confirmations,
            interval,
            wake,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        info!(
            chain = %self.chain,
            required_confirmations = self.required_confirmations,
            "notifier starting"
        );

        loop {
            tokio::select! {
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                wake = self.wake.recv() => {
                    // a closed wake queue leaves the periodic fallback
                    if wake.is_none() {
                        sleep(self.interval).await;
                    }
                }
                _ = sleep(self.interval) => {}
            }

            // delivery errors are never fatal; the next cycle retries
            if let Err(e) = self.cycle().await {
                error!(chain = %self.chain, error = %e, "notify cycle failed");
            }
        }

        info!(chain = %self.chain, "notifier stopped");
    }

    /// One notification pass over all pending transfers of this chain.
    /// Returns how many transfers were finished.
    pub async fn cycle(&self) -> Result<usize, SentinelError> {
        let pending = self.store.unfinished_transfers(&self.chain).await?;
        if pending.is_empty() {
            return Ok(0);
        }

        debug!(chain = %self.chain, count = pending.len(), "notifying pending transfers");

        let mut finished = 0;
        for transfer in &pending {
            match self.attempt(transfer).await {
                Ok(true) => finished += 1,
                Ok(false) => {}
                Err(e) => warn!(
                    chain = %self.chain,
                    tx_hash = %transfer.tx_hash,
                    error = %e,
                    "notify attempt failed"
                ),
            }
        }
        Ok(finished)
    }

    /// One delivery attempt: refresh confirmations when below threshold,
    /// push to the broker, persist the attempt. Finished only when the
    /// broker acked AND the confirmation threshold holds.
    async fn attempt(&self, transfer: &Transfer) -> Result<bool, SentinelError> {
        let mut confirmations = transfer.confirmations;
        if confirmations < self.required_confirmations {
            match self.adapter.get_tx_confirmations(&transfer.tx_hash).await {
                Ok(depth) => confirmations = depth.min(u16::MAX as u64) as u16,
                // keep the stale count; the broker still learns about the
                // deposit and the next cycle refreshes again
                Err(e) => warn!(
                    chain = %self.chain,
                    tx_hash = %transfer.tx_hash,
                    error = %e,
                    "confirmation refresh failed"
                ),
            }
        }

        let notice = DepositNotice::from_transfer(transfer, confirmations);
        let acked = match self.broker.deposit_notify(&notice).await {
            Ok(ack) => {
                if !ack.ok {
                    warn!(
                        chain = %self.chain,
                        tx_hash = %transfer.tx_hash,
                        message = %ack.message,
                        "broker rejected notification"
                    );
                }
                ack.ok
            }
            Err(e) => {
                warn!(
                    chain = %self.chain,
                    tx_hash = %transfer.tx_hash,
                    error = %e,
                    "notification delivery failed"
                );
                false
            }
        };

        // attempts are counted whether or not delivery succeeded
        let retry_count = transfer.retry_count + 1;
        let status = if acked && confirmations >= self.required_confirmations {
            NotifyStatus::Finished
        } else {
            NotifyStatus::Pending
        };

        self.store
            .update_transfer(&transfer.sequence_id, confirmations, retry_count, status)
            .await?;

        if status == NotifyStatus::Finished {
            info!(
                chain = %self.chain,
                tx_hash = %transfer.tx_hash,
                confirmations,
                attempts = retry_count,
                "deposit notification finished"
            );
        }
        Ok(status == NotifyStatus::Finished)
    }
}
