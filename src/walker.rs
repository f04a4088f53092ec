//! Chain walker.
//!
//! Advances a per-chain (height, hash) checkpoint one block at a time and
//! repairs chain reorganizations. The walker is the only writer of the
//! checkpoint; block processing within a chain is strictly sequential, which
//! is what keeps the checkpoint-and-rollback protocol race-free.

use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::adapter::ChainAdapter;
use crate::cache::BlockCache;
use crate::error::{ChainError, SentinelError, StoreError};
use crate::model::Checkpoint;
use crate::store::LedgerStore;

/// A candidate block whose parent hash matched the checkpoint.
#[derive(Debug, Clone)]
pub struct AcceptedBlock {
    pub height: u64,
    pub hash: String,
    pub parent_hash: String,
    pub payload: Value,
}

pub struct ChainWalker {
    adapter: Arc<dyn ChainAdapter>,
    cache: BlockCache,
    store: Arc<dyn LedgerStore>,
    checkpoint: Checkpoint,
    best_height: u64,
}

impl ChainWalker {
    /// Restore the checkpoint from the store, fall back to the configured
    /// start height (`start_height` is the first block to process), and
    /// finally seed from the adapter's current tip.
    pub async fn bootstrap(
        adapter: Arc<dyn ChainAdapter>,
        cache: BlockCache,
        store: Arc<dyn LedgerStore>,
        start_height: Option<u64>,
    ) -> Result<Self, SentinelError> {
        let chain = adapter.chain_symbol().to_string();
        let checkpoint = if let Some(checkpoint) = store.load_checkpoint(&chain).await? {
            info!(
                chain = %chain,
                height = checkpoint.height,
                "restored persisted checkpoint"
            );
            checkpoint
        } else if let Some(record) = store.last_block_record(&chain).await? {
            // no checkpoint row but accepted blocks exist; resume behind
            // the last recorded one
            info!(
                chain = %chain,
                height = record.height,
                "recovered checkpoint from last block record"
            );
            Checkpoint {
                chain,
                height: record.height,
                hash: record.hash,
            }
        } else {
            let height = match start_height {
                Some(first) if first > 0 => first - 1,
                _ => adapter.get_last_block_height().await?,
            };
            let hash = adapter.get_block_hash_by_height(height).await?;
            info!(chain = %chain, height, "seeded fresh checkpoint");
            Checkpoint {
                chain,
                height,
                hash,
            }
        };

        Ok(Self {
            adapter,
            cache,
            store,
            best_height: checkpoint.height,
            checkpoint,
        })
    }

    pub fn checkpoint(&self) -> &Checkpoint {
        &self.checkpoint
    }

    pub fn cache(&self) -> &BlockCache {
        &self.cache
    }

    /// Advance the in-memory checkpoint after the caller has committed the
    /// block. Kept separate from [`next_block`] so a failed commit retries
    /// the same height.
    pub fn commit(&mut self, block: &AcceptedBlock) {
        self.checkpoint.height = block.height;
        self.checkpoint.hash = block.hash.clone();
    }

    /// Next block to ingest, or `None` while caught up with the chain tip.
    ///
    /// A parent-hash mismatch triggers fork repair: the cache is
    /// invalidated, the superseded block record (and its transfers) is
    /// deleted, and the checkpoint steps back to the stored record one
    /// height below. Strictly one block per rollback step; deep reorgs are
    /// repaired by repeated single steps, never batch-detected.
    pub async fn next_block(&mut self) -> Result<Option<AcceptedBlock>, SentinelError> {
        loop {
            if self.checkpoint.height >= self.best_height {
                self.best_height = self.adapter.get_last_block_height().await?;
                if self.checkpoint.height >= self.best_height {
                    return Ok(None);
                }
            }

            let height = self.checkpoint.height + 1;
            let payload = match self.cache.get(height).await {
                Ok(payload) => payload,
                Err(ChainError::HeightOver { best, .. }) => {
                    self.best_height = best;
                    return Ok(None);
                }
                Err(e) => return Err(e.into()),
            };

            // fork-check fields; a parse failure here is fatal for this
            // iteration, surfaced to the sync loop for backoff-and-retry
            let hash = self.adapter.parse_block_hash(&payload)?;
            let parent_hash = self.adapter.parse_previous_block_hash(&payload)?;

            if parent_hash == self.checkpoint.hash {
                debug!(
                    chain = %self.checkpoint.chain,
                    height, "candidate links to checkpoint"
                );
                return Ok(Some(AcceptedBlock {
                    height,
                    hash,
                    parent_hash,
                    payload,
                }));
            }

            warn!(
                chain = %self.checkpoint.chain,
                height,
                checkpoint_hash = %self.checkpoint.hash,
                candidate_parent = %parent_hash,
                "parent hash mismatch, repairing fork"
            );
            self.rollback_one().await?;
        }
    }

    /// One rollback step: move the checkpoint to the stored record at
    /// `height - 1` and delete the superseded record with its transfers.
    async fn rollback_one(&mut self) -> Result<(), SentinelError> {
        self.cache.reset().await;

        let chain = self.checkpoint.chain.clone();
        let Some(anchor_height) = self.checkpoint.height.checked_sub(1) else {
            return Err(StoreError::MissingBlockRecord { chain, height: 0 }.into());
        };

        // every accepted block was recorded, so the anchor must exist
        let anchor = self
            .store
            .block_record_at(&chain, anchor_height)
            .await?
            .ok_or(StoreError::MissingBlockRecord {
                chain: chain.clone(),
                height: anchor_height,
            })?;

        if let Some(stale) = self
            .store
            .block_record_at(&chain, self.checkpoint.height)
            .await?
        {
            info!(
                chain = %chain,
                height = stale.height,
                hash = %stale.hash,
                "dropping superseded block record"
            );
            self.store.delete_block_record(&stale).await?;
        }

        self.checkpoint.height = anchor.height;
        self.checkpoint.hash = anchor.hash;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{MockAdapter, MockTx};
    use crate::model::BlockRecord;
    use crate::store::MemoryLedgerStore;
    use rust_decimal::Decimal;

    async fn walker_at(
        chain: Arc<MockAdapter>,
        store: Arc<MemoryLedgerStore>,
        start: Option<u64>,
    ) -> ChainWalker {
        let cache = BlockCache::new(chain.clone() as Arc<dyn ChainAdapter>);
        ChainWalker::bootstrap(chain, cache, store, start)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_advances_in_height_order() {
        let chain = Arc::new(MockAdapter::with_base("MOCK", 100));
        chain.mine(vec![MockTx::new("tx1", "addr1", Decimal::new(5, 0))]);
        chain.mine_empty(2);
        let store = Arc::new(MemoryLedgerStore::new());
        let mut walker = walker_at(chain.clone(), store.clone(), Some(101)).await;

        for expected in 101..=103 {
            let block = walker.next_block().await.unwrap().unwrap();
            assert_eq!(block.height, expected);
            assert_eq!(block.hash, chain.hash_at(expected).unwrap());
            store
                .insert_block_record(&BlockRecord {
                    chain: "MOCK".to_string(),
                    height: block.height,
                    hash: block.hash.clone(),
                })
                .await
                .unwrap();
            walker.commit(&block);
        }

        assert!(walker.next_block().await.unwrap().is_none());
        assert_eq!(walker.checkpoint().height, 103);
    }

    #[tokio::test]
    async fn test_failed_commit_retries_same_height() {
        let chain = Arc::new(MockAdapter::with_base("MOCK", 100));
        chain.mine_empty(1);
        let store = Arc::new(MemoryLedgerStore::new());
        let mut walker = walker_at(chain, store, Some(101)).await;

        let first = walker.next_block().await.unwrap().unwrap();
        // caller did not commit; the same candidate comes back
        let second = walker.next_block().await.unwrap().unwrap();
        assert_eq!(first.height, second.height);
        assert_eq!(first.hash, second.hash);
    }

    #[tokio::test]
    async fn test_single_step_rollback_converges() {
        let chain = Arc::new(MockAdapter::with_base("MOCK", 100));
        chain.mine_empty(2); // 101, 102
        let store = Arc::new(MemoryLedgerStore::new());
        let mut walker = walker_at(chain.clone(), store.clone(), Some(101)).await;

        // walk 101 and 102 onto the store
        for _ in 0..2 {
            let block = walker.next_block().await.unwrap().unwrap();
            store
                .insert_block_record(&BlockRecord {
                    chain: "MOCK".to_string(),
                    height: block.height,
                    hash: block.hash.clone(),
                })
                .await
                .unwrap();
            walker.commit(&block);
        }
        // anchor record for the rollback below
        store
            .insert_block_record(&BlockRecord {
                chain: "MOCK".to_string(),
                height: 100,
                hash: chain.hash_at(100).unwrap(),
            })
            .await
            .unwrap();

        // reorg everything from 101 upwards
        let old_101 = chain.hash_at(101).unwrap();
        chain.fork_at(101);
        chain.mine_empty(3); // new 101..=103

        let block = walker.next_block().await.unwrap().unwrap();
        // converged back to the common ancestor and returned the new 101
        assert_eq!(block.height, 101);
        assert_ne!(block.hash, old_101);
        assert_eq!(walker.checkpoint().height, 100);
        assert_eq!(walker.checkpoint().hash, chain.hash_at(100).unwrap());

        // superseded records were dropped one step at a time
        assert!(store.block_record_at("MOCK", 102).await.unwrap().is_none());
        assert!(store.block_record_at("MOCK", 101).await.unwrap().is_none());
        assert!(store.block_record_at("MOCK", 100).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_caught_up_returns_none() {
        let chain = Arc::new(MockAdapter::with_base("MOCK", 50));
        let store = Arc::new(MemoryLedgerStore::new());
        let mut walker = walker_at(chain.clone(), store, None).await;

        assert!(walker.next_block().await.unwrap().is_none());

        chain.mine_empty(1);
        let block = walker.next_block().await.unwrap().unwrap();
        assert_eq!(block.height, 51);
    }

    #[tokio::test]
    async fn test_bootstrap_prefers_persisted_checkpoint() {
        let chain = Arc::new(MockAdapter::with_base("MOCK", 10));
        chain.mine_empty(5);
        let store = Arc::new(MemoryLedgerStore::new());
        store
            .save_checkpoint(&Checkpoint {
                chain: "MOCK".to_string(),
                height: 12,
                hash: chain.hash_at(12).unwrap(),
            })
            .await
            .unwrap();

        let walker = walker_at(chain, store, Some(99)).await;
        assert_eq!(walker.checkpoint().height, 12);
    }
}
