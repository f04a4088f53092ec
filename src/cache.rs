//! Block prefetch cache.
//!
//! Hides per-block RPC latency from the walker: a miss triggers a bounded
//! batch of parallel block fetches, staggered to respect upstream rate
//! limits. The walker resets the cache whenever it detects a fork so stale
//! pre-fork payloads are never served.

use futures::future::join_all;
use rustc_hash::FxHashMap;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::{Duration, sleep};
use tracing::debug;

use crate::adapter::ChainAdapter;
use crate::error::ChainError;

/// Upper bound on blocks fetched per batch.
const MAX_PREFETCH: u64 = 20;
/// Attempts per RPC call before the whole batch fails.
const FETCH_ATTEMPTS: u32 = 3;
/// Pause between attempts of one call.
const RETRY_DELAY: Duration = Duration::from_millis(200);
/// Launch stagger between the batch's concurrent fetches.
const LAUNCH_STAGGER: Duration = Duration::from_millis(20);

pub struct BlockCache {
    adapter: Arc<dyn ChainAdapter>,
    blocks: Arc<RwLock<FxHashMap<u64, Value>>>,
}

impl BlockCache {
    pub fn new(adapter: Arc<dyn ChainAdapter>) -> Self {
        Self {
            adapter,
            blocks: Arc::new(RwLock::new(FxHashMap::default())),
        }
    }

    /// Drop every cached payload. Must be called on fork detection.
    pub async fn reset(&self) {
        self.blocks.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.blocks.read().await.len()
    }

    /// Block payload at `height`, prefetching a batch on a miss.
    ///
    /// Fails with [`ChainError::HeightOver`] when the height does not exist
    /// yet; the caller is expected to wait for new blocks, not retry.
    pub async fn get(&self, height: u64) -> Result<Value, ChainError> {
        if let Some(block) = self.blocks.read().await.get(&height) {
            return Ok(block.clone());
        }

        let adapter = Arc::clone(&self.adapter);
        let best = with_retries(move || {
            let adapter = Arc::clone(&adapter);
            async move { adapter.get_last_block_height().await }
        })
        .await?;

        if height > best {
            return Err(ChainError::HeightOver {
                requested: height,
                best,
            });
        }

        self.prefetch(height, best).await?;

        self.blocks
            .read()
            .await
            .get(&height)
            .cloned()
            .ok_or(ChainError::BlockNotFound(height))
    }

    /// Fetch `min(best - from + 1, MAX_PREFETCH)` blocks concurrently and
    /// wait for all of them. Any single failure fails the batch.
    async fn prefetch(&self, from: u64, best: u64) -> Result<(), ChainError> {
        let count = (best - from + 1).min(MAX_PREFETCH);
        debug!(
            chain = self.adapter.chain_symbol(),
            from, count, "prefetching block batch"
        );

        let mut handles = Vec::with_capacity(count as usize);
        for (i, height) in (from..from + count).enumerate() {
            let adapter = Arc::clone(&self.adapter);
            let blocks = Arc::clone(&self.blocks);
            let stagger = LAUNCH_STAGGER * i as u32;
            handles.push(tokio::spawn(async move {
                sleep(stagger).await;
                let payload = with_retries(move || {
                    let adapter = Arc::clone(&adapter);
                    async move { adapter.get_block_by_height(height).await }
                })
                .await?;
                blocks.write().await.insert(height, payload);
                Ok::<(), ChainError>(())
            }));
        }

        for joined in join_all(handles).await {
            joined.map_err(|e| ChainError::Rpc(format!("prefetch task panicked: {}", e)))??;
        }
        Ok(())
    }
}

/// Run an RPC call up to [`FETCH_ATTEMPTS`] times, pausing between attempts.
/// Non-transient errors fail immediately.
async fn with_retries<T, F, Fut>(mut call: F) -> Result<T, ChainError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ChainError>>,
{
    let mut last = None;
    for attempt in 0..FETCH_ATTEMPTS {
        if attempt > 0 {
            sleep(RETRY_DELAY).await;
        }
        match call().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() => last = Some(e),
            Err(e) => return Err(e),
        }
    }
    Err(last.unwrap_or_else(|| ChainError::Rpc("retries exhausted".to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::MockAdapter;

    #[tokio::test]
    async fn test_height_over_carries_observed_best() {
        let chain = Arc::new(MockAdapter::new("MOCK"));
        chain.mine_empty(5);
        let cache = BlockCache::new(chain);

        match cache.get(9).await {
            Err(ChainError::HeightOver { requested, best }) => {
                assert_eq!(requested, 9);
                assert_eq!(best, 5);
            }
            other => panic!("expected HeightOver, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_prefetch_batch_serves_followup_hits() {
        let chain = Arc::new(MockAdapter::new("MOCK"));
        chain.mine_empty(10);
        let cache = BlockCache::new(chain.clone());

        let block = cache.get(1).await.unwrap();
        assert_eq!(block["height"].as_u64(), Some(1));

        // heights 1..=10 were prefetched in one batch
        assert_eq!(cache.len().await, 10);
        let block = cache.get(7).await.unwrap();
        assert_eq!(block["height"].as_u64(), Some(7));
    }

    #[tokio::test]
    async fn test_transient_failures_retried() {
        let chain = Arc::new(MockAdapter::new("MOCK"));
        chain.mine_empty(2);
        // both the best-height probe and the first block fetch eat one
        // failure each and succeed on retry
        chain.fail_next(2);
        let cache = BlockCache::new(chain);

        let block = cache.get(1).await.unwrap();
        assert_eq!(block["height"].as_u64(), Some(1));
    }

    #[tokio::test]
    async fn test_reset_clears_payloads() {
        let chain = Arc::new(MockAdapter::new("MOCK"));
        chain.mine_empty(3);
        let cache = BlockCache::new(chain);

        cache.get(1).await.unwrap();
        assert!(cache.len().await > 0);

        cache.reset().await;
        assert_eq!(cache.len().await, 0);
    }
}
