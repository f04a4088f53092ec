//! Scripted mock adapter.
//!
//! Drives the engine without a real node: blocks are mined on demand with
//! deterministic hashes, forks can be injected at any height, and transient
//! RPC failures can be scripted. Used by the test suite and by dry runs.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::{Value, json};
use std::str::FromStr;
use std::sync::Mutex;

use super::ChainAdapter;
use crate::error::ChainError;
use crate::model::ParsedTransfer;

/// One scripted transfer inside a mock transaction.
#[derive(Debug, Clone)]
pub struct MockTx {
    pub hash: String,
    pub to: String,
    pub amount: Decimal,
    pub tag: String,
}

impl MockTx {
    pub fn new(hash: &str, to: &str, amount: Decimal) -> Self {
        Self {
            hash: hash.to_string(),
            to: to.to_string(),
            amount,
            tag: String::new(),
        }
    }

    pub fn with_tag(mut self, tag: &str) -> Self {
        self.tag = tag.to_string();
        self
    }
}

#[derive(Debug, Clone)]
struct MockBlock {
    height: u64,
    hash: String,
    parent_hash: String,
    txs: Vec<MockTx>,
}

struct State {
    blocks: Vec<MockBlock>,
    salt: u32,
    fail_budget: u32,
}

/// Mock chain with deterministic block hashes.
pub struct MockAdapter {
    symbol: String,
    reuse_address: bool,
    state: Mutex<State>,
}

/// Deterministic hash for a mock block.
fn mock_hash(salt: u32, height: u64) -> String {
    format!("{:x}", md5::compute(format!("block|{}|{}", salt, height)))
}

impl MockAdapter {
    /// Chain seeded with a single anchor block at height 0.
    pub fn new(symbol: &str) -> Self {
        Self::with_base(symbol, 0)
    }

    /// Chain seeded with a single anchor block at `base`; mined blocks
    /// start at `base + 1`.
    pub fn with_base(symbol: &str, base: u64) -> Self {
        let anchor = MockBlock {
            height: base,
            hash: mock_hash(0, base),
            parent_hash: if base == 0 {
                "genesis".to_string()
            } else {
                mock_hash(0, base - 1)
            },
            txs: Vec::new(),
        };
        Self {
            symbol: symbol.to_string(),
            reuse_address: true,
            state: Mutex::new(State {
                blocks: vec![anchor],
                salt: 0,
                fail_budget: 0,
            }),
        }
    }

    pub fn with_reuse_address(mut self, reuse: bool) -> Self {
        self.reuse_address = reuse;
        self
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Mine one block on top of the current tip. Returns its height.
    pub fn mine(&self, txs: Vec<MockTx>) -> u64 {
        let mut state = self.state();
        let salt = state.salt;
        let tip = state.blocks.last().expect("chain always has an anchor");
        let block = MockBlock {
            height: tip.height + 1,
            hash: mock_hash(salt, tip.height + 1),
            parent_hash: tip.hash.clone(),
            txs,
        };
        let height = block.height;
        state.blocks.push(block);
        height
    }

    pub fn mine_empty(&self, count: u64) {
        for _ in 0..count {
            self.mine(Vec::new());
        }
    }

    /// Drop every block at `height` and above and bump the hash salt, so
    /// blocks mined afterwards form a divergent branch from the common
    /// ancestor at `height - 1`.
    pub fn fork_at(&self, height: u64) {
        let mut state = self.state();
        state.blocks.retain(|b| b.height < height);
        state.salt += 1;
    }

    /// Make the next `count` RPC-style calls fail with a transient error.
    pub fn fail_next(&self, count: u32) {
        self.state().fail_budget = count;
    }

    /// Hash of the scripted block at a height, for assertions.
    pub fn hash_at(&self, height: u64) -> Option<String> {
        self.state()
            .blocks
            .iter()
            .find(|b| b.height == height)
            .map(|b| b.hash.clone())
    }

    pub fn best_height(&self) -> u64 {
        self.state()
            .blocks
            .last()
            .map(|b| b.height)
            .unwrap_or(0)
    }

    fn take_failure(&self) -> Result<(), ChainError> {
        let mut state = self.state();
        if state.fail_budget > 0 {
            state.fail_budget -= 1;
            return Err(ChainError::Rpc("scripted transient failure".to_string()));
        }
        Ok(())
    }

    fn block_payload(block: &MockBlock) -> Value {
        let txs: Vec<Value> = block
            .txs
            .iter()
            .enumerate()
            .map(|(i, tx)| {
                json!({
                    "hash": tx.hash,
                    "to": tx.to,
                    "amount": tx.amount.to_string(),
                    "tag": tx.tag,
                    "index": i,
                })
            })
            .collect();
        json!({
            "height": block.height,
            "hash": block.hash,
            "parentHash": block.parent_hash,
            "transactions": txs,
        })
    }
}

#[async_trait]
impl ChainAdapter for MockAdapter {
    fn chain_symbol(&self) -> &str {
        &self.symbol
    }

    fn reuse_address(&self) -> bool {
        self.reuse_address
    }

    async fn get_last_block_height(&self) -> Result<u64, ChainError> {
        self.take_failure()?;
        Ok(self.best_height())
    }

    async fn get_block_hash_by_height(&self, height: u64) -> Result<String, ChainError> {
        self.take_failure()?;
        self.hash_at(height)
            .ok_or(ChainError::BlockNotFound(height))
    }

    async fn get_block_by_height(&self, height: u64) -> Result<Value, ChainError> {
        self.take_failure()?;
        let state = self.state();
        state
            .blocks
            .iter()
            .find(|b| b.height == height)
            .map(Self::block_payload)
            .ok_or(ChainError::BlockNotFound(height))
    }

    fn parse_block_hash(&self, block: &Value) -> Result<String, ChainError> {
        block
            .get("hash")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ChainError::Parse("missing block hash".to_string()))
    }

    fn parse_previous_block_hash(&self, block: &Value) -> Result<String, ChainError> {
        block
            .get("parentHash")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ChainError::Parse("missing parent hash".to_string()))
    }

    fn parse_block_txs(
        &self,
        _height: u64,
        _hash: &str,
        block: &Value,
    ) -> Result<Vec<Value>, ChainError> {
        block
            .get("transactions")
            .and_then(Value::as_array)
            .map(|txs| txs.to_vec())
            .ok_or_else(|| ChainError::Parse("missing transactions array".to_string()))
    }

    fn parse_tx(&self, tx: &Value) -> Result<Vec<ParsedTransfer>, ChainError> {
        let field = |name: &str| {
            tx.get(name)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| ChainError::Parse(format!("missing tx field {:?}", name)))
        };
        let hash = field("hash")?;
        let to = field("to")?;
        let amount = Decimal::from_str(&field("amount")?)
            .map_err(|e| ChainError::Parse(format!("bad amount: {}", e)))?;
        let tag = field("tag")?;
        let index = tx.get("index").and_then(Value::as_u64).unwrap_or(0) as u32;

        Ok(vec![ParsedTransfer {
            unique_key: format!("{}|{}|{}", hash, to, index),
            tx_hash: hash,
            address: to,
            amount,
            symbol: self.symbol.clone(),
            extra_tag: tag,
            inner_index: index,
        }])
    }

    async fn get_tx(&self, tx_hash: &str) -> Result<Value, ChainError> {
        self.take_failure()?;
        let state = self.state();
        for block in &state.blocks {
            for (i, tx) in block.txs.iter().enumerate() {
                if tx.hash == tx_hash {
                    return Ok(json!({
                        "hash": tx.hash,
                        "to": tx.to,
                        "amount": tx.amount.to_string(),
                        "tag": tx.tag,
                        "index": i,
                    }));
                }
            }
        }
        Err(ChainError::TxNotFound(tx_hash.to_string()))
    }

    async fn get_tx_confirmations(&self, tx_hash: &str) -> Result<u64, ChainError> {
        self.take_failure()?;
        let state = self.state();
        let best = state.blocks.last().map(|b| b.height).unwrap_or(0);
        for block in &state.blocks {
            if block.txs.iter().any(|tx| tx.hash == tx_hash) {
                return Ok(best - block.height + 1);
            }
        }
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mined_blocks_are_parent_linked() {
        let chain = MockAdapter::with_base("MOCK", 100);
        chain.mine(vec![MockTx::new("tx1", "addr1", Decimal::new(5, 0))]);
        chain.mine_empty(2);

        assert_eq!(chain.get_last_block_height().await.unwrap(), 103);

        let b101 = chain.get_block_by_height(101).await.unwrap();
        let parent = chain.parse_previous_block_hash(&b101).unwrap();
        assert_eq!(parent, chain.hash_at(100).unwrap());
    }

    #[tokio::test]
    async fn test_fork_changes_hashes() {
        let chain = MockAdapter::with_base("MOCK", 100);
        chain.mine_empty(2);
        let old_101 = chain.hash_at(101).unwrap();

        chain.fork_at(101);
        chain.mine_empty(2);
        assert_ne!(chain.hash_at(101).unwrap(), old_101);

        // common ancestor untouched
        let b101 = chain.get_block_by_height(101).await.unwrap();
        let parent = chain.parse_previous_block_hash(&b101).unwrap();
        assert_eq!(parent, chain.hash_at(100).unwrap());
    }

    #[tokio::test]
    async fn test_scripted_failures() {
        let chain = MockAdapter::new("MOCK");
        chain.fail_next(2);
        assert!(chain.get_last_block_height().await.is_err());
        assert!(chain.get_last_block_height().await.is_err());
        assert!(chain.get_last_block_height().await.is_ok());
    }

    #[tokio::test]
    async fn test_tx_confirmations() {
        let chain = MockAdapter::new("MOCK");
        chain.mine(vec![MockTx::new("tx1", "addr1", Decimal::new(1, 0))]);
        chain.mine_empty(4);

        assert_eq!(chain.get_tx_confirmations("tx1").await.unwrap(), 5);
        assert_eq!(chain.get_tx_confirmations("absent").await.unwrap(), 0);
    }

    #[test]
    fn test_parse_tx_roundtrip() {
        let chain = MockAdapter::new("MOCK");
        let tx = json!({
            "hash": "tx1",
            "to": "addr1",
            "amount": "5.25",
            "tag": "1234",
            "index": 2,
        });
        let parsed = chain.parse_tx(&tx).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].amount, Decimal::new(525, 2));
        assert_eq!(parsed[0].inner_index, 2);
        assert_eq!(parsed[0].unique_key, "tx1|addr1|2");
    }
}
