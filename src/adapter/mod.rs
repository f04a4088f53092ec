//! Chain adapter contract.
//!
//! One adapter per supported chain speaks that chain's RPC wire format and
//! exposes the fixed contract below. The engine never interprets block or
//! transaction payloads itself; payloads stay opaque `serde_json::Value`s
//! between `get_block_by_height` and the `parse_*` calls.

pub mod evm;
pub mod mock;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::ChainError;
use crate::model::ParsedTransfer;

pub use evm::EvmAdapter;
pub use mock::{MockAdapter, MockTx};

/// Unified interface for reading different blockchains.
#[async_trait]
pub trait ChainAdapter: Send + Sync {
    /// Chain identifier (e.g. "ETH", "BTC").
    fn chain_symbol(&self) -> &str;

    /// Whether a deposit address may receive more than one deposit.
    fn reuse_address(&self) -> bool {
        true
    }

    /// Height of the best block known to the node.
    async fn get_last_block_height(&self) -> Result<u64, ChainError>;

    /// Canonical block hash at a height.
    async fn get_block_hash_by_height(&self, height: u64) -> Result<String, ChainError>;

    /// Raw block payload at a height, including its transactions.
    async fn get_block_by_height(&self, height: u64) -> Result<Value, ChainError>;

    /// Block hash field of a raw block payload.
    fn parse_block_hash(&self, block: &Value) -> Result<String, ChainError>;

    /// Parent hash field of a raw block payload. Together with
    /// `parse_block_hash` this is the fork-check pair; a failure here is
    /// fatal for the current iteration.
    fn parse_previous_block_hash(&self, block: &Value) -> Result<String, ChainError>;

    /// Raw transaction payloads of a block.
    fn parse_block_txs(
        &self,
        height: u64,
        hash: &str,
        block: &Value,
    ) -> Result<Vec<Value>, ChainError>;

    /// Transfers carried by one raw transaction payload. A single payload
    /// can yield several transfers (UTXO outputs, token logs).
    fn parse_tx(&self, tx: &Value) -> Result<Vec<ParsedTransfer>, ChainError>;

    /// Raw payload of one transaction, fetched by hash.
    async fn get_tx(&self, tx_hash: &str) -> Result<Value, ChainError>;

    /// Confirmation depth of a transaction. Zero while unconfirmed.
    async fn get_tx_confirmations(&self, tx_hash: &str) -> Result<u64, ChainError>;
}

/// Explicit adapter registry, built once at startup and passed by reference
/// into the sync loops and notifiers. Multiple independent engine instances
/// can each hold their own.
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn ChainAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, adapter: Arc<dyn ChainAdapter>) {
        self.adapters
            .insert(adapter.chain_symbol().to_string(), adapter);
    }

    pub fn get(&self, symbol: &str) -> Option<Arc<dyn ChainAdapter>> {
        self.adapters.get(symbol).cloned()
    }

    pub fn symbols(&self) -> Vec<String> {
        self.adapters.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

/// Scale a chain-native integer amount (decimal string of base units) by the
/// chain's declared precision. Integer math only; amounts never pass through
/// binary floating point.
pub fn scale_amount(raw: &str, decimals: u32) -> Result<Decimal, ChainError> {
    let units: i128 = raw
        .parse()
        .map_err(|e| ChainError::Parse(format!("bad raw amount {:?}: {}", raw, e)))?;
    Decimal::try_from_i128_with_scale(units, decimals)
        .map_err(|e| ChainError::Parse(format!("amount {} out of range: {}", raw, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scale_amount() {
        // 1 BTC in satoshi
        assert_eq!(
            scale_amount("100000000", 8).unwrap(),
            Decimal::new(100_000_000, 8)
        );
        // 1 wei at 18 decimals
        assert_eq!(scale_amount("1", 18).unwrap(), Decimal::new(1, 18));
        assert!(scale_amount("not_a_number", 8).is_err());
    }

    #[test]
    fn test_registry_lookup() {
        let mut registry = AdapterRegistry::new();
        assert!(registry.is_empty());

        registry.register(Arc::new(MockAdapter::new("MOCK")));
        assert_eq!(registry.len(), 1);
        assert!(registry.get("MOCK").is_some());
        assert!(registry.get("ETH").is_none());
    }
}
