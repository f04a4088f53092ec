//! EVM adapter.
//!
//! Speaks the Ethereum JSON-RPC wire format (Geth, Anvil and friends) and
//! maps it onto the fixed [`ChainAdapter`] contract. Native-coin transfers
//! only; token log scanning belongs to a dedicated adapter.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{ChainAdapter, scale_amount};
use crate::error::ChainError;
use crate::model::ParsedTransfer;

/// JSON-RPC request structure
#[derive(Serialize)]
struct JsonRpcRequest<T> {
    jsonrpc: &'static str,
    method: &'static str,
    params: T,
    id: u64,
}

/// JSON-RPC response structure
#[derive(Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcError>,
}

#[derive(Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// Adapter for EVM chains, connected over HTTP JSON-RPC.
pub struct EvmAdapter {
    symbol: String,
    rpc_url: String,
    decimals: u32,
    client: reqwest::Client,
}

impl EvmAdapter {
    pub fn new(symbol: &str, rpc_url: &str, decimals: u32) -> Result<Self, ChainError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| ChainError::Rpc(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            symbol: symbol.to_string(),
            rpc_url: rpc_url.to_string(),
            decimals,
            client,
        })
    }

    async fn rpc_call<T, R>(&self, method: &'static str, params: T) -> Result<R, ChainError>
    where
        T: Serialize + Send,
        R: for<'de> Deserialize<'de>,
    {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id: 1,
        };

        let response = self
            .client
            .post(&self.rpc_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| ChainError::Rpc(format!("HTTP request failed: {}", e)))?;

        let rpc_response: JsonRpcResponse<R> = response
            .json()
            .await
            .map_err(|e| ChainError::Rpc(format!("failed to parse response: {}", e)))?;

        if let Some(error) = rpc_response.error {
            return Err(ChainError::Rpc(format!(
                "RPC error {}: {}",
                error.code, error.message
            )));
        }

        rpc_response
            .result
            .ok_or_else(|| ChainError::Rpc("no result in RPC response".to_string()))
    }

    async fn block_by_number(&self, height: u64, full_txs: bool) -> Result<Value, ChainError> {
        let height_hex = format!("0x{:x}", height);
        let block: Value = self
            .rpc_call("eth_getBlockByNumber", (height_hex, full_txs))
            .await?;
        if block.is_null() {
            return Err(ChainError::BlockNotFound(height));
        }
        Ok(block)
    }
}

#[async_trait]
impl ChainAdapter for EvmAdapter {
    fn chain_symbol(&self) -> &str {
        &self.symbol
    }

    async fn get_last_block_height(&self) -> Result<u64, ChainError> {
        let result: String = self.rpc_call("eth_blockNumber", ()).await?;
        hex_u64(&result)
    }

    async fn get_block_hash_by_height(&self, height: u64) -> Result<String, ChainError> {
        let block = self.block_by_number(height, false).await?;
        self.parse_block_hash(&block)
    }

    async fn get_block_by_height(&self, height: u64) -> Result<Value, ChainError> {
        self.block_by_number(height, true).await
    }

    fn parse_block_hash(&self, block: &Value) -> Result<String, ChainError> {
        str_field(block, "hash")
    }

    fn parse_previous_block_hash(&self, block: &Value) -> Result<String, ChainError> {
        str_field(block, "parentHash")
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
            .ok_or_else(|| ChainError::Parse("block has no transactions array".to_string()))
    }

    fn parse_tx(&self, tx: &Value) -> Result<Vec<ParsedTransfer>, ChainError> {
        // Contract creations have no receiver; nothing to ingest.
        let Some(to) = tx.get("to").and_then(Value::as_str) else {
            return Ok(vec![]);
        };
        let hash = str_field(tx, "hash")?;
        let value_wei = hex_u128(&str_field(tx, "value")?)?;
        if value_wei == 0 {
            return Ok(vec![]);
        }
        let inner_index = tx
            .get("transactionIndex")
            .and_then(Value::as_str)
            .map(hex_u64)
            .transpose()?
            .unwrap_or(0) as u32;

        // Receiver addresses are compared lowercase everywhere; EVM hashes
        // and addresses are case-insensitive hex.
        let address = to.to_lowercase();
        let amount = scale_amount(&value_wei.to_string(), self.decimals)?;

        Ok(vec![ParsedTransfer {
            unique_key: format!("{}|{}|{}", hash, address, inner_index),
            tx_hash: hash,
            address,
            amount,
            symbol: self.symbol.clone(),
            extra_tag: String::new(),
            inner_index,
        }])
    }

    async fn get_tx(&self, tx_hash: &str) -> Result<Value, ChainError> {
        let tx: Value = self
            .rpc_call("eth_getTransactionByHash", (tx_hash.to_string(),))
            .await?;
        if tx.is_null() {
            return Err(ChainError::TxNotFound(tx_hash.to_string()));
        }
        Ok(tx)
    }

    async fn get_tx_confirmations(&self, tx_hash: &str) -> Result<u64, ChainError> {
        let tx = self.get_tx(tx_hash).await?;
        // blockNumber stays null while the transaction is in the mempool
        let Some(block_hex) = tx.get("blockNumber").and_then(Value::as_str) else {
            return Ok(0);
        };
        let tx_height = hex_u64(block_hex)?;
        let best = self.get_last_block_height().await?;
        if best < tx_height {
            return Ok(0);
        }
        Ok(best - tx_height + 1)
    }
}

fn str_field(value: &Value, field: &str) -> Result<String, ChainError> {
    value
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ChainError::Parse(format!("missing field {:?}", field)))
}

fn hex_u64(hex: &str) -> Result<u64, ChainError> {
    u64::from_str_radix(hex.trim_start_matches("0x"), 16)
        .map_err(|e| ChainError::Parse(format!("bad hex quantity {:?}: {}", hex, e)))
}

fn hex_u128(hex: &str) -> Result<u128, ChainError> {
    u128::from_str_radix(hex.trim_start_matches("0x"), 16)
        .map_err(|e| ChainError::Parse(format!("bad hex quantity {:?}: {}", hex, e)))
}
