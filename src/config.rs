use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fs;

use crate::error::SentinelError;
use crate::registry::CurrencyDetail;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    /// PostgreSQL connection URL for the ledger store. Absent means the
    /// in-memory store (dry runs only).
    #[serde(default)]
    pub postgres_url: Option<String>,
    pub broker: BrokerConfig,
    pub chains: Vec<ChainConfig>,
    #[serde(default)]
    pub currencies: Vec<CurrencyConfig>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BrokerConfig {
    pub url: String,
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ChainConfig {
    /// Chain identifier, e.g. "ETH".
    pub symbol: String,
    /// Adapter kind: "evm" or "mock".
    pub kind: String,
    #[serde(default)]
    pub rpc_url: String,
    pub required_confirmations: u16,
    /// Native coin precision, used when scaling base-unit amounts.
    #[serde(default = "default_decimals")]
    pub decimals: u32,
    /// First block to process when no checkpoint is persisted.
    #[serde(default)]
    pub start_height: Option<u64>,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
    #[serde(default = "default_notify_interval_ms")]
    pub notify_interval_ms: u64,
    /// One-time force-process list: transaction hashes ingested directly at
    /// startup, bypassing block walking.
    #[serde(default)]
    pub force_txs: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CurrencyConfig {
    pub symbol: String,
    pub decimals: u32,
    pub min_deposit: Decimal,
    #[serde(default)]
    pub requires_tag: bool,
    #[serde(default)]
    pub contract_address: Option<String>,
}

impl From<&CurrencyConfig> for CurrencyDetail {
    fn from(config: &CurrencyConfig) -> Self {
        CurrencyDetail {
            symbol: config.symbol.clone(),
            decimals: config.decimals,
            min_deposit: config.min_deposit,
            requires_tag: config.requires_tag,
            contract_address: config.contract_address.clone(),
        }
    }
}

fn default_decimals() -> u32 {
    18
}

fn default_poll_interval_ms() -> u64 {
    3000
}

fn default_retry_interval_ms() -> u64 {
    5000
}

fn default_notify_interval_ms() -> u64 {
    3000
}

impl AppConfig {
    /// Load `config/{env}.yaml`.
    pub fn load(env: &str) -> Result<Self, SentinelError> {
        Self::from_file(&format!("config/{}.yaml", env))
    }

    pub fn from_file(path: &str) -> Result<Self, SentinelError> {
        let content = fs::read_to_string(path)?;
        serde_yaml::from_str(&content).map_err(|e| SentinelError::Config(e.to_string()))
    }
}
