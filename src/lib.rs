//! Deposit Sentinel - Multi-chain deposit detection service
//!
//! Walks every configured blockchain forward from a persisted checkpoint,
//! detects transfers into owned addresses, and reliably reports them to the
//! exchange ledger.
//!
//! # Modules
//!
//! - [`adapter`] - Per-chain plugin contract and implementations
//! - [`cache`] - Block prefetch cache
//! - [`walker`] - Checkpoint advancement and reorg repair
//! - [`ingest`] - Transfer normalization, dedup and admission filters
//! - [`sync`] - Per-chain sync loop
//! - [`notify`] - Confirmation-gated broker notification
//! - [`broker`] - Broker API client
//! - [`store`] - Ledger store contract and implementations
//! - [`registry`] - Currency registry snapshot
//! - [`model`] - Checkpoint, BlockRecord and Transfer types

pub mod adapter;
pub mod broker;
pub mod cache;
pub mod config;
pub mod error;
pub mod ingest;
pub mod logging;
pub mod model;
pub mod notify;
pub mod registry;
pub mod store;
pub mod sync;
pub mod walker;

// Convenient re-exports at crate root
pub use adapter::{AdapterRegistry, ChainAdapter, EvmAdapter, MockAdapter, MockTx};
pub use broker::{BrokerApi, DepositNotice, HttpBroker, MockBroker};
pub use cache::BlockCache;
pub use config::{AppConfig, BrokerConfig, ChainConfig, CurrencyConfig};
pub use error::{BrokerError, ChainError, SentinelError, StoreError};
pub use ingest::TxIngestor;
pub use model::{BlockRecord, Checkpoint, NotifyStatus, ParsedTransfer, Transfer};
pub use notify::Notifier;
pub use registry::{CurrencyDetail, CurrencyRegistry, StaticCurrencyRegistry};
pub use store::{LedgerStore, MemoryLedgerStore, PgLedgerStore};
pub use sync::SyncLoop;
pub use walker::{AcceptedBlock, ChainWalker};
