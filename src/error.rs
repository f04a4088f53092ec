use thiserror::Error;

/// Errors produced by chain adapters and the block prefetch cache.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("RPC request failed: {0}")]
    Rpc(String),

    /// The requested height does not exist yet. Carries the best height
    /// observed at the time of the request so the caller can wait for new
    /// blocks instead of retrying.
    #[error("height {requested} is above best height {best}")]
    HeightOver { requested: u64, best: u64 },

    #[error("block not found at height {0}")]
    BlockNotFound(u64),

    #[error("transaction not found: {0}")]
    TxNotFound(String),

    #[error("malformed payload: {0}")]
    Parse(String),
}

impl ChainError {
    /// Transient failures are retried (bounded inside the cache, unbounded
    /// at the sync-loop level). Everything else fails the current attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, ChainError::Rpc(_) | ChainError::BlockNotFound(_))
    }
}

/// Errors produced by the ledger store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Every accepted block leaves a record, so a missing rollback anchor
    /// means the store and the checkpoint disagree.
    #[error("no block record for {chain} at height {height}")]
    MissingBlockRecord { chain: String, height: u64 },

    #[error("{0}")]
    Other(String),
}

/// Errors produced by the broker client.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker request failed: {0}")]
    Http(String),

    #[error("broker rejected notification: {0}")]
    Rejected(String),
}

/// Top-level error for the sync loop and notifier tasks. Nothing in the
/// engine terminates the process on one of these; every failure path
/// resolves to log-and-retry.
#[derive(Debug, Error)]
pub enum SentinelError {
    #[error("chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
