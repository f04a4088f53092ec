//! Ledger store contract.
//!
//! The persistent ledger (owned addresses, transfer rows, block records,
//! checkpoints) lives behind this trait. The engine only needs the
//! operations below; the schema and its migrations are owned by the
//! accounting side.

pub mod memory;
pub mod pg;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::model::{BlockRecord, Checkpoint, NotifyStatus, Transfer};

pub use memory::MemoryLedgerStore;
pub use pg::PgLedgerStore;

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Membership test against the owned-address set. The sole admission
    /// gate before a transfer is considered ours.
    async fn has_address(&self, address: &str) -> Result<bool, StoreError>;

    /// Whether a transfer with this sequence id is already stored.
    async fn has_transfer(&self, sequence_id: &str) -> Result<bool, StoreError>;

    /// Whether any stored transfer already targets this address. Feeds the
    /// address-reuse filter.
    async fn address_seen(&self, address: &str) -> Result<bool, StoreError>;

    /// Insert unless a row with the same sequence id exists. Returns true
    /// when a row was inserted. Concurrent duplicate inserts must leave
    /// exactly one row.
    async fn insert_transfer_if_absent(&self, transfer: &Transfer) -> Result<bool, StoreError>;

    /// Transfers sharing a transaction hash, for confirmation lookups and
    /// manual recovery.
    async fn transfers_by_hash(&self, tx_hash: &str) -> Result<Vec<Transfer>, StoreError>;

    /// All pending transfers of one chain, oldest block first.
    async fn unfinished_transfers(&self, chain: &str) -> Result<Vec<Transfer>, StoreError>;

    /// Persist the notifier-owned fields of one transfer.
    async fn update_transfer(
        &self,
        sequence_id: &str,
        confirmations: u16,
        retry_count: u32,
        status: NotifyStatus,
    ) -> Result<(), StoreError>;

    async fn last_block_record(&self, chain: &str) -> Result<Option<BlockRecord>, StoreError>;

    async fn block_record_at(
        &self,
        chain: &str,
        height: u64,
    ) -> Result<Option<BlockRecord>, StoreError>;

    async fn insert_block_record(&self, record: &BlockRecord) -> Result<(), StoreError>;

    /// Remove a superseded block record together with the transfers of that
    /// block. The one place stored transfers are ever deleted.
    async fn delete_block_record(&self, record: &BlockRecord) -> Result<(), StoreError>;

    async fn load_checkpoint(&self, chain: &str) -> Result<Option<Checkpoint>, StoreError>;

    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), StoreError>;

    /// Atomically persist one accepted block: its record, the advanced
    /// checkpoint and the block's admitted transfers. All or nothing; a
    /// failure leaves the previous checkpoint in place so the same height
    /// is retried.
    async fn commit_block(
        &self,
        record: &BlockRecord,
        checkpoint: &Checkpoint,
        transfers: &[Transfer],
    ) -> Result<(), StoreError>;
}
