//! In-memory ledger store.
//!
//! Backs the test suite and dry runs without a database. Mirrors the
//! uniqueness and atomicity guarantees of the PostgreSQL store.

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use std::collections::HashSet;
use std::sync::Mutex;

use super::LedgerStore;
use crate::error::StoreError;
use crate::model::{BlockRecord, Checkpoint, NotifyStatus, Transfer};

#[derive(Default)]
struct Inner {
    addresses: HashSet<String>,
    transfers: FxHashMap<String, Transfer>,
    block_records: FxHashMap<(String, u64), BlockRecord>,
    checkpoints: FxHashMap<String, Checkpoint>,
}

#[derive(Default)]
pub struct MemoryLedgerStore {
    inner: Mutex<Inner>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Seed one owned address.
    pub fn add_address(&self, address: &str) {
        self.lock().addresses.insert(address.to_string());
    }

    /// Stored transfer by sequence id, for assertions.
    pub fn transfer(&self, sequence_id: &str) -> Option<Transfer> {
        self.lock().transfers.get(sequence_id).cloned()
    }

    pub fn transfer_count(&self) -> usize {
        self.lock().transfers.len()
    }

    pub fn block_record_count(&self) -> usize {
        self.lock().block_records.len()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn has_address(&self, address: &str) -> Result<bool, StoreError> {
        Ok(self.lock().addresses.contains(address))
    }

    async fn has_transfer(&self, sequence_id: &str) -> Result<bool, StoreError> {
        Ok(self.lock().transfers.contains_key(sequence_id))
    }

    async fn address_seen(&self, address: &str) -> Result<bool, StoreError> {
        Ok(self
            .lock()
            .transfers
            .values()
            .any(|t| t.address == address))
    }

    async fn insert_transfer_if_absent(&self, transfer: &Transfer) -> Result<bool, StoreError> {
        let mut inner = self.lock();
        if inner.transfers.contains_key(&transfer.sequence_id) {
            return Ok(false);
        }
        inner
            .transfers
            .insert(transfer.sequence_id.clone(), transfer.clone());
        Ok(true)
    }

    async fn transfers_by_hash(&self, tx_hash: &str) -> Result<Vec<Transfer>, StoreError> {
        Ok(self
            .lock()
            .transfers
            .values()
            .filter(|t| t.tx_hash == tx_hash)
            .cloned()
            .collect())
    }

    async fn unfinished_transfers(&self, chain: &str) -> Result<Vec<Transfer>, StoreError> {
        let mut pending: Vec<Transfer> = self
            .lock()
            .transfers
            .values()
            .filter(|t| t.chain == chain && t.notify_status == NotifyStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|t| (t.block_height, t.inner_index));
        Ok(pending)
    }

    async fn update_transfer(
        &self,
        sequence_id: &str,
        confirmations: u16,
        retry_count: u32,
        status: NotifyStatus,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let transfer = inner
            .transfers
            .get_mut(sequence_id)
            .ok_or_else(|| StoreError::Other(format!("unknown transfer {}", sequence_id)))?;
        transfer.confirmations = confirmations;
        transfer.retry_count = retry_count;
        transfer.notify_status = status;
        Ok(())
    }

    async fn last_block_record(&self, chain: &str) -> Result<Option<BlockRecord>, StoreError> {
        Ok(self
            .lock()
            .block_records
            .values()
            .filter(|r| r.chain == chain)
            .max_by_key(|r| r.height)
            .cloned())
    }

    async fn block_record_at(
        &self,
        chain: &str,
        height: u64,
    ) -> Result<Option<BlockRecord>, StoreError> {
        Ok(self
            .lock()
            .block_records
            .get(&(chain.to_string(), height))
            .cloned())
    }

    async fn insert_block_record(&self, record: &BlockRecord) -> Result<(), StoreError> {
        self.lock()
            .block_records
            .insert((record.chain.clone(), record.height), record.clone());
        Ok(())
    }

    async fn delete_block_record(&self, record: &BlockRecord) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner
            .block_records
            .remove(&(record.chain.clone(), record.height));
        inner
            .transfers
            .retain(|_, t| !(t.block_height == record.height && t.block_hash == record.hash));
        Ok(())
    }

    async fn load_checkpoint(&self, chain: &str) -> Result<Option<Checkpoint>, StoreError> {
        Ok(self.lock().checkpoints.get(chain).cloned())
    }

    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), StoreError> {
        self.lock()
            .checkpoints
            .insert(checkpoint.chain.clone(), checkpoint.clone());
        Ok(())
    }

    async fn commit_block(
        &self,
        record: &BlockRecord,
        checkpoint: &Checkpoint,
        transfers: &[Transfer],
    ) -> Result<(), StoreError> {
        let mut inner = self.lock();
        for transfer in transfers {
            inner
                .transfers
                .entry(transfer.sequence_id.clone())
                .or_insert_with(|| transfer.clone());
        }
        inner
            .block_records
            .insert((record.chain.clone(), record.height), record.clone());
        inner
            .checkpoints
            .insert(checkpoint.chain.clone(), checkpoint.clone());
        Ok(())
    }
}
