//! Core data model shared by the walker, ingestor and notifier.

use rust_decimal::Decimal;

/// Locally-believed canonical (height, hash) tip of one chain.
///
/// Mutated only by the walker; persisted per chain symbol. The hash is the
/// canonical block's hash at `height` on the locally-believed best chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    pub chain: String,
    pub height: u64,
    pub hash: String,
}

/// One row per accepted block. Audit trail and rollback anchor: for
/// consecutive records, `record(h).hash == parent_hash(record(h + 1))`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockRecord {
    pub chain: String,
    pub height: u64,
    pub hash: String,
}

/// Notification lifecycle of a stored transfer.
///
/// State IDs are designed for storage as SMALLINT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i16)]
pub enum NotifyStatus {
    /// Awaiting a broker acknowledgement and the confirmation threshold.
    Pending = 0,
    /// Acknowledged and confirmed, or filtered out at admission.
    Finished = 1,
}

impl NotifyStatus {
    #[inline]
    pub fn as_i16(self) -> i16 {
        self as i16
    }

    pub fn from_i16(value: i16) -> Option<Self> {
        match value {
            0 => Some(NotifyStatus::Pending),
            1 => Some(NotifyStatus::Finished),
            _ => None,
        }
    }
}

/// A transfer extracted from a transaction payload by an adapter, before
/// admission. `unique_key` joins the chain-specific uniqueness fields
/// (UTXO chains: the spending outpoint; account chains: hash + receiver +
/// ledger index) that feed the dedup fingerprint.
#[derive(Debug, Clone)]
pub struct ParsedTransfer {
    pub tx_hash: String,
    pub address: String,
    pub amount: Decimal,
    pub symbol: String,
    pub extra_tag: String,
    pub inner_index: u32,
    pub unique_key: String,
}

/// A normalized deposit as persisted in the ledger store.
///
/// At most one row exists per `sequence_id`. `confirmations`, `retry_count`
/// and `notify_status` are mutated only by the notifier; rows are never
/// deleted except when a reorg rolls back the owning block.
#[derive(Debug, Clone)]
pub struct Transfer {
    pub sequence_id: String,
    pub tx_hash: String,
    pub chain: String,
    pub symbol: String,
    pub address: String,
    pub amount: Decimal,
    pub confirmations: u16,
    pub extra_tag: String,
    pub inner_index: u32,
    pub block_height: u64,
    pub block_hash: String,
    pub notify_status: NotifyStatus,
    pub retry_count: u32,
}

/// Deterministic dedup fingerprint for one transfer event: digest over the
/// chain-specific uniqueness fields plus destination address and currency
/// symbol.
pub fn sequence_id(unique_key: &str, address: &str, symbol: &str) -> String {
    let digest = md5::compute(format!("{}|{}|{}", unique_key, address, symbol));
    format!("{:x}", digest)
}
