//! Transfer ingestor.
//!
//! Normalizes, deduplicates and filters transfers extracted from a block's
//! raw transactions, and decides per transfer whether it will ever be
//! pushed to the broker. Ingestion is idempotent: replays of the same raw
//! transaction leave exactly one stored row per sequence id.

use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::adapter::ChainAdapter;
use crate::error::SentinelError;
use crate::model::{NotifyStatus, ParsedTransfer, Transfer, sequence_id};
use crate::registry::CurrencyRegistry;
use crate::store::LedgerStore;
use crate::walker::AcceptedBlock;

/// Destination tags are truncated to this many codepoints.
pub const MAX_TAG_LEN: usize = 64;

/// Truncate a destination tag to its bounded length.
pub fn normalize_tag(tag: &str) -> String {
    tag.chars().take(MAX_TAG_LEN).collect()
}

/// Tag admission: chains requiring a destination tag only accept numeric
/// tags; any memo must stay within the 3-byte-per-codepoint UTF-8 subset.
pub fn tag_admissible(tag: &str, required: bool) -> bool {
    if tag.is_empty() {
        return !required;
    }
    if required && !tag.chars().all(|c| c.is_ascii_digit()) {
        return false;
    }
    tag.chars().all(|c| c.len_utf8() <= 3)
}

pub struct TxIngestor {
    store: Arc<dyn LedgerStore>,
    currencies: Arc<dyn CurrencyRegistry>,
}

impl TxIngestor {
    pub fn new(store: Arc<dyn LedgerStore>, currencies: Arc<dyn CurrencyRegistry>) -> Self {
        Self { store, currencies }
    }

    /// Extract and admit every transfer of one accepted block. Returns the
    /// rows for the caller's atomic block commit; nothing is persisted
    /// here.
    pub async fn extract_block(
        &self,
        adapter: &dyn ChainAdapter,
        block: &AcceptedBlock,
    ) -> Result<Vec<Transfer>, SentinelError> {
        let txs = adapter.parse_block_txs(block.height, &block.hash, &block.payload)?;
        let mut admitted = Vec::new();
        for tx in &txs {
            for parsed in adapter.parse_tx(tx)? {
                if let Some(transfer) = self
                    .admit(adapter, block.height, &block.hash, parsed)
                    .await?
                {
                    admitted.push(transfer);
                }
            }
        }
        Ok(admitted)
    }

    /// Admission decision for one parsed transfer. `None` means skipped:
    /// either a silent duplicate or a transfer that is not ours.
    pub async fn admit(
        &self,
        adapter: &dyn ChainAdapter,
        block_height: u64,
        block_hash: &str,
        parsed: ParsedTransfer,
    ) -> Result<Option<Transfer>, SentinelError> {
        let sequence_id = sequence_id(&parsed.unique_key, &parsed.address, &parsed.symbol);

        if self.store.has_transfer(&sequence_id).await? {
            debug!(
                tx_hash = %parsed.tx_hash,
                %sequence_id,
                "transfer already ingested, skipping"
            );
            return Ok(None);
        }

        if parsed.amount <= Decimal::ZERO {
            warn!(
                tx_hash = %parsed.tx_hash,
                amount = %parsed.amount,
                "non-positive amount, discarding"
            );
            return Ok(None);
        }

        // unowned-address transfers are discarded outright, not recorded
        if !self.store.has_address(&parsed.address).await? {
            debug!(
                tx_hash = %parsed.tx_hash,
                address = %parsed.address,
                "destination address not ours, discarding"
            );
            return Ok(None);
        }

        let mut status = NotifyStatus::Pending;

        if let Some(min) = self.currencies.min_amount(&parsed.symbol)
            && parsed.amount < min
        {
            info!(
                tx_hash = %parsed.tx_hash,
                amount = %parsed.amount,
                %min,
                "amount below minimum, recorded but not notified"
            );
            status = NotifyStatus::Finished;
        }

        let requires_tag = self
            .currencies
            .detail(&parsed.symbol)
            .map(|d| d.requires_tag)
            .unwrap_or(false);
        let tag = normalize_tag(&parsed.extra_tag);
        if status == NotifyStatus::Pending && !tag_admissible(&tag, requires_tag) {
            info!(
                tx_hash = %parsed.tx_hash,
                tag = %tag,
                "invalid destination tag, recorded but not notified"
            );
            status = NotifyStatus::Finished;
        }

        if status == NotifyStatus::Pending
            && !adapter.reuse_address()
            && self.store.address_seen(&parsed.address).await?
        {
            info!(
                tx_hash = %parsed.tx_hash,
                address = %parsed.address,
                "address already used once, recorded but not notified"
            );
            status = NotifyStatus::Finished;
        }

        Ok(Some(Transfer {
            sequence_id,
            tx_hash: parsed.tx_hash,
            chain: adapter.chain_symbol().to_string(),
            symbol: parsed.symbol,
            address: parsed.address,
            amount: parsed.amount,
            confirmations: 1,
            extra_tag: tag,
            inner_index: parsed.inner_index,
            block_height,
            block_hash: block_hash.to_string(),
            notify_status: status,
            retry_count: 0,
        }))
    }

    /// Manual recovery path: fetch one transaction directly, bypass block
    /// walking, and run it through the same admission logic. Returns the
    /// number of rows inserted.
    pub async fn ingest_forced(
        &self,
        adapter: &dyn ChainAdapter,
        tx_hash: &str,
    ) -> Result<usize, SentinelError> {
        let payload = adapter.get_tx(tx_hash).await?;
        let confirmations = adapter.get_tx_confirmations(tx_hash).await?;
        let mut inserted = 0;
        for parsed in adapter.parse_tx(&payload)? {
            if let Some(mut transfer) = self.admit(adapter, 0, "", parsed).await? {
                transfer.confirmations = confirmations.min(u16::MAX as u64) as u16;
                if self.store.insert_transfer_if_absent(&transfer).await? {
                    info!(
                        tx_hash = %transfer.tx_hash,
                        sequence_id = %transfer.sequence_id,
                        "force-processed transfer ingested"
                    );
                    inserted += 1;
                }
            }
        }
        Ok(inserted)
    }
}
