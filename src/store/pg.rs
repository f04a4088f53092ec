//! PostgreSQL ledger store.
//!
//! Expected tables (schema owned by the accounting side):
//!
//! ```text
//! user_addresses     (address TEXT PRIMARY KEY, chain TEXT)
//! deposit_transfers  (sequence_id TEXT PRIMARY KEY, tx_hash TEXT, chain TEXT,
//!                     symbol TEXT, address TEXT, amount NUMERIC,
//!                     confirmations INT, extra_tag TEXT, inner_index INT,
//!                     block_height BIGINT, block_hash TEXT,
//!                     notify_status SMALLINT, retry_count INT)
//! block_records      (chain TEXT, height BIGINT, hash TEXT,
//!                     PRIMARY KEY (chain, height))
//! chain_checkpoints  (chain TEXT PRIMARY KEY, height BIGINT, hash TEXT)
//! ```

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction};
use std::time::Duration;
use tracing::info;

use super::LedgerStore;
use crate::error::StoreError;
use crate::model::{BlockRecord, Checkpoint, NotifyStatus, Transfer};

pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await?;

        info!("PostgreSQL connection pool established");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn insert_transfer_tx(
        tx: &mut Transaction<'_, Postgres>,
        transfer: &Transfer,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"INSERT INTO deposit_transfers
               (sequence_id, tx_hash, chain, symbol, address, amount, confirmations,
                extra_tag, inner_index, block_height, block_hash, notify_status, retry_count)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
               ON CONFLICT (sequence_id) DO NOTHING"#,
        )
        .bind(&transfer.sequence_id)
        .bind(&transfer.tx_hash)
        .bind(&transfer.chain)
        .bind(&transfer.symbol)
        .bind(&transfer.address)
        .bind(transfer.amount)
        .bind(transfer.confirmations as i32)
        .bind(&transfer.extra_tag)
        .bind(transfer.inner_index as i32)
        .bind(transfer.block_height as i64)
        .bind(&transfer.block_hash)
        .bind(transfer.notify_status.as_i16())
        .bind(transfer.retry_count as i32)
        .execute(&mut **tx)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

fn row_to_transfer(row: &PgRow) -> Transfer {
    let status: i16 = row.get("notify_status");
    Transfer {
        sequence_id: row.get("sequence_id"),
        tx_hash: row.get("tx_hash"),
        chain: row.get("chain"),
        symbol: row.get("symbol"),
        address: row.get("address"),
        amount: row.get::<Decimal, _>("amount"),
        confirmations: row.get::<i32, _>("confirmations") as u16,
        extra_tag: row.get("extra_tag"),
        inner_index: row.get::<i32, _>("inner_index") as u32,
        block_height: row.get::<i64, _>("block_height") as u64,
        block_hash: row.get("block_hash"),
        notify_status: NotifyStatus::from_i16(status).unwrap_or(NotifyStatus::Pending),
        retry_count: row.get::<i32, _>("retry_count") as u32,
    }
}

fn row_to_record(row: &PgRow) -> BlockRecord {
    BlockRecord {
        chain: row.get("chain"),
        height: row.get::<i64, _>("height") as u64,
        hash: row.get("hash"),
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn has_address(&self, address: &str) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT 1 FROM user_addresses WHERE address = $1")
            .bind(address)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn has_transfer(&self, sequence_id: &str) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT 1 FROM deposit_transfers WHERE sequence_id = $1")
            .bind(sequence_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn address_seen(&self, address: &str) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT 1 FROM deposit_transfers WHERE address = $1 LIMIT 1")
            .bind(address)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn insert_transfer_if_absent(&self, transfer: &Transfer) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;
        let inserted = Self::insert_transfer_tx(&mut tx, transfer).await?;
        tx.commit().await?;
        Ok(inserted)
    }

    async fn transfers_by_hash(&self, tx_hash: &str) -> Result<Vec<Transfer>, StoreError> {
        let rows = sqlx::query("SELECT * FROM deposit_transfers WHERE tx_hash = $1")
            .bind(tx_hash)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_transfer).collect())
    }

    async fn unfinished_transfers(&self, chain: &str) -> Result<Vec<Transfer>, StoreError> {
        let rows = sqlx::query(
            r#"SELECT * FROM deposit_transfers
               WHERE chain = $1 AND notify_status = $2
               ORDER BY block_height ASC, inner_index ASC"#,
        )
        .bind(chain)
        .bind(NotifyStatus::Pending.as_i16())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_transfer).collect())
    }

    async fn update_transfer(
        &self,
        sequence_id: &str,
        confirmations: u16,
        retry_count: u32,
        status: NotifyStatus,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"UPDATE deposit_transfers
               SET confirmations = $1, retry_count = $2, notify_status = $3
               WHERE sequence_id = $4"#,
        )
        .bind(confirmations as i32)
        .bind(retry_count as i32)
        .bind(status.as_i16())
        .bind(sequence_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn last_block_record(&self, chain: &str) -> Result<Option<BlockRecord>, StoreError> {
        let row = sqlx::query(
            r#"SELECT chain, height, hash FROM block_records
               WHERE chain = $1 ORDER BY height DESC LIMIT 1"#,
        )
        .bind(chain)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(row_to_record))
    }

    async fn block_record_at(
        &self,
        chain: &str,
        height: u64,
    ) -> Result<Option<BlockRecord>, StoreError> {
        let row = sqlx::query(
            "SELECT chain, height, hash FROM block_records WHERE chain = $1 AND height = $2",
        )
        .bind(chain)
        .bind(height as i64)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(row_to_record))
    }

    async fn insert_block_record(&self, record: &BlockRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"INSERT INTO block_records (chain, height, hash) VALUES ($1, $2, $3)
               ON CONFLICT (chain, height) DO UPDATE SET hash = EXCLUDED.hash"#,
        )
        .bind(&record.chain)
        .bind(record.height as i64)
        .bind(&record.hash)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_block_record(&self, record: &BlockRecord) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM deposit_transfers WHERE block_height = $1 AND block_hash = $2")
            .bind(record.height as i64)
            .bind(&record.hash)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM block_records WHERE chain = $1 AND height = $2")
            .bind(&record.chain)
            .bind(record.height as i64)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn load_checkpoint(&self, chain: &str) -> Result<Option<Checkpoint>, StoreError> {
        let row = sqlx::query("SELECT chain, height, hash FROM chain_checkpoints WHERE chain = $1")
            .bind(chain)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| Checkpoint {
            chain: r.get("chain"),
            height: r.get::<i64, _>("height") as u64,
            hash: r.get("hash"),
        }))
    }

    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), StoreError> {
        sqlx::query(
            r#"INSERT INTO chain_checkpoints (chain, height, hash) VALUES ($1, $2, $3)
               ON CONFLICT (chain) DO UPDATE
               SET height = EXCLUDED.height, hash = EXCLUDED.hash"#,
        )
        .bind(&checkpoint.chain)
        .bind(checkpoint.height as i64)
        .bind(&checkpoint.hash)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn commit_block(
        &self,
        record: &BlockRecord,
        checkpoint: &Checkpoint,
        transfers: &[Transfer],
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        for transfer in transfers {
            Self::insert_transfer_tx(&mut tx, transfer).await?;
        }

        sqlx::query(
            r#"INSERT INTO block_records (chain, height, hash) VALUES ($1, $2, $3)
               ON CONFLICT (chain, height) DO UPDATE SET hash = EXCLUDED.hash"#,
        )
        .bind(&record.chain)
        .bind(record.height as i64)
        .bind(&record.hash)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"INSERT INTO chain_checkpoints (chain, height, hash) VALUES ($1, $2, $3)
               ON CONFLICT (chain) DO UPDATE
               SET height = EXCLUDED.height, hash = EXCLUDED.hash"#,
        )
        .bind(&checkpoint.chain)
        .bind(checkpoint.height as i64)
        .bind(&checkpoint.hash)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}
