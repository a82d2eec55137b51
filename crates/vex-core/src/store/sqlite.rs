use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite, Transaction,
};
use std::str::FromStr;

use super::{
    schema, ApplyOutcome, BlockEffects, CheckpointUpdate, IndexStore, RevertOutcome, StoreError,
};
use crate::types::{
    BlockRef, Classifier, IdentityRecord, PosIndexEntry, ScanCheckpoint, StakingReward, Utxo,
};

pub struct SqliteIndexStore {
    pool: Pool<Sqlite>,
}

fn to_i64(value: u64) -> Result<i64, StoreError> {
    i64::try_from(value).map_err(|_| StoreError::Decode(format!("{value} exceeds i64 range")))
}

fn to_u64(value: i64, column: &str) -> Result<u64, StoreError> {
    u64::try_from(value)
        .map_err(|_| StoreError::Decode(format!("column '{column}' holds negative {value}")))
}

impl SqliteIndexStore {
    /// Opens (creating if missing) the database at `database_url` and applies the schema.
    ///
    /// In-memory URLs get a single pooled connection so every query sees the same
    /// database.
    ///
    /// # Errors
    /// Returns `StoreError::Database` if the connection or schema setup fails.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let in_memory = database_url.contains(":memory:") || database_url.contains("mode=memory");

        let mut options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        let pool = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(max_connections.max(1))
                .connect_with(options)
                .await?
        };

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Fresh private in-memory database.
    ///
    /// # Errors
    /// Returns `StoreError::Database` if the schema cannot be applied.
    pub async fn in_memory() -> Result<Self, StoreError> {
        Self::connect("sqlite::memory:", 1).await
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        for statement in schema::STATEMENTS {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        tracing::debug!(statements = schema::STATEMENTS.len(), "index schema ready");
        Ok(())
    }

    fn get_required<'r, T>(row: &'r SqliteRow, column: &str) -> Result<T, StoreError>
    where
        T: sqlx::Decode<'r, Sqlite> + sqlx::Type<Sqlite>,
    {
        row.try_get::<T, _>(column)
            .map_err(|e| StoreError::Decode(format!("column '{column}': {e}")))
    }

    fn get_u64(row: &SqliteRow, column: &str) -> Result<u64, StoreError> {
        to_u64(Self::get_required(row, column)?, column)
    }

    fn get_opt_u64(row: &SqliteRow, column: &str) -> Result<Option<u64>, StoreError> {
        Self::get_required::<Option<i64>>(row, column)?
            .map(|v| to_u64(v, column))
            .transpose()
    }

    fn row_to_utxo(row: &SqliteRow) -> Result<Utxo, StoreError> {
        Ok(Utxo {
            txid: Self::get_required(row, "txid")?,
            vout: Self::get_required(row, "vout")?,
            address: Self::get_required(row, "address")?,
            value_sats: Self::get_required(row, "value_sats")?,
            height: Self::get_u64(row, "height")?,
            block_hash: Self::get_required(row, "block_hash")?,
            spent: Self::get_required(row, "spent")?,
            spent_txid: Self::get_required(row, "spent_txid")?,
            spent_height: Self::get_opt_u64(row, "spent_height")?,
        })
    }

    fn row_to_block_ref(row: &SqliteRow) -> Result<BlockRef, StoreError> {
        Ok(BlockRef {
            height: Self::get_u64(row, "height")?,
            hash: Self::get_required(row, "hash")?,
            previous_hash: Self::get_required(row, "previous_hash")?,
            time: Self::get_required(row, "time")?,
        })
    }

    fn parse_classifier(row: &SqliteRow) -> Result<Classifier, StoreError> {
        let raw: String = Self::get_required(row, "classifier")?;
        Classifier::parse(&raw).ok_or_else(|| StoreError::Decode(format!("unknown classifier '{raw}'")))
    }

    fn row_to_reward(row: &SqliteRow) -> Result<StakingReward, StoreError> {
        Ok(StakingReward {
            identity_address: Self::get_required(row, "identity_address")?,
            height: Self::get_u64(row, "height")?,
            block_hash: Self::get_required(row, "block_hash")?,
            block_time: Self::get_required(row, "block_time")?,
            txid: Self::get_required(row, "txid")?,
            vout: Self::get_required(row, "vout")?,
            amount_sats: Self::get_required(row, "amount_sats")?,
            classifier: Self::parse_classifier(row)?,
        })
    }

    fn row_to_identity(row: &SqliteRow) -> Result<IdentityRecord, StoreError> {
        Ok(IdentityRecord {
            address: Self::get_required(row, "address")?,
            name: Self::get_required(row, "name")?,
            first_seen_height: Self::get_opt_u64(row, "first_seen_height")?,
            creation_height: Self::get_opt_u64(row, "creation_height")?,
            creation_txid: Self::get_required(row, "creation_txid")?,
        })
    }

    async fn apply_one(
        tx: &mut Transaction<'_, Sqlite>,
        effects: &BlockEffects,
        now: DateTime<Utc>,
    ) -> Result<ApplyOutcome, StoreError> {
        let block = &effects.block;
        let height = to_i64(block.height)?;
        let mut outcome = ApplyOutcome { blocks: 1, ..Default::default() };

        sqlx::query(
            r"
            INSERT INTO indexed_blocks (hash, height, previous_hash, time, applied_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (hash) DO NOTHING
            ",
        )
        .bind(&block.hash)
        .bind(height)
        .bind(&block.previous_hash)
        .bind(block.time)
        .bind(now)
        .execute(&mut **tx)
        .await?;

        for utxo in &effects.created {
            let inserted = sqlx::query(
                r"
                INSERT INTO utxos (txid, vout, address, value_sats, height, block_hash)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT (txid, vout) DO NOTHING
                ",
            )
            .bind(&utxo.txid)
            .bind(utxo.vout)
            .bind(&utxo.address)
            .bind(utxo.value_sats)
            .bind(to_i64(utxo.height)?)
            .bind(&utxo.block_hash)
            .execute(&mut **tx)
            .await?
            .rows_affected();
            outcome.utxos_inserted += inserted;

            if inserted > 0 {
                // A spend recorded before this output was indexed.
                outcome.spends_applied += sqlx::query(
                    r"
                    UPDATE utxos SET
                        spent = 1,
                        spent_txid = s.spending_txid,
                        spent_height = s.height,
                        spent_block_hash = s.block_hash
                    FROM spends AS s
                    WHERE utxos.txid = s.txid AND utxos.vout = s.vout
                      AND utxos.txid = ? AND utxos.vout = ? AND utxos.spent = 0
                    ",
                )
                .bind(&utxo.txid)
                .bind(utxo.vout)
                .execute(&mut **tx)
                .await?
                .rows_affected();

                sqlx::query("DELETE FROM spends WHERE txid = ? AND vout = ?")
                    .bind(&utxo.txid)
                    .bind(utxo.vout)
                    .execute(&mut **tx)
                    .await?;
            }
        }

        for spend in &effects.spends {
            let height = to_i64(spend.height)?;
            let applied = sqlx::query(
                r"
                UPDATE utxos
                SET spent = 1, spent_txid = ?, spent_height = ?, spent_block_hash = ?
                WHERE txid = ? AND vout = ? AND spent = 0
                ",
            )
            .bind(&spend.spending_txid)
            .bind(height)
            .bind(&spend.block_hash)
            .bind(&spend.txid)
            .bind(spend.vout)
            .execute(&mut **tx)
            .await?
            .rows_affected();
            outcome.spends_applied += applied;
            if applied > 0 {
                continue;
            }

            // Only outputs not indexed yet are held back for their creating block.
            sqlx::query(
                r"
                INSERT INTO spends (txid, vout, spending_txid, height, block_hash)
                SELECT ?, ?, ?, ?, ?
                WHERE NOT EXISTS (SELECT 1 FROM utxos WHERE txid = ? AND vout = ?)
                ON CONFLICT (txid, vout) DO NOTHING
                ",
            )
            .bind(&spend.txid)
            .bind(spend.vout)
            .bind(&spend.spending_txid)
            .bind(height)
            .bind(&spend.block_hash)
            .bind(&spend.txid)
            .bind(spend.vout)
            .execute(&mut **tx)
            .await?;
        }

        for reward in &effects.rewards {
            outcome.rewards_inserted += sqlx::query(
                r"
                INSERT INTO staking_rewards
                    (identity_address, height, block_hash, block_time, txid, vout, amount_sats, classifier)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT (identity_address, txid, vout) DO NOTHING
                ",
            )
            .bind(&reward.identity_address)
            .bind(to_i64(reward.height)?)
            .bind(&reward.block_hash)
            .bind(reward.block_time)
            .bind(&reward.txid)
            .bind(reward.vout)
            .bind(reward.amount_sats)
            .bind(reward.classifier.as_str())
            .execute(&mut **tx)
            .await?
            .rows_affected();
        }

        for sighting in &effects.identities {
            sqlx::query(
                r"
                INSERT INTO identities (address, name, first_seen_height, updated_at)
                VALUES (?, ?, ?, ?)
                ON CONFLICT (address) DO UPDATE SET
                    name = COALESCE(identities.name, excluded.name),
                    first_seen_height = MIN(
                        COALESCE(identities.first_seen_height, excluded.first_seen_height),
                        excluded.first_seen_height
                    ),
                    updated_at = excluded.updated_at
                ",
            )
            .bind(&sighting.address)
            .bind(&sighting.name)
            .bind(to_i64(sighting.height)?)
            .bind(now)
            .execute(&mut **tx)
            .await?;
        }

        Ok(outcome)
    }
}

#[async_trait]
impl IndexStore for SqliteIndexStore {
    async fn apply_blocks(
        &self,
        blocks: &[BlockEffects],
        checkpoint: Option<&CheckpointUpdate>,
    ) -> Result<ApplyOutcome, StoreError> {
        let now = Utc::now();
        let mut ordered: Vec<&BlockEffects> = blocks.iter().collect();
        ordered.sort_by_key(|effects| effects.block.height);

        let mut tx = self.pool.begin().await?;
        let mut outcome = ApplyOutcome::default();
        for effects in ordered {
            outcome += Self::apply_one(&mut tx, effects, now).await?;
        }

        if let Some(checkpoint) = checkpoint {
            sqlx::query(
                r"
                INSERT INTO scan_checkpoints (scanner_id, height, updated_at)
                VALUES (?, ?, ?)
                ON CONFLICT (scanner_id) DO UPDATE SET
                    height = MAX(scan_checkpoints.height, excluded.height),
                    updated_at = excluded.updated_at
                ",
            )
            .bind(&checkpoint.scanner_id)
            .bind(to_i64(checkpoint.height)?)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(outcome)
    }

    async fn revert_block(&self, hash: &str) -> Result<RevertOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;

        let rewards_removed = sqlx::query("DELETE FROM staking_rewards WHERE block_hash = ?")
            .bind(hash)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        let spends_reverted = sqlx::query(
            r"
            UPDATE utxos
            SET spent = 0, spent_txid = NULL, spent_height = NULL, spent_block_hash = NULL
            WHERE spent_block_hash = ?
            ",
        )
        .bind(hash)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        sqlx::query("DELETE FROM spends WHERE block_hash = ?")
            .bind(hash)
            .execute(&mut *tx)
            .await?;

        let utxos_removed = sqlx::query("DELETE FROM utxos WHERE block_hash = ?")
            .bind(hash)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        sqlx::query("DELETE FROM indexed_blocks WHERE hash = ?")
            .bind(hash)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(RevertOutcome { utxos_removed, spends_reverted, rewards_removed })
    }

    async fn checkpoint(&self, scanner_id: &str) -> Result<Option<ScanCheckpoint>, StoreError> {
        let row = sqlx::query(
            "SELECT scanner_id, height, updated_at FROM scan_checkpoints WHERE scanner_id = ?",
        )
        .bind(scanner_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(ScanCheckpoint {
                scanner_id: Self::get_required(&row, "scanner_id")?,
                height: Self::get_u64(&row, "height")?,
                updated_at: Self::get_required(&row, "updated_at")?,
            })
        })
        .transpose()
    }

    async fn rewind_checkpoints(&self, height: u64) -> Result<u64, StoreError> {
        let height = to_i64(height)?;
        Ok(sqlx::query("UPDATE scan_checkpoints SET height = ?, updated_at = ? WHERE height > ?")
            .bind(height)
            .bind(Utc::now())
            .bind(height)
            .execute(&self.pool)
            .await?
            .rows_affected())
    }

    async fn recent_blocks(&self, limit: u32) -> Result<Vec<BlockRef>, StoreError> {
        let rows = sqlx::query(
            r"
            SELECT hash, height, previous_hash, time FROM indexed_blocks
            ORDER BY height DESC, applied_at DESC
            LIMIT ?
            ",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_block_ref).collect()
    }

    async fn indexed_block_at(&self, height: u64) -> Result<Option<BlockRef>, StoreError> {
        let row = sqlx::query(
            r"
            SELECT hash, height, previous_hash, time FROM indexed_blocks
            WHERE height = ?
            ORDER BY applied_at DESC
            LIMIT 1
            ",
        )
        .bind(to_i64(height)?)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| Self::row_to_block_ref(&row)).transpose()
    }

    async fn utxo(&self, txid: &str, vout: u32) -> Result<Option<Utxo>, StoreError> {
        let row = sqlx::query("SELECT * FROM utxos WHERE txid = ? AND vout = ?")
            .bind(txid)
            .bind(vout)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| Self::row_to_utxo(&row)).transpose()
    }

    async fn utxos_for_address(
        &self,
        address: &str,
        include_spent: bool,
    ) -> Result<Vec<Utxo>, StoreError> {
        let rows = sqlx::query(
            r"
            SELECT * FROM utxos
            WHERE address = ? AND (? OR spent = 0)
            ORDER BY height, txid, vout
            ",
        )
        .bind(address)
        .bind(include_spent)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_utxo).collect()
    }

    async fn rewards_for_identity(&self, address: &str) -> Result<Vec<StakingReward>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM staking_rewards WHERE identity_address = ? ORDER BY height, txid, vout",
        )
        .bind(address)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_reward).collect()
    }

    async fn pos_entries(&self, from: u64, to: u64) -> Result<Vec<PosIndexEntry>, StoreError> {
        let rows = sqlx::query(
            r"
            SELECT height, hash, is_stake, classifier FROM pos_block_index
            WHERE height BETWEEN ? AND ?
            ORDER BY height
            ",
        )
        .bind(to_i64(from)?)
        .bind(to_i64(to)?)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(PosIndexEntry {
                    height: Self::get_u64(row, "height")?,
                    hash: Self::get_required(row, "hash")?,
                    is_stake: Self::get_required(row, "is_stake")?,
                    classifier: Self::parse_classifier(row)?,
                })
            })
            .collect()
    }

    async fn insert_pos_entries(&self, entries: &[PosIndexEntry]) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;
        for entry in entries {
            inserted += sqlx::query(
                r"
                INSERT INTO pos_block_index (height, hash, is_stake, classifier)
                VALUES (?, ?, ?, ?)
                ON CONFLICT (height) DO NOTHING
                ",
            )
            .bind(to_i64(entry.height)?)
            .bind(&entry.hash)
            .bind(entry.is_stake)
            .bind(entry.classifier.as_str())
            .execute(&mut *tx)
            .await?
            .rows_affected();
        }
        tx.commit().await?;
        Ok(inserted)
    }

    async fn invalidate_pos_from(&self, height: u64) -> Result<u64, StoreError> {
        Ok(sqlx::query("DELETE FROM pos_block_index WHERE height >= ?")
            .bind(to_i64(height)?)
            .execute(&self.pool)
            .await?
            .rows_affected())
    }

    async fn register_identity(&self, address: &str, name: Option<&str>) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO identities (address, name, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT (address) DO UPDATE SET name = COALESCE(identities.name, excluded.name)
            ",
        )
        .bind(address)
        .bind(name)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn identity(&self, address: &str) -> Result<Option<IdentityRecord>, StoreError> {
        let row = sqlx::query("SELECT * FROM identities WHERE address = ?")
            .bind(address)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| Self::row_to_identity(&row)).transpose()
    }

    async fn identities_missing_creation(
        &self,
        limit: u32,
    ) -> Result<Vec<IdentityRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM identities WHERE creation_height IS NULL ORDER BY address LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_identity).collect()
    }

    async fn set_identity_creation(
        &self,
        address: &str,
        height: u64,
        txid: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r"
            UPDATE identities SET creation_height = ?, creation_txid = ?, updated_at = ?
            WHERE address = ?
            ",
        )
        .bind(to_i64(height)?)
        .bind(txid)
        .bind(Utc::now())
        .bind(address)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
