//! Pending-creation side channel: an append/update-only audit table on a
//! dedicated autocommit connection in its own database file. Every write
//! here must be durable before the next saga step begins, so this
//! connection is never allowed inside a transaction.

use std::path::Path;

use contracts::{truncate_error_text, PendingCreationRecord, PendingStatus};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{parse_column, StoreError};

/// Bound on recorded error text.
const ERROR_TEXT_MAX_BYTES: usize = 500;

#[derive(Debug)]
pub struct PendingStore {
    conn: Connection,
}

impl PendingStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        let mut store = Self { conn };
        store.configure()?;
        store.migrate()?;
        Ok(store)
    }

    fn configure(&mut self) -> Result<(), StoreError> {
        self.conn.pragma_update(None, "journal_mode", "WAL")?;
        self.conn.pragma_update(None, "synchronous", "FULL")?;
        self.conn.pragma_update(None, "busy_timeout", 5_000)?;
        Ok(())
    }

    fn migrate(&mut self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS pending_creations (
                id INTEGER PRIMARY KEY,
                world_id TEXT NOT NULL,
                status TEXT NOT NULL,
                world_account_id INTEGER,
                world_settlement_id INTEGER,
                registry_player_id INTEGER,
                error TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                resolved_at INTEGER
            );

            CREATE INDEX IF NOT EXISTS idx_pending_status_updated
                ON pending_creations(status, updated_at);
            ",
        )?;
        Ok(())
    }

    /// The side-channel invariant: autocommit, always. Checked before every
    /// write so a refactor that accidentally wraps this connection in a
    /// transaction fails loudly instead of deferring checkpoint durability.
    fn assert_autocommit(&self) -> Result<(), StoreError> {
        if !self.conn.is_autocommit() {
            return Err(StoreError::SideChannelInTransaction);
        }
        Ok(())
    }

    pub fn create(&self, world_id: &str, now: u64) -> Result<i64, StoreError> {
        self.assert_autocommit()?;
        self.conn.execute(
            "INSERT INTO pending_creations (world_id, status, created_at, updated_at)
             VALUES (?1, 'pending', ?2, ?2)",
            params![world_id, now as i64],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn update_status(
        &self,
        id: i64,
        status: PendingStatus,
        now: u64,
    ) -> Result<(), StoreError> {
        self.assert_autocommit()?;
        self.conn.execute(
            "UPDATE pending_creations SET status = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, status.as_str(), now as i64],
        )?;
        Ok(())
    }

    /// Record the game-world identifiers alongside a status move. Ordered
    /// before the world commit so the identifiers survive a crash mid-commit.
    pub fn record_world_ids(
        &self,
        id: i64,
        account_id: i64,
        settlement_id: i64,
        now: u64,
    ) -> Result<(), StoreError> {
        self.assert_autocommit()?;
        self.conn.execute(
            "UPDATE pending_creations
             SET status = ?2, world_account_id = ?3, world_settlement_id = ?4, updated_at = ?5
             WHERE id = ?1",
            params![
                id,
                PendingStatus::WorldCommitting.as_str(),
                account_id,
                settlement_id,
                now as i64
            ],
        )?;
        Ok(())
    }

    /// Record the control-plane identifier alongside the registry-committing
    /// status move, before the registry commit.
    pub fn record_registry_id(&self, id: i64, player_id: i64, now: u64) -> Result<(), StoreError> {
        self.assert_autocommit()?;
        self.conn.execute(
            "UPDATE pending_creations
             SET status = ?2, registry_player_id = ?3, updated_at = ?4
             WHERE id = ?1",
            params![
                id,
                PendingStatus::RegistryCommitting.as_str(),
                player_id,
                now as i64
            ],
        )?;
        Ok(())
    }

    /// Terminal failure. Recorded world identifiers stay on the row: a
    /// failed record with world ids but no registry link is still a sweep
    /// candidate.
    pub fn mark_failed(&self, id: i64, error: &str, now: u64) -> Result<(), StoreError> {
        self.assert_autocommit()?;
        self.conn.execute(
            "UPDATE pending_creations SET status = 'failed', error = ?2, updated_at = ?3
             WHERE id = ?1",
            params![id, truncate_error_text(error, ERROR_TEXT_MAX_BYTES), now as i64],
        )?;
        Ok(())
    }

    pub fn mark_resolved(
        &self,
        id: i64,
        status: PendingStatus,
        now: u64,
    ) -> Result<(), StoreError> {
        self.assert_autocommit()?;
        self.conn.execute(
            "UPDATE pending_creations SET status = ?2, resolved_at = ?3, updated_at = ?3
             WHERE id = ?1",
            params![id, status.as_str(), now as i64],
        )?;
        Ok(())
    }

    pub fn record(&self, id: i64) -> Result<Option<PendingCreationRecord>, StoreError> {
        self.conn
            .query_row(
                "SELECT id, world_id, status, world_account_id, world_settlement_id,
                        registry_player_id, error, created_at, updated_at, resolved_at
                 FROM pending_creations WHERE id = ?1",
                params![id],
                record_from_row,
            )
            .optional()?
            .transpose()
    }

    /// Unresolved records stuck mid-saga at or before the cutoff: the
    /// recovery sweep's worklist.
    pub fn stale_unresolved(
        &self,
        cutoff: u64,
    ) -> Result<Vec<PendingCreationRecord>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, world_id, status, world_account_id, world_settlement_id,
                    registry_player_id, error, created_at, updated_at, resolved_at
             FROM pending_creations
             WHERE resolved_at IS NULL
               AND status IN ('world_committing', 'world_committed',
                              'registry_committing', 'registry_committed')
               AND updated_at <= ?1
             ORDER BY updated_at ASC, id ASC",
        )?;
        let rows = stmt.query_map(params![cutoff as i64], record_from_row)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row??);
        }
        Ok(records)
    }

    /// Failed records whose world identifiers were recorded but whose
    /// registry half never linked: their world rows may be orphans too.
    pub fn failed_with_world_ids(
        &self,
        cutoff: u64,
    ) -> Result<Vec<PendingCreationRecord>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, world_id, status, world_account_id, world_settlement_id,
                    registry_player_id, error, created_at, updated_at, resolved_at
             FROM pending_creations
             WHERE resolved_at IS NULL
               AND status = 'failed'
               AND world_account_id IS NOT NULL
               AND registry_player_id IS NULL
               AND updated_at <= ?1
             ORDER BY updated_at ASC, id ASC",
        )?;
        let rows = stmt.query_map(params![cutoff as i64], record_from_row)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row??);
        }
        Ok(records)
    }
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<Result<PendingCreationRecord, StoreError>> {
    let id: i64 = row.get(0)?;
    let world_id: String = row.get(1)?;
    let status_raw: String = row.get(2)?;
    let world_account_id: Option<i64> = row.get(3)?;
    let world_settlement_id: Option<i64> = row.get(4)?;
    let registry_player_id: Option<i64> = row.get(5)?;
    let error: Option<String> = row.get(6)?;
    let created_at: i64 = row.get(7)?;
    let updated_at: i64 = row.get(8)?;
    let resolved_at: Option<i64> = row.get(9)?;
    Ok(
        parse_column(&status_raw, PendingStatus::parse, "pending_creations.status").map(
            |status| PendingCreationRecord {
                id,
                world_id,
                status,
                world_account_id,
                world_settlement_id,
                registry_player_id,
                error,
                created_at: created_at as u64,
                updated_at: updated_at as u64,
                resolved_at: resolved_at.map(|v| v as u64),
            },
        ),
    )
}
