//! Game-world store: accounts, settlements, resource fields, and unit
//! counts. This subsystem creates starting state here and reads coarse
//! occupancy and entity-state queries; game rules mutate these rows from
//! the excluded CRUD layer.

use std::path::Path;

use contracts::{Coord, DifficultyTier, EntityState, Faction};
use rusqlite::{params, Connection, OptionalExtension, Transaction};

use super::StoreError;

/// Chebyshev range around the capital scanned for hostile settlements.
const THREAT_SCAN_RANGE: i64 = 10;

/// Starting stock per resource kind for a speed-1 world, before the
/// difficulty multiplier.
const BASE_STARTING_STOCK: i64 = 750;

/// The four resource field kinds and how many fields a fresh settlement
/// gets of each.
const STARTING_FIELDS: [(&str, u32); 4] = [("wood", 4), ("clay", 4), ("iron", 4), ("crop", 6)];

/// Starting-holdings multiplier per difficulty tier; harder NPCs start
/// with a deeper stockpile.
pub fn starting_stock_multiplier(tier: DifficultyTier) -> f64 {
    match tier {
        DifficultyTier::Easy => 1.0,
        DifficultyTier::Medium => 1.5,
        DifficultyTier::Hard => 2.0,
        DifficultyTier::Expert => 3.0,
    }
}

#[derive(Debug)]
pub struct WorldStore {
    conn: Connection,
}

impl WorldStore {
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
        self.conn.pragma_update(None, "foreign_keys", "ON")?;
        self.conn.pragma_update(None, "busy_timeout", 5_000)?;
        Ok(())
    }

    fn migrate(&mut self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS accounts (
                id INTEGER PRIMARY KEY,
                world_id TEXT NOT NULL,
                username TEXT NOT NULL,
                faction TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                UNIQUE (world_id, username)
            );

            CREATE TABLE IF NOT EXISTS settlements (
                id INTEGER PRIMARY KEY,
                world_id TEXT NOT NULL,
                account_id INTEGER NOT NULL REFERENCES accounts(id),
                name TEXT NOT NULL,
                x INTEGER NOT NULL,
                y INTEGER NOT NULL,
                is_capital INTEGER NOT NULL,
                wood INTEGER NOT NULL,
                clay INTEGER NOT NULL,
                iron INTEGER NOT NULL,
                crop INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                UNIQUE (world_id, x, y)
            );

            CREATE TABLE IF NOT EXISTS resource_fields (
                id INTEGER PRIMARY KEY,
                settlement_id INTEGER NOT NULL REFERENCES settlements(id),
                kind TEXT NOT NULL,
                level INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS units (
                id INTEGER PRIMARY KEY,
                settlement_id INTEGER NOT NULL REFERENCES settlements(id),
                kind TEXT NOT NULL,
                count INTEGER NOT NULL,
                idle INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_settlements_world_cell
                ON settlements(world_id, x, y);
            CREATE INDEX IF NOT EXISTS idx_settlements_account
                ON settlements(account_id);
            CREATE INDEX IF NOT EXISTS idx_resource_fields_settlement
                ON resource_fields(settlement_id);
            ",
        )?;
        Ok(())
    }

    pub fn transaction(&mut self) -> Result<Transaction<'_>, StoreError> {
        Ok(self.conn.transaction()?)
    }

    // --- Occupancy queries ---

    pub fn settlement_at(&self, world_id: &str, cell: Coord) -> Result<bool, StoreError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM settlements WHERE world_id = ?1 AND x = ?2 AND y = ?3",
            params![world_id, cell.x, cell.y],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn account_exists(&self, account_id: i64) -> Result<bool, StoreError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM accounts WHERE id = ?1",
            params![account_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    // --- Entity state ---

    /// Coarse decision-cycle inputs for one account: settlement count,
    /// aggregate stocks, idle troops, and hostile settlements within
    /// scouting range of the capital.
    pub fn entity_state(&self, world_id: &str, account_id: i64) -> Result<EntityState, StoreError> {
        let (settlement_count, total_resources): (i64, i64) = self.conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(wood + clay + iron + crop), 0)
             FROM settlements WHERE account_id = ?1",
            params![account_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        let idle_troops: i64 = self.conn.query_row(
            "SELECT COALESCE(SUM(u.idle), 0)
             FROM units u
             JOIN settlements s ON s.id = u.settlement_id
             WHERE s.account_id = ?1",
            params![account_id],
            |row| row.get(0),
        )?;

        let capital: Option<(i64, i64)> = self
            .conn
            .query_row(
                "SELECT x, y FROM settlements
                 WHERE account_id = ?1 AND is_capital = 1
                 LIMIT 1",
                params![account_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let threat_count: i64 = match capital {
            Some((cx, cy)) => self.conn.query_row(
                "SELECT COUNT(*) FROM settlements
                 WHERE world_id = ?1 AND account_id != ?2
                   AND MAX(ABS(x - ?3), ABS(y - ?4)) <= ?5",
                params![world_id, account_id, cx, cy, THREAT_SCAN_RANGE],
                |row| row.get(0),
            )?,
            None => 0,
        };

        Ok(EntityState {
            settlement_count: settlement_count as u32,
            total_resources,
            idle_troops,
            threat_count: threat_count as u32,
        })
    }

    // --- Recovery ---

    /// Delete every row created for an account, freeing its claimed cells.
    /// Used only by the recovery sweep; returns the number of rows removed.
    pub fn delete_account_cascade(&mut self, account_id: i64) -> Result<u32, StoreError> {
        let tx = self.conn.transaction()?;
        let mut removed = 0usize;
        removed += tx.execute(
            "DELETE FROM resource_fields WHERE settlement_id IN
                 (SELECT id FROM settlements WHERE account_id = ?1)",
            params![account_id],
        )?;
        removed += tx.execute(
            "DELETE FROM units WHERE settlement_id IN
                 (SELECT id FROM settlements WHERE account_id = ?1)",
            params![account_id],
        )?;
        removed += tx.execute(
            "DELETE FROM settlements WHERE account_id = ?1",
            params![account_id],
        )?;
        removed += tx.execute("DELETE FROM accounts WHERE id = ?1", params![account_id])?;
        tx.commit()?;
        Ok(removed as u32)
    }

    // --- Test/inspection helpers ---

    pub fn count_rows(&self, table: &str) -> Result<i64, StoreError> {
        // Closed set of table names; never built from caller input.
        debug_assert!(matches!(
            table,
            "accounts" | "settlements" | "resource_fields" | "units"
        ));
        let sql = format!("SELECT COUNT(*) FROM {table}");
        Ok(self.conn.query_row(&sql, [], |row| row.get(0))?)
    }
}

// ---------------------------------------------------------------------------
// In-transaction creation helpers
// ---------------------------------------------------------------------------

/// Error surface of settlement creation inside a saga transaction.
#[derive(Debug)]
pub enum SettlementWriteError {
    /// The target cell was claimed between planning and write; the caller
    /// may retry with a fresh coordinate.
    LocationUnavailable(Coord),
    Store(StoreError),
}

impl std::fmt::Display for SettlementWriteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LocationUnavailable(cell) => write!(f, "cell {cell} is already claimed"),
            Self::Store(err) => write!(f, "settlement write failed: {err}"),
        }
    }
}

impl std::error::Error for SettlementWriteError {}

pub fn create_account(
    tx: &Transaction<'_>,
    world_id: &str,
    username: &str,
    faction: Faction,
    now: u64,
) -> Result<i64, StoreError> {
    tx.execute(
        "INSERT INTO accounts (world_id, username, faction, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![world_id, username, faction.as_str(), now as i64],
    )?;
    Ok(tx.last_insert_rowid())
}

/// Claim a cell for a new settlement. The UNIQUE(world_id, x, y) constraint
/// is the write-time arbiter for placement races: losing the race surfaces
/// as `LocationUnavailable`, not as a trusted planner snapshot.
pub fn create_settlement(
    tx: &Transaction<'_>,
    world_id: &str,
    account_id: i64,
    name: &str,
    cell: Coord,
    is_capital: bool,
    starting_stock: i64,
    now: u64,
) -> Result<i64, SettlementWriteError> {
    let result = tx.execute(
        "INSERT INTO settlements
             (world_id, account_id, name, x, y, is_capital, wood, clay, iron, crop, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7, ?7, ?7, ?8)",
        params![
            world_id,
            account_id,
            name,
            cell.x,
            cell.y,
            is_capital as i64,
            starting_stock,
            now as i64
        ],
    );
    match result {
        Ok(_) => Ok(tx.last_insert_rowid()),
        Err(rusqlite::Error::SqliteFailure(err, _))
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            Err(SettlementWriteError::LocationUnavailable(cell))
        }
        Err(err) => Err(SettlementWriteError::Store(err.into())),
    }
}

pub fn create_starting_fields(
    tx: &Transaction<'_>,
    settlement_id: i64,
) -> Result<(), StoreError> {
    for (kind, count) in STARTING_FIELDS {
        for _ in 0..count {
            tx.execute(
                "INSERT INTO resource_fields (settlement_id, kind, level) VALUES (?1, ?2, 0)",
                params![settlement_id, kind],
            )?;
        }
    }
    Ok(())
}

/// Starting stock per resource kind for a tier on a given world speed.
pub fn starting_stock(tier: DifficultyTier, speed: u32) -> i64 {
    (BASE_STARTING_STOCK as f64 * f64::from(speed.max(1)) * starting_stock_multiplier(tier)).round()
        as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded_store() -> WorldStore {
        WorldStore::open_in_memory().expect("open store")
    }

    fn create_entity(store: &mut WorldStore, username: &str, cell: Coord) -> (i64, i64) {
        let tx = store.transaction().expect("tx");
        let account_id = create_account(&tx, "w1", username, Faction::Valdren, 100).expect("account");
        let settlement_id = create_settlement(
            &tx,
            "w1",
            account_id,
            "village",
            cell,
            true,
            750,
            100,
        )
        .expect("settlement");
        create_starting_fields(&tx, settlement_id).expect("fields");
        tx.commit().expect("commit");
        (account_id, settlement_id)
    }

    #[test]
    fn duplicate_cell_write_loses_the_race() {
        let mut store = seeded_store();
        create_entity(&mut store, "npc_1", Coord::new(5, 5));

        let tx = store.transaction().expect("tx");
        let account_id = create_account(&tx, "w1", "npc_2", Faction::Korrim, 200).expect("account");
        let result = create_settlement(&tx, "w1", account_id, "village", Coord::new(5, 5), true, 750, 200);
        assert!(matches!(
            result,
            Err(SettlementWriteError::LocationUnavailable(_))
        ));
    }

    #[test]
    fn entity_state_aggregates_holdings() {
        let mut store = seeded_store();
        let (account_id, _) = create_entity(&mut store, "npc_1", Coord::new(5, 5));
        // A hostile neighbor two cells away.
        create_entity(&mut store, "npc_2", Coord::new(7, 7));

        let state = store.entity_state("w1", account_id).expect("state");
        assert_eq!(state.settlement_count, 1);
        assert_eq!(state.total_resources, 750 * 4);
        assert_eq!(state.idle_troops, 0);
        assert_eq!(state.threat_count, 1);
    }

    #[test]
    fn cascade_delete_frees_the_cell() {
        let mut store = seeded_store();
        let (account_id, _) = create_entity(&mut store, "npc_1", Coord::new(9, -3));
        assert!(store.settlement_at("w1", Coord::new(9, -3)).expect("query"));

        let removed = store.delete_account_cascade(account_id).expect("cascade");
        assert!(removed >= 2);
        assert!(!store.settlement_at("w1", Coord::new(9, -3)).expect("query"));
        assert_eq!(store.count_rows("resource_fields").expect("count"), 0);
    }

    #[test]
    fn starting_stock_scales_with_tier_and_speed() {
        assert_eq!(starting_stock(DifficultyTier::Easy, 1), 750);
        assert_eq!(starting_stock(DifficultyTier::Expert, 1), 2_250);
        assert_eq!(starting_stock(DifficultyTier::Medium, 2), 2_250);
    }
}
