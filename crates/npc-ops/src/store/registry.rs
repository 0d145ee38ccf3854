//! Control-plane store: world settings, player identities, NPC
//! configuration, spawn presets/batches/records, feature flags, and the
//! append-only decision log.

use std::path::Path;

use contracts::{
    BatchKind, BatchStatus, Coord, DecisionLogEntry, FeatureAuditEntry, FeatureFlag, NpcConfig,
    PlayerIdentity, PlayerKind, PlayerSettings, SpawnBatch, SpawnPreset, SpawnRecord, WorldConfig,
};
use npc_core::PlannedBatch;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};

use super::{parse_column, StoreError};

#[derive(Debug)]
pub struct RegistryStore {
    conn: Connection,
}

impl RegistryStore {
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
            CREATE TABLE IF NOT EXISTS worlds (
                world_id TEXT PRIMARY KEY,
                config_json TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS players (
                id INTEGER PRIMARY KEY,
                world_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                active INTEGER NOT NULL,
                game_account_id INTEGER,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS npc_configs (
                player_id INTEGER PRIMARY KEY REFERENCES players(id),
                faction TEXT NOT NULL,
                difficulty TEXT NOT NULL,
                personality TEXT NOT NULL,
                decision_cadence_secs INTEGER NOT NULL,
                model_assist_ratio REAL NOT NULL,
                feature_overrides_json TEXT NOT NULL,
                last_decision_at INTEGER
            );

            CREATE TABLE IF NOT EXISTS player_settings (
                player_id INTEGER PRIMARY KEY REFERENCES players(id),
                disabled_features_json TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS spawn_presets (
                key TEXT PRIMARY KEY,
                preset_json TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS spawn_batches (
                id INTEGER PRIMARY KEY,
                world_id TEXT NOT NULL,
                preset_key TEXT NOT NULL,
                kind TEXT NOT NULL,
                scheduled_at INTEGER NOT NULL,
                status TEXT NOT NULL,
                requested INTEGER NOT NULL,
                spawned INTEGER NOT NULL,
                errors_json TEXT NOT NULL,
                entity_configs_json TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS spawn_records (
                id INTEGER PRIMARY KEY,
                world_id TEXT NOT NULL,
                player_id INTEGER NOT NULL REFERENCES players(id),
                x INTEGER NOT NULL,
                y INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS feature_flags (
                key TEXT PRIMARY KEY,
                enabled INTEGER NOT NULL,
                locked INTEGER NOT NULL,
                description TEXT,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS feature_audit (
                id INTEGER PRIMARY KEY,
                flag_key TEXT NOT NULL,
                enabled INTEGER NOT NULL,
                admin_id TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS decision_log (
                id INTEGER PRIMARY KEY,
                world_id TEXT NOT NULL,
                player_id INTEGER NOT NULL,
                category TEXT NOT NULL,
                action_json TEXT NOT NULL,
                outcome TEXT NOT NULL,
                latency_ms INTEGER NOT NULL,
                model_assisted INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_players_world_kind
                ON players(world_id, kind, active);
            CREATE INDEX IF NOT EXISTS idx_spawn_records_world_cell
                ON spawn_records(world_id, x, y);
            CREATE INDEX IF NOT EXISTS idx_spawn_batches_due
                ON spawn_batches(status, scheduled_at);
            CREATE INDEX IF NOT EXISTS idx_decision_log_player
                ON decision_log(player_id, created_at);
            ",
        )?;
        Ok(())
    }

    pub fn transaction(&mut self) -> Result<Transaction<'_>, StoreError> {
        Ok(self.conn.transaction()?)
    }

    // --- Worlds ---

    pub fn create_world(&self, config: &WorldConfig, now: u64) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO worlds (world_id, config_json, created_at) VALUES (?1, ?2, ?3)",
            params![
                config.world_id,
                serde_json::to_string(config)?,
                now as i64
            ],
        )?;
        Ok(())
    }

    pub fn world_config(&self, world_id: &str) -> Result<Option<WorldConfig>, StoreError> {
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT config_json FROM worlds WHERE world_id = ?1",
                params![world_id],
                |row| row.get(0),
            )
            .optional()?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    // --- Players and NPC configuration ---

    pub fn player(&self, player_id: i64) -> Result<Option<PlayerIdentity>, StoreError> {
        self.conn
            .query_row(
                "SELECT id, world_id, kind, active, game_account_id, created_at
                 FROM players WHERE id = ?1",
                params![player_id],
                player_from_row,
            )
            .optional()?
            .transpose()
    }

    pub fn npc_config(&self, player_id: i64) -> Result<Option<NpcConfig>, StoreError> {
        self.conn
            .query_row(
                "SELECT faction, difficulty, personality, decision_cadence_secs,
                        model_assist_ratio, feature_overrides_json
                 FROM npc_configs WHERE player_id = ?1",
                params![player_id],
                npc_config_from_row,
            )
            .optional()?
            .transpose()
    }

    pub fn player_settings(&self, player_id: i64) -> Result<Option<PlayerSettings>, StoreError> {
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT disabled_features_json FROM player_settings WHERE player_id = ?1",
                params![player_id],
                |row| row.get(0),
            )
            .optional()?;
        match raw {
            Some(json) => Ok(Some(PlayerSettings {
                player_id,
                disabled_features: serde_json::from_str(&json)?,
            })),
            None => Ok(None),
        }
    }

    pub fn upsert_player_settings(&self, settings: &PlayerSettings) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO player_settings (player_id, disabled_features_json)
             VALUES (?1, ?2)
             ON CONFLICT(player_id) DO UPDATE SET disabled_features_json = excluded.disabled_features_json",
            params![
                settings.player_id,
                serde_json::to_string(&settings.disabled_features)?
            ],
        )?;
        Ok(())
    }

    /// Active NPCs whose decision cadence has elapsed, oldest-due first.
    pub fn npcs_due(
        &self,
        world_filter: Option<&str>,
        limit: usize,
        now: u64,
    ) -> Result<Vec<(PlayerIdentity, NpcConfig)>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT p.id, p.world_id, p.kind, p.active, p.game_account_id, p.created_at,
                    c.faction, c.difficulty, c.personality, c.decision_cadence_secs,
                    c.model_assist_ratio, c.feature_overrides_json
             FROM players p
             JOIN npc_configs c ON c.player_id = p.id
             WHERE p.kind = 'npc' AND p.active = 1
               AND (?1 IS NULL OR p.world_id = ?1)
               AND (c.last_decision_at IS NULL
                    OR c.last_decision_at + c.decision_cadence_secs <= ?2)
             ORDER BY COALESCE(c.last_decision_at, 0) ASC, p.id ASC
             LIMIT ?3",
        )?;
        let rows = stmt.query_map(params![world_filter, now as i64, limit as i64], |row| {
            Ok((player_from_row(row)?, npc_config_from_offset(row, 6)?))
        })?;
        let mut due = Vec::new();
        for row in rows {
            let (player, config) = row?;
            due.push((player?, config?));
        }
        Ok(due)
    }

    pub fn set_last_decision(&self, player_id: i64, now: u64) -> Result<(), StoreError> {
        self.conn.execute(
            "UPDATE npc_configs SET last_decision_at = ?2 WHERE player_id = ?1",
            params![player_id, now as i64],
        )?;
        Ok(())
    }

    // --- Spawn occupancy ---

    pub fn spawn_at(&self, world_id: &str, cell: Coord) -> Result<bool, StoreError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM spawn_records WHERE world_id = ?1 AND x = ?2 AND y = ?3",
            params![world_id, cell.x, cell.y],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn spawn_within(
        &self,
        world_id: &str,
        cell: Coord,
        spacing: u32,
    ) -> Result<bool, StoreError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM spawn_records
             WHERE world_id = ?1 AND MAX(ABS(x - ?2), ABS(y - ?3)) < ?4",
            params![world_id, cell.x, cell.y, spacing as i64],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn spawn_record(&self, id: i64) -> Result<Option<SpawnRecord>, StoreError> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, world_id, player_id, x, y, created_at
                 FROM spawn_records WHERE id = ?1",
                params![id],
                |row| {
                    Ok(SpawnRecord {
                        id: row.get(0)?,
                        world_id: row.get(1)?,
                        player_id: row.get(2)?,
                        location: Coord::new(row.get(3)?, row.get(4)?),
                        created_at: row.get::<_, i64>(5)? as u64,
                    })
                },
            )
            .optional()?)
    }

    // --- Presets ---

    pub fn upsert_preset(&self, preset: &SpawnPreset, now: u64) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO spawn_presets (key, preset_json, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET
                 preset_json = excluded.preset_json,
                 updated_at = excluded.updated_at",
            params![preset.key, serde_json::to_string(preset)?, now as i64],
        )?;
        Ok(())
    }

    pub fn preset(&self, key: &str) -> Result<Option<SpawnPreset>, StoreError> {
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT preset_json FROM spawn_presets WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    // --- Batches ---

    pub fn insert_batch(
        &self,
        world_id: &str,
        preset_key: &str,
        batch: &PlannedBatch,
        now: u64,
    ) -> Result<i64, StoreError> {
        self.conn.execute(
            "INSERT INTO spawn_batches
                 (world_id, preset_key, kind, scheduled_at, status, requested, spawned,
                  errors_json, entity_configs_json, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 'pending', ?5, 0, '[]', ?6, ?7, ?7)",
            params![
                world_id,
                preset_key,
                batch.kind.as_str(),
                batch.scheduled_at as i64,
                batch.count,
                serde_json::to_string(&batch.entity_configs)?,
                now as i64
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn batch(&self, id: i64) -> Result<Option<SpawnBatch>, StoreError> {
        self.conn
            .query_row(
                "SELECT id, world_id, preset_key, kind, scheduled_at, status, requested,
                        spawned, errors_json, entity_configs_json
                 FROM spawn_batches WHERE id = ?1",
                params![id],
                batch_from_row,
            )
            .optional()?
            .transpose()
    }

    /// Batches due for execution: pending, scheduled at or before `now`.
    /// Paused batches are excluded here and re-checked before each start.
    pub fn due_batches(&self, now: u64, limit: usize) -> Result<Vec<SpawnBatch>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, world_id, preset_key, kind, scheduled_at, status, requested,
                    spawned, errors_json, entity_configs_json
             FROM spawn_batches
             WHERE status = 'pending' AND scheduled_at <= ?1
             ORDER BY scheduled_at ASC, id ASC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![now as i64, limit as i64], batch_from_row)?;
        let mut batches = Vec::new();
        for row in rows {
            batches.push(row??);
        }
        Ok(batches)
    }

    pub fn set_batch_status(
        &self,
        id: i64,
        status: BatchStatus,
        now: u64,
    ) -> Result<(), StoreError> {
        self.conn.execute(
            "UPDATE spawn_batches SET status = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, status.as_str(), now as i64],
        )?;
        Ok(())
    }

    pub fn finish_batch(
        &self,
        id: i64,
        status: BatchStatus,
        spawned: u32,
        errors: &[String],
        now: u64,
    ) -> Result<(), StoreError> {
        self.conn.execute(
            "UPDATE spawn_batches
             SET status = ?2, spawned = ?3, errors_json = ?4, updated_at = ?5
             WHERE id = ?1",
            params![
                id,
                status.as_str(),
                spawned,
                serde_json::to_string(errors)?,
                now as i64
            ],
        )?;
        Ok(())
    }

    // --- Feature flags ---

    pub fn flag(&self, key: &str) -> Result<Option<FeatureFlag>, StoreError> {
        Ok(self
            .conn
            .query_row(
                "SELECT key, enabled, locked, description FROM feature_flags WHERE key = ?1",
                params![key],
                |row| {
                    Ok(FeatureFlag {
                        key: row.get(0)?,
                        enabled: row.get::<_, i64>(1)? != 0,
                        locked: row.get::<_, i64>(2)? != 0,
                        description: row.get(3)?,
                    })
                },
            )
            .optional()?)
    }

    pub fn upsert_flag(&self, flag: &FeatureFlag, now: u64) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO feature_flags (key, enabled, locked, description, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(key) DO UPDATE SET
                 enabled = excluded.enabled,
                 locked = excluded.locked,
                 description = excluded.description,
                 updated_at = excluded.updated_at",
            params![
                flag.key,
                flag.enabled as i64,
                flag.locked as i64,
                flag.description,
                now as i64
            ],
        )?;
        Ok(())
    }

    pub fn set_flag_enabled(&self, key: &str, enabled: bool, now: u64) -> Result<(), StoreError> {
        self.conn.execute(
            "UPDATE feature_flags SET enabled = ?2, updated_at = ?3 WHERE key = ?1",
            params![key, enabled as i64, now as i64],
        )?;
        Ok(())
    }

    pub fn append_flag_audit(&self, entry: &FeatureAuditEntry) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO feature_audit (flag_key, enabled, admin_id, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                entry.flag_key,
                entry.enabled as i64,
                entry.admin_id,
                entry.created_at as i64
            ],
        )?;
        Ok(())
    }

    pub fn flag_audit_count(&self, key: &str) -> Result<i64, StoreError> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM feature_audit WHERE flag_key = ?1",
            params![key],
            |row| row.get(0),
        )?)
    }

    // --- Decision log ---

    pub fn append_decision(&self, entry: &DecisionLogEntry) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO decision_log
                 (world_id, player_id, category, action_json, outcome, latency_ms,
                  model_assisted, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                entry.world_id,
                entry.player_id,
                entry.category.as_str(),
                serde_json::to_string(&entry.action)?,
                entry.outcome.as_str(),
                entry.latency_ms as i64,
                entry.model_assisted as i64,
                entry.created_at as i64
            ],
        )?;
        Ok(())
    }

    pub fn decision_count(&self, player_id: i64) -> Result<i64, StoreError> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM decision_log WHERE player_id = ?1",
            params![player_id],
            |row| row.get(0),
        )?)
    }
}

// ---------------------------------------------------------------------------
// In-transaction creation helpers
// ---------------------------------------------------------------------------

pub fn create_player(
    tx: &Transaction<'_>,
    world_id: &str,
    kind: PlayerKind,
    now: u64,
) -> Result<i64, StoreError> {
    tx.execute(
        "INSERT INTO players (world_id, kind, active, game_account_id, created_at)
         VALUES (?1, ?2, 1, NULL, ?3)",
        params![world_id, kind.as_str(), now as i64],
    )?;
    Ok(tx.last_insert_rowid())
}

pub fn create_npc_config(
    tx: &Transaction<'_>,
    player_id: i64,
    config: &NpcConfig,
) -> Result<(), StoreError> {
    tx.execute(
        "INSERT INTO npc_configs
             (player_id, faction, difficulty, personality, decision_cadence_secs,
              model_assist_ratio, feature_overrides_json, last_decision_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL)",
        params![
            player_id,
            config.faction.as_str(),
            config.difficulty.as_str(),
            config.personality.as_str(),
            config.decision_cadence_secs,
            config.model_assist_ratio,
            serde_json::to_string(&config.feature_overrides)?
        ],
    )?;
    Ok(())
}

/// Write the game-world join key. This is deliberately the last identity
/// field written inside the registry transaction.
pub fn link_game_account(
    tx: &Transaction<'_>,
    player_id: i64,
    game_account_id: i64,
) -> Result<(), StoreError> {
    tx.execute(
        "UPDATE players SET game_account_id = ?2 WHERE id = ?1",
        params![player_id, game_account_id],
    )?;
    Ok(())
}

pub fn create_spawn_record(
    tx: &Transaction<'_>,
    world_id: &str,
    player_id: i64,
    cell: Coord,
    now: u64,
) -> Result<i64, StoreError> {
    tx.execute(
        "INSERT INTO spawn_records (world_id, player_id, x, y, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![world_id, player_id, cell.x, cell.y, now as i64],
    )?;
    Ok(tx.last_insert_rowid())
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn player_from_row(row: &Row<'_>) -> rusqlite::Result<Result<PlayerIdentity, StoreError>> {
    let id: i64 = row.get(0)?;
    let world_id: String = row.get(1)?;
    let kind_raw: String = row.get(2)?;
    let active: i64 = row.get(3)?;
    let game_account_id: Option<i64> = row.get(4)?;
    let created_at: i64 = row.get(5)?;
    Ok(
        parse_column(&kind_raw, PlayerKind::parse, "players.kind").map(|kind| PlayerIdentity {
            id,
            world_id,
            kind,
            active: active != 0,
            game_account_id,
            created_at: created_at as u64,
        }),
    )
}

fn npc_config_from_row(row: &Row<'_>) -> rusqlite::Result<Result<NpcConfig, StoreError>> {
    npc_config_from_offset(row, 0)
}

fn npc_config_from_offset(
    row: &Row<'_>,
    offset: usize,
) -> rusqlite::Result<Result<NpcConfig, StoreError>> {
    let faction_raw: String = row.get(offset)?;
    let difficulty_raw: String = row.get(offset + 1)?;
    let personality_raw: String = row.get(offset + 2)?;
    let cadence: i64 = row.get(offset + 3)?;
    let ratio: f64 = row.get(offset + 4)?;
    let overrides_raw: String = row.get(offset + 5)?;

    Ok((|| {
        Ok(NpcConfig {
            faction: parse_column(&faction_raw, contracts::Faction::parse, "npc_configs.faction")?,
            difficulty: parse_column(
                &difficulty_raw,
                contracts::DifficultyTier::parse,
                "npc_configs.difficulty",
            )?,
            personality: parse_column(
                &personality_raw,
                contracts::PersonalityArchetype::parse,
                "npc_configs.personality",
            )?,
            decision_cadence_secs: cadence as u32,
            model_assist_ratio: ratio,
            feature_overrides: serde_json::from_str(&overrides_raw)?,
        })
    })())
}

fn batch_from_row(row: &Row<'_>) -> rusqlite::Result<Result<SpawnBatch, StoreError>> {
    let kind_raw: String = row.get(3)?;
    let status_raw: String = row.get(5)?;
    let errors_raw: String = row.get(8)?;
    let configs_raw: String = row.get(9)?;
    let id: i64 = row.get(0)?;
    let world_id: String = row.get(1)?;
    let preset_key: String = row.get(2)?;
    let scheduled_at: i64 = row.get(4)?;
    let requested: i64 = row.get(6)?;
    let spawned: i64 = row.get(7)?;

    Ok((|| {
        Ok(SpawnBatch {
            id,
            world_id,
            preset_key,
            kind: parse_column(&kind_raw, BatchKind::parse, "spawn_batches.kind")?,
            scheduled_at: scheduled_at as u64,
            status: parse_column(&status_raw, BatchStatus::parse, "spawn_batches.status")?,
            requested: requested as u32,
            spawned: spawned as u32,
            errors: serde_json::from_str(&errors_raw)?,
            entity_configs: serde_json::from_str(&configs_raw)?,
        })
    })())
}
