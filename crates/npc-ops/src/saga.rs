//! Entity creation saga: provision one NPC across the game-world and
//! control-plane stores without a distributed transaction.
//!
//! Every step is made durable on the pending-record side channel before the
//! step it describes, so a crash at any point leaves a record that names
//! exactly which store may hold orphaned rows. The saga never compensates a
//! committed world transaction inline; that is the recovery sweep's job.

use std::fmt;

use contracts::{Coord, ErrorCode, NpcConfig, PendingStatus, PlayerKind, WorldConfig};
use tracing::warn;

use crate::store::world::SettlementWriteError;
use crate::store::{registry, world, PendingStore, RegistryStore, StoreError, WorldStore};

/// Identifiers produced by one successful provisioning run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SagaOutcome {
    pub pending_id: i64,
    pub player_id: i64,
    pub account_id: i64,
    pub settlement_id: i64,
    pub location: Coord,
}

#[derive(Debug)]
pub enum SagaError {
    /// The target cell was claimed by a concurrent creation; retryable with
    /// a fresh coordinate.
    LocationUnavailable(Coord),
    World(StoreError),
    Registry(StoreError),
    /// The side-channel checkpoint write itself failed.
    Checkpoint(StoreError),
}

impl fmt::Display for SagaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LocationUnavailable(cell) => write!(f, "location {cell} unavailable"),
            Self::World(err) => write!(f, "game-world store: {err}"),
            Self::Registry(err) => write!(f, "control-plane store: {err}"),
            Self::Checkpoint(err) => write!(f, "pending-record checkpoint: {err}"),
        }
    }
}

impl std::error::Error for SagaError {}

impl SagaError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::LocationUnavailable(_) => ErrorCode::LocationUnavailable,
            _ => ErrorCode::SagaFailed,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EntityCreationSaga;

impl EntityCreationSaga {
    /// Provision one NPC at `location`. On failure, open transactions are
    /// rolled back and the pending record is marked failed with bounded
    /// error text; committed world rows are left for the recovery sweep.
    pub fn create(
        world_store: &mut WorldStore,
        registry_store: &mut RegistryStore,
        pending: &PendingStore,
        world_config: &WorldConfig,
        npc: &NpcConfig,
        location: Coord,
        now: u64,
    ) -> Result<SagaOutcome, SagaError> {
        // Step 1: durable intent, autocommit, before anything else. There is
        // no compensating action for this write: dying before it returns
        // means nothing was attempted.
        let pending_id = pending
            .create(&world_config.world_id, now)
            .map_err(SagaError::Checkpoint)?;

        match Self::run(
            world_store,
            registry_store,
            pending,
            world_config,
            npc,
            location,
            pending_id,
            now,
        ) {
            Ok(outcome) => {
                if let Err(err) = pending.update_status(pending_id, PendingStatus::Completed, now)
                {
                    // Both stores committed; the sweep will finalize the
                    // record from its positional status.
                    warn!(pending_id, error = %err, "completed saga could not finalize its record");
                }
                Ok(outcome)
            }
            Err(err) => {
                if let Err(mark_err) = pending.mark_failed(pending_id, &err.to_string(), now) {
                    warn!(pending_id, error = %mark_err, "failed saga could not mark its record");
                }
                Err(err)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn run(
        world_store: &mut WorldStore,
        registry_store: &mut RegistryStore,
        pending: &PendingStore,
        world_config: &WorldConfig,
        npc: &NpcConfig,
        location: Coord,
        pending_id: i64,
        now: u64,
    ) -> Result<SagaOutcome, SagaError> {
        // Step 2: open both business transactions. They are independent;
        // there is no coordinator. Dropping either rolls it back.
        let world_tx = world_store.transaction().map_err(SagaError::World)?;
        let registry_tx = registry_store.transaction().map_err(SagaError::Registry)?;

        // Step 3: game-world half — account, settlement cell claim, starting
        // holdings scaled by difficulty tier and world speed.
        let username = format!("npc_{pending_id}");
        let account_id = world::create_account(
            &world_tx,
            &world_config.world_id,
            &username,
            npc.faction,
            now,
        )
        .map_err(SagaError::World)?;
        let stock = world::starting_stock(npc.difficulty, world_config.speed);
        let settlement_id = world::create_settlement(
            &world_tx,
            &world_config.world_id,
            account_id,
            &format!("{username}_capital"),
            location,
            true,
            stock,
            now,
        )
        .map_err(|err| match err {
            SettlementWriteError::LocationUnavailable(cell) => SagaError::LocationUnavailable(cell),
            SettlementWriteError::Store(err) => SagaError::World(err),
        })?;
        world::create_starting_fields(&world_tx, settlement_id).map_err(SagaError::World)?;

        // Step 4: checkpoint the world identifiers before the commit they
        // describe, so a crash mid-commit still leaves them recorded.
        pending
            .record_world_ids(pending_id, account_id, settlement_id, now)
            .map_err(SagaError::Checkpoint)?;

        // Step 5: commit the world half.
        world_tx
            .commit()
            .map_err(|err| SagaError::World(err.into()))?;
        pending
            .update_status(pending_id, PendingStatus::WorldCommitted, now)
            .map_err(SagaError::Checkpoint)?;

        // Step 6: control-plane half — identity, configuration, the join
        // key back to the world account (written last), spawn tracking.
        let player_id = registry::create_player(
            &registry_tx,
            &world_config.world_id,
            PlayerKind::Npc,
            now,
        )
        .map_err(SagaError::Registry)?;
        registry::create_npc_config(&registry_tx, player_id, npc).map_err(SagaError::Registry)?;
        registry::link_game_account(&registry_tx, player_id, account_id)
            .map_err(SagaError::Registry)?;
        registry::create_spawn_record(
            &registry_tx,
            &world_config.world_id,
            player_id,
            location,
            now,
        )
        .map_err(SagaError::Registry)?;

        // Step 7: checkpoint, commit, checkpoint.
        pending
            .record_registry_id(pending_id, player_id, now)
            .map_err(SagaError::Checkpoint)?;
        registry_tx
            .commit()
            .map_err(|err| SagaError::Registry(err.into()))?;

        let outcome = SagaOutcome {
            pending_id,
            player_id,
            account_id,
            settlement_id,
            location,
        };

        // Past this point both stores hold the entity; checkpoint failures
        // degrade to sweep-finalization instead of failing the saga.
        if let Err(err) = pending.update_status(pending_id, PendingStatus::RegistryCommitted, now)
        {
            warn!(pending_id, error = %err, "registry committed but checkpoint update failed");
        }
        Ok(outcome)
    }
}
