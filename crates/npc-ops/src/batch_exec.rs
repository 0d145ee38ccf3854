//! Batch execution: turn one due spawn batch into provisioned NPCs,
//! accumulating partial failures instead of aborting.

use contracts::{BatchStatus, Coord, SpawnBatch, WorldConfig};
use npc_core::{KernelRng, OccupancyView, PlacementAlgorithm, PlacementBounds, PlacementPlanner};
use tracing::{info, warn};

use crate::saga::EntityCreationSaga;
use crate::store::{PendingStore, RegistryStore, StoreError, WorldStore};

/// How many due batches one invocation will pick up.
const DUE_BATCH_LIMIT: usize = 16;

/// Outcome of executing (or declining to execute) one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchExecutionReport {
    pub batch_id: i64,
    pub status: BatchStatus,
    pub requested: u32,
    pub spawned: u32,
    pub errors: Vec<String>,
}

/// Instant batches spread launch-day NPCs evenly across the map; later
/// tranches fill in wherever space remains.
fn algorithm_for(batch: &SpawnBatch) -> PlacementAlgorithm {
    match batch.kind {
        contracts::BatchKind::Instant => PlacementAlgorithm::QuadrantBalanced,
        contracts::BatchKind::Progressive => PlacementAlgorithm::RandomScatter,
    }
}

/// Occupancy snapshot spanning both stores. Query failures count as
/// occupied: a planner that cannot see a cell must not claim it.
struct StoreOccupancy<'a> {
    world: &'a WorldStore,
    registry: &'a RegistryStore,
    world_id: &'a str,
}

impl OccupancyView for StoreOccupancy<'_> {
    fn settlement_at(&self, cell: Coord) -> bool {
        self.world
            .settlement_at(self.world_id, cell)
            .unwrap_or_else(|err| {
                warn!(error = %err, "settlement occupancy query failed");
                true
            })
    }

    fn spawn_at(&self, cell: Coord) -> bool {
        self.registry
            .spawn_at(self.world_id, cell)
            .unwrap_or_else(|err| {
                warn!(error = %err, "spawn occupancy query failed");
                true
            })
    }

    fn spawn_within(&self, cell: Coord, spacing: u32) -> bool {
        self.registry
            .spawn_within(self.world_id, cell, spacing)
            .unwrap_or_else(|err| {
                warn!(error = %err, "spawn spacing query failed");
                true
            })
    }
}

#[derive(Debug, Clone, Default)]
pub struct BatchScheduler;

impl BatchScheduler {
    /// Execute one named batch, or every due pending batch. Paused and
    /// already-finished batches are left untouched.
    pub fn execute(
        world: &mut WorldStore,
        registry: &mut RegistryStore,
        pending: &PendingStore,
        batch_id: Option<i64>,
        rng: &mut KernelRng,
        now: u64,
    ) -> Result<Vec<BatchExecutionReport>, StoreError> {
        let batches = match batch_id {
            Some(id) => {
                let batch = registry
                    .batch(id)?
                    .ok_or_else(|| StoreError::Missing(format!("spawn_batches.{id}")))?;
                vec![batch]
            }
            None => registry.due_batches(now, DUE_BATCH_LIMIT)?,
        };

        let mut reports = Vec::with_capacity(batches.len());
        for batch in batches {
            // Pause is cooperative: it gates the next start, never an
            // in-flight batch.
            if batch.status != BatchStatus::Pending {
                reports.push(BatchExecutionReport {
                    batch_id: batch.id,
                    status: batch.status,
                    requested: batch.requested,
                    spawned: batch.spawned,
                    errors: vec![format!("batch not pending ({})", batch.status.as_str())],
                });
                continue;
            }
            reports.push(Self::execute_one(world, registry, pending, &batch, rng, now)?);
        }
        Ok(reports)
    }

    fn execute_one(
        world: &mut WorldStore,
        registry: &mut RegistryStore,
        pending: &PendingStore,
        batch: &SpawnBatch,
        rng: &mut KernelRng,
        now: u64,
    ) -> Result<BatchExecutionReport, StoreError> {
        let Some(world_config) = registry.world_config(&batch.world_id)? else {
            // Without world settings the scheduler itself cannot proceed;
            // this is the one batch-level hard failure.
            let error = format!("no settings found for world '{}'", batch.world_id);
            registry.finish_batch(batch.id, BatchStatus::Failed, 0, &[error.clone()], now)?;
            return Ok(BatchExecutionReport {
                batch_id: batch.id,
                status: BatchStatus::Failed,
                requested: batch.requested,
                spawned: 0,
                errors: vec![error],
            });
        };

        registry.set_batch_status(batch.id, BatchStatus::InProgress, now)?;

        let placements = Self::plan_placements(world, registry, batch, &world_config, rng);
        let mut errors = Vec::new();
        if placements.len() < batch.requested as usize {
            errors.push(format!(
                "placement shortfall: planned {} of {}",
                placements.len(),
                batch.requested
            ));
        }

        let mut spawned = 0u32;
        for (cell, npc_config) in placements.iter().zip(batch.entity_configs.iter()) {
            match EntityCreationSaga::create(
                world,
                registry,
                pending,
                &world_config,
                npc_config,
                *cell,
                now,
            ) {
                Ok(_) => spawned += 1,
                Err(err) => {
                    // One entity's failure never aborts its siblings.
                    errors.push(format!("spawn at {cell} failed: {err}"));
                }
            }
        }

        registry.finish_batch(batch.id, BatchStatus::Completed, spawned, &errors, now)?;
        info!(
            batch_id = batch.id,
            requested = batch.requested,
            spawned,
            errors = errors.len(),
            "batch execution finished"
        );
        Ok(BatchExecutionReport {
            batch_id: batch.id,
            status: BatchStatus::Completed,
            requested: batch.requested,
            spawned,
            errors,
        })
    }

    fn plan_placements(
        world: &WorldStore,
        registry: &RegistryStore,
        batch: &SpawnBatch,
        world_config: &WorldConfig,
        rng: &mut KernelRng,
    ) -> Vec<Coord> {
        let view = StoreOccupancy {
            world,
            registry,
            world_id: &batch.world_id,
        };
        PlacementPlanner::plan(
            &view,
            batch.requested as usize,
            algorithm_for(batch),
            &PlacementBounds::from_world(world_config),
            world_config.min_spawn_spacing,
            rng,
        )
    }
}
