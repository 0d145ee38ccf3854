//! Decision engine: one gated, scored, optionally model-assisted decision
//! per due NPC, dispatched to the excluded execution layer and logged.
//!
//! The cycle per entity: evaluate state → choose source → select action →
//! apply personality → apply difficulty → dispatch → log outcome. Dispatch
//! and logging never propagate failures; a broken executor produces an
//! `error` outcome, a broken log write produces a warning.

use std::fmt;
use std::time::Instant;

use contracts::{
    Action, DecisionLogEntry, DecisionOutcome, DecisionSource, NpcConfig, PlayerIdentity,
    PlayerKind,
};
use npc_core::{apply_personality, rules, DifficultyScaler, KernelRng};
use tracing::{debug, warn};

use crate::advisor::ModelAssistedAdvisor;
use crate::gate::FeatureGate;
use crate::store::{RegistryStore, StoreError, WorldStore};

/// Gate keys consulted each cycle.
pub const FEATURE_NPC_AUTONOMY: &str = "npc_autonomy";
pub const FEATURE_NPC_MODEL_ASSIST: &str = "npc_model_assist";

// ---------------------------------------------------------------------------
// Action executor boundary
// ---------------------------------------------------------------------------

/// Failure inside the excluded execution layer. Swallowed into the decision
/// log, never propagated.
#[derive(Debug, Clone)]
pub struct ExecutionError {
    pub message: String,
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "action execution failed: {}", self.message)
    }
}

impl std::error::Error for ExecutionError {}

/// The excluded execution layer: maps a final action to concrete game
/// operations. The kernel only dispatches and records the outcome.
pub trait ActionExecutor {
    fn execute(&mut self, player: &PlayerIdentity, action: &Action) -> Result<(), ExecutionError>;
}

/// Default executor: acknowledges every action. Stands in for the game
/// layer in CLIs and tests.
#[derive(Debug, Clone, Default)]
pub struct NoopExecutor;

impl ActionExecutor for NoopExecutor {
    fn execute(&mut self, player: &PlayerIdentity, action: &Action) -> Result<(), ExecutionError> {
        debug!(
            player_id = player.id,
            action = action.kind.as_str(),
            "dispatched action"
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Decision engine
// ---------------------------------------------------------------------------

/// Tallies for one `run_cycle` invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub considered: u32,
    pub executed: u32,
    pub errored: u32,
    pub skipped: u32,
    pub model_assisted: u32,
}

#[derive(Debug)]
pub struct DecisionEngine {
    rng: KernelRng,
}

impl DecisionEngine {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: KernelRng::new(seed),
        }
    }

    /// Run one decision per due NPC, up to `limit`. Entities are processed
    /// sequentially; one entity's failure never aborts its siblings.
    #[allow(clippy::too_many_arguments)]
    pub fn run_cycle(
        &mut self,
        world: &WorldStore,
        registry: &RegistryStore,
        gate: &mut FeatureGate,
        advisor: &mut ModelAssistedAdvisor,
        executor: &mut dyn ActionExecutor,
        world_filter: Option<&str>,
        limit: usize,
        now: u64,
    ) -> Result<CycleReport, StoreError> {
        let mut report = CycleReport::default();
        for (player, config) in registry.npcs_due(world_filter, limit, now)? {
            report.considered += 1;
            self.run_one(
                world, registry, gate, advisor, executor, &player, &config, now, &mut report,
            )?;
        }
        Ok(report)
    }

    #[allow(clippy::too_many_arguments)]
    fn run_one(
        &mut self,
        world: &WorldStore,
        registry: &RegistryStore,
        gate: &mut FeatureGate,
        advisor: &mut ModelAssistedAdvisor,
        executor: &mut dyn ActionExecutor,
        player: &PlayerIdentity,
        config: &NpcConfig,
        now: u64,
        report: &mut CycleReport,
    ) -> Result<(), StoreError> {
        if !gate.is_enabled(registry, FEATURE_NPC_AUTONOMY, Some(player.id), PlayerKind::Npc)? {
            report.skipped += 1;
            return Ok(());
        }
        let Some(account_id) = player.game_account_id else {
            // Unlinked identity: provisioning never finished; leave it to
            // the recovery sweep.
            report.skipped += 1;
            return Ok(());
        };

        let started = Instant::now();
        let state = world.entity_state(&player.world_id, account_id)?;

        let fallback = rules::select_action(config.personality, &state, &mut self.rng);
        let assist_allowed = gate.is_enabled(
            registry,
            FEATURE_NPC_MODEL_ASSIST,
            Some(player.id),
            PlayerKind::Npc,
        )?;
        let mut action = if assist_allowed && self.rng.chance(config.model_assist_ratio) {
            advisor.advise(&state, config.personality, fallback)
        } else {
            fallback
        };

        apply_personality(&mut action, config.personality);
        DifficultyScaler::apply(&mut action, config.difficulty, &mut self.rng);

        let outcome = match executor.execute(player, &action) {
            Ok(()) => DecisionOutcome::Executed,
            Err(err) => {
                warn!(player_id = player.id, error = %err, "executor rejected action");
                DecisionOutcome::Error
            }
        };
        let latency_ms = started.elapsed().as_millis() as u64;

        let model_assisted = action.source == DecisionSource::Model;
        let entry = DecisionLogEntry {
            world_id: player.world_id.clone(),
            player_id: player.id,
            category: action.kind,
            action,
            outcome,
            latency_ms,
            model_assisted,
            created_at: now,
        };
        // The log is best-effort by contract: a failed append must not fail
        // the cycle.
        if let Err(err) = registry.append_decision(&entry) {
            warn!(player_id = player.id, error = %err, "decision log append failed");
        }
        registry.set_last_decision(player.id, now)?;

        match outcome {
            DecisionOutcome::Executed => report.executed += 1,
            DecisionOutcome::Error => report.errored += 1,
            DecisionOutcome::Skipped => report.skipped += 1,
        }
        if model_assisted {
            report.model_assisted += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::registry::{create_npc_config, create_player, link_game_account};
    use crate::store::world;
    use contracts::{ActionKind, Coord, Faction, FeatureFlag};

    struct RecordingExecutor {
        executed: Vec<(i64, ActionKind)>,
        fail: bool,
    }

    impl ActionExecutor for RecordingExecutor {
        fn execute(
            &mut self,
            player: &PlayerIdentity,
            action: &Action,
        ) -> Result<(), ExecutionError> {
            self.executed.push((player.id, action.kind));
            if self.fail {
                return Err(ExecutionError {
                    message: "scripted".to_string(),
                });
            }
            Ok(())
        }
    }

    fn fixture() -> (WorldStore, RegistryStore, i64) {
        let mut world_store = WorldStore::open_in_memory().expect("world");
        let mut registry = RegistryStore::open_in_memory().expect("registry");

        let wtx = world_store.transaction().expect("tx");
        let account_id =
            world::create_account(&wtx, "w1", "npc_1", Faction::Valdren, 100).expect("account");
        let settlement_id = world::create_settlement(
            &wtx,
            "w1",
            account_id,
            "capital",
            Coord::new(30, 30),
            true,
            5_000,
            100,
        )
        .expect("settlement");
        world::create_starting_fields(&wtx, settlement_id).expect("fields");
        wtx.commit().expect("commit");

        let rtx = registry.transaction().expect("tx");
        let player_id = create_player(&rtx, "w1", PlayerKind::Npc, 100).expect("player");
        create_npc_config(&rtx, player_id, &NpcConfig::default()).expect("config");
        link_game_account(&rtx, player_id, account_id).expect("link");
        rtx.commit().expect("commit");

        registry
            .upsert_flag(
                &FeatureFlag {
                    key: FEATURE_NPC_AUTONOMY.to_string(),
                    enabled: true,
                    locked: false,
                    description: None,
                },
                100,
            )
            .expect("flag");

        (world_store, registry, player_id)
    }

    #[test]
    fn cycle_decides_logs_and_reschedules() {
        let (world_store, registry, player_id) = fixture();
        let mut engine = DecisionEngine::new(7);
        let mut gate = FeatureGate::new();
        let mut advisor = ModelAssistedAdvisor::disabled();
        let mut executor = RecordingExecutor {
            executed: Vec::new(),
            fail: false,
        };

        let report = engine
            .run_cycle(
                &world_store,
                &registry,
                &mut gate,
                &mut advisor,
                &mut executor,
                Some("w1"),
                10,
                1_000,
            )
            .expect("cycle");
        assert_eq!(report.considered, 1);
        assert_eq!(report.executed, 1);
        assert_eq!(report.model_assisted, 0);
        assert_eq!(executor.executed.len(), 1);
        assert_eq!(registry.decision_count(player_id).expect("count"), 1);

        // Cadence not yet elapsed: nothing due.
        let report = engine
            .run_cycle(
                &world_store,
                &registry,
                &mut gate,
                &mut advisor,
                &mut executor,
                Some("w1"),
                10,
                1_500,
            )
            .expect("cycle");
        assert_eq!(report.considered, 0);
    }

    #[test]
    fn autonomy_gate_skips_without_logging() {
        let (world_store, registry, player_id) = fixture();
        registry
            .upsert_flag(
                &FeatureFlag {
                    key: FEATURE_NPC_AUTONOMY.to_string(),
                    enabled: false,
                    locked: false,
                    description: None,
                },
                200,
            )
            .expect("flag");

        let mut engine = DecisionEngine::new(7);
        let mut gate = FeatureGate::new();
        let mut advisor = ModelAssistedAdvisor::disabled();
        let mut executor = RecordingExecutor {
            executed: Vec::new(),
            fail: false,
        };
        let report = engine
            .run_cycle(
                &world_store,
                &registry,
                &mut gate,
                &mut advisor,
                &mut executor,
                None,
                10,
                1_000,
            )
            .expect("cycle");
        assert_eq!(report.skipped, 1);
        assert!(executor.executed.is_empty());
        assert_eq!(registry.decision_count(player_id).expect("count"), 0);
    }

    #[test]
    fn executor_failure_is_logged_as_error_outcome() {
        let (world_store, registry, player_id) = fixture();
        let mut engine = DecisionEngine::new(7);
        let mut gate = FeatureGate::new();
        let mut advisor = ModelAssistedAdvisor::disabled();
        let mut executor = RecordingExecutor {
            executed: Vec::new(),
            fail: true,
        };
        let report = engine
            .run_cycle(
                &world_store,
                &registry,
                &mut gate,
                &mut advisor,
                &mut executor,
                None,
                10,
                1_000,
            )
            .expect("cycle");
        assert_eq!(report.errored, 1);
        assert_eq!(report.executed, 0);
        // The error outcome still lands in the log.
        assert_eq!(registry.decision_count(player_id).expect("count"), 1);
    }
}
