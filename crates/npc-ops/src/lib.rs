//! Operations layer for the NPC lifecycle kernel: the two SQLite-backed
//! stores, the entity-creation saga and its recovery sweep, the feature
//! gate, the model-assisted advisor, the decision engine, and the batch
//! scheduler, composed behind one facade for schedulers and CLIs.

pub mod advisor;
pub mod batch_exec;
pub mod engine;
pub mod gate;
pub mod recovery;
pub mod saga;
pub mod store;

use std::fmt;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use contracts::{
    ApiError, ErrorCode, FeatureFlag, PlayerKind, PresetError, SpawnTiming, WorldConfig,
};
use npc_core::{derive_seed, BatchPlanner, KernelRng, PlannedBatch};

use advisor::ModelAssistedAdvisor;
use batch_exec::{BatchExecutionReport, BatchScheduler};
use engine::{ActionExecutor, CycleReport, DecisionEngine, NoopExecutor};
use gate::{FeatureGate, GateError};
use recovery::{RecoverySweep, SweepReport};
use saga::SagaError;
use store::{PendingStore, RegistryStore, StoreError, WorldStore};

pub use advisor::{AdvisorConfig, CompletionClient, HttpCompletionClient};
pub use batch_exec::BatchExecutionReport as BatchReport;
pub use engine::{ExecutionError, NoopExecutor as DefaultExecutor};

/// Default grace before the recovery sweep touches a stuck record.
pub const RECOVERY_GRACE_SECS: u64 = 600;

pub fn epoch_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

// ---------------------------------------------------------------------------
// Error surface
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum OpsError {
    /// A named preset or world has no settings row.
    ConfigNotFound(String),
    Preset(PresetError),
    Store(StoreError),
    Gate(GateError),
    Saga(SagaError),
}

impl fmt::Display for OpsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigNotFound(what) => write!(f, "configuration not found: {what}"),
            Self::Preset(err) => write!(f, "invalid preset: {err}"),
            Self::Store(err) => write!(f, "store failure: {err}"),
            Self::Gate(err) => write!(f, "{err}"),
            Self::Saga(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for OpsError {}

impl From<StoreError> for OpsError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl From<GateError> for OpsError {
    fn from(value: GateError) -> Self {
        Self::Gate(value)
    }
}

impl From<PresetError> for OpsError {
    fn from(value: PresetError) -> Self {
        Self::Preset(value)
    }
}

impl From<SagaError> for OpsError {
    fn from(value: SagaError) -> Self {
        Self::Saga(value)
    }
}

impl OpsError {
    /// The structured envelope surfaced to operators; raw error text is
    /// truncated into `details`.
    pub fn api_error(&self) -> ApiError {
        let (code, message) = match self {
            Self::ConfigNotFound(_) => (ErrorCode::ConfigNotFound, "configuration not found"),
            Self::Preset(_) => (ErrorCode::InvalidRequest, "invalid spawn preset"),
            Self::Store(_) => (ErrorCode::StoreFailure, "store operation failed"),
            Self::Gate(err) => (err.code(), "feature flag operation rejected"),
            Self::Saga(err) => (err.code(), "entity creation failed"),
        };
        ApiError::new(code, message, Some(self.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Spawn plan preview
// ---------------------------------------------------------------------------

/// Optional adjustments applied to a preset before planning.
#[derive(Debug, Clone, Default)]
pub struct PlanOverrides {
    pub timing: Option<SpawnTiming>,
    pub decision_cadence_secs: Option<u32>,
    pub model_assist_ratio: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct SpawnPlanPreview {
    pub preset_key: String,
    pub total_npcs: u32,
    pub batches: Vec<PlannedBatch>,
}

// ---------------------------------------------------------------------------
// Facade
// ---------------------------------------------------------------------------

/// One long-lived instance per process. Owns both store connections, the
/// pending-record side channel, and every piece of process-local state
/// (flag cache, breaker, response cache).
pub struct NpcOps {
    world: WorldStore,
    registry: RegistryStore,
    pending: PendingStore,
    gate: FeatureGate,
    advisor: ModelAssistedAdvisor,
    engine: DecisionEngine,
    executor: Box<dyn ActionExecutor>,
    rng: KernelRng,
}

impl NpcOps {
    pub fn open(
        world_path: impl AsRef<Path>,
        registry_path: impl AsRef<Path>,
        pending_path: impl AsRef<Path>,
    ) -> Result<Self, OpsError> {
        Ok(Self::assemble(
            WorldStore::open(world_path)?,
            RegistryStore::open(registry_path)?,
            PendingStore::open(pending_path)?,
            ModelAssistedAdvisor::from_default_sources(),
            derive_seed(epoch_seconds(), "ops", 0),
        ))
    }

    pub fn open_in_memory() -> Result<Self, OpsError> {
        Ok(Self::assemble(
            WorldStore::open_in_memory()?,
            RegistryStore::open_in_memory()?,
            PendingStore::open_in_memory()?,
            ModelAssistedAdvisor::disabled(),
            derive_seed(42, "ops", 0),
        ))
    }

    fn assemble(
        world: WorldStore,
        registry: RegistryStore,
        pending: PendingStore,
        advisor: ModelAssistedAdvisor,
        seed: u64,
    ) -> Self {
        Self {
            world,
            registry,
            pending,
            gate: FeatureGate::new(),
            advisor,
            engine: DecisionEngine::new(derive_seed(seed, "engine", 0)),
            executor: Box::new(NoopExecutor),
            rng: KernelRng::new(derive_seed(seed, "planning", 0)),
        }
    }

    /// Replace the dispatch boundary; the game layer plugs in here.
    pub fn with_executor(mut self, executor: Box<dyn ActionExecutor>) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_advisor(mut self, advisor: ModelAssistedAdvisor) -> Self {
        self.advisor = advisor;
        self
    }

    /// Deterministic planning/decision randomness for tests.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.engine = DecisionEngine::new(derive_seed(seed, "engine", 0));
        self.rng = KernelRng::new(derive_seed(seed, "planning", 0));
        self
    }

    // --- Operations ---

    /// Register a world's settings and seed the decision-cycle flags it
    /// needs (unlocked, enabled) if they do not exist yet.
    pub fn create_world(&mut self, config: &WorldConfig, now: u64) -> Result<(), OpsError> {
        self.registry.create_world(config, now)?;
        for key in [engine::FEATURE_NPC_AUTONOMY, engine::FEATURE_NPC_MODEL_ASSIST] {
            if self.registry.flag(key)?.is_none() {
                self.registry.upsert_flag(
                    &FeatureFlag {
                        key: key.to_string(),
                        enabled: true,
                        locked: false,
                        description: None,
                    },
                    now,
                )?;
            }
        }
        Ok(())
    }

    /// Expand a preset into dated batches without persisting anything.
    pub fn preview_spawn_plan(
        &mut self,
        preset_key: &str,
        overrides: &PlanOverrides,
        now: u64,
    ) -> Result<SpawnPlanPreview, OpsError> {
        let preset = self.load_preset(preset_key, overrides)?;
        let mut rng = self.rng.fork("preview");
        let batches = BatchPlanner::plan(&preset, now, &mut rng)?;
        Ok(SpawnPlanPreview {
            preset_key: preset.key,
            total_npcs: preset.total_npcs,
            batches,
        })
    }

    /// Expand a preset and persist its batches for later execution.
    /// Returns the new batch ids.
    pub fn plan_spawn(
        &mut self,
        world_id: &str,
        preset_key: &str,
        overrides: &PlanOverrides,
        now: u64,
    ) -> Result<Vec<i64>, OpsError> {
        if self.registry.world_config(world_id)?.is_none() {
            return Err(OpsError::ConfigNotFound(format!("world '{world_id}'")));
        }
        let preset = self.load_preset(preset_key, overrides)?;
        let batches = BatchPlanner::plan(&preset, now, &mut self.rng)?;
        let mut ids = Vec::with_capacity(batches.len());
        for batch in &batches {
            ids.push(self.registry.insert_batch(world_id, &preset.key, batch, now)?);
        }
        Ok(ids)
    }

    /// Execute one batch by id, or every due batch.
    pub fn run_batch_execution(
        &mut self,
        batch_id: Option<i64>,
        now: u64,
    ) -> Result<Vec<BatchExecutionReport>, OpsError> {
        Ok(BatchScheduler::execute(
            &mut self.world,
            &mut self.registry,
            &self.pending,
            batch_id,
            &mut self.rng,
            now,
        )?)
    }

    /// One decision per due NPC, bounded by `limit`.
    pub fn run_decision_cycle(
        &mut self,
        world_filter: Option<&str>,
        limit: usize,
        now: u64,
    ) -> Result<CycleReport, OpsError> {
        Ok(self.engine.run_cycle(
            &self.world,
            &self.registry,
            &mut self.gate,
            &mut self.advisor,
            self.executor.as_mut(),
            world_filter,
            limit,
            now,
        )?)
    }

    pub fn toggle_feature(
        &mut self,
        key: &str,
        enabled: bool,
        admin_id: &str,
        now: u64,
    ) -> Result<FeatureFlag, OpsError> {
        Ok(self.gate.toggle(&self.registry, key, enabled, admin_id, now)?)
    }

    /// Per-request gating surface for the API layer.
    pub fn is_enabled(
        &mut self,
        key: &str,
        actor_id: Option<i64>,
        actor_kind: PlayerKind,
    ) -> Result<bool, OpsError> {
        Ok(self.gate.is_enabled(&self.registry, key, actor_id, actor_kind)?)
    }

    pub fn run_recovery_sweep(&mut self, grace_secs: u64, now: u64) -> Result<SweepReport, OpsError> {
        Ok(RecoverySweep::run(
            &mut self.world,
            &self.registry,
            &self.pending,
            grace_secs,
            now,
        )?)
    }

    fn load_preset(
        &self,
        preset_key: &str,
        overrides: &PlanOverrides,
    ) -> Result<contracts::SpawnPreset, OpsError> {
        let mut preset = self
            .registry
            .preset(preset_key)?
            .ok_or_else(|| OpsError::ConfigNotFound(format!("preset '{preset_key}'")))?;
        if let Some(timing) = &overrides.timing {
            preset.timing = timing.clone();
            preset.total_npcs = preset.timing.total();
        }
        if let Some(cadence) = overrides.decision_cadence_secs {
            preset.decision_cadence_secs = cadence;
        }
        if let Some(ratio) = overrides.model_assist_ratio {
            preset.model_assist_ratio = ratio;
        }
        Ok(preset)
    }

    // --- Store access for tooling and tests ---

    pub fn world_store(&self) -> &WorldStore {
        &self.world
    }

    pub fn world_store_mut(&mut self) -> &mut WorldStore {
        &mut self.world
    }

    pub fn registry_store(&self) -> &RegistryStore {
        &self.registry
    }

    pub fn registry_store_mut(&mut self) -> &mut RegistryStore {
        &mut self.registry
    }

    pub fn pending_store(&self) -> &PendingStore {
        &self.pending
    }
}
