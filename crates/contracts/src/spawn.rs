//! Spawn planning contract types: presets, batches, spawn records, and the
//! durable pending-creation audit trail used by the provisioning saga.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::npc::{DifficultyTier, Faction, NpcConfig, PersonalityArchetype};
use crate::Coord;

// ---------------------------------------------------------------------------
// Pending creation records
// ---------------------------------------------------------------------------

/// Monotonic saga status. At every observable status the record names
/// exactly which store(s) may hold orphaned rows:
///
/// - `Pending`            — nothing durable in either store yet.
/// - `WorldCommitting`    — world transaction may or may not have committed.
/// - `WorldCommitted`     — world rows exist; registry untouched.
/// - `RegistryCommitting` — registry transaction may or may not have committed.
/// - `RegistryCommitted`  — both halves exist.
/// - `Completed`          — terminal success.
/// - `Failed`             — terminal failure; recorded error text bounded.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PendingStatus {
    Pending,
    WorldCommitting,
    WorldCommitted,
    RegistryCommitting,
    RegistryCommitted,
    Completed,
    Failed,
}

impl PendingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PendingStatus::Pending => "pending",
            PendingStatus::WorldCommitting => "world_committing",
            PendingStatus::WorldCommitted => "world_committed",
            PendingStatus::RegistryCommitting => "registry_committing",
            PendingStatus::RegistryCommitted => "registry_committed",
            PendingStatus::Completed => "completed",
            PendingStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(PendingStatus::Pending),
            "world_committing" => Some(PendingStatus::WorldCommitting),
            "world_committed" => Some(PendingStatus::WorldCommitted),
            "registry_committing" => Some(PendingStatus::RegistryCommitting),
            "registry_committed" => Some(PendingStatus::RegistryCommitted),
            "completed" => Some(PendingStatus::Completed),
            "failed" => Some(PendingStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PendingStatus::Completed | PendingStatus::Failed)
    }

    /// True when a record stuck at this status means the game-world store
    /// may hold rows with no control-plane counterpart.
    pub fn world_rows_may_be_orphaned(&self) -> bool {
        matches!(
            self,
            PendingStatus::WorldCommitting
                | PendingStatus::WorldCommitted
                | PendingStatus::RegistryCommitting
        )
    }
}

/// Durable audit row written outside both business transactions. The single
/// source of truth for what the recovery sweep must repair after a crash.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PendingCreationRecord {
    pub id: i64,
    pub world_id: String,
    pub status: PendingStatus,
    pub world_account_id: Option<i64>,
    pub world_settlement_id: Option<i64>,
    pub registry_player_id: Option<i64>,
    pub error: Option<String>,
    pub created_at: u64,
    pub updated_at: u64,
    /// Set once the recovery sweep has repaired or finalized this record;
    /// resolved records are never swept again.
    pub resolved_at: Option<u64>,
}

// ---------------------------------------------------------------------------
// Presets
// ---------------------------------------------------------------------------

/// Timing split of a preset: `instant` NPCs spawn at plan time, each
/// progressive tranche spawns `count` NPCs `day_offset` days later.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SpawnTiming {
    pub instant: u32,
    /// day offset -> count, ordered by offset.
    #[serde(default)]
    pub progressive: BTreeMap<u32, u32>,
}

impl SpawnTiming {
    pub fn total(&self) -> u32 {
        self.instant + self.progressive.values().sum::<u32>()
    }
}

/// Percentage-weighted distributions over the per-NPC config axes. Weights
/// that sum below 100 leave the remainder to the axis default; sums above
/// 100 are rejected at validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SpawnDistributions {
    #[serde(default)]
    pub faction: BTreeMap<Faction, u32>,
    #[serde(default)]
    pub difficulty: BTreeMap<DifficultyTier, u32>,
    #[serde(default)]
    pub personality: BTreeMap<PersonalityArchetype, u32>,
}

/// A named, reusable declarative spawn template. Read-only input to the
/// batch planner.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpawnPreset {
    pub key: String,
    pub total_npcs: u32,
    pub timing: SpawnTiming,
    #[serde(default)]
    pub distributions: SpawnDistributions,
    /// Cadence and assist ratio applied to every NPC drawn from this preset.
    #[serde(default = "default_cadence_secs")]
    pub decision_cadence_secs: u32,
    #[serde(default = "default_assist_ratio")]
    pub model_assist_ratio: f64,
}

fn default_cadence_secs() -> u32 {
    3600
}

fn default_assist_ratio() -> f64 {
    0.05
}

#[derive(Debug, Clone, PartialEq)]
pub enum PresetError {
    /// Timing tranches must account for every NPC in the preset.
    TimingMismatch { total_npcs: u32, timing_total: u32 },
    /// A distribution axis summed above 100 percent.
    DistributionOverflow { axis: &'static str, sum: u32 },
    /// Assist ratio must lie in [0, 1].
    AssistRatioOutOfRange(f64),
}

impl fmt::Display for PresetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PresetError::TimingMismatch {
                total_npcs,
                timing_total,
            } => write!(
                f,
                "timing tranches sum to {timing_total} but total_npcs is {total_npcs}"
            ),
            PresetError::DistributionOverflow { axis, sum } => {
                write!(f, "{axis} distribution sums to {sum} (max 100)")
            }
            PresetError::AssistRatioOutOfRange(ratio) => {
                write!(f, "model_assist_ratio {ratio} outside [0, 1]")
            }
        }
    }
}

impl std::error::Error for PresetError {}

impl SpawnPreset {
    pub fn validate(&self) -> Result<(), PresetError> {
        let timing_total = self.timing.total();
        if timing_total != self.total_npcs {
            return Err(PresetError::TimingMismatch {
                total_npcs: self.total_npcs,
                timing_total,
            });
        }
        let axes: [(&'static str, u32); 3] = [
            ("faction", self.distributions.faction.values().sum()),
            ("difficulty", self.distributions.difficulty.values().sum()),
            ("personality", self.distributions.personality.values().sum()),
        ];
        for (axis, sum) in axes {
            if sum > 100 {
                return Err(PresetError::DistributionOverflow { axis, sum });
            }
        }
        if !(0.0..=1.0).contains(&self.model_assist_ratio) {
            return Err(PresetError::AssistRatioOutOfRange(self.model_assist_ratio));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Batches
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BatchKind {
    Instant,
    Progressive,
}

impl BatchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchKind::Instant => "instant",
            BatchKind::Progressive => "progressive",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "instant" => Some(BatchKind::Instant),
            "progressive" => Some(BatchKind::Progressive),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Paused,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Pending => "pending",
            BatchStatus::InProgress => "in_progress",
            BatchStatus::Completed => "completed",
            BatchStatus::Failed => "failed",
            BatchStatus::Paused => "paused",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(BatchStatus::Pending),
            "in_progress" => Some(BatchStatus::InProgress),
            "completed" => Some(BatchStatus::Completed),
            "failed" => Some(BatchStatus::Failed),
            "paused" => Some(BatchStatus::Paused),
            _ => None,
        }
    }
}

/// A planned or executing group of NPC creations. Counters distinguish what
/// was requested at planning time from what provisioning actually delivered.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpawnBatch {
    pub id: i64,
    pub world_id: String,
    pub preset_key: String,
    pub kind: BatchKind,
    /// Epoch seconds at which the batch becomes due.
    pub scheduled_at: u64,
    pub status: BatchStatus,
    pub requested: u32,
    pub spawned: u32,
    #[serde(default)]
    pub errors: Vec<String>,
    /// Concrete per-NPC configs drawn at planning time, one per requested NPC.
    pub entity_configs: Vec<NpcConfig>,
}

/// Control-plane record of a claimed spawn coordinate; input to collision
/// detection alongside game-world settlements.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SpawnRecord {
    pub id: i64,
    pub world_id: String,
    pub player_id: i64,
    pub location: Coord,
    pub created_at: u64,
}
