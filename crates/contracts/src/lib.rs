//! v1 cross-boundary contracts for the NPC lifecycle kernel, stores, and CLI.

use std::fmt;

use serde::{Deserialize, Serialize};

pub mod decision;
pub mod flags;
pub mod npc;
pub mod spawn;

pub use decision::{
    Action, ActionKind, ActionParams, DecisionLogEntry, DecisionOutcome, DecisionSource,
    EntityState, ResourceAllocation,
};
pub use flags::{FeatureAuditEntry, FeatureFlag};
pub use npc::{
    DifficultyTier, Faction, NpcConfig, PersonalityArchetype, PlayerIdentity, PlayerKind,
    PlayerSettings,
};
pub use spawn::{
    BatchKind, BatchStatus, PendingCreationRecord, PendingStatus, PresetError, SpawnBatch,
    SpawnPreset, SpawnRecord, SpawnTiming,
};

pub const SCHEMA_VERSION_V1: &str = "1.0";

/// Seconds in one game day; progressive spawn tranches are scheduled in
/// whole-day offsets from the planning instant.
pub const SECONDS_PER_DAY: u64 = 86_400;

// ---------------------------------------------------------------------------
// Coordinates
// ---------------------------------------------------------------------------

/// A map cell. The world map is a square grid centered on (0, 0).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Coord {
    pub x: i32,
    pub y: i32,
}

impl Coord {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Chebyshev (chessboard) distance: spawns closer than the world's
    /// minimum spacing under this metric are considered crowding.
    pub fn chebyshev_distance(&self, other: &Coord) -> u32 {
        let dx = (self.x - other.x).unsigned_abs();
        let dy = (self.y - other.y).unsigned_abs();
        dx.max(dy)
    }

    /// Euclidean distance from the map origin, used for radius bounds.
    pub fn radius(&self) -> f64 {
        f64::from(self.x).hypot(f64::from(self.y))
    }
}

impl fmt::Display for Coord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}|{})", self.x, self.y)
    }
}

// ---------------------------------------------------------------------------
// World configuration
// ---------------------------------------------------------------------------

/// Per-world settings read by placement, spawning, and decision cycles.
/// One row per world in the control-plane store, parsed once at load.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorldConfig {
    pub schema_version: String,
    pub world_id: String,
    pub name: String,
    /// Half-width of the square map; valid cells lie in [-map_radius, map_radius].
    pub map_radius: i32,
    /// No spawns inside this radius around the map center.
    pub center_exclusion_radius: i32,
    /// No spawns outside this radius.
    pub max_spawn_radius: i32,
    /// Minimum Chebyshev distance between two spawns.
    pub min_spawn_spacing: u32,
    /// Base seed for deterministic placement and config draws.
    pub seed: u64,
    /// Game speed multiplier; scales starting holdings.
    pub speed: u32,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            world_id: "world_local_001".to_string(),
            name: "Local World".to_string(),
            map_radius: 400,
            center_exclusion_radius: 20,
            max_spawn_radius: 150,
            min_spawn_spacing: 3,
            seed: 1337,
            speed: 1,
        }
    }
}

// ---------------------------------------------------------------------------
// Operator-visible error envelope
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    LocationUnavailable,
    SagaFailed,
    LockedFlag,
    ConfigNotFound,
    InvalidRequest,
    StoreFailure,
    InternalError,
}

/// Structured failure surfaced to operators and schedulers. Internal error
/// text is truncated before it lands in `details`; raw store errors never
/// leak past this envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
    pub details: Option<String>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>, details: Option<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: details.map(|text| truncate_error_text(&text, 500)),
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.details {
            Some(details) => write!(f, "{:?}: {} ({details})", self.code, self.message),
            None => write!(f, "{:?}: {}", self.code, self.message),
        }
    }
}

/// Truncate error text to a bounded byte length on a char boundary.
pub fn truncate_error_text(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let mut end = max_bytes;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chebyshev_distance_is_max_of_axes() {
        let a = Coord::new(0, 0);
        assert_eq!(a.chebyshev_distance(&Coord::new(3, -1)), 3);
        assert_eq!(a.chebyshev_distance(&Coord::new(-2, 2)), 2);
        assert_eq!(a.chebyshev_distance(&a), 0);
    }

    #[test]
    fn error_text_truncates_on_char_boundary() {
        let text = "späwn".repeat(200);
        let truncated = truncate_error_text(&text, 500);
        assert!(truncated.len() <= 500);
        assert!(text.starts_with(&truncated));
    }

    #[test]
    fn world_config_round_trips() {
        let config = WorldConfig::default();
        let json = serde_json::to_string(&config).expect("serialize");
        let decoded: WorldConfig = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(config, decoded);
    }
}
