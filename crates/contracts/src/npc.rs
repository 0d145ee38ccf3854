//! NPC configuration and control-plane identity contract types.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Closed configuration enums
// ---------------------------------------------------------------------------

/// The three playable factions. NPC accounts are created under one of these;
/// game rules attached to a faction live in the excluded game layer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Faction {
    Valdren,
    Korrim,
    Sarid,
}

impl Faction {
    pub const ALL: [Faction; 3] = [Faction::Valdren, Faction::Korrim, Faction::Sarid];

    pub fn as_str(&self) -> &'static str {
        match self {
            Faction::Valdren => "valdren",
            Faction::Korrim => "korrim",
            Faction::Sarid => "sarid",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|f| f.as_str() == value)
    }
}

/// Difficulty tier controlling starting holdings, decision quality, and the
/// deliberate error rate of the decision pipeline.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum DifficultyTier {
    Easy,
    Medium,
    Hard,
    Expert,
}

impl DifficultyTier {
    pub const ALL: [DifficultyTier; 4] = [
        DifficultyTier::Easy,
        DifficultyTier::Medium,
        DifficultyTier::Hard,
        DifficultyTier::Expert,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DifficultyTier::Easy => "easy",
            DifficultyTier::Medium => "medium",
            DifficultyTier::Hard => "hard",
            DifficultyTier::Expert => "expert",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.as_str() == value)
    }
}

/// Behavioral archetype biasing the action distribution and action
/// parameters of an NPC.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum PersonalityArchetype {
    Aggressive,
    Defensive,
    Economic,
    Balanced,
    Opportunist,
}

impl PersonalityArchetype {
    pub const ALL: [PersonalityArchetype; 5] = [
        PersonalityArchetype::Aggressive,
        PersonalityArchetype::Defensive,
        PersonalityArchetype::Economic,
        PersonalityArchetype::Balanced,
        PersonalityArchetype::Opportunist,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PersonalityArchetype::Aggressive => "aggressive",
            PersonalityArchetype::Defensive => "defensive",
            PersonalityArchetype::Economic => "economic",
            PersonalityArchetype::Balanced => "balanced",
            PersonalityArchetype::Opportunist => "opportunist",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|p| p.as_str() == value)
    }
}

// ---------------------------------------------------------------------------
// Entity configuration
// ---------------------------------------------------------------------------

/// Per-NPC behavioral configuration. One row per NPC in the control-plane
/// store, created at provisioning and mutated by admin tools.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NpcConfig {
    pub faction: Faction,
    pub difficulty: DifficultyTier,
    pub personality: PersonalityArchetype,
    /// Seconds between decision cycles for this NPC.
    pub decision_cadence_secs: u32,
    /// Probability in [0, 1] that a cycle consults the model-assisted
    /// advisor instead of the rule-based selector.
    pub model_assist_ratio: f64,
    /// Per-NPC feature biases; consulted by the feature gate after the
    /// server-wide and actor-settings layers.
    #[serde(default)]
    pub feature_overrides: BTreeMap<String, bool>,
}

impl Default for NpcConfig {
    fn default() -> Self {
        Self {
            faction: Faction::Valdren,
            difficulty: DifficultyTier::Medium,
            personality: PersonalityArchetype::Balanced,
            decision_cadence_secs: 3600,
            model_assist_ratio: 0.05,
            feature_overrides: BTreeMap::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Control-plane identity
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PlayerKind {
    Human,
    Npc,
}

impl PlayerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlayerKind::Human => "human",
            PlayerKind::Npc => "npc",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "human" => Some(PlayerKind::Human),
            "npc" => Some(PlayerKind::Npc),
            _ => None,
        }
    }
}

/// The entity's identity in the decision system. `game_account_id` is the
/// join key into the game-world store and is the last field written before
/// the creation saga considers the identity linked.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayerIdentity {
    pub id: i64,
    pub world_id: String,
    pub kind: PlayerKind,
    pub active: bool,
    pub game_account_id: Option<i64>,
    pub created_at: u64,
}

/// Per-actor settings consulted by the feature gate.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayerSettings {
    pub player_id: i64,
    #[serde(default)]
    pub disabled_features: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enum_string_round_trips() {
        for faction in Faction::ALL {
            assert_eq!(Faction::parse(faction.as_str()), Some(faction));
        }
        for tier in DifficultyTier::ALL {
            assert_eq!(DifficultyTier::parse(tier.as_str()), Some(tier));
        }
        for archetype in PersonalityArchetype::ALL {
            assert_eq!(PersonalityArchetype::parse(archetype.as_str()), Some(archetype));
        }
        assert_eq!(Faction::parse("unknown"), None);
    }

    #[test]
    fn npc_config_serde_defaults_overrides() {
        let json = r#"{
            "faction": "korrim",
            "difficulty": "hard",
            "personality": "aggressive",
            "decision_cadence_secs": 900,
            "model_assist_ratio": 0.2
        }"#;
        let config: NpcConfig = serde_json::from_str(json).expect("deserialize");
        assert_eq!(config.faction, Faction::Korrim);
        assert!(config.feature_overrides.is_empty());
    }
}
