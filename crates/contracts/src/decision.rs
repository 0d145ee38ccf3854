//! Decision pipeline contract types: actions, evaluated entity state, and
//! the append-only decision log.

use serde::{Deserialize, Serialize};

use crate::Coord;

// ---------------------------------------------------------------------------
// Actions
// ---------------------------------------------------------------------------

/// Coarse-grained action categories the decision engine can issue. The
/// excluded execution layer maps each to a concrete game operation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Build,
    Farm,
    Train,
    Attack,
    Defend,
    Trade,
    Idle,
}

impl ActionKind {
    pub const ALL: [ActionKind; 7] = [
        ActionKind::Build,
        ActionKind::Farm,
        ActionKind::Train,
        ActionKind::Attack,
        ActionKind::Defend,
        ActionKind::Trade,
        ActionKind::Idle,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Build => "build",
            ActionKind::Farm => "farm",
            ActionKind::Train => "train",
            ActionKind::Attack => "attack",
            ActionKind::Defend => "defend",
            ActionKind::Trade => "trade",
            ActionKind::Idle => "idle",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.as_str() == value)
    }
}

/// Where resources freed by an action should flow.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResourceAllocation {
    #[default]
    Balanced,
    Growth,
    Military,
    Stockpile,
}

/// Typed action parameters. Personality mutates these per archetype;
/// difficulty scaling may then degrade them deliberately.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionParams {
    /// Fraction of available troops committed, in [0, 1].
    pub troop_ratio: f64,
    /// Target cell for farm/attack style actions.
    pub target: Option<Coord>,
    pub resource_allocation: ResourceAllocation,
    /// Execution delay before the action fires.
    pub delay_secs: u32,
}

impl Default for ActionParams {
    fn default() -> Self {
        Self {
            troop_ratio: 0.5,
            target: None,
            resource_allocation: ResourceAllocation::Balanced,
            delay_secs: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    Rules,
    Model,
}

/// A fully-resolved decision ready for dispatch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Action {
    pub kind: ActionKind,
    pub params: ActionParams,
    /// Decision confidence in [0, 1]; reduced when difficulty scaling
    /// injects a deliberate suboptimality.
    pub confidence: f64,
    pub source: DecisionSource,
    pub reasoning: Option<String>,
}

impl Action {
    pub fn idle(source: DecisionSource, confidence: f64) -> Self {
        Self {
            kind: ActionKind::Idle,
            params: ActionParams {
                troop_ratio: 0.0,
                ..ActionParams::default()
            },
            confidence,
            source,
            reasoning: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Evaluated entity state
// ---------------------------------------------------------------------------

/// Coarse counts gathered from the game-world store at the start of a
/// decision cycle.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EntityState {
    pub settlement_count: u32,
    /// Sum over all resource stocks of the entity's settlements.
    pub total_resources: i64,
    /// Troops not currently committed to an action.
    pub idle_troops: i64,
    /// Hostile settlements within scouting range of the capital.
    pub threat_count: u32,
}

// ---------------------------------------------------------------------------
// Decision log
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DecisionOutcome {
    Executed,
    Error,
    Skipped,
}

impl DecisionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionOutcome::Executed => "executed",
            DecisionOutcome::Error => "error",
            DecisionOutcome::Skipped => "skipped",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "executed" => Some(DecisionOutcome::Executed),
            "error" => Some(DecisionOutcome::Error),
            "skipped" => Some(DecisionOutcome::Skipped),
            _ => None,
        }
    }
}

/// Immutable record of one decision-and-execution cycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DecisionLogEntry {
    pub world_id: String,
    pub player_id: i64,
    pub category: ActionKind,
    pub action: Action,
    pub outcome: DecisionOutcome,
    pub latency_ms: u64,
    pub model_assisted: bool,
    pub created_at: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_action_commits_no_troops() {
        let action = Action::idle(DecisionSource::Rules, 1.0);
        assert_eq!(action.kind, ActionKind::Idle);
        assert_eq!(action.params.troop_ratio, 0.0);
        assert!(action.params.target.is_none());
    }

    #[test]
    fn action_round_trips_through_json() {
        let action = Action {
            kind: ActionKind::Attack,
            params: ActionParams {
                troop_ratio: 0.8,
                target: Some(Coord::new(12, -7)),
                resource_allocation: ResourceAllocation::Military,
                delay_secs: 120,
            },
            confidence: 0.9,
            source: DecisionSource::Model,
            reasoning: Some("threat nearby".to_string()),
        };
        let json = serde_json::to_string(&action).expect("serialize");
        let decoded: Action = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(action, decoded);
    }
}
