//! Rule-based action selection: weighted draw over the archetype table,
//! filtered by coarse resource/troop preconditions.

use contracts::{Action, ActionKind, ActionParams, DecisionSource, EntityState, PersonalityArchetype};

use crate::personality::action_weights;
use crate::rng::{KernelRng, WeightedTable};

/// Confidence assigned to a clean rule-based pick, before difficulty
/// scaling adjusts it.
const RULE_CONFIDENCE: f64 = 0.8;

/// Minimum resources on hand before the selector will consider each kind.
const BUILD_RESOURCE_FLOOR: i64 = 800;
const TRAIN_RESOURCE_FLOOR: i64 = 400;
const TRADE_RESOURCE_FLOOR: i64 = 1_000;

/// Minimum idle troops before offensive kinds enter the distribution.
const FARM_TROOP_FLOOR: i64 = 10;
const ATTACK_TROOP_FLOOR: i64 = 50;

/// Whether an action kind's coarse preconditions are met for the entity.
pub fn preconditions_met(kind: ActionKind, state: &EntityState) -> bool {
    match kind {
        ActionKind::Build => state.total_resources >= BUILD_RESOURCE_FLOOR,
        ActionKind::Farm => state.idle_troops >= FARM_TROOP_FLOOR,
        ActionKind::Train => state.total_resources >= TRAIN_RESOURCE_FLOOR,
        ActionKind::Attack => state.idle_troops >= ATTACK_TROOP_FLOOR,
        ActionKind::Defend => state.threat_count > 0,
        ActionKind::Trade => {
            state.total_resources >= TRADE_RESOURCE_FLOOR && state.settlement_count > 0
        }
        ActionKind::Idle => true,
    }
}

/// Select an action by weighted draw over the archetype's table, keeping
/// only kinds whose preconditions hold. An empty surviving distribution
/// yields `Idle`.
pub fn select_action(
    archetype: PersonalityArchetype,
    state: &EntityState,
    rng: &mut KernelRng,
) -> Action {
    let survivors = action_weights(archetype)
        .into_iter()
        .filter(|(kind, _)| preconditions_met(*kind, state));
    let Some(table) = WeightedTable::new(survivors) else {
        return Action::idle(DecisionSource::Rules, 1.0);
    };
    Action {
        kind: table.sample(rng),
        params: ActionParams::default(),
        confidence: RULE_CONFIDENCE,
        source: DecisionSource::Rules,
        reasoning: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rich_state() -> EntityState {
        EntityState {
            settlement_count: 2,
            total_resources: 10_000,
            idle_troops: 200,
            threat_count: 1,
        }
    }

    #[test]
    fn destitute_entity_idles() {
        let state = EntityState::default();
        let mut rng = KernelRng::new(5);
        for archetype in PersonalityArchetype::ALL {
            let action = select_action(archetype, &state, &mut rng);
            assert_eq!(action.kind, ActionKind::Idle);
            assert_eq!(action.source, DecisionSource::Rules);
        }
    }

    #[test]
    fn rich_entity_never_idles() {
        let state = rich_state();
        let mut rng = KernelRng::new(17);
        for _ in 0..500 {
            let action = select_action(PersonalityArchetype::Balanced, &state, &mut rng);
            assert_ne!(action.kind, ActionKind::Idle);
        }
    }

    #[test]
    fn troopless_entity_never_attacks_or_farms() {
        let state = EntityState {
            settlement_count: 1,
            total_resources: 50_000,
            idle_troops: 0,
            threat_count: 3,
        };
        let mut rng = KernelRng::new(31);
        for _ in 0..500 {
            let action = select_action(PersonalityArchetype::Aggressive, &state, &mut rng);
            assert!(!matches!(action.kind, ActionKind::Attack | ActionKind::Farm));
        }
    }

    #[test]
    fn aggressive_archetype_attacks_more_than_economic() {
        let state = rich_state();
        let mut rng = KernelRng::new(101);
        let count_attacks = |archetype: PersonalityArchetype, rng: &mut KernelRng| {
            (0..2_000)
                .filter(|_| select_action(archetype, &state, rng).kind == ActionKind::Attack)
                .count()
        };
        let aggressive = count_attacks(PersonalityArchetype::Aggressive, &mut rng);
        let economic = count_attacks(PersonalityArchetype::Economic, &mut rng);
        assert!(
            aggressive > economic * 3,
            "aggressive attacked {aggressive}, economic {economic}"
        );
    }
}
