//! Personality archetypes: fixed action weight tables and the parameter
//! biases each archetype applies to a chosen action.

use contracts::{Action, ActionKind, PersonalityArchetype, ResourceAllocation};

/// Archetype-level biases applied after action selection.
#[derive(Debug, Clone, Copy)]
pub struct ArchetypeTraits {
    /// Base fraction of available troops this archetype commits.
    pub troop_ratio: f64,
    /// Chebyshev range within which the archetype hunts targets.
    pub target_range: i32,
    pub allocation: ResourceAllocation,
    /// Multiplier on execution delay; patient archetypes act slower.
    pub delay_factor: f64,
}

/// Fixed weight table over the six active action kinds. `Idle` is never
/// weighted; it is the fallback when every active action is filtered out.
pub fn action_weights(archetype: PersonalityArchetype) -> [(ActionKind, u64); 6] {
    use ActionKind::*;
    match archetype {
        PersonalityArchetype::Aggressive => [
            (Build, 10),
            (Farm, 20),
            (Train, 25),
            (Attack, 30),
            (Defend, 5),
            (Trade, 10),
        ],
        PersonalityArchetype::Defensive => [
            (Build, 25),
            (Farm, 10),
            (Train, 20),
            (Attack, 5),
            (Defend, 30),
            (Trade, 10),
        ],
        PersonalityArchetype::Economic => [
            (Build, 30),
            (Farm, 20),
            (Train, 5),
            (Attack, 2),
            (Defend, 13),
            (Trade, 30),
        ],
        PersonalityArchetype::Balanced => [
            (Build, 20),
            (Farm, 20),
            (Train, 15),
            (Attack, 15),
            (Defend, 15),
            (Trade, 15),
        ],
        PersonalityArchetype::Opportunist => [
            (Build, 15),
            (Farm, 30),
            (Train, 10),
            (Attack, 20),
            (Defend, 5),
            (Trade, 20),
        ],
    }
}

pub fn archetype_traits(archetype: PersonalityArchetype) -> ArchetypeTraits {
    match archetype {
        PersonalityArchetype::Aggressive => ArchetypeTraits {
            troop_ratio: 0.85,
            target_range: 15,
            allocation: ResourceAllocation::Military,
            delay_factor: 0.7,
        },
        PersonalityArchetype::Defensive => ArchetypeTraits {
            troop_ratio: 0.35,
            target_range: 5,
            allocation: ResourceAllocation::Stockpile,
            delay_factor: 1.3,
        },
        PersonalityArchetype::Economic => ArchetypeTraits {
            troop_ratio: 0.25,
            target_range: 8,
            allocation: ResourceAllocation::Growth,
            delay_factor: 1.0,
        },
        PersonalityArchetype::Balanced => ArchetypeTraits {
            troop_ratio: 0.55,
            target_range: 10,
            allocation: ResourceAllocation::Balanced,
            delay_factor: 1.0,
        },
        PersonalityArchetype::Opportunist => ArchetypeTraits {
            troop_ratio: 0.65,
            target_range: 20,
            allocation: ResourceAllocation::Balanced,
            delay_factor: 0.8,
        },
    }
}

/// Mutate the chosen action's parameters per archetype traits: troop usage,
/// resource allocation, and execution delay. Offensive actions commit the
/// full archetype ratio; defensive ones hold half back.
pub fn apply_personality(action: &mut Action, archetype: PersonalityArchetype) {
    let traits = archetype_traits(archetype);
    action.params.troop_ratio = match action.kind {
        ActionKind::Attack | ActionKind::Farm => traits.troop_ratio,
        ActionKind::Defend => (traits.troop_ratio * 0.5).max(0.1),
        ActionKind::Train => traits.troop_ratio * 0.3,
        ActionKind::Build | ActionKind::Trade => 0.0,
        ActionKind::Idle => 0.0,
    };
    action.params.resource_allocation = traits.allocation;
    action.params.delay_secs =
        (f64::from(action.params.delay_secs) * traits.delay_factor).round() as u32;
}
