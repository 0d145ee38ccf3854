//! Pure, deterministic domain logic for the NPC lifecycle kernel: placement
//! planning, personality and difficulty shaping, rule-based action
//! selection, and spawn batch expansion. No I/O lives here; stores and the
//! external advisor are composed on top by the ops crate.

pub mod batch;
pub mod difficulty;
pub mod personality;
pub mod placement;
pub mod rng;
pub mod rules;

pub use batch::{BatchPlanner, PlannedBatch};
pub use difficulty::{multipliers, DifficultyMultipliers, DifficultyScaler, Suboptimality};
pub use personality::{action_weights, apply_personality, archetype_traits, ArchetypeTraits};
pub use placement::{
    CollisionDetector, OccupancyView, PlacementAlgorithm, PlacementBounds, PlacementPlanner,
    KINGDOM_MEMBER_CAP, SAMPLE_BUDGET_PER_SLOT,
};
pub use rng::{derive_seed, KernelRng, WeightedTable};
pub use rules::{preconditions_met, select_action};
