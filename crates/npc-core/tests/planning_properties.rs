//! Property tests over placement and batch planning.

use std::collections::BTreeSet;

use contracts::spawn::{SpawnDistributions, SpawnTiming};
use contracts::{Coord, DifficultyTier, Faction, PersonalityArchetype, SpawnPreset};
use npc_core::placement::{
    CollisionDetector, OccupancyView, PlacementAlgorithm, PlacementBounds, PlacementPlanner,
};
use npc_core::{BatchPlanner, KernelRng};
use proptest::prelude::*;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Occupancy snapshot backed by explicit cell sets.
struct MapSnapshot {
    settlements: BTreeSet<Coord>,
    spawns: BTreeSet<Coord>,
}

impl OccupancyView for MapSnapshot {
    fn settlement_at(&self, cell: Coord) -> bool {
        self.settlements.contains(&cell)
    }

    fn spawn_at(&self, cell: Coord) -> bool {
        self.spawns.contains(&cell)
    }

    fn spawn_within(&self, cell: Coord, spacing: u32) -> bool {
        self.spawns
            .iter()
            .any(|s| s.chebyshev_distance(&cell) < spacing)
    }
}

fn preset_from_parts(instant: u32, tranches: Vec<(u32, u32)>) -> SpawnPreset {
    let total = instant + tranches.iter().map(|(_, c)| c).sum::<u32>();
    let mut distributions = SpawnDistributions::default();
    distributions.faction.insert(Faction::Korrim, 40);
    distributions.faction.insert(Faction::Sarid, 30);
    distributions.difficulty.insert(DifficultyTier::Easy, 50);
    distributions.difficulty.insert(DifficultyTier::Expert, 20);
    distributions
        .personality
        .insert(PersonalityArchetype::Aggressive, 25);
    SpawnPreset {
        key: "prop".to_string(),
        total_npcs: total,
        timing: SpawnTiming {
            instant,
            progressive: tranches.into_iter().collect(),
        },
        distributions,
        decision_cadence_secs: 3600,
        model_assist_ratio: 0.05,
    }
}

// ---------------------------------------------------------------------------
// Batch planning properties
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn property_planned_counts_sum_to_preset_total(
        instant in 0u32..20,
        tranches in proptest::collection::btree_map(1u32..30, 1u32..15, 0..5),
        seed in any::<u64>(),
    ) {
        let preset = preset_from_parts(instant, tranches.into_iter().collect());
        let mut rng = KernelRng::new(seed);
        let batches = BatchPlanner::plan(&preset, 1_000_000, &mut rng).expect("valid preset");

        let planned: u32 = batches.iter().map(|b| b.count).sum();
        prop_assert_eq!(planned, preset.total_npcs);
        for batch in &batches {
            prop_assert!(batch.count > 0);
            prop_assert_eq!(batch.entity_configs.len(), batch.count as usize);
        }
    }

    #[test]
    fn property_progressive_batches_are_scheduled_in_day_offsets(
        tranches in proptest::collection::btree_map(1u32..10, 1u32..5, 1..4),
        seed in any::<u64>(),
    ) {
        let now = 1_700_000_000u64;
        let preset = preset_from_parts(0, tranches.iter().map(|(&d, &c)| (d, c)).collect());
        let mut rng = KernelRng::new(seed);
        let batches = BatchPlanner::plan(&preset, now, &mut rng).expect("valid preset");

        prop_assert_eq!(batches.len(), tranches.len());
        for (batch, (&day, &count)) in batches.iter().zip(tranches.iter()) {
            prop_assert_eq!(batch.count, count);
            prop_assert_eq!(batch.scheduled_at, now + u64::from(day) * 86_400);
        }
    }
}

// ---------------------------------------------------------------------------
// Placement properties
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]
    #[test]
    fn property_planned_cells_are_valid_at_production_time(
        seed in any::<u64>(),
        count in 1usize..25,
        occupied in proptest::collection::btree_set((-60i32..60, -60i32..60), 0..40),
    ) {
        let snapshot = MapSnapshot {
            settlements: occupied.iter().map(|&(x, y)| Coord::new(x, y)).collect(),
            spawns: BTreeSet::new(),
        };
        let bounds = PlacementBounds { exclusion_radius: 10, max_radius: 80 };
        let mut rng = KernelRng::new(seed);

        for algorithm in [
            PlacementAlgorithm::QuadrantBalanced,
            PlacementAlgorithm::RandomScatter,
            PlacementAlgorithm::KingdomClustering,
        ] {
            let cells =
                PlacementPlanner::plan(&snapshot, count, algorithm, &bounds, 3, &mut rng);
            prop_assert!(cells.len() <= count);

            let detector = CollisionDetector::new(&snapshot, 3);
            for cell in &cells {
                prop_assert!(detector.is_location_valid(*cell), "{} invalid", cell);
                let r = cell.radius();
                prop_assert!(r > 10.0 && r <= 80.0, "{} outside annulus", cell);
            }
            for (i, a) in cells.iter().enumerate() {
                for b in &cells[i + 1..] {
                    prop_assert!(a.chebyshev_distance(b) >= 3);
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Scenario pins
// ---------------------------------------------------------------------------

#[test]
fn scenario_quadrant_balanced_eight_on_empty_map() {
    let snapshot = MapSnapshot {
        settlements: BTreeSet::new(),
        spawns: BTreeSet::new(),
    };
    let bounds = PlacementBounds {
        exclusion_radius: 20,
        max_radius: 150,
    };
    let mut rng = KernelRng::new(1337);
    let cells = PlacementPlanner::plan(
        &snapshot,
        8,
        PlacementAlgorithm::QuadrantBalanced,
        &bounds,
        3,
        &mut rng,
    );
    assert_eq!(cells.len(), 8);
    let count_in = |pred: fn(&Coord) -> bool| cells.iter().filter(|c| pred(c)).count();
    assert_eq!(count_in(|c| c.x >= 0 && c.y >= 0), 2);
    assert_eq!(count_in(|c| c.x < 0 && c.y >= 0), 2);
    assert_eq!(count_in(|c| c.x < 0 && c.y < 0), 2);
    assert_eq!(count_in(|c| c.x >= 0 && c.y < 0), 2);
}

#[test]
fn scenario_spawns_block_nearby_cells() {
    let snapshot = MapSnapshot {
        settlements: BTreeSet::new(),
        spawns: [Coord::new(40, 40)].into_iter().collect(),
    };
    let detector = CollisionDetector::new(&snapshot, 3);
    assert!(!detector.is_location_valid(Coord::new(40, 40)));
    assert!(!detector.is_location_valid(Coord::new(42, 41)));
    assert!(detector.is_location_valid(Coord::new(43, 40)));
}
