//! Collision detection and spawn placement planning.
//!
//! Placement is best-effort rejection sampling: each algorithm draws
//! candidate cells inside the world's spawn annulus and keeps the ones that
//! pass collision checks, giving up after a bounded number of attempts.
//! Callers must tolerate receiving fewer coordinates than requested, and
//! must not trust the snapshot beyond plan time: concurrent planners can
//! race on a cell, so settlement creation re-validates occupancy at write
//! time and fails with a location conflict instead.

use contracts::{Coord, WorldConfig};

use crate::rng::KernelRng;

/// Sampling attempts allowed per outstanding placement slot.
pub const SAMPLE_BUDGET_PER_SLOT: u32 = 80;

/// Members per kingdom, including its center.
pub const KINGDOM_MEMBER_CAP: usize = 15;

/// Members are sampled within this Chebyshev radius of their center.
const KINGDOM_MEMBER_RADIUS: i32 = 10;

/// Minimum Chebyshev distance between two kingdom centers.
const KINGDOM_CENTER_MIN_DISTANCE: u32 = 30;

// ---------------------------------------------------------------------------
// Occupancy view and collision detection
// ---------------------------------------------------------------------------

/// Read-only occupancy snapshot spanning both stores.
pub trait OccupancyView {
    /// A settlement already occupies the cell in the game-world store.
    fn settlement_at(&self, cell: Coord) -> bool;
    /// A spawn record already targets the cell in the control-plane store.
    fn spawn_at(&self, cell: Coord) -> bool;
    /// Any spawn record lies within Chebyshev distance `spacing` of `cell`.
    fn spawn_within(&self, cell: Coord, spacing: u32) -> bool;
}

/// Pure validity query over an occupancy snapshot.
pub struct CollisionDetector<'a, V: OccupancyView + ?Sized> {
    view: &'a V,
    min_spacing: u32,
}

impl<'a, V: OccupancyView + ?Sized> CollisionDetector<'a, V> {
    pub fn new(view: &'a V, min_spacing: u32) -> Self {
        Self { view, min_spacing }
    }

    /// A cell is valid iff no settlement occupies it, no spawn record
    /// targets it, and no spawn record lies within the minimum spacing.
    pub fn is_location_valid(&self, cell: Coord) -> bool {
        !self.view.settlement_at(cell)
            && !self.view.spawn_at(cell)
            && !self.view.spawn_within(cell, self.min_spacing)
    }
}

// ---------------------------------------------------------------------------
// Placement planning
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlacementAlgorithm {
    QuadrantBalanced,
    RandomScatter,
    KingdomClustering,
}

impl PlacementAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlacementAlgorithm::QuadrantBalanced => "quadrant_balanced",
            PlacementAlgorithm::RandomScatter => "random_scatter",
            PlacementAlgorithm::KingdomClustering => "kingdom_clustering",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "quadrant_balanced" => Some(PlacementAlgorithm::QuadrantBalanced),
            "random_scatter" => Some(PlacementAlgorithm::RandomScatter),
            "kingdom_clustering" => Some(PlacementAlgorithm::KingdomClustering),
            _ => None,
        }
    }
}

/// Radial bounds of the spawn annulus.
#[derive(Debug, Clone, Copy)]
pub struct PlacementBounds {
    pub exclusion_radius: i32,
    pub max_radius: i32,
}

impl PlacementBounds {
    pub fn from_world(config: &WorldConfig) -> Self {
        Self {
            exclusion_radius: config.center_exclusion_radius,
            max_radius: config.max_spawn_radius.min(config.map_radius),
        }
    }

    fn contains(&self, cell: Coord) -> bool {
        let r = cell.radius();
        r > f64::from(self.exclusion_radius) && r <= f64::from(self.max_radius)
    }
}

#[derive(Debug, Clone, Default)]
pub struct PlacementPlanner;

impl PlacementPlanner {
    /// Plan up to `count` spawn coordinates. Best-effort: the sampling
    /// budget is `SAMPLE_BUDGET_PER_SLOT` per requested slot, after which
    /// fewer coordinates are returned than asked for.
    pub fn plan<V: OccupancyView + ?Sized>(
        view: &V,
        count: usize,
        algorithm: PlacementAlgorithm,
        bounds: &PlacementBounds,
        min_spacing: u32,
        rng: &mut KernelRng,
    ) -> Vec<Coord> {
        if count == 0 || bounds.max_radius <= bounds.exclusion_radius {
            return Vec::new();
        }
        let detector = CollisionDetector::new(view, min_spacing);
        let mut budget = SAMPLE_BUDGET_PER_SLOT.saturating_mul(count as u32);
        match algorithm {
            PlacementAlgorithm::QuadrantBalanced => {
                Self::plan_quadrants(&detector, count, bounds, min_spacing, rng, &mut budget)
            }
            PlacementAlgorithm::RandomScatter => {
                Self::plan_scatter(&detector, count, bounds, min_spacing, rng, &mut budget)
            }
            PlacementAlgorithm::KingdomClustering => {
                Self::plan_kingdoms(&detector, count, bounds, min_spacing, rng, &mut budget)
            }
        }
    }

    fn plan_quadrants<V: OccupancyView + ?Sized>(
        detector: &CollisionDetector<'_, V>,
        count: usize,
        bounds: &PlacementBounds,
        min_spacing: u32,
        rng: &mut KernelRng,
        budget: &mut u32,
    ) -> Vec<Coord> {
        // Quadrant sign pairs: (+,+), (-,+), (-,-), (+,-).
        const SIGNS: [(i32, i32); 4] = [(1, 1), (-1, 1), (-1, -1), (1, -1)];
        let base = count / 4;
        let remainder = count % 4;
        let mut chosen = Vec::with_capacity(count);
        for (q, (sx, sy)) in SIGNS.iter().enumerate() {
            let target = base + usize::from(q < remainder);
            let mut placed = 0;
            while placed < target && *budget > 0 {
                *budget -= 1;
                // Magnitudes start at 1 so axis cells never blur quadrant
                // membership.
                let cell = Coord::new(
                    sx * rng.range_i32(1, bounds.max_radius),
                    sy * rng.range_i32(1, bounds.max_radius),
                );
                if Self::accept(detector, &chosen, cell, bounds, min_spacing) {
                    chosen.push(cell);
                    placed += 1;
                }
            }
        }
        chosen
    }

    fn plan_scatter<V: OccupancyView + ?Sized>(
        detector: &CollisionDetector<'_, V>,
        count: usize,
        bounds: &PlacementBounds,
        min_spacing: u32,
        rng: &mut KernelRng,
        budget: &mut u32,
    ) -> Vec<Coord> {
        let mut chosen = Vec::with_capacity(count);
        while chosen.len() < count && *budget > 0 {
            *budget -= 1;
            let cell = Self::sample_annulus(bounds, rng);
            if Self::accept(detector, &chosen, cell, bounds, min_spacing) {
                chosen.push(cell);
            }
        }
        chosen
    }

    fn plan_kingdoms<V: OccupancyView + ?Sized>(
        detector: &CollisionDetector<'_, V>,
        count: usize,
        bounds: &PlacementBounds,
        min_spacing: u32,
        rng: &mut KernelRng,
        budget: &mut u32,
    ) -> Vec<Coord> {
        let kingdoms = count.div_ceil(KINGDOM_MEMBER_CAP);
        let mut centers: Vec<Coord> = Vec::with_capacity(kingdoms);
        let mut chosen = Vec::with_capacity(count);

        while centers.len() < kingdoms && chosen.len() < count && *budget > 0 {
            *budget -= 1;
            let cell = Self::sample_annulus(bounds, rng);
            let well_separated = centers
                .iter()
                .all(|c| c.chebyshev_distance(&cell) >= KINGDOM_CENTER_MIN_DISTANCE);
            if well_separated && Self::accept(detector, &chosen, cell, bounds, min_spacing) {
                centers.push(cell);
                chosen.push(cell);
            }
        }

        // The center is each kingdom's first member.
        for center in &centers {
            let mut members = 1;
            while members < KINGDOM_MEMBER_CAP && chosen.len() < count && *budget > 0 {
                *budget -= 1;
                let cell = Coord::new(
                    center.x + rng.range_i32(-KINGDOM_MEMBER_RADIUS, KINGDOM_MEMBER_RADIUS),
                    center.y + rng.range_i32(-KINGDOM_MEMBER_RADIUS, KINGDOM_MEMBER_RADIUS),
                );
                if Self::accept(detector, &chosen, cell, bounds, min_spacing) {
                    chosen.push(cell);
                    members += 1;
                }
            }
        }
        chosen
    }

    fn sample_annulus(bounds: &PlacementBounds, rng: &mut KernelRng) -> Coord {
        Coord::new(
            rng.range_i32(-bounds.max_radius, bounds.max_radius),
            rng.range_i32(-bounds.max_radius, bounds.max_radius),
        )
    }

    fn accept<V: OccupancyView + ?Sized>(
        detector: &CollisionDetector<'_, V>,
        chosen: &[Coord],
        cell: Coord,
        bounds: &PlacementBounds,
        min_spacing: u32,
    ) -> bool {
        bounds.contains(cell)
            && detector.is_location_valid(cell)
            && chosen
                .iter()
                .all(|c| c.chebyshev_distance(&cell) >= min_spacing.max(1))
    }
}
