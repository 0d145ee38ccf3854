//! Difficulty scaling: per-tier multiplier tables and deliberate decision
//! degradation.
//!
//! Degradation mutates the already-chosen action rather than re-selecting,
//! so a suboptimality can land on an action it nominally does not apply to
//! (a halved troop ratio on a `build`, say). That inconsistency is the
//! point: it reads as believable imperfection, not as a broken pipeline.

use contracts::{Action, Coord, DifficultyTier, ResourceAllocation};

use crate::rng::KernelRng;

/// Per-tier scaling applied to every decision before dispatch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DifficultyMultipliers {
    pub efficiency: f64,
    pub reaction_delay: f64,
    pub resource_optimization: f64,
    pub military_skill: f64,
    /// Probability that the decision is deliberately degraded.
    pub error_rate: f64,
}

pub fn multipliers(tier: DifficultyTier) -> DifficultyMultipliers {
    match tier {
        DifficultyTier::Easy => DifficultyMultipliers {
            efficiency: 0.6,
            reaction_delay: 2.0,
            resource_optimization: 0.5,
            military_skill: 0.5,
            error_rate: 0.30,
        },
        DifficultyTier::Medium => DifficultyMultipliers {
            efficiency: 0.8,
            reaction_delay: 1.5,
            resource_optimization: 0.7,
            military_skill: 0.7,
            error_rate: 0.15,
        },
        DifficultyTier::Hard => DifficultyMultipliers {
            efficiency: 0.95,
            reaction_delay: 1.1,
            resource_optimization: 0.9,
            military_skill: 0.9,
            error_rate: 0.05,
        },
        DifficultyTier::Expert => DifficultyMultipliers {
            efficiency: 1.0,
            reaction_delay: 1.0,
            resource_optimization: 1.0,
            military_skill: 1.0,
            error_rate: 0.0,
        },
    }
}

/// The four scripted suboptimalities a degraded decision can exhibit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Suboptimality {
    WrongTarget,
    DoubledDelay,
    WastedResources,
    TroopUnderCommitment,
}

/// Confidence multiplier applied when degradation triggers.
const DEGRADED_CONFIDENCE_FACTOR: f64 = 0.6;

/// How far a wrong target drifts from the intended cell.
const WRONG_TARGET_DRIFT: i32 = 5;

#[derive(Debug, Clone, Default)]
pub struct DifficultyScaler;

impl DifficultyScaler {
    /// Scale the action by the tier's multiplier table, then roll the
    /// tier's error rate and inject one scripted suboptimality on a hit.
    /// Returns the injected suboptimality, if any.
    pub fn apply(
        action: &mut Action,
        tier: DifficultyTier,
        rng: &mut KernelRng,
    ) -> Option<Suboptimality> {
        let m = multipliers(tier);

        action.params.troop_ratio = (action.params.troop_ratio * m.military_skill).clamp(0.0, 1.0);
        action.params.delay_secs =
            (f64::from(action.params.delay_secs) * m.reaction_delay).round() as u32;
        action.confidence = (action.confidence * (0.5 + 0.5 * m.efficiency)).clamp(0.0, 1.0);
        if m.resource_optimization < 0.7 {
            // Poor optimizers do not sustain a focused economy.
            action.params.resource_allocation = ResourceAllocation::Balanced;
        }

        if !rng.chance(m.error_rate) {
            return None;
        }

        let injected = match rng.range_u32(4) {
            0 => {
                if let Some(target) = action.params.target.as_mut() {
                    *target = Coord::new(
                        target.x + rng.range_i32(-WRONG_TARGET_DRIFT, WRONG_TARGET_DRIFT),
                        target.y + rng.range_i32(-WRONG_TARGET_DRIFT, WRONG_TARGET_DRIFT),
                    );
                }
                Suboptimality::WrongTarget
            }
            1 => {
                action.params.delay_secs = action.params.delay_secs.saturating_mul(2).max(60);
                Suboptimality::DoubledDelay
            }
            2 => {
                action.params.resource_allocation = ResourceAllocation::Stockpile;
                Suboptimality::WastedResources
            }
            _ => {
                action.params.troop_ratio *= 0.5;
                Suboptimality::TroopUnderCommitment
            }
        };
        action.confidence = (action.confidence * DEGRADED_CONFIDENCE_FACTOR).clamp(0.0, 1.0);
        Some(injected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{ActionKind, ActionParams, DecisionSource};

    fn attack_action() -> Action {
        Action {
            kind: ActionKind::Attack,
            params: ActionParams {
                troop_ratio: 1.0,
                target: Some(Coord::new(10, 10)),
                resource_allocation: ResourceAllocation::Military,
                delay_secs: 60,
            },
            confidence: 1.0,
            source: DecisionSource::Rules,
            reasoning: None,
        }
    }

    #[test]
    fn expert_never_degrades_in_ten_thousand_trials() {
        let mut rng = KernelRng::new(2024);
        for _ in 0..10_000 {
            let mut action = attack_action();
            let injected = DifficultyScaler::apply(&mut action, DifficultyTier::Expert, &mut rng);
            assert_eq!(injected, None);
            assert_eq!(action.params.troop_ratio, 1.0);
            assert_eq!(action.params.delay_secs, 60);
        }
    }

    #[test]
    fn easy_degrades_about_thirty_percent_of_trials() {
        let mut rng = KernelRng::new(4242);
        let mut degraded = 0u32;
        for _ in 0..10_000 {
            let mut action = attack_action();
            if DifficultyScaler::apply(&mut action, DifficultyTier::Easy, &mut rng).is_some() {
                degraded += 1;
            }
        }
        // Expectation 3000 of 10_000; allow a wide statistical band.
        assert!(
            (2700..=3300).contains(&degraded),
            "easy tier degraded {degraded} of 10000 trials"
        );
    }

    #[test]
    fn degradation_reduces_confidence() {
        let mut rng = KernelRng::new(9);
        // Roll until an easy-tier degradation triggers.
        loop {
            let mut action = attack_action();
            let injected = DifficultyScaler::apply(&mut action, DifficultyTier::Easy, &mut rng);
            let clean_confidence = {
                let m = multipliers(DifficultyTier::Easy);
                0.5 + 0.5 * m.efficiency
            };
            if injected.is_some() {
                assert!(action.confidence < clean_confidence);
                break;
            }
            assert!((action.confidence - clean_confidence).abs() < 1e-9);
        }
    }

    #[test]
    fn easy_tier_halves_committed_troops_before_any_error_roll() {
        let mut rng = KernelRng::new(1);
        let mut action = attack_action();
        DifficultyScaler::apply(&mut action, DifficultyTier::Easy, &mut rng);
        // Whatever the error roll did, base scaling has already applied.
        assert!(action.params.troop_ratio <= 0.5);
        assert!(action.params.delay_secs >= 120);
        // Easy optimizers lose their focused economy; a wasted-resources
        // injection may then push the allocation to stockpile.
        assert!(matches!(
            action.params.resource_allocation,
            ResourceAllocation::Balanced | ResourceAllocation::Stockpile
        ));
    }
}
