//! Batch planning: expand a spawn preset into one instant batch plus dated
//! progressive batches, each pre-populated with concrete per-NPC configs.

use std::collections::BTreeMap;

use contracts::{BatchKind, NpcConfig, PresetError, SpawnPreset, SECONDS_PER_DAY};

use crate::rng::KernelRng;

/// One planned batch, not yet persisted. Counts across all planned batches
/// sum exactly to the preset's `total_npcs`; execution may under-deliver
/// later, planning never does.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedBatch {
    pub kind: BatchKind,
    /// Epoch seconds at which the batch becomes due.
    pub scheduled_at: u64,
    pub count: u32,
    pub entity_configs: Vec<NpcConfig>,
}

#[derive(Debug, Clone, Default)]
pub struct BatchPlanner;

impl BatchPlanner {
    /// Expand a validated preset into batches. Zero-count tranches are
    /// dropped rather than planned as empty batches.
    pub fn plan(
        preset: &SpawnPreset,
        now: u64,
        rng: &mut KernelRng,
    ) -> Result<Vec<PlannedBatch>, PresetError> {
        preset.validate()?;

        let mut batches = Vec::with_capacity(1 + preset.timing.progressive.len());
        if preset.timing.instant > 0 {
            batches.push(PlannedBatch {
                kind: BatchKind::Instant,
                scheduled_at: now,
                count: preset.timing.instant,
                entity_configs: Self::draw_configs(preset, preset.timing.instant, rng),
            });
        }
        for (&day_offset, &count) in &preset.timing.progressive {
            if count == 0 {
                continue;
            }
            batches.push(PlannedBatch {
                kind: BatchKind::Progressive,
                scheduled_at: now + u64::from(day_offset) * SECONDS_PER_DAY,
                count,
                entity_configs: Self::draw_configs(preset, count, rng),
            });
        }
        Ok(batches)
    }

    fn draw_configs(preset: &SpawnPreset, count: u32, rng: &mut KernelRng) -> Vec<NpcConfig> {
        (0..count)
            .map(|_| {
                let defaults = NpcConfig::default();
                NpcConfig {
                    faction: sample_axis(&preset.distributions.faction, defaults.faction, rng),
                    difficulty: sample_axis(
                        &preset.distributions.difficulty,
                        defaults.difficulty,
                        rng,
                    ),
                    personality: sample_axis(
                        &preset.distributions.personality,
                        defaults.personality,
                        rng,
                    ),
                    decision_cadence_secs: preset.decision_cadence_secs,
                    model_assist_ratio: preset.model_assist_ratio,
                    feature_overrides: BTreeMap::new(),
                }
            })
            .collect()
    }
}

/// Percentage-weighted draw. The roll is against a flat 0..100 scale, not a
/// normalized one: weights summing below 100 leave the remainder to the
/// axis default.
fn sample_axis<T: Copy + Ord>(weights: &BTreeMap<T, u32>, default: T, rng: &mut KernelRng) -> T {
    let roll = rng.range_u32(100);
    let mut cumulative = 0;
    for (&value, &weight) in weights {
        cumulative += weight;
        if roll < cumulative {
            return value;
        }
    }
    default
}
