//! Out-of-band recovery sweep for creations that crashed or failed
//! mid-saga. The pending record log is the single source of truth: the
//! sweep never guesses, it reads each stuck record's status and recorded
//! identifiers and repairs exactly what they name.

use contracts::{PendingCreationRecord, PendingStatus};
use tracing::info;

use crate::store::{PendingStore, RegistryStore, StoreError, WorldStore};

/// What one sweep pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: u32,
    /// Records whose registry half turned out to be committed and were
    /// finalized as completed.
    pub finalized: u32,
    /// Records whose orphaned world rows were deleted.
    pub repaired: u32,
    pub world_rows_removed: u32,
}

#[derive(Debug, Clone, Default)]
pub struct RecoverySweep;

impl RecoverySweep {
    /// Sweep records untouched for at least `grace_secs`. The grace period
    /// keeps the sweep from racing a saga that is still making progress.
    pub fn run(
        world: &mut WorldStore,
        registry: &RegistryStore,
        pending: &PendingStore,
        grace_secs: u64,
        now: u64,
    ) -> Result<SweepReport, StoreError> {
        let cutoff = now.saturating_sub(grace_secs);
        let mut report = SweepReport::default();

        let mut candidates = pending.stale_unresolved(cutoff)?;
        candidates.extend(pending.failed_with_world_ids(cutoff)?);

        for record in candidates {
            report.scanned += 1;
            Self::resolve(world, registry, pending, &record, now, &mut report)?;
        }

        if report.scanned > 0 {
            info!(
                scanned = report.scanned,
                finalized = report.finalized,
                repaired = report.repaired,
                rows = report.world_rows_removed,
                "recovery sweep finished"
            );
        }
        Ok(report)
    }

    fn resolve(
        world: &mut WorldStore,
        registry: &RegistryStore,
        pending: &PendingStore,
        record: &PendingCreationRecord,
        now: u64,
        report: &mut SweepReport,
    ) -> Result<(), StoreError> {
        // A record that reached the registry-committing step may have
        // actually committed before the crash: check whether the player row
        // landed with its join key. If so the creation succeeded and the
        // record just needs finalizing.
        if matches!(
            record.status,
            PendingStatus::RegistryCommitting | PendingStatus::RegistryCommitted
        ) {
            if let Some(player_id) = record.registry_player_id {
                let linked = registry
                    .player(player_id)?
                    .map(|player| player.game_account_id == record.world_account_id)
                    .unwrap_or(false);
                if linked {
                    pending.mark_resolved(record.id, PendingStatus::Completed, now)?;
                    report.finalized += 1;
                    return Ok(());
                }
            }
        }

        // Otherwise the world half (if it committed) is orphaned: delete the
        // account and everything hanging off it, freeing the claimed cell.
        if let Some(account_id) = record.world_account_id {
            if world.account_exists(account_id)? {
                report.world_rows_removed += world.delete_account_cascade(account_id)?;
                report.repaired += 1;
            }
        }
        pending.mark_resolved(record.id, PendingStatus::Failed, now)?;
        Ok(())
    }
}
