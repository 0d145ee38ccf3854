//! Cross-store properties: saga atomicity, pending-record trajectories,
//! recovery sweep repair, and end-to-end batch execution through the facade.

use contracts::spawn::{SpawnDistributions, SpawnTiming};
use contracts::{
    BatchStatus, Coord, ErrorCode, Faction, NpcConfig, PendingStatus, PlayerKind, SpawnPreset,
    WorldConfig, SECONDS_PER_DAY,
};
use npc_ops::recovery::RecoverySweep;
use npc_ops::saga::{EntityCreationSaga, SagaError};
use npc_ops::store::{registry, world, PendingStore, RegistryStore, WorldStore};
use npc_ops::{NpcOps, OpsError, PlanOverrides};

fn world_config(world_id: &str) -> WorldConfig {
    WorldConfig {
        world_id: world_id.to_string(),
        ..WorldConfig::default()
    }
}

fn stores() -> (WorldStore, RegistryStore, PendingStore) {
    (
        WorldStore::open_in_memory().expect("world store"),
        RegistryStore::open_in_memory().expect("registry store"),
        PendingStore::open_in_memory().expect("pending store"),
    )
}

fn preset_12_4_8() -> SpawnPreset {
    SpawnPreset {
        key: "launch_wave".to_string(),
        total_npcs: 12,
        timing: SpawnTiming {
            instant: 4,
            progressive: [(1, 8)].into_iter().collect(),
        },
        distributions: SpawnDistributions::default(),
        decision_cadence_secs: 60,
        model_assist_ratio: 0.0,
    }
}

// ---------------------------------------------------------------------------
// Saga
// ---------------------------------------------------------------------------

#[test]
fn successful_saga_links_both_stores_and_completes_its_record() {
    let (mut world_store, mut registry_store, pending) = stores();
    let config = world_config("w1");
    registry_store.create_world(&config, 100).expect("world row");

    let outcome = EntityCreationSaga::create(
        &mut world_store,
        &mut registry_store,
        &pending,
        &config,
        &NpcConfig::default(),
        Coord::new(40, -25),
        100,
    )
    .expect("saga");

    // Game-world half: account, settlement on the claimed cell, fields.
    assert!(world_store
        .account_exists(outcome.account_id)
        .expect("query"));
    assert!(world_store
        .settlement_at("w1", Coord::new(40, -25))
        .expect("query"));
    assert_eq!(world_store.count_rows("resource_fields").expect("count"), 18);

    // Control-plane half: identity linked by the join key, spawn tracked.
    let player = registry_store
        .player(outcome.player_id)
        .expect("query")
        .expect("present");
    assert_eq!(player.kind, PlayerKind::Npc);
    assert_eq!(player.game_account_id, Some(outcome.account_id));
    assert!(registry_store
        .spawn_at("w1", Coord::new(40, -25))
        .expect("query"));

    // Audit trail reached the terminal status.
    let record = pending
        .record(outcome.pending_id)
        .expect("query")
        .expect("present");
    assert_eq!(record.status, PendingStatus::Completed);
    assert_eq!(record.world_account_id, Some(outcome.account_id));
    assert_eq!(record.registry_player_id, Some(outcome.player_id));
}

#[test]
fn losing_the_placement_race_rolls_back_the_world_half_entirely() {
    let (mut world_store, mut registry_store, pending) = stores();
    let config = world_config("w1");
    registry_store.create_world(&config, 100).expect("world row");

    let cell = Coord::new(12, 12);
    EntityCreationSaga::create(
        &mut world_store,
        &mut registry_store,
        &pending,
        &config,
        &NpcConfig::default(),
        cell,
        100,
    )
    .expect("first saga");

    let accounts_before = world_store.count_rows("accounts").expect("count");
    let fields_before = world_store.count_rows("resource_fields").expect("count");

    let result = EntityCreationSaga::create(
        &mut world_store,
        &mut registry_store,
        &pending,
        &config,
        &NpcConfig::default(),
        cell,
        110,
    );
    match result {
        Err(SagaError::LocationUnavailable(lost)) => assert_eq!(lost, cell),
        other => panic!("expected location conflict, got {other:?}"),
    }

    // Per-store atomicity: the losing attempt left zero world rows, not a
    // partial subset (its account insert rolled back with the settlement).
    assert_eq!(
        world_store.count_rows("accounts").expect("count"),
        accounts_before
    );
    assert_eq!(
        world_store.count_rows("resource_fields").expect("count"),
        fields_before
    );

    // The failed attempt is terminal in the audit trail, with bounded text.
    let record = pending.record(2).expect("query").expect("present");
    assert_eq!(record.status, PendingStatus::Failed);
    let error = record.error.expect("error recorded");
    assert!(error.contains("unavailable"));
    assert!(error.len() <= 500);
}

// ---------------------------------------------------------------------------
// Recovery sweep
// ---------------------------------------------------------------------------

#[test]
fn sweep_deletes_world_orphans_left_by_a_crashed_saga() {
    let (mut world_store, registry_store, pending) = stores();

    // Simulate a crash after the world commit: world rows exist, the
    // pending record sits at world_committed, the registry has nothing.
    let tx = world_store.transaction().expect("tx");
    let account_id =
        world::create_account(&tx, "w1", "npc_crashed", Faction::Sarid, 100).expect("account");
    let settlement_id = world::create_settlement(
        &tx,
        "w1",
        account_id,
        "orphan",
        Coord::new(-30, 18),
        true,
        750,
        100,
    )
    .expect("settlement");
    world::create_starting_fields(&tx, settlement_id).expect("fields");
    tx.commit().expect("commit");

    let pending_id = pending.create("w1", 100).expect("record");
    pending
        .record_world_ids(pending_id, account_id, settlement_id, 100)
        .expect("ids");
    pending
        .update_status(pending_id, PendingStatus::WorldCommitted, 100)
        .expect("status");

    let report = RecoverySweep::run(&mut world_store, &registry_store, &pending, 60, 1_000)
        .expect("sweep");
    assert_eq!(report.scanned, 1);
    assert_eq!(report.repaired, 1);
    assert!(report.world_rows_removed >= 2);

    // The cell is free again and the record is terminally resolved.
    assert!(!world_store
        .settlement_at("w1", Coord::new(-30, 18))
        .expect("query"));
    let record = pending.record(pending_id).expect("query").expect("present");
    assert_eq!(record.status, PendingStatus::Failed);
    assert!(record.resolved_at.is_some());

    // A second sweep finds nothing left to do.
    let report = RecoverySweep::run(&mut world_store, &registry_store, &pending, 60, 2_000)
        .expect("sweep");
    assert_eq!(report.scanned, 0);
}

#[test]
fn sweep_respects_the_grace_period() {
    let (mut world_store, registry_store, pending) = stores();
    let pending_id = pending.create("w1", 1_000).expect("record");
    pending
        .record_world_ids(pending_id, 1, 2, 1_000)
        .expect("ids");

    // Updated 30s ago, grace 60s: still in flight, not swept.
    let report = RecoverySweep::run(&mut world_store, &registry_store, &pending, 60, 1_030)
        .expect("sweep");
    assert_eq!(report.scanned, 0);

    let report = RecoverySweep::run(&mut world_store, &registry_store, &pending, 60, 1_100)
        .expect("sweep");
    assert_eq!(report.scanned, 1);
}

#[test]
fn sweep_finalizes_a_record_whose_registry_half_actually_committed() {
    let (mut world_store, mut registry_store, pending) = stores();

    // World half.
    let tx = world_store.transaction().expect("tx");
    let account_id =
        world::create_account(&tx, "w1", "npc_done", Faction::Korrim, 100).expect("account");
    let settlement_id = world::create_settlement(
        &tx,
        "w1",
        account_id,
        "done",
        Coord::new(22, 31),
        true,
        750,
        100,
    )
    .expect("settlement");
    world::create_starting_fields(&tx, settlement_id).expect("fields");
    tx.commit().expect("commit");

    // Registry half committed too, but the process died before the final
    // status updates landed.
    let rtx = registry_store.transaction().expect("tx");
    let player_id = registry::create_player(&rtx, "w1", PlayerKind::Npc, 100).expect("player");
    registry::create_npc_config(&rtx, player_id, &NpcConfig::default()).expect("config");
    registry::link_game_account(&rtx, player_id, account_id).expect("link");
    rtx.commit().expect("commit");

    let pending_id = pending.create("w1", 100).expect("record");
    pending
        .record_world_ids(pending_id, account_id, settlement_id, 100)
        .expect("ids");
    pending
        .update_status(pending_id, PendingStatus::WorldCommitted, 100)
        .expect("status");
    pending
        .record_registry_id(pending_id, player_id, 100)
        .expect("registry id");

    let report = RecoverySweep::run(&mut world_store, &registry_store, &pending, 60, 1_000)
        .expect("sweep");
    assert_eq!(report.finalized, 1);
    assert_eq!(report.repaired, 0);

    // Nothing was deleted; the record is completed.
    assert!(world_store
        .settlement_at("w1", Coord::new(22, 31))
        .expect("query"));
    let record = pending.record(pending_id).expect("query").expect("present");
    assert_eq!(record.status, PendingStatus::Completed);
}

// ---------------------------------------------------------------------------
// Facade end-to-end
// ---------------------------------------------------------------------------

#[test]
fn plan_execute_and_decide_through_the_facade() {
    let mut ops = NpcOps::open_in_memory().expect("ops").with_seed(1234);
    let now = 1_700_000_000;

    ops.create_world(&world_config("w1"), now).expect("world");
    ops.registry_store()
        .upsert_preset(&preset_12_4_8(), now)
        .expect("preset");

    let ids = ops
        .plan_spawn("w1", "launch_wave", &PlanOverrides::default(), now)
        .expect("plan");
    assert_eq!(ids.len(), 2);

    // Only the instant batch is due now.
    let reports = ops.run_batch_execution(None, now).expect("execute");
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].status, BatchStatus::Completed);
    assert_eq!(reports[0].spawned, 4);
    assert!(reports[0].errors.is_empty());

    // The progressive batch becomes due a day later.
    let reports = ops
        .run_batch_execution(None, now + SECONDS_PER_DAY)
        .expect("execute");
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].spawned, 8);

    // Every provisioned NPC decides on the next cycle.
    let report = ops
        .run_decision_cycle(Some("w1"), 100, now + SECONDS_PER_DAY + 10)
        .expect("cycle");
    assert_eq!(report.considered, 12);
    assert_eq!(report.executed, 12);
    assert_eq!(report.errored, 0);
}

#[test]
fn batch_without_world_settings_fails_terminally() {
    let mut ops = NpcOps::open_in_memory().expect("ops").with_seed(9);
    let now = 1_700_000_000;

    // Preset exists, world settings do not: planning refuses up front.
    ops.registry_store()
        .upsert_preset(&preset_12_4_8(), now)
        .expect("preset");
    let result = ops.plan_spawn("ghost", "launch_wave", &PlanOverrides::default(), now);
    match result {
        Err(OpsError::ConfigNotFound(what)) => assert!(what.contains("ghost")),
        other => panic!("expected missing config, got {other:?}"),
    }
}

#[test]
fn preview_does_not_persist_batches() {
    let mut ops = NpcOps::open_in_memory().expect("ops").with_seed(5);
    let now = 1_700_000_000;
    ops.create_world(&world_config("w1"), now).expect("world");
    ops.registry_store()
        .upsert_preset(&preset_12_4_8(), now)
        .expect("preset");

    let preview = ops
        .preview_spawn_plan("launch_wave", &PlanOverrides::default(), now)
        .expect("preview");
    assert_eq!(preview.total_npcs, 12);
    assert_eq!(preview.batches.len(), 2);
    assert_eq!(preview.batches[0].count, 4);
    assert_eq!(preview.batches[1].count, 8);
    assert_eq!(preview.batches[1].scheduled_at, now + SECONDS_PER_DAY);

    assert!(ops
        .registry_store()
        .due_batches(now + 10 * SECONDS_PER_DAY, 10)
        .expect("due")
        .is_empty());
}

#[test]
fn toggling_a_locked_flag_surfaces_the_locked_error_code() {
    let mut ops = NpcOps::open_in_memory().expect("ops");
    let now = 1_700_000_000;
    ops.registry_store()
        .upsert_flag(
            &contracts::FeatureFlag {
                key: "npc_autonomy".to_string(),
                enabled: true,
                locked: true,
                description: Some("season freeze".to_string()),
            },
            now,
        )
        .expect("flag");

    let err = ops
        .toggle_feature("npc_autonomy", false, "admin_7", now)
        .expect_err("locked flag must reject");
    assert_eq!(err.api_error().code, ErrorCode::LockedFlag);

    let flag = ops
        .registry_store()
        .flag("npc_autonomy")
        .expect("query")
        .expect("present");
    assert!(flag.enabled);

    // Resolution still answers, locked state verbatim.
    assert!(ops
        .is_enabled("npc_autonomy", None, PlayerKind::Npc)
        .expect("resolve"));
}
