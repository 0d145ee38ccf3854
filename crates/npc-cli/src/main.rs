use std::env;
use std::fs;

use contracts::{PlayerKind, SpawnPreset, WorldConfig};
use npc_ops::{epoch_seconds, NpcOps, OpsError, PlanOverrides, RECOVERY_GRACE_SECS};

fn print_usage() {
    println!("npc-cli <command>");
    println!("commands:");
    println!("  create-world <world_id> [name]");
    println!("  load-preset <path.json>");
    println!("  preview <preset_key>");
    println!("  plan <world_id> <preset_key>");
    println!("  spawn [batch_id]");
    println!("    executes the named batch, or every due batch");
    println!("  decide [world_id] [limit]");
    println!("    default limit: 50");
    println!("  feature <key> <on|off> <admin_id>");
    println!("  check <key> [actor_id] [human|npc]");
    println!("  sweep [grace_secs]");
    println!("    default grace: {RECOVERY_GRACE_SECS}");
    println!("databases (env): NPC_WORLD_DB, NPC_REGISTRY_DB, NPC_PENDING_DB");
}

fn db_path(env_key: &str, default: &str) -> String {
    env::var(env_key)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn open_ops() -> Result<NpcOps, String> {
    NpcOps::open(
        db_path("NPC_WORLD_DB", "world.sqlite"),
        db_path("NPC_REGISTRY_DB", "registry.sqlite"),
        db_path("NPC_PENDING_DB", "pending.sqlite"),
    )
    .map_err(|err| failure_envelope(&err))
}

/// Operator-visible failures are always structured; internal error text is
/// already truncated by the envelope.
fn failure_envelope(err: &OpsError) -> String {
    let api = err.api_error();
    serde_json::json!({
        "success": false,
        "code": api.code,
        "error": api.message,
        "details": api.details,
    })
    .to_string()
}

fn parse_i64(value: Option<&String>, label: &str) -> Result<i64, String> {
    let raw = value.ok_or_else(|| format!("missing {label}"))?;
    raw.parse::<i64>()
        .map_err(|_| format!("invalid {label}: {raw}"))
}

fn run_create_world(args: &[String]) -> Result<(), String> {
    let world_id = args
        .get(2)
        .cloned()
        .ok_or_else(|| "missing world_id".to_string())?;
    let mut config = WorldConfig::default();
    config.world_id = world_id.clone();
    if let Some(name) = args.get(3) {
        config.name = name.clone();
    }
    let mut ops = open_ops()?;
    ops.create_world(&config, epoch_seconds())
        .map_err(|err| failure_envelope(&err))?;
    println!("created world {world_id}");
    Ok(())
}

fn run_load_preset(args: &[String]) -> Result<(), String> {
    let path = args
        .get(2)
        .cloned()
        .ok_or_else(|| "missing preset path".to_string())?;
    let content = fs::read_to_string(&path).map_err(|err| format!("read {path}: {err}"))?;
    let preset: SpawnPreset =
        serde_json::from_str(&content).map_err(|err| format!("parse {path}: {err}"))?;
    preset.validate().map_err(|err| format!("invalid preset: {err}"))?;
    let ops = open_ops()?;
    ops.registry_store()
        .upsert_preset(&preset, epoch_seconds())
        .map_err(|err| failure_envelope(&OpsError::Store(err)))?;
    println!("loaded preset {} (total_npcs={})", preset.key, preset.total_npcs);
    Ok(())
}

fn run_preview(args: &[String]) -> Result<(), String> {
    let preset_key = args
        .get(2)
        .cloned()
        .ok_or_else(|| "missing preset_key".to_string())?;
    let mut ops = open_ops()?;
    let preview = ops
        .preview_spawn_plan(&preset_key, &PlanOverrides::default(), epoch_seconds())
        .map_err(|err| failure_envelope(&err))?;
    println!(
        "preset {} plans {} npcs across {} batches:",
        preview.preset_key,
        preview.total_npcs,
        preview.batches.len()
    );
    for batch in &preview.batches {
        println!(
            "  {:?} count={} scheduled_at={}",
            batch.kind, batch.count, batch.scheduled_at
        );
    }
    Ok(())
}

fn run_plan(args: &[String]) -> Result<(), String> {
    let world_id = args
        .get(2)
        .cloned()
        .ok_or_else(|| "missing world_id".to_string())?;
    let preset_key = args
        .get(3)
        .cloned()
        .ok_or_else(|| "missing preset_key".to_string())?;
    let mut ops = open_ops()?;
    let ids = ops
        .plan_spawn(&world_id, &preset_key, &PlanOverrides::default(), epoch_seconds())
        .map_err(|err| failure_envelope(&err))?;
    println!("planned {} batches: {ids:?}", ids.len());
    Ok(())
}

fn run_spawn(args: &[String]) -> Result<(), String> {
    let batch_id = match args.get(2) {
        Some(raw) => Some(parse_i64(Some(raw), "batch_id")?),
        None => None,
    };
    let mut ops = open_ops()?;
    let reports = ops
        .run_batch_execution(batch_id, epoch_seconds())
        .map_err(|err| failure_envelope(&err))?;
    if reports.is_empty() {
        println!("no batches due");
    }
    for report in &reports {
        println!(
            "batch {} {:?}: spawned {}/{} ({} errors)",
            report.batch_id,
            report.status,
            report.spawned,
            report.requested,
            report.errors.len()
        );
        for error in &report.errors {
            println!("  - {error}");
        }
    }
    Ok(())
}

fn run_decide(args: &[String]) -> Result<(), String> {
    let world_filter = args.get(2).cloned();
    let limit = match args.get(3) {
        Some(raw) => raw
            .parse::<usize>()
            .map_err(|_| format!("invalid limit: {raw}"))?,
        None => 50,
    };
    let mut ops = open_ops()?;
    let report = ops
        .run_decision_cycle(world_filter.as_deref(), limit, epoch_seconds())
        .map_err(|err| failure_envelope(&err))?;
    println!(
        "decided for {} npcs: {} executed, {} errored, {} skipped, {} model-assisted",
        report.considered, report.executed, report.errored, report.skipped, report.model_assisted
    );
    Ok(())
}

fn run_feature(args: &[String]) -> Result<(), String> {
    let key = args
        .get(2)
        .cloned()
        .ok_or_else(|| "missing flag key".to_string())?;
    let enabled = match args.get(3).map(String::as_str) {
        Some("on") => true,
        Some("off") => false,
        other => return Err(format!("expected on|off, got {:?}", other.unwrap_or("nothing"))),
    };
    let admin_id = args
        .get(4)
        .cloned()
        .ok_or_else(|| "missing admin_id".to_string())?;
    let mut ops = open_ops()?;
    let flag = ops
        .toggle_feature(&key, enabled, &admin_id, epoch_seconds())
        .map_err(|err| failure_envelope(&err))?;
    println!("flag {} enabled={} locked={}", flag.key, flag.enabled, flag.locked);
    Ok(())
}

fn run_check(args: &[String]) -> Result<(), String> {
    let key = args
        .get(2)
        .cloned()
        .ok_or_else(|| "missing flag key".to_string())?;
    let actor_id = match args.get(3) {
        Some(raw) => Some(parse_i64(Some(raw), "actor_id")?),
        None => None,
    };
    let actor_kind = match args.get(4).map(String::as_str) {
        Some("human") => PlayerKind::Human,
        Some("npc") | None => PlayerKind::Npc,
        Some(other) => return Err(format!("invalid actor kind: {other}")),
    };
    let mut ops = open_ops()?;
    let enabled = ops
        .is_enabled(&key, actor_id, actor_kind)
        .map_err(|err| failure_envelope(&err))?;
    println!("{key} -> {enabled}");
    Ok(())
}

fn run_sweep(args: &[String]) -> Result<(), String> {
    let grace_secs = match args.get(2) {
        Some(raw) => raw
            .parse::<u64>()
            .map_err(|_| format!("invalid grace_secs: {raw}"))?,
        None => RECOVERY_GRACE_SECS,
    };
    let mut ops = open_ops()?;
    let report = ops
        .run_recovery_sweep(grace_secs, epoch_seconds())
        .map_err(|err| failure_envelope(&err))?;
    println!(
        "sweep: {} scanned, {} finalized, {} repaired, {} world rows removed",
        report.scanned, report.finalized, report.repaired, report.world_rows_removed
    );
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = env::args().collect();
    let command = args.get(1).map(String::as_str).unwrap_or("help");

    let result = match command {
        "create-world" => run_create_world(&args),
        "load-preset" => run_load_preset(&args),
        "preview" => run_preview(&args),
        "plan" => run_plan(&args),
        "spawn" => run_spawn(&args),
        "decide" => run_decide(&args),
        "feature" => run_feature(&args),
        "check" => run_check(&args),
        "sweep" => run_sweep(&args),
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => Err(format!("unknown command: {other}")),
    };

    if let Err(message) = result {
        eprintln!("{message}");
        if !message.starts_with('{') {
            print_usage();
        }
        std::process::exit(1);
    }
}
