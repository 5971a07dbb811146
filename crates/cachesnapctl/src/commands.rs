//! Command handlers for cachesnapctl.

use crate::rpc_client::RpcClient;
use anyhow::{bail, Result};
use cachesnap_shared::ipc::{Method, ResponseData, StatusData};
use cachesnap_shared::policy::{BackupPolicy, ClusterTier, SnapshotWindow};
use cachesnap_shared::restore::{RestorePhase, RestoreRequest, RestoreSpec};
use cachesnap_shared::snapshot::{ChangeEvent, SnapshotRecord, SnapshotStatus};
use console::style;
use owo_colors::OwoColorize;

const KEY_WIDTH: usize = 18;

pub async fn status(socket: Option<&str>) -> Result<()> {
    let mut client = RpcClient::connect(socket).await?;
    let data = client.call(Method::Status).await?;

    let ResponseData::Status(status) = data else {
        bail!("Unexpected response to Status");
    };
    print_status(&status);
    Ok(())
}

fn print_status(status: &StatusData) {
    println!();
    println!("{}", format!("cachesnapd v{}", status.version).bold());
    println!("{}", style("─".repeat(44)).dim());
    print_kv("uptime", &format_duration(status.uptime_seconds));
    print_kv("policies", &status.policies.to_string());
    print_kv("pending_snapshots", &status.pending_snapshots.to_string());
    print_kv("active_restores", &status.active_restores.to_string());
    print_kv("snapshots_triggered", &status.snapshots_triggered.to_string());
    print_kv("copies_started", &status.copies_started.to_string());
    print_kv("alerts_dispatched", &status.alerts_dispatched.to_string());
    println!("{}", style("─".repeat(44)).dim());
    println!();
}

fn print_kv(key: &str, value: &str) {
    println!("{:KEY_WIDTH$}  {}", key, value);
}

fn format_duration(secs: u64) -> String {
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}

// ============================================================================
// Policies
// ============================================================================

pub async fn policy_get(socket: Option<&str>, cluster_id: &str) -> Result<()> {
    let mut client = RpcClient::connect(socket).await?;
    let data = client
        .call(Method::PolicyGet {
            cluster_id: cluster_id.to_string(),
        })
        .await?;
    let ResponseData::Policy(policy) = data else {
        bail!("Unexpected response to PolicyGet");
    };
    print_policy(&policy);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub async fn policy_set(
    socket: Option<&str>,
    cluster_id: &str,
    retention: u8,
    window: &str,
    reserved_memory: u8,
    copy_to_region: Option<String>,
    tier: &str,
) -> Result<()> {
    let policy = BackupPolicy {
        cluster_id: cluster_id.to_string(),
        retention_days: retention,
        window: parse_window(window)?,
        reserved_memory_percent: reserved_memory,
        copy_to_region,
        tier: parse_tier(tier)?,
    };

    let mut client = RpcClient::connect(socket).await?;
    let data = client.call(Method::PolicySet { policy }).await?;
    let ResponseData::Policy(policy) = data else {
        bail!("Unexpected response to PolicySet");
    };
    println!("{} policy stored for {}", "ok".green(), policy.cluster_id);
    print_policy(&policy);
    Ok(())
}

pub async fn policy_list(socket: Option<&str>) -> Result<()> {
    let mut client = RpcClient::connect(socket).await?;
    let data = client.call(Method::PolicyList).await?;
    let ResponseData::Policies(policies) = data else {
        bail!("Unexpected response to PolicyList");
    };

    if policies.is_empty() {
        println!("No policies stored.");
        return Ok(());
    }

    println!(
        "{:28} {:>9} {:>10} {:>9} {:14} {}",
        style("CLUSTER").dim(),
        style("RETENTION").dim(),
        style("WINDOW").dim(),
        style("RESERVED").dim(),
        style("COPY TO").dim(),
        style("TIER").dim()
    );
    for p in policies {
        println!(
            "{:28} {:>8}d {:>10} {:>8}% {:14} {}",
            p.cluster_id,
            p.retention_days,
            p.window.to_string(),
            p.reserved_memory_percent,
            p.copy_to_region.as_deref().unwrap_or("-"),
            p.tier
        );
    }
    Ok(())
}

pub async fn policy_remove(socket: Option<&str>, cluster_id: &str) -> Result<()> {
    let mut client = RpcClient::connect(socket).await?;
    client
        .call(Method::PolicyRemove {
            cluster_id: cluster_id.to_string(),
        })
        .await?;
    println!("{} policy removed for {}", "ok".green(), cluster_id);
    Ok(())
}

fn print_policy(policy: &BackupPolicy) {
    println!();
    print_kv("cluster", &policy.cluster_id);
    print_kv("retention", &format!("{} days", policy.retention_days));
    print_kv("window", &policy.window.to_string());
    print_kv(
        "reserved_memory",
        &format!("{}%", policy.reserved_memory_percent),
    );
    print_kv(
        "copy_to_region",
        policy.copy_to_region.as_deref().unwrap_or("-"),
    );
    print_kv("tier", &policy.tier.to_string());
    println!();
}

/// Parse a window argument of the form `HH:MM+MINUTESm`, e.g. `03:30+90m`.
fn parse_window(input: &str) -> Result<SnapshotWindow> {
    let err = || anyhow::anyhow!("Window must look like HH:MM+MINUTESm, e.g. 03:30+90m");

    let (time, duration) = input.split_once('+').ok_or_else(err)?;
    let (hour, minute) = time.split_once(':').ok_or_else(err)?;
    let duration = duration.strip_suffix('m').ok_or_else(err)?;

    Ok(SnapshotWindow::new(
        hour.parse().map_err(|_| err())?,
        minute.parse().map_err(|_| err())?,
        duration.parse().map_err(|_| err())?,
    ))
}

fn parse_tier(input: &str) -> Result<ClusterTier> {
    match input {
        "staging" => Ok(ClusterTier::Staging),
        "production" => Ok(ClusterTier::Production),
        other => bail!("Unknown tier '{}': expected staging or production", other),
    }
}

// ============================================================================
// Snapshots
// ============================================================================

pub async fn snapshot_trigger(socket: Option<&str>, cluster_id: &str, reason: &str) -> Result<()> {
    let mut client = RpcClient::connect(socket).await?;
    let data = client
        .call(Method::TriggerSnapshot {
            cluster_id: cluster_id.to_string(),
            reason: reason.to_string(),
        })
        .await?;
    let ResponseData::Snapshot(record) = data else {
        bail!("Unexpected response to TriggerSnapshot");
    };
    println!("{} snapshot {} triggered", "ok".green(), record.id);
    Ok(())
}

pub async fn snapshot_prechange(socket: Option<&str>, cluster_id: &str, change: &str) -> Result<()> {
    let change = match change {
        "deploy" => ChangeEvent::Deploy,
        "parameter-change" => ChangeEvent::ParameterChange,
        "version-upgrade" => ChangeEvent::VersionUpgrade,
        other => bail!(
            "Unknown change '{}': expected deploy, parameter-change, or version-upgrade",
            other
        ),
    };

    let mut client = RpcClient::connect(socket).await?;
    let data = client
        .call(Method::PreChangeSnapshot {
            cluster_id: cluster_id.to_string(),
            change,
        })
        .await?;
    let ResponseData::Snapshot(record) = data else {
        bail!("Unexpected response to PreChangeSnapshot");
    };
    println!("{} pre-change snapshot {} triggered", "ok".green(), record.id);
    Ok(())
}

pub async fn snapshot_list(socket: Option<&str>, cluster: Option<String>) -> Result<()> {
    let mut client = RpcClient::connect(socket).await?;
    let data = client.call(Method::ListSnapshots { cluster_id: cluster }).await?;
    let ResponseData::Snapshots(mut records) = data else {
        bail!("Unexpected response to ListSnapshots");
    };

    if records.is_empty() {
        println!("No snapshots tracked.");
        return Ok(());
    }
    records.sort_by(|a, b| a.created_at.cmp(&b.created_at));

    println!(
        "{:44} {:10} {:10} {:12} {:>10}",
        style("SNAPSHOT").dim(),
        style("TRIGGER").dim(),
        style("STATUS").dim(),
        style("REGION").dim(),
        style("SIZE").dim()
    );
    for r in records {
        println!(
            "{:44} {:10} {:10} {:12} {:>10}",
            r.id,
            r.trigger.to_string(),
            colored_status(&r),
            r.region,
            r.size_bytes.map(format_bytes).unwrap_or_else(|| "-".to_string())
        );
    }
    Ok(())
}

pub async fn snapshot_delete(socket: Option<&str>, snapshot_id: &str) -> Result<()> {
    let mut client = RpcClient::connect(socket).await?;
    client
        .call(Method::DeleteSnapshot {
            snapshot_id: snapshot_id.to_string(),
        })
        .await?;
    println!("{} snapshot {} deleted", "ok".green(), snapshot_id);
    Ok(())
}

fn colored_status(record: &SnapshotRecord) -> String {
    match record.status {
        SnapshotStatus::Pending => record.status.to_string().yellow().to_string(),
        SnapshotStatus::Available => record.status.to_string().green().to_string(),
        SnapshotStatus::Failed => record.status.to_string().red().to_string(),
    }
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

// ============================================================================
// Copy and restore
// ============================================================================

pub async fn copy(socket: Option<&str>, snapshot_id: &str, target_region: &str) -> Result<()> {
    let mut client = RpcClient::connect(socket).await?;
    let data = client
        .call(Method::StartCopy {
            snapshot_id: snapshot_id.to_string(),
            target_region: target_region.to_string(),
        })
        .await?;
    let ResponseData::Snapshot(record) = data else {
        bail!("Unexpected response to StartCopy");
    };
    println!(
        "{} copying {} to {} as {}",
        "ok".green(),
        snapshot_id,
        target_region,
        record.id
    );
    Ok(())
}

pub async fn restore_begin(
    socket: Option<&str>,
    target: &str,
    snapshot: &str,
    node_type: &str,
    multi_az: bool,
) -> Result<()> {
    let spec = RestoreSpec {
        target_cluster_id: target.to_string(),
        snapshot_id: snapshot.to_string(),
        node_type: node_type.to_string(),
        multi_az,
    };

    let mut client = RpcClient::connect(socket).await?;
    let data = client.call(Method::BeginRestore { spec }).await?;
    let ResponseData::Restore(restore) = data else {
        bail!("Unexpected response to BeginRestore");
    };
    println!("{} restore {} begun", "ok".green(), restore.id);
    print_restore(&restore);
    Ok(())
}

pub async fn restore_confirm(socket: Option<&str>, restore_id: &str) -> Result<()> {
    let mut client = RpcClient::connect(socket).await?;
    let data = client
        .call(Method::ConfirmWarmup {
            restore_id: restore_id.to_string(),
        })
        .await?;
    let ResponseData::Restore(restore) = data else {
        bail!("Unexpected response to ConfirmWarmup");
    };
    println!(
        "{} warm-up confirmed for restore {}; cutover is now allowed",
        "ok".green(),
        restore.id
    );
    Ok(())
}

pub async fn restore_cutover(socket: Option<&str>, restore_id: &str) -> Result<()> {
    let mut client = RpcClient::connect(socket).await?;
    let data = client
        .call(Method::Cutover {
            restore_id: restore_id.to_string(),
        })
        .await?;
    let ResponseData::Restore(restore) = data else {
        bail!("Unexpected response to Cutover");
    };
    println!(
        "{} traffic now on {} (restore {})",
        "ok".green(),
        restore.target_cluster_id,
        restore.id
    );
    Ok(())
}

pub async fn restore_abort(socket: Option<&str>, restore_id: &str) -> Result<()> {
    let mut client = RpcClient::connect(socket).await?;
    let data = client
        .call(Method::AbortRestore {
            restore_id: restore_id.to_string(),
        })
        .await?;
    let ResponseData::Restore(restore) = data else {
        bail!("Unexpected response to AbortRestore");
    };
    println!("{} restore {} aborted", "ok".yellow(), restore.id);
    Ok(())
}

pub async fn restore_list(socket: Option<&str>) -> Result<()> {
    let mut client = RpcClient::connect(socket).await?;
    let data = client.call(Method::ListRestores).await?;
    let ResponseData::Restores(restores) = data else {
        bail!("Unexpected response to ListRestores");
    };

    if restores.is_empty() {
        println!("No active restores.");
        return Ok(());
    }

    println!(
        "{:38} {:28} {:12} {}",
        style("RESTORE").dim(),
        style("TARGET").dim(),
        style("PHASE").dim(),
        style("WARMUP").dim()
    );
    for r in restores {
        println!(
            "{:38} {:28} {:12} {}",
            r.id,
            r.target_cluster_id,
            colored_phase(&r),
            if r.warmup_confirmed { "confirmed" } else { "-" }
        );
    }
    Ok(())
}

pub async fn decommission(socket: Option<&str>, cluster_id: &str) -> Result<()> {
    let mut client = RpcClient::connect(socket).await?;
    client
        .call(Method::Decommission {
            cluster_id: cluster_id.to_string(),
        })
        .await?;
    println!("{} cluster {} decommissioned", "ok".green(), cluster_id);
    Ok(())
}

fn print_restore(restore: &RestoreRequest) {
    println!();
    print_kv("restore", &restore.id);
    print_kv("target", &restore.target_cluster_id);
    print_kv("snapshot", &restore.snapshot_id);
    print_kv("node_type", &restore.node_type);
    print_kv("multi_az", if restore.multi_az { "yes" } else { "no" });
    print_kv("phase", &restore.phase.to_string());
    println!();
}

fn colored_phase(restore: &RestoreRequest) -> String {
    match restore.phase {
        RestorePhase::Complete => restore.phase.to_string().green().to_string(),
        RestorePhase::Aborted => restore.phase.to_string().red().to_string(),
        RestorePhase::Warming => restore.phase.to_string().yellow().to_string(),
        _ => restore.phase.to_string(),
    }
}
