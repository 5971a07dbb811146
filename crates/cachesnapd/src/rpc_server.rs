//! RPC server - Unix socket server for daemon-client communication.
//!
//! JSON lines over a Unix socket, one spawned task per connection.
//! Errors cross the wire as their display strings; the exit-code
//! mapping lives client-side.

use crate::alerts::emit;
use crate::control_plane::{with_retry, ControlPlane, RetryPolicy};
use crate::copier::CrossRegionCopier;
use crate::metrics::Metrics;
use crate::policy_store::PolicyStore;
use crate::restore::RestoreOrchestrator;
use crate::scheduler::SnapshotScheduler;
use crate::state::DaemonState;
use crate::tracker::SnapshotTracker;
use anyhow::{Context, Result};
use cachesnap_shared::error::OrchestratorError;
use cachesnap_shared::event::{AlertEvent, AlertKind};
use cachesnap_shared::ipc::{Method, Request, Response, ResponseData, StatusData};
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Everything a connection handler needs, bundled once at startup.
pub struct Daemon {
    pub state: DaemonState,
    pub control: Arc<dyn ControlPlane>,
    pub retry: RetryPolicy,
    pub policies: Arc<PolicyStore>,
    pub tracker: Arc<SnapshotTracker>,
    pub scheduler: Arc<SnapshotScheduler>,
    pub copier: Arc<CrossRegionCopier>,
    pub restores: Arc<RestoreOrchestrator>,
    pub alerts: mpsc::Sender<AlertEvent>,
    pub metrics: Arc<Metrics>,
}

/// Start the RPC server on the configured socket.
pub async fn start_server(daemon: Arc<Daemon>, socket_path: &str) -> Result<()> {
    if let Some(socket_dir) = Path::new(socket_path).parent() {
        tokio::fs::create_dir_all(socket_dir)
            .await
            .context("Failed to create socket directory")?;
    }

    // Remove a stale socket from a previous run
    let _ = tokio::fs::remove_file(socket_path).await;

    let listener = UnixListener::bind(socket_path).context("Failed to bind Unix socket")?;
    info!("RPC server listening on {}", socket_path);

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o660))?;
    }

    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                let daemon = Arc::clone(&daemon);
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, daemon).await {
                        error!("Connection handler error: {}", e);
                    }
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}

/// Handle a single client connection.
async fn handle_connection(stream: UnixStream, daemon: Arc<Daemon>) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        let bytes_read = reader
            .read_line(&mut line)
            .await
            .context("Failed to read from socket")?;

        if bytes_read == 0 {
            break;
        }

        let request: Request = match serde_json::from_str(&line) {
            Ok(req) => req,
            Err(e) => {
                warn!("Invalid request JSON: {}", e);
                continue;
            }
        };

        let response = handle_request(request.id, request.method, &daemon).await;

        let response_json = serde_json::to_string(&response)? + "\n";
        writer
            .write_all(response_json.as_bytes())
            .await
            .context("Failed to write response")?;
    }

    Ok(())
}

/// Handle a single request.
pub async fn handle_request(id: u64, method: Method, daemon: &Daemon) -> Response {
    let result = match method {
        Method::Ping => Ok(ResponseData::Ok),

        Method::Status => {
            let status = StatusData {
                version: daemon.state.version.clone(),
                uptime_seconds: daemon.state.uptime_seconds(),
                policies: daemon.policies.len().await,
                pending_snapshots: daemon.tracker.pending_count().await,
                active_restores: daemon.restores.active_count().await,
                snapshots_triggered: daemon.metrics.snapshots_triggered_total.get(),
                copies_started: daemon.metrics.copies_started_total.get(),
                alerts_dispatched: daemon.metrics.alerts_dispatched_total.get(),
            };
            Ok(ResponseData::Status(status))
        }

        Method::PolicyGet { cluster_id } => match daemon.policies.get(&cluster_id).await {
            Some(policy) => Ok(ResponseData::Policy(policy)),
            None => Err(OrchestratorError::UnknownCluster(cluster_id).to_string()),
        },

        Method::PolicySet { policy } => {
            match daemon.policies.set(policy.clone()).await {
                Ok(()) => {
                    // Push the automatic config now; the drift loop
                    // reconciles later if this attempt fails.
                    if let Err(e) = daemon.scheduler.apply_automatic(&policy).await {
                        warn!(
                            "Stored policy for {} but applying it failed: {}",
                            policy.cluster_id, e
                        );
                    }
                    Ok(ResponseData::Policy(policy))
                }
                Err(e) => Err(e.to_string()),
            }
        }

        Method::PolicyList => Ok(ResponseData::Policies(daemon.policies.all().await)),

        Method::PolicyRemove { cluster_id } => match daemon.policies.remove(&cluster_id).await {
            Ok(true) => Ok(ResponseData::Ok),
            Ok(false) => Err(OrchestratorError::UnknownCluster(cluster_id).to_string()),
            Err(e) => Err(e.to_string()),
        },

        Method::TriggerSnapshot { cluster_id, reason } => daemon
            .scheduler
            .trigger_manual(&cluster_id, &reason)
            .await
            .map(ResponseData::Snapshot)
            .map_err(|e| e.to_string()),

        Method::PreChangeSnapshot { cluster_id, change } => daemon
            .scheduler
            .snapshot_before_change(&cluster_id, change)
            .await
            .map(ResponseData::Snapshot)
            .map_err(|e| e.to_string()),

        Method::ListSnapshots { cluster_id } => Ok(ResponseData::Snapshots(
            daemon.tracker.history(cluster_id.as_deref()).await,
        )),

        Method::DeleteSnapshot { snapshot_id } => {
            delete_snapshot(daemon, &snapshot_id).await.map_err(|e| e.to_string())
        }

        Method::StartCopy {
            snapshot_id,
            target_region,
        } => daemon
            .copier
            .copy(&snapshot_id, &target_region)
            .await
            .map(ResponseData::Snapshot)
            .map_err(|e| e.to_string()),

        Method::BeginRestore { spec } => daemon
            .restores
            .begin(spec)
            .await
            .map(ResponseData::Restore)
            .map_err(|e| e.to_string()),

        Method::ConfirmWarmup { restore_id } => daemon
            .restores
            .confirm_warmup(&restore_id)
            .await
            .map(ResponseData::Restore)
            .map_err(|e| e.to_string()),

        Method::Cutover { restore_id } => daemon
            .restores
            .cutover(&restore_id)
            .await
            .map(ResponseData::Restore)
            .map_err(|e| e.to_string()),

        Method::AbortRestore { restore_id } => daemon
            .restores
            .abort(&restore_id)
            .await
            .map(ResponseData::Restore)
            .map_err(|e| e.to_string()),

        Method::ListRestores => Ok(ResponseData::Restores(daemon.restores.list().await)),

        Method::Decommission { cluster_id } => daemon
            .restores
            .decommission(&cluster_id)
            .await
            .map(|()| ResponseData::Ok)
            .map_err(|e| e.to_string()),
    };

    Response { id, result }
}

/// Delete a snapshot on the control plane. Tracker history is an
/// append-only audit trail and keeps the record; an alert marks the
/// deletion.
async fn delete_snapshot(
    daemon: &Daemon,
    snapshot_id: &str,
) -> Result<ResponseData, OrchestratorError> {
    let record = daemon
        .tracker
        .get(snapshot_id)
        .await
        .ok_or_else(|| OrchestratorError::UnknownSnapshot(snapshot_id.to_string()))?;

    with_retry(&daemon.retry, "delete_snapshot", || {
        daemon.control.delete_snapshot(snapshot_id)
    })
    .await?;

    info!("Deleted snapshot {} on operator request", snapshot_id);
    emit(
        &daemon.alerts,
        AlertEvent::new(
            AlertKind::SnapshotDeleted,
            &record.cluster_id,
            format!("snapshot {} deleted by operator request", snapshot_id),
        )
        .with_snapshot(snapshot_id),
    );
    Ok(ResponseData::Ok)
}
