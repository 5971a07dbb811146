//! Restore orchestrator - blue-green restore sequencing.
//!
//! One active restore per target cluster; different targets proceed
//! independently. Cutover is gated on an explicit warm-up confirmation
//! (the shadow-read validation signal). Decommission of the old
//! cluster is a separate operator action, never automatic, so a bad
//! cutover can still be rolled back.

use crate::alerts::emit;
use crate::control_plane::{with_retry, ClusterStatus, ControlPlane, RetryPolicy};
use crate::metrics::Metrics;
use crate::tracker::SnapshotTracker;
use cachesnap_shared::error::OrchestratorError;
use cachesnap_shared::event::{AlertEvent, AlertKind};
use cachesnap_shared::restore::{RestorePhase, RestoreRequest, RestoreSpec};
use cachesnap_shared::snapshot::SnapshotStatus;
use chrono::Utc;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, RwLock};
use tracing::{info, warn};

const RESTORE_JOURNAL_FILE: &str = "restores.jsonl";

pub struct RestoreOrchestrator {
    control: Arc<dyn ControlPlane>,
    retry: RetryPolicy,
    tracker: Arc<SnapshotTracker>,
    /// Non-terminal requests by restore id
    active: RwLock<HashMap<String, RestoreRequest>>,
    journal_path: PathBuf,
    alerts: mpsc::Sender<AlertEvent>,
    metrics: Arc<Metrics>,
}

impl RestoreOrchestrator {
    pub fn new(
        control: Arc<dyn ControlPlane>,
        retry: RetryPolicy,
        tracker: Arc<SnapshotTracker>,
        data_dir: &Path,
        alerts: mpsc::Sender<AlertEvent>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            control,
            retry,
            tracker,
            active: RwLock::new(HashMap::new()),
            journal_path: data_dir.join(RESTORE_JOURNAL_FILE),
            alerts,
            metrics,
        }
    }

    /// Start a restore: validate the source snapshot, reserve the
    /// target cluster, and ask the control plane to build it.
    pub async fn begin(&self, spec: RestoreSpec) -> Result<RestoreRequest, OrchestratorError> {
        let source = self
            .tracker
            .get(&spec.snapshot_id)
            .await
            .ok_or_else(|| OrchestratorError::UnknownSnapshot(spec.snapshot_id.clone()))?;
        if source.status != SnapshotStatus::Available {
            return Err(OrchestratorError::SourceNotReady {
                snapshot_id: spec.snapshot_id.clone(),
            });
        }

        let request = RestoreRequest::new(spec);
        {
            // Same-target requests are serialized: reserve before the
            // control-plane call so a concurrent begin loses here.
            let mut active = self.active.write().await;
            if active
                .values()
                .any(|r| r.target_cluster_id == request.target_cluster_id)
            {
                return Err(OrchestratorError::RestoreConflict {
                    cluster_id: request.target_cluster_id,
                });
            }
            active.insert(request.id.clone(), request.clone());
        }

        let created = with_retry(&self.retry, "create_cluster_from_snapshot", || {
            self.control.create_cluster_from_snapshot(
                &request.target_cluster_id,
                &request.snapshot_id,
                &request.node_type,
                request.multi_az,
            )
        })
        .await;

        if let Err(e) = created {
            self.active.write().await.remove(&request.id);
            return Err(e);
        }

        let request = {
            let mut active = self.active.write().await;
            match active.get_mut(&request.id) {
                Some(stored) => {
                    stored.advance(RestorePhase::Restoring)?;
                    stored.clone()
                }
                // Aborted while the control plane was building the
                // target; the abort already archived the request.
                None => return Err(OrchestratorError::UnknownRestore(request.id.clone())),
            }
        };
        self.metrics.restores_begun_total.inc();
        info!(
            "Restore {} begun: {} from snapshot {}",
            request.id, request.target_cluster_id, request.snapshot_id
        );
        self.phase_alert(&request);
        Ok(request)
    }

    /// One poll pass: restoring targets that the control plane reports
    /// available move to warming.
    pub async fn poll_once(&self) {
        let restoring: Vec<RestoreRequest> = self
            .active
            .read()
            .await
            .values()
            .filter(|r| r.phase == RestorePhase::Restoring)
            .cloned()
            .collect();

        for request in restoring {
            let status = match with_retry(&self.retry, "describe_cluster", || {
                self.control.describe_cluster(&request.target_cluster_id)
            })
            .await
            {
                Ok(s) => s,
                Err(e) => {
                    warn!(
                        "Describe of restore target {} failed: {}",
                        request.target_cluster_id, e
                    );
                    continue;
                }
            };

            if status != ClusterStatus::Available {
                continue;
            }

            // Re-check under the write lock: the request may have been
            // aborted while the describe was in flight, and a finished
            // request must never be re-inserted into the active set.
            let warmed = {
                let mut active = self.active.write().await;
                match active.get_mut(&request.id) {
                    Some(stored) if stored.phase == RestorePhase::Restoring => {
                        match stored.advance(RestorePhase::Warming) {
                            Ok(()) => Some(stored.clone()),
                            Err(_) => None,
                        }
                    }
                    _ => None,
                }
            };

            if let Some(request) = warmed {
                info!(
                    "Restore {} target {} is up, warming",
                    request.id, request.target_cluster_id
                );
                self.phase_alert(&request);
            }
        }
    }

    /// Record the external shadow-read validation signal.
    pub async fn confirm_warmup(&self, restore_id: &str) -> Result<RestoreRequest, OrchestratorError> {
        let mut active = self.active.write().await;
        let request = active
            .get_mut(restore_id)
            .ok_or_else(|| OrchestratorError::UnknownRestore(restore_id.to_string()))?;
        if request.phase != RestorePhase::Warming {
            return Err(OrchestratorError::PhaseViolation {
                restore_id: restore_id.to_string(),
                phase: request.phase.to_string(),
            });
        }
        request.warmup_confirmed = true;
        info!("Restore {} warm-up confirmed", restore_id);
        Ok(request.clone())
    }

    /// Re-point traffic at the restored cluster. Refused with
    /// `WarmupIncomplete` until the warming phase has been explicitly
    /// confirmed.
    pub async fn cutover(&self, restore_id: &str) -> Result<RestoreRequest, OrchestratorError> {
        // Claim the transition under the write lock. A concurrent
        // cutover for the same restore finds the phase already moved
        // and is refused before it can reach the control plane.
        let mut request = {
            let mut active = self.active.write().await;
            let stored = active
                .get_mut(restore_id)
                .ok_or_else(|| OrchestratorError::UnknownRestore(restore_id.to_string()))?;
            if stored.phase != RestorePhase::Warming || !stored.warmup_confirmed {
                return Err(OrchestratorError::WarmupIncomplete {
                    restore_id: restore_id.to_string(),
                });
            }
            stored.advance(RestorePhase::Cutover)?;
            stored.clone()
        };

        if let Err(e) = with_retry(&self.retry, "promote_cluster", || {
            self.control.promote_cluster(&request.target_cluster_id)
        })
        .await
        {
            // Release the claim so the operator can retry or abort.
            let mut active = self.active.write().await;
            if let Some(stored) = active.get_mut(restore_id) {
                stored.phase = RestorePhase::Warming;
                stored.updated_at = Utc::now();
            }
            return Err(e);
        }

        self.phase_alert(&request);
        request.advance(RestorePhase::Complete)?;
        info!(
            "Restore {} complete, traffic on {}",
            request.id, request.target_cluster_id
        );
        self.phase_alert(&request);
        self.archive(request.clone()).await;
        Ok(request)
    }

    /// Abort a non-terminal restore. The half-built target cluster is
    /// left in place for inspection; decommission it explicitly.
    pub async fn abort(&self, restore_id: &str) -> Result<RestoreRequest, OrchestratorError> {
        let request = {
            let mut active = self.active.write().await;
            let stored = active
                .get_mut(restore_id)
                .ok_or_else(|| OrchestratorError::UnknownRestore(restore_id.to_string()))?;
            stored.advance(RestorePhase::Aborted)?;
            let request = stored.clone();
            active.remove(restore_id);
            request
        };
        warn!("Restore {} aborted in flight", request.id);
        self.phase_alert(&request);
        if let Err(e) = self.append_journal(&request).await {
            warn!("Failed to journal restore {}: {}", request.id, e);
        }
        Ok(request)
    }

    /// Delete a cluster. Refused while any active restore targets it;
    /// this is the only deletion path and it is always operator-driven.
    pub async fn decommission(&self, cluster_id: &str) -> Result<(), OrchestratorError> {
        {
            let active = self.active.read().await;
            if active.values().any(|r| r.target_cluster_id == cluster_id) {
                return Err(OrchestratorError::RestoreConflict {
                    cluster_id: cluster_id.to_string(),
                });
            }
        }

        with_retry(&self.retry, "delete_cluster", || {
            self.control.delete_cluster(cluster_id)
        })
        .await?;
        info!("Cluster {} decommissioned", cluster_id);
        emit(
            &self.alerts,
            AlertEvent::new(
                AlertKind::ClusterDecommissioned,
                cluster_id,
                "cluster deleted by operator request",
            ),
        );
        Ok(())
    }

    pub async fn list(&self) -> Vec<RestoreRequest> {
        let mut list: Vec<RestoreRequest> = self.active.read().await.values().cloned().collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        list
    }

    pub async fn get(&self, restore_id: &str) -> Option<RestoreRequest> {
        self.active.read().await.get(restore_id).cloned()
    }

    pub async fn active_count(&self) -> usize {
        self.active.read().await.len()
    }

    /// Terminal requests leave the active set and go to the journal.
    /// A request that is already gone was archived by a concurrent
    /// abort and is left alone.
    async fn archive(&self, request: RestoreRequest) {
        if self.active.write().await.remove(&request.id).is_none() {
            return;
        }
        if let Err(e) = self.append_journal(&request).await {
            warn!("Failed to journal restore {}: {}", request.id, e);
        }
    }

    fn phase_alert(&self, request: &RestoreRequest) {
        emit(
            &self.alerts,
            AlertEvent::new(
                AlertKind::RestorePhase,
                &request.target_cluster_id,
                format!("restore {} entered {}", request.id, request.phase),
            )
            .with_snapshot(&request.snapshot_id),
        );
    }

    async fn append_journal(&self, request: &RestoreRequest) -> Result<(), OrchestratorError> {
        let json = serde_json::to_string(request)? + "\n";
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.journal_path)
            .await?;
        file.write_all(json.as_bytes()).await?;
        Ok(())
    }

    /// Spawn the independent restore poll loop.
    pub fn spawn_poll_loop(self: &Arc<Self>, interval: Duration) {
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                orchestrator.poll_once().await;
            }
        });
    }
}
