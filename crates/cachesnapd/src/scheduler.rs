//! Snapshot scheduler - manual triggers and automatic-config upkeep.
//!
//! Manual and pre-change snapshots share one conflict gate: the
//! tracker's pending set is the source of truth, so only one
//! operator-initiated snapshot can be in flight per cluster. Automatic
//! configuration is applied idempotently and re-checked for drift on
//! an interval.

use crate::alerts::emit;
use crate::control_plane::{with_retry, BackupConfig, ControlPlane, RetryPolicy};
use crate::metrics::Metrics;
use crate::policy_store::PolicyStore;
use crate::tracker::SnapshotTracker;
use cachesnap_shared::error::OrchestratorError;
use cachesnap_shared::event::{AlertEvent, AlertKind};
use cachesnap_shared::policy::BackupPolicy;
use cachesnap_shared::snapshot::{ChangeEvent, SnapshotRecord, SnapshotTrigger};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub struct SnapshotScheduler {
    control: Arc<dyn ControlPlane>,
    retry: RetryPolicy,
    region: String,
    policies: Arc<PolicyStore>,
    tracker: Arc<SnapshotTracker>,
    alerts: mpsc::Sender<AlertEvent>,
    metrics: Arc<Metrics>,
}

impl SnapshotScheduler {
    pub fn new(
        control: Arc<dyn ControlPlane>,
        retry: RetryPolicy,
        region: &str,
        policies: Arc<PolicyStore>,
        tracker: Arc<SnapshotTracker>,
        alerts: mpsc::Sender<AlertEvent>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            control,
            retry,
            region: region.to_string(),
            policies,
            tracker,
            alerts,
            metrics,
        }
    }

    /// Push the policy's automatic-backup configuration to the control
    /// plane. Idempotent: when retention and window already match, no
    /// call is made and `Ok(false)` is returned.
    pub async fn apply_automatic(&self, policy: &BackupPolicy) -> Result<bool, OrchestratorError> {
        policy.validate()?;

        let desired = BackupConfig {
            retention_days: policy.retention_days,
            window: policy.window,
        };
        let current = with_retry(&self.retry, "describe_backup_config", || {
            self.control.describe_backup_config(&policy.cluster_id)
        })
        .await?;

        if current == desired {
            debug!(
                "Automatic config for {} already matches policy ({}d, {})",
                policy.cluster_id, policy.retention_days, policy.window
            );
            return Ok(false);
        }

        with_retry(&self.retry, "apply_backup_config", || {
            self.control.apply_backup_config(&policy.cluster_id, &desired)
        })
        .await?;
        info!(
            "Applied automatic snapshot config for {}: retention {}d, window {}",
            policy.cluster_id, policy.retention_days, policy.window
        );
        Ok(true)
    }

    /// Trigger an operator-requested snapshot. Fails with
    /// `SchedulingConflict` while another manual or pre-change snapshot
    /// is pending for the cluster.
    pub async fn trigger_manual(
        &self,
        cluster_id: &str,
        reason: &str,
    ) -> Result<SnapshotRecord, OrchestratorError> {
        self.trigger(cluster_id, SnapshotTrigger::Manual, reason).await
    }

    /// Synchronous pre-change snapshot ahead of a classified change
    /// event. Same conflict gate as manual triggers.
    pub async fn snapshot_before_change(
        &self,
        cluster_id: &str,
        change: ChangeEvent,
    ) -> Result<SnapshotRecord, OrchestratorError> {
        self.trigger(
            cluster_id,
            SnapshotTrigger::PreChange,
            &format!("pre-change: {}", change),
        )
        .await
    }

    async fn trigger(
        &self,
        cluster_id: &str,
        trigger: SnapshotTrigger,
        reason: &str,
    ) -> Result<SnapshotRecord, OrchestratorError> {
        let record = SnapshotRecord::new(cluster_id, trigger, &self.region).with_reason(reason);

        // Reserve the per-cluster slot before talking to the control
        // plane; the tracker checks and inserts under one lock, so a
        // concurrent trigger cannot slip past while create_snapshot is
        // still in flight.
        self.tracker.reserve(record.clone()).await?;

        if let Err(e) = with_retry(&self.retry, "create_snapshot", || {
            self.control.create_snapshot(&record)
        })
        .await
        {
            self.tracker.withdraw(&record.id).await;
            return Err(e);
        }

        self.metrics.snapshots_triggered_total.inc();
        info!("Triggered {} snapshot {} ({})", trigger, record.id, reason);
        Ok(record)
    }

    /// Compare stored policies against the control plane and re-apply
    /// on mismatch. Every divergence raises a `ConfigDrift` alert.
    pub async fn drift_check(&self) {
        for policy in self.policies.all().await {
            let desired = BackupConfig {
                retention_days: policy.retention_days,
                window: policy.window,
            };
            let current = match with_retry(&self.retry, "describe_backup_config", || {
                self.control.describe_backup_config(&policy.cluster_id)
            })
            .await
            {
                Ok(c) => c,
                Err(e) => {
                    warn!("Drift check for {} failed: {}", policy.cluster_id, e);
                    continue;
                }
            };

            if current == desired {
                continue;
            }

            warn!(
                "Automatic config drift on {}: provider has {}d/{}, policy wants {}d/{}",
                policy.cluster_id,
                current.retention_days,
                current.window,
                desired.retention_days,
                desired.window
            );
            emit(
                &self.alerts,
                AlertEvent::new(
                    AlertKind::ConfigDrift,
                    &policy.cluster_id,
                    format!(
                        "automatic config drifted to {}d/{}, re-applying {}d/{}",
                        current.retention_days,
                        current.window,
                        desired.retention_days,
                        desired.window
                    ),
                ),
            );

            if let Err(e) = self.apply_automatic(&policy).await {
                warn!("Re-apply after drift on {} failed: {}", policy.cluster_id, e);
            }
        }
    }

    /// Spawn the independent drift-check loop.
    pub fn spawn_drift_loop(self: &Arc<Self>, interval: Duration) {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                scheduler.drift_check().await;
            }
        });
    }
}
