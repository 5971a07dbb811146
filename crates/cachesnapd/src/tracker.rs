//! Snapshot tracker - observes snapshot status until terminal.
//!
//! The tracker polls the control plane on an independent loop and is
//! the only component that finalizes a record. Terminal records go to
//! an append-only JSONL journal and the in-memory history; they are
//! never mutated again. Failed snapshots are surfaced, never retried:
//! a stale automatic retry could race with the next scheduled window.

use crate::alerts::emit;
use crate::control_plane::{with_retry, ControlPlane, RetryPolicy};
use crate::metrics::Metrics;
use cachesnap_shared::error::OrchestratorError;
use cachesnap_shared::event::{AlertEvent, AlertKind};
use cachesnap_shared::snapshot::{SnapshotRecord, SnapshotStatus, SnapshotTrigger};
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

const SNAPSHOT_JOURNAL_FILE: &str = "snapshots.jsonl";

#[derive(Default)]
struct TrackerInner {
    pending: HashMap<String, SnapshotRecord>,
    history: Vec<SnapshotRecord>,
    overdue_alerted: HashSet<String>,
}

pub struct SnapshotTracker {
    control: Arc<dyn ControlPlane>,
    retry: RetryPolicy,
    journal_path: PathBuf,
    pending_alert_after: Duration,
    alerts: mpsc::Sender<AlertEvent>,
    /// Every finalized record is published here (copy worker input)
    completions: mpsc::Sender<SnapshotRecord>,
    metrics: Arc<Metrics>,
    inner: RwLock<TrackerInner>,
}

impl SnapshotTracker {
    pub async fn load(
        control: Arc<dyn ControlPlane>,
        retry: RetryPolicy,
        data_dir: &Path,
        pending_alert_after: Duration,
        alerts: mpsc::Sender<AlertEvent>,
        completions: mpsc::Sender<SnapshotRecord>,
        metrics: Arc<Metrics>,
    ) -> Result<Self, OrchestratorError> {
        tokio::fs::create_dir_all(data_dir).await?;
        let journal_path = data_dir.join(SNAPSHOT_JOURNAL_FILE);

        let mut history = Vec::new();
        if journal_path.exists() {
            let contents = tokio::fs::read_to_string(&journal_path).await?;
            for line in contents.lines().filter(|l| !l.trim().is_empty()) {
                match serde_json::from_str::<SnapshotRecord>(line) {
                    Ok(record) => history.push(record),
                    Err(e) => warn!("Skipping malformed journal line: {}", e),
                }
            }
            info!(
                "Loaded {} snapshot records from {}",
                history.len(),
                journal_path.display()
            );
        }

        Ok(Self {
            control,
            retry,
            journal_path,
            pending_alert_after,
            alerts,
            completions,
            metrics,
            inner: RwLock::new(TrackerInner {
                history,
                ..TrackerInner::default()
            }),
        })
    }

    /// Admit a pending record for observation.
    pub async fn register(&self, record: SnapshotRecord) -> Result<(), OrchestratorError> {
        let mut inner = self.inner.write().await;
        if inner.pending.contains_key(&record.id) {
            return Err(OrchestratorError::SchedulingConflict {
                cluster_id: record.cluster_id,
            });
        }
        debug!("Tracking pending snapshot {}", record.id);
        inner.pending.insert(record.id.clone(), record);
        self.metrics.pending_snapshots.set(inner.pending.len() as i64);
        Ok(())
    }

    /// Reserve the per-cluster manual slot and admit the record in one
    /// step. The gate check and the insert share the write lock, so two
    /// concurrent triggers for a cluster cannot both pass; the loser
    /// gets `SchedulingConflict`. Cross-region copies do not occupy the
    /// slot.
    pub async fn reserve(&self, record: SnapshotRecord) -> Result<(), OrchestratorError> {
        let mut inner = self.inner.write().await;
        let occupied = inner.pending.values().any(|r| {
            r.cluster_id == record.cluster_id
                && r.copied_from.is_none()
                && matches!(r.trigger, SnapshotTrigger::Manual | SnapshotTrigger::PreChange)
        });
        if occupied || inner.pending.contains_key(&record.id) {
            return Err(OrchestratorError::SchedulingConflict {
                cluster_id: record.cluster_id,
            });
        }
        debug!("Reserved manual slot with pending snapshot {}", record.id);
        inner.pending.insert(record.id.clone(), record);
        self.metrics.pending_snapshots.set(inner.pending.len() as i64);
        Ok(())
    }

    /// Roll back a reservation whose control-plane call never took: the
    /// record leaves the pending set without touching history.
    pub async fn withdraw(&self, snapshot_id: &str) {
        let mut inner = self.inner.write().await;
        if inner.pending.remove(snapshot_id).is_some() {
            debug!("Withdrew pending snapshot {}", snapshot_id);
            self.metrics.pending_snapshots.set(inner.pending.len() as i64);
        }
    }

    /// One poll pass over all pending records. Transient describe
    /// failures are logged and the record stays pending; the control
    /// plane remains authoritative on terminal status.
    pub async fn poll_once(&self) {
        let ids: Vec<String> = self.inner.read().await.pending.keys().cloned().collect();

        for id in ids {
            let observed = with_retry(&self.retry, "describe_snapshot", || {
                self.control.describe_snapshot(&id)
            })
            .await;

            match observed {
                Ok(obs) if obs.status.is_terminal() => {
                    if let Err(e) = self.finalize(&id, obs.status, obs.size_bytes).await {
                        warn!("Failed to finalize snapshot {}: {}", id, e);
                    }
                }
                Ok(_) => {}
                Err(e) => warn!("Describe of snapshot {} failed: {}", id, e),
            }
        }

        self.check_overdue().await;
    }

    /// Apply the single allowed transition for a record. Refuses a
    /// second transition: once a record left the pending set it is
    /// immutable history.
    pub async fn finalize(
        &self,
        snapshot_id: &str,
        status: SnapshotStatus,
        size_bytes: Option<u64>,
    ) -> Result<SnapshotRecord, OrchestratorError> {
        let record = {
            let mut inner = self.inner.write().await;
            let mut record = inner
                .pending
                .remove(snapshot_id)
                .ok_or_else(|| OrchestratorError::UnknownSnapshot(snapshot_id.to_string()))?;
            record.finalize(status, size_bytes)?;
            inner.history.push(record.clone());
            inner.overdue_alerted.remove(snapshot_id);
            self.metrics.pending_snapshots.set(inner.pending.len() as i64);
            record
        };

        if let Err(e) = self.append_journal(&record).await {
            warn!("Failed to journal snapshot {}: {}", record.id, e);
        }

        self.metrics
            .snapshot_outcomes_total
            .with_label_values(&[&status.to_string()])
            .inc();

        match status {
            SnapshotStatus::Available => {
                info!(
                    "Snapshot {} available ({} bytes)",
                    record.id,
                    record.size_bytes.unwrap_or(0)
                );
                emit(
                    &self.alerts,
                    AlertEvent::new(
                        AlertKind::SnapshotAvailable,
                        &record.cluster_id,
                        format!("snapshot {} is available", record.id),
                    )
                    .with_snapshot(&record.id),
                );
            }
            SnapshotStatus::Failed => {
                warn!("Snapshot {} failed on the provider side", record.id);
                emit(
                    &self.alerts,
                    AlertEvent::new(
                        AlertKind::SnapshotFailed,
                        &record.cluster_id,
                        format!("snapshot {} failed; manual follow-up required", record.id),
                    )
                    .with_snapshot(&record.id),
                );
            }
            SnapshotStatus::Pending => unreachable!("finalize rejects non-terminal statuses"),
        }

        if let Err(e) = self.completions.try_send(record.clone()) {
            warn!("Completion channel full, copy worker missed {}: {}", record.id, e);
        }

        Ok(record)
    }

    /// Pending-too-long is a monitoring alert, not a failure; the
    /// record stays pending until the provider reports otherwise.
    async fn check_overdue(&self) {
        let threshold = match chrono::Duration::from_std(self.pending_alert_after) {
            Ok(d) => d,
            Err(_) => return,
        };
        let now = Utc::now();

        let mut inner = self.inner.write().await;
        let overdue: Vec<SnapshotRecord> = inner
            .pending
            .values()
            .filter(|r| now - r.created_at > threshold && !inner.overdue_alerted.contains(&r.id))
            .cloned()
            .collect();

        for record in overdue {
            inner.overdue_alerted.insert(record.id.clone());
            warn!(
                "Snapshot {} pending since {} exceeds the configured bound",
                record.id, record.created_at
            );
            emit(
                &self.alerts,
                AlertEvent::new(
                    AlertKind::SnapshotOverdue,
                    &record.cluster_id,
                    format!("snapshot {} pending since {}", record.id, record.created_at),
                )
                .with_snapshot(&record.id),
            );
        }
    }

    /// Most recent record for an id: pending first, then history.
    pub async fn get(&self, snapshot_id: &str) -> Option<SnapshotRecord> {
        let inner = self.inner.read().await;
        inner
            .pending
            .get(snapshot_id)
            .cloned()
            .or_else(|| inner.history.iter().rev().find(|r| r.id == snapshot_id).cloned())
    }

    /// All tracked records, optionally filtered by cluster.
    pub async fn history(&self, cluster_id: Option<&str>) -> Vec<SnapshotRecord> {
        let inner = self.inner.read().await;
        inner
            .history
            .iter()
            .chain(inner.pending.values())
            .filter(|r| cluster_id.map_or(true, |c| r.cluster_id == c))
            .cloned()
            .collect()
    }

    pub async fn pending_count(&self) -> usize {
        self.inner.read().await.pending.len()
    }

    async fn append_journal(&self, record: &SnapshotRecord) -> Result<(), OrchestratorError> {
        let json = serde_json::to_string(record)? + "\n";
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.journal_path)
            .await?;
        file.write_all(json.as_bytes()).await?;
        file.sync_all().await?;
        Ok(())
    }

    /// Spawn the independent poll loop.
    pub fn spawn_poll_loop(self: &Arc<Self>, poll_interval: Duration) {
        let tracker = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            loop {
                ticker.tick().await;
                tracker.poll_once().await;
            }
        });
    }
}
