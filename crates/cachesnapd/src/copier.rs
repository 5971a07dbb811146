//! Cross-region copier.
//!
//! Copies read only terminal, immutable records, so the only
//! coordination is the precondition check plus an in-flight set that
//! guarantees at most one copy per (snapshot, region) pair. The copy
//! itself becomes a new pending record in the target region and is
//! observed by the tracker like any other snapshot.

use crate::alerts::emit;
use crate::control_plane::{with_retry, ControlPlane, RetryPolicy};
use crate::metrics::Metrics;
use crate::policy_store::PolicyStore;
use crate::tracker::SnapshotTracker;
use cachesnap_shared::error::OrchestratorError;
use cachesnap_shared::event::{AlertEvent, AlertKind};
use cachesnap_shared::snapshot::{SnapshotRecord, SnapshotStatus};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub struct CrossRegionCopier {
    control: Arc<dyn ControlPlane>,
    retry: RetryPolicy,
    tracker: Arc<SnapshotTracker>,
    in_flight: Mutex<HashSet<(String, String)>>,
    alerts: mpsc::Sender<AlertEvent>,
    metrics: Arc<Metrics>,
}

impl CrossRegionCopier {
    pub fn new(
        control: Arc<dyn ControlPlane>,
        retry: RetryPolicy,
        tracker: Arc<SnapshotTracker>,
        alerts: mpsc::Sender<AlertEvent>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            control,
            retry,
            tracker,
            in_flight: Mutex::new(HashSet::new()),
            alerts,
            metrics,
        }
    }

    /// Start a cross-region copy of an `available` snapshot.
    ///
    /// Losers of a concurrent race for the same (snapshot, region)
    /// pair get `CopyInProgress`; a source that has not reached
    /// `available` gets `SourceNotReady`.
    pub async fn copy(
        &self,
        snapshot_id: &str,
        target_region: &str,
    ) -> Result<SnapshotRecord, OrchestratorError> {
        let source = self
            .tracker
            .get(snapshot_id)
            .await
            .ok_or_else(|| OrchestratorError::UnknownSnapshot(snapshot_id.to_string()))?;
        if source.status != SnapshotStatus::Available {
            return Err(OrchestratorError::SourceNotReady {
                snapshot_id: snapshot_id.to_string(),
            });
        }

        let copy_id = format!("{}-{}", snapshot_id, target_region);
        if !self.try_reserve(snapshot_id, target_region) {
            // The guard outlives a dropped completion event. The
            // tracker is authoritative: a terminal copy record behind
            // the guard means the previous copy finished, so reclaim
            // the slot instead of refusing forever.
            let finished = self
                .tracker
                .get(&copy_id)
                .await
                .is_some_and(|existing| existing.is_terminal());
            if !finished {
                return Err(OrchestratorError::CopyInProgress {
                    snapshot_id: snapshot_id.to_string(),
                    region: target_region.to_string(),
                });
            }
            self.release(snapshot_id, target_region);
            if !self.try_reserve(snapshot_id, target_region) {
                return Err(OrchestratorError::CopyInProgress {
                    snapshot_id: snapshot_id.to_string(),
                    region: target_region.to_string(),
                });
            }
        }

        if let Some(existing) = self.tracker.get(&copy_id).await {
            if !existing.is_terminal() {
                self.release(snapshot_id, target_region);
                return Err(OrchestratorError::CopyInProgress {
                    snapshot_id: snapshot_id.to_string(),
                    region: target_region.to_string(),
                });
            }
        }

        if let Err(e) = with_retry(&self.retry, "copy_snapshot", || {
            self.control.copy_snapshot(&source.id, &copy_id, target_region)
        })
        .await
        {
            self.release(snapshot_id, target_region);
            return Err(e);
        }

        let mut record = SnapshotRecord::new(&source.cluster_id, source.trigger, target_region);
        record.id = copy_id;
        record.copied_from = Some(source.id.clone());
        record.kms_key_id = source.kms_key_id.clone();

        if let Err(e) = self.tracker.register(record.clone()).await {
            self.release(snapshot_id, target_region);
            return Err(e);
        }

        self.metrics.copies_started_total.inc();
        info!(
            "Started copy of {} to {} as {}",
            source.id, target_region, record.id
        );
        emit(
            &self.alerts,
            AlertEvent::new(
                AlertKind::CopyStarted,
                &source.cluster_id,
                format!("copying {} to {}", source.id, target_region),
            )
            .with_snapshot(&record.id),
        );
        Ok(record)
    }

    fn try_reserve(&self, snapshot_id: &str, target_region: &str) -> bool {
        self.in_flight
            .lock()
            .unwrap()
            .insert((snapshot_id.to_string(), target_region.to_string()))
    }

    /// Drop the in-flight guard for a (snapshot, region) pair. Called
    /// by the worker when a copy record reaches a terminal status, and
    /// by `copy` when it reclaims a stale guard.
    pub fn release(&self, snapshot_id: &str, target_region: &str) {
        let key = (snapshot_id.to_string(), target_region.to_string());
        if self.in_flight.lock().unwrap().remove(&key) {
            debug!("Released in-flight copy {} -> {}", snapshot_id, target_region);
        }
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().unwrap().len()
    }
}

/// Automatic-copy worker: consumes finalized records from the tracker
/// and starts a copy for every available snapshot whose policy names a
/// DR region. Terminal copy records release their in-flight guard.
pub fn spawn_worker(
    copier: Arc<CrossRegionCopier>,
    policies: Arc<PolicyStore>,
    mut completions: mpsc::Receiver<SnapshotRecord>,
) {
    tokio::spawn(async move {
        while let Some(record) = completions.recv().await {
            if let Some(source_id) = &record.copied_from {
                copier.release(source_id, &record.region);
                continue;
            }
            if record.status != SnapshotStatus::Available {
                continue;
            }
            let Some(policy) = policies.get(&record.cluster_id).await else {
                continue;
            };
            let Some(target_region) = policy.copy_to_region else {
                continue;
            };
            if target_region == record.region {
                continue;
            }

            match copier.copy(&record.id, &target_region).await {
                Ok(copy) => debug!("Auto-copy {} underway", copy.id),
                Err(OrchestratorError::CopyInProgress { .. }) => {}
                Err(e) => warn!("Auto-copy of {} failed: {}", record.id, e),
            }
        }
        debug!("Completion channel closed, copy worker stopping");
    });
}
