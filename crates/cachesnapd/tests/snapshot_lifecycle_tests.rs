//! Snapshot lifecycle tests
//!
//! Policy admission, automatic-config idempotence, manual and
//! pre-change triggers, tracker finalization, and overdue alerting,
//! all driven against the sim control plane.

use cachesnap_shared::error::OrchestratorError;
use cachesnap_shared::event::{AlertEvent, AlertKind};
use cachesnap_shared::policy::{BackupPolicy, ClusterTier, SnapshotWindow};
use cachesnap_shared::snapshot::{ChangeEvent, SnapshotRecord, SnapshotStatus, SnapshotTrigger};
use cachesnapd::control_plane::{ControlPlane, RetryPolicy, SimControlPlane};
use cachesnapd::metrics::Metrics;
use cachesnapd::policy_store::PolicyStore;
use cachesnapd::scheduler::SnapshotScheduler;
use cachesnapd::tracker::SnapshotTracker;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

struct Harness {
    _dir: tempfile::TempDir,
    sim: Arc<SimControlPlane>,
    policies: Arc<PolicyStore>,
    tracker: Arc<SnapshotTracker>,
    scheduler: SnapshotScheduler,
    alerts_rx: mpsc::Receiver<AlertEvent>,
    _completions_rx: mpsc::Receiver<SnapshotRecord>,
}

async fn harness(pending_alert_after: Duration) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let sim = Arc::new(SimControlPlane::new());
    sim.set_settle_polls(0);
    let control: Arc<dyn ControlPlane> = Arc::clone(&sim) as Arc<dyn ControlPlane>;
    let retry = RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(2),
    };
    let metrics = Arc::new(Metrics::new().unwrap());
    let (alerts_tx, alerts_rx) = mpsc::channel(64);
    let (completions_tx, completions_rx) = mpsc::channel(64);

    let policies = Arc::new(PolicyStore::load(dir.path()).await.unwrap());
    let tracker = Arc::new(
        SnapshotTracker::load(
            Arc::clone(&control),
            retry,
            dir.path(),
            pending_alert_after,
            alerts_tx.clone(),
            completions_tx,
            Arc::clone(&metrics),
        )
        .await
        .unwrap(),
    );
    let scheduler = SnapshotScheduler::new(
        control,
        retry,
        "us-east-1",
        Arc::clone(&policies),
        Arc::clone(&tracker),
        alerts_tx,
        metrics,
    );

    Harness {
        _dir: dir,
        sim,
        policies,
        tracker,
        scheduler,
        alerts_rx,
        _completions_rx: completions_rx,
    }
}

fn policy(cluster_id: &str) -> BackupPolicy {
    BackupPolicy {
        cluster_id: cluster_id.to_string(),
        retention_days: 14,
        window: SnapshotWindow::new(3, 30, 90),
        reserved_memory_percent: 30,
        copy_to_region: None,
        tier: ClusterTier::Production,
    }
}

fn drain_alert_kinds(rx: &mut mpsc::Receiver<AlertEvent>) -> Vec<AlertKind> {
    let mut kinds = Vec::new();
    while let Ok(event) = rx.try_recv() {
        kinds.push(event.kind);
    }
    kinds
}

// ============================================================================
// Policy admission
// ============================================================================

#[tokio::test]
async fn test_retention_over_limit_rejected_and_not_stored() {
    let h = harness(Duration::from_secs(3600)).await;

    let mut p = policy("fin-redis-rg");
    p.retention_days = 40;
    let err = h.policies.set(p).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::InvalidPolicy { .. }));
    assert!(h.policies.get("fin-redis-rg").await.is_none());
}

#[tokio::test]
async fn test_production_reserved_memory_band_enforced() {
    let h = harness(Duration::from_secs(3600)).await;

    let mut p = policy("fin-redis-rg");
    p.reserved_memory_percent = 10;
    assert!(h.policies.set(p).await.is_err());

    // The same headroom is fine on staging
    let mut p = policy("stg-redis");
    p.tier = ClusterTier::Staging;
    p.reserved_memory_percent = 10;
    h.policies.set(p).await.unwrap();
}

// ============================================================================
// Automatic config
// ============================================================================

#[tokio::test]
async fn test_apply_automatic_is_idempotent() {
    let h = harness(Duration::from_secs(3600)).await;
    let p = policy("fin-redis-rg");

    assert!(h.scheduler.apply_automatic(&p).await.unwrap());
    // Second apply sees a matching provider config and makes no call
    assert!(!h.scheduler.apply_automatic(&p).await.unwrap());
    assert_eq!(h.sim.apply_config_calls(), 1);
}

#[tokio::test]
async fn test_drift_check_reapplies_and_alerts() {
    let mut h = harness(Duration::from_secs(3600)).await;
    let p = policy("fin-redis-rg");
    h.policies.set(p.clone()).await.unwrap();
    h.scheduler.apply_automatic(&p).await.unwrap();
    drain_alert_kinds(&mut h.alerts_rx);

    // Someone edits the provider config out-of-band
    let drifted = cachesnapd::control_plane::BackupConfig {
        retention_days: 1,
        window: SnapshotWindow::default(),
    };
    h.sim.apply_backup_config("fin-redis-rg", &drifted).await.unwrap();

    h.scheduler.drift_check().await;

    let kinds = drain_alert_kinds(&mut h.alerts_rx);
    assert!(kinds.contains(&AlertKind::ConfigDrift));
    let current = h.sim.describe_backup_config("fin-redis-rg").await.unwrap();
    assert_eq!(current.retention_days, 14);
}

// ============================================================================
// Manual and pre-change triggers
// ============================================================================

#[tokio::test]
async fn test_manual_snapshot_completes_and_alerts() {
    let mut h = harness(Duration::from_secs(3600)).await;

    let record = h
        .scheduler
        .trigger_manual("fin-redis-rg", "pre-deploy")
        .await
        .unwrap();
    assert_eq!(record.trigger, SnapshotTrigger::Manual);
    assert_eq!(record.status, SnapshotStatus::Pending);
    assert_eq!(h.tracker.pending_count().await, 1);

    h.tracker.poll_once().await;

    assert_eq!(h.tracker.pending_count().await, 0);
    let finalized = h.tracker.get(&record.id).await.unwrap();
    assert_eq!(finalized.status, SnapshotStatus::Available);
    assert!(finalized.size_bytes.is_some());
    assert!(finalized.finished_at.is_some());

    let kinds = drain_alert_kinds(&mut h.alerts_rx);
    assert!(kinds.contains(&AlertKind::SnapshotAvailable));
}

#[tokio::test]
async fn test_second_manual_trigger_conflicts_while_pending() {
    let h = harness(Duration::from_secs(3600)).await;
    h.sim.set_settle_polls(5);

    h.scheduler
        .trigger_manual("fin-redis-rg", "first")
        .await
        .unwrap();
    let err = h
        .scheduler
        .trigger_manual("fin-redis-rg", "second")
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::SchedulingConflict { .. }));

    // Pre-change shares the same gate
    let err = h
        .scheduler
        .snapshot_before_change("fin-redis-rg", ChangeEvent::Deploy)
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::SchedulingConflict { .. }));

    // A different cluster is unaffected
    h.scheduler
        .trigger_manual("other-cluster", "unrelated")
        .await
        .unwrap();
}

#[tokio::test]
async fn test_simultaneous_triggers_admit_exactly_one() {
    let h = harness(Duration::from_secs(3600)).await;
    h.sim.set_settle_polls(5);
    // Hold create_snapshot in flight so the second trigger races the
    // first while its control-plane call is still pending
    h.sim.set_call_delay(Duration::from_millis(50));

    let (a, b) = tokio::join!(
        h.scheduler.trigger_manual("fin-redis-rg", "first"),
        h.scheduler.trigger_manual("fin-redis-rg", "second"),
    );

    let results = [a, b];
    let wins = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(wins, 1);
    let loss = results.into_iter().find(|r| r.is_err()).unwrap().unwrap_err();
    assert!(matches!(loss, OrchestratorError::SchedulingConflict { .. }));
    assert_eq!(h.tracker.pending_count().await, 1);
}

#[tokio::test]
async fn test_failed_create_frees_the_manual_slot() {
    let h = harness(Duration::from_secs(3600)).await;
    // Exactly max_attempts throttles, so the create fails outright
    h.sim.fail_calls(3);

    let err = h
        .scheduler
        .trigger_manual("fin-redis-rg", "throttled")
        .await
        .unwrap_err();
    assert!(err.is_transient());
    assert_eq!(h.tracker.pending_count().await, 0);

    // The reservation was rolled back; the cluster is free again
    h.scheduler
        .trigger_manual("fin-redis-rg", "retry")
        .await
        .unwrap();
    assert_eq!(h.tracker.pending_count().await, 1);
}

#[tokio::test]
async fn test_trigger_allowed_again_after_completion() {
    let h = harness(Duration::from_secs(3600)).await;

    h.scheduler
        .trigger_manual("fin-redis-rg", "first")
        .await
        .unwrap();
    h.tracker.poll_once().await;

    // Sleep past the one-second id granularity so ids do not collide
    tokio::time::sleep(Duration::from_millis(1100)).await;
    h.scheduler
        .trigger_manual("fin-redis-rg", "second")
        .await
        .unwrap();
}

#[tokio::test]
async fn test_prechange_snapshot_records_change_kind() {
    let h = harness(Duration::from_secs(3600)).await;

    let record = h
        .scheduler
        .snapshot_before_change("fin-redis-rg", ChangeEvent::VersionUpgrade)
        .await
        .unwrap();
    assert_eq!(record.trigger, SnapshotTrigger::PreChange);
    assert_eq!(record.reason.as_deref(), Some("pre-change: version-upgrade"));
}

// ============================================================================
// Finalization and failure
// ============================================================================

#[tokio::test]
async fn test_failed_snapshot_alerts_and_is_never_retried() {
    let mut h = harness(Duration::from_secs(3600)).await;
    h.sim.fail_next_snapshot();

    let record = h
        .scheduler
        .trigger_manual("fin-redis-rg", "doomed")
        .await
        .unwrap();
    h.tracker.poll_once().await;

    let finalized = h.tracker.get(&record.id).await.unwrap();
    assert_eq!(finalized.status, SnapshotStatus::Failed);
    let kinds = drain_alert_kinds(&mut h.alerts_rx);
    assert!(kinds.contains(&AlertKind::SnapshotFailed));

    // Further polls change nothing; the failure is terminal
    h.tracker.poll_once().await;
    h.tracker.poll_once().await;
    assert_eq!(h.tracker.pending_count().await, 0);
    assert_eq!(
        h.tracker.get(&record.id).await.unwrap().status,
        SnapshotStatus::Failed
    );
}

#[tokio::test]
async fn test_terminal_record_cannot_be_finalized_again() {
    let h = harness(Duration::from_secs(3600)).await;

    let record = h
        .scheduler
        .trigger_manual("fin-redis-rg", "once")
        .await
        .unwrap();
    h.tracker
        .finalize(&record.id, SnapshotStatus::Available, Some(1024))
        .await
        .unwrap();

    let err = h
        .tracker
        .finalize(&record.id, SnapshotStatus::Failed, None)
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::UnknownSnapshot(_)));

    let kept = h.tracker.get(&record.id).await.unwrap();
    assert_eq!(kept.status, SnapshotStatus::Available);
    assert_eq!(kept.size_bytes, Some(1024));
}

#[tokio::test]
async fn test_overdue_pending_snapshot_alerts_once() {
    let mut h = harness(Duration::from_millis(1)).await;
    h.sim.set_settle_polls(100);

    h.scheduler
        .trigger_manual("fin-redis-rg", "slow")
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    h.tracker.poll_once().await;
    h.tracker.poll_once().await;

    let kinds = drain_alert_kinds(&mut h.alerts_rx);
    let overdue = kinds
        .iter()
        .filter(|k| **k == AlertKind::SnapshotOverdue)
        .count();
    // Alerted exactly once, and the record is still pending
    assert_eq!(overdue, 1);
    assert_eq!(h.tracker.pending_count().await, 1);
}

// ============================================================================
// Journal persistence
// ============================================================================

#[tokio::test]
async fn test_history_survives_reload() {
    let dir = tempfile::tempdir().unwrap();
    let sim = Arc::new(SimControlPlane::new());
    sim.set_settle_polls(0);
    let retry = RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(2),
    };

    let record_id = {
        let metrics = Arc::new(Metrics::new().unwrap());
        let (alerts_tx, _alerts_rx) = mpsc::channel(64);
        let (completions_tx, _completions_rx) = mpsc::channel(64);
        let tracker = SnapshotTracker::load(
            Arc::clone(&sim) as Arc<dyn ControlPlane>,
            retry,
            dir.path(),
            Duration::from_secs(3600),
            alerts_tx,
            completions_tx,
            metrics,
        )
        .await
        .unwrap();

        let record = SnapshotRecord::new("fin-redis-rg", SnapshotTrigger::Manual, "us-east-1");
        sim.create_snapshot(&record).await.unwrap();
        tracker.register(record.clone()).await.unwrap();
        tracker.poll_once().await;
        record.id
    };

    // Fresh tracker over the same data dir sees the finalized record
    let metrics = Arc::new(Metrics::new().unwrap());
    let (alerts_tx, _alerts_rx) = mpsc::channel(64);
    let (completions_tx, _completions_rx) = mpsc::channel(64);
    let tracker = SnapshotTracker::load(
        Arc::clone(&sim) as Arc<dyn ControlPlane>,
        retry,
        dir.path(),
        Duration::from_secs(3600),
        alerts_tx,
        completions_tx,
        metrics,
    )
    .await
    .unwrap();

    let record = tracker.get(&record_id).await.unwrap();
    assert_eq!(record.status, SnapshotStatus::Available);
}
