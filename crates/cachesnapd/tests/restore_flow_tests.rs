//! Restore flow tests
//!
//! The blue-green sequence end to end: begin, warm, confirm, cutover,
//! plus the refusal paths (unconfirmed cutover, phase skips, target
//! conflicts) and decommission guards.

use cachesnap_shared::error::OrchestratorError;
use cachesnap_shared::event::{AlertEvent, AlertKind};
use cachesnap_shared::restore::{RestorePhase, RestoreSpec};
use cachesnap_shared::snapshot::SnapshotRecord;
use cachesnapd::control_plane::{ControlPlane, RetryPolicy, SimControlPlane};
use cachesnapd::metrics::Metrics;
use cachesnapd::restore::RestoreOrchestrator;
use cachesnapd::scheduler::SnapshotScheduler;
use cachesnapd::tracker::SnapshotTracker;
use cachesnapd::policy_store::PolicyStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

struct Harness {
    dir: tempfile::TempDir,
    sim: Arc<SimControlPlane>,
    tracker: Arc<SnapshotTracker>,
    scheduler: SnapshotScheduler,
    restores: Arc<RestoreOrchestrator>,
    alerts_rx: mpsc::Receiver<AlertEvent>,
    _completions_rx: mpsc::Receiver<SnapshotRecord>,
}

async fn harness() -> Harness {
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
            Duration::from_secs(3600),
            alerts_tx.clone(),
            completions_tx,
            Arc::clone(&metrics),
        )
        .await
        .unwrap(),
    );
    let scheduler = SnapshotScheduler::new(
        Arc::clone(&control),
        retry,
        "us-east-1",
        policies,
        Arc::clone(&tracker),
        alerts_tx.clone(),
        Arc::clone(&metrics),
    );
    let restores = Arc::new(RestoreOrchestrator::new(
        control,
        retry,
        Arc::clone(&tracker),
        dir.path(),
        alerts_tx,
        metrics,
    ));

    Harness {
        dir,
        sim,
        tracker,
        scheduler,
        restores,
        alerts_rx,
        _completions_rx: completions_rx,
    }
}

async fn available_snapshot(h: &Harness, cluster_id: &str) -> SnapshotRecord {
    let record = h
        .scheduler
        .trigger_manual(cluster_id, "restore source")
        .await
        .unwrap();
    h.tracker.poll_once().await;
    h.tracker.get(&record.id).await.unwrap()
}

fn spec(target: &str, snapshot_id: &str) -> RestoreSpec {
    RestoreSpec {
        target_cluster_id: target.to_string(),
        snapshot_id: snapshot_id.to_string(),
        node_type: "cache.r6g.large".to_string(),
        multi_az: true,
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
// Happy path
// ============================================================================

#[tokio::test]
async fn test_full_restore_sequence() {
    let mut h = harness().await;
    let source = available_snapshot(&h, "fin-redis-rg").await;
    drain_alert_kinds(&mut h.alerts_rx);

    let restore = h
        .restores
        .begin(spec("fin-redis-rg-green", &source.id))
        .await
        .unwrap();
    assert_eq!(restore.phase, RestorePhase::Restoring);
    assert_eq!(h.restores.active_count().await, 1);

    // The target cluster settles, moving the restore to warming
    h.restores.poll_once().await;
    assert_eq!(
        h.restores.get(&restore.id).await.unwrap().phase,
        RestorePhase::Warming
    );

    // Cutover before the warm-up signal is refused
    let err = h.restores.cutover(&restore.id).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::WarmupIncomplete { .. }));

    h.restores.confirm_warmup(&restore.id).await.unwrap();
    let done = h.restores.cutover(&restore.id).await.unwrap();
    assert_eq!(done.phase, RestorePhase::Complete);

    // Terminal restores leave the active set and land in the journal
    assert_eq!(h.restores.active_count().await, 0);
    let journal = std::fs::read_to_string(h.dir.path().join("restores.jsonl")).unwrap();
    assert_eq!(journal.lines().count(), 1);
    assert!(journal.contains(&restore.id));

    let kinds = drain_alert_kinds(&mut h.alerts_rx);
    assert!(kinds.iter().filter(|k| **k == AlertKind::RestorePhase).count() >= 3);
}

#[tokio::test]
async fn test_restore_waits_for_cluster_to_settle() {
    let h = harness().await;
    let source = available_snapshot(&h, "fin-redis-rg").await;
    h.sim.set_settle_polls(2);

    let restore = h
        .restores
        .begin(spec("fin-redis-rg-green", &source.id))
        .await
        .unwrap();

    // Still creating for the first two polls
    h.restores.poll_once().await;
    h.restores.poll_once().await;
    assert_eq!(
        h.restores.get(&restore.id).await.unwrap().phase,
        RestorePhase::Restoring
    );

    h.restores.poll_once().await;
    assert_eq!(
        h.restores.get(&restore.id).await.unwrap().phase,
        RestorePhase::Warming
    );
}

// ============================================================================
// Refusal paths
// ============================================================================

#[tokio::test]
async fn test_begin_refused_for_missing_or_unready_source() {
    let h = harness().await;

    let err = h
        .restores
        .begin(spec("green", "no-such-snap"))
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::UnknownSnapshot(_)));

    h.sim.set_settle_polls(10);
    let pending = h
        .scheduler
        .trigger_manual("fin-redis-rg", "still pending")
        .await
        .unwrap();
    let err = h.restores.begin(spec("green", &pending.id)).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::SourceNotReady { .. }));
    assert_eq!(h.restores.active_count().await, 0);
}

#[tokio::test]
async fn test_one_restore_per_target_cluster() {
    let h = harness().await;
    let source = available_snapshot(&h, "fin-redis-rg").await;

    h.restores
        .begin(spec("fin-redis-rg-green", &source.id))
        .await
        .unwrap();
    let err = h
        .restores
        .begin(spec("fin-redis-rg-green", &source.id))
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::RestoreConflict { .. }));

    // A different target proceeds independently
    h.restores
        .begin(spec("fin-redis-rg-green2", &source.id))
        .await
        .unwrap();
    assert_eq!(h.restores.active_count().await, 2);
}

#[tokio::test]
async fn test_confirm_only_valid_while_warming() {
    let h = harness().await;
    let source = available_snapshot(&h, "fin-redis-rg").await;

    let restore = h
        .restores
        .begin(spec("fin-redis-rg-green", &source.id))
        .await
        .unwrap();

    // Restoring, not warming yet
    let err = h.restores.confirm_warmup(&restore.id).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::PhaseViolation { .. }));

    let err = h.restores.confirm_warmup("no-such-restore").await.unwrap_err();
    assert!(matches!(err, OrchestratorError::UnknownRestore(_)));
}

#[tokio::test]
async fn test_abort_releases_target_for_a_new_attempt() {
    let h = harness().await;
    let source = available_snapshot(&h, "fin-redis-rg").await;

    let restore = h
        .restores
        .begin(spec("fin-redis-rg-green", &source.id))
        .await
        .unwrap();
    let aborted = h.restores.abort(&restore.id).await.unwrap();
    assert_eq!(aborted.phase, RestorePhase::Aborted);
    assert_eq!(h.restores.active_count().await, 0);

    // The target is free again
    h.restores
        .begin(spec("fin-redis-rg-green", &source.id))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_cutover_after_abort_refused() {
    let h = harness().await;
    let source = available_snapshot(&h, "fin-redis-rg").await;

    let restore = h
        .restores
        .begin(spec("fin-redis-rg-green", &source.id))
        .await
        .unwrap();
    h.restores.abort(&restore.id).await.unwrap();

    // Aborted restores are archived; the id no longer resolves
    let err = h.restores.cutover(&restore.id).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::UnknownRestore(_)));
}

// ============================================================================
// Concurrent operations
// ============================================================================

#[tokio::test]
async fn test_abort_while_poll_in_flight_stays_archived() {
    let h = harness().await;
    let source = available_snapshot(&h, "fin-redis-rg").await;

    let restore = h
        .restores
        .begin(spec("fin-redis-rg-green", &source.id))
        .await
        .unwrap();

    // Hold the describe call in flight and abort underneath it
    h.sim.set_call_delay(Duration::from_millis(50));
    let restores = Arc::clone(&h.restores);
    let poll = tokio::spawn(async move { restores.poll_once().await });
    tokio::time::sleep(Duration::from_millis(10)).await;
    h.restores.abort(&restore.id).await.unwrap();
    poll.await.unwrap();

    // The poll result must not bring the aborted restore back
    assert_eq!(h.restores.active_count().await, 0);
    assert!(h.restores.get(&restore.id).await.is_none());
    let err = h.restores.confirm_warmup(&restore.id).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::UnknownRestore(_)));

    let journal = std::fs::read_to_string(h.dir.path().join("restores.jsonl")).unwrap();
    assert_eq!(journal.lines().count(), 1);
    assert!(journal.contains("aborted"));
}

#[tokio::test]
async fn test_concurrent_cutover_promotes_once() {
    let h = harness().await;
    let source = available_snapshot(&h, "fin-redis-rg").await;

    let restore = h
        .restores
        .begin(spec("fin-redis-rg-green", &source.id))
        .await
        .unwrap();
    h.restores.poll_once().await;
    h.restores.confirm_warmup(&restore.id).await.unwrap();

    // Hold promote_cluster in flight so the second cutover races it
    h.sim.set_call_delay(Duration::from_millis(50));
    let (a, b) = tokio::join!(
        h.restores.cutover(&restore.id),
        h.restores.cutover(&restore.id),
    );

    let results = [a, b];
    let wins = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(wins, 1);
    let winner = results.iter().find(|r| r.is_ok()).unwrap().as_ref().unwrap();
    assert_eq!(winner.phase, RestorePhase::Complete);
    let loss = results.into_iter().find(|r| r.is_err()).unwrap().unwrap_err();
    assert!(matches!(loss, OrchestratorError::WarmupIncomplete { .. }));

    assert_eq!(h.restores.active_count().await, 0);
    let journal = std::fs::read_to_string(h.dir.path().join("restores.jsonl")).unwrap();
    assert_eq!(journal.lines().count(), 1);
}

#[tokio::test]
async fn test_cutover_retryable_after_promote_failure() {
    let h = harness().await;
    let source = available_snapshot(&h, "fin-redis-rg").await;

    let restore = h
        .restores
        .begin(spec("fin-redis-rg-green", &source.id))
        .await
        .unwrap();
    h.restores.poll_once().await;
    h.restores.confirm_warmup(&restore.id).await.unwrap();

    // Exactly max_attempts throttles, so the promote fails outright
    h.sim.fail_calls(3);
    let err = h.restores.cutover(&restore.id).await.unwrap_err();
    assert!(err.is_transient());

    // The claim is rolled back: still warming, confirmation kept
    let kept = h.restores.get(&restore.id).await.unwrap();
    assert_eq!(kept.phase, RestorePhase::Warming);
    assert!(kept.warmup_confirmed);

    let done = h.restores.cutover(&restore.id).await.unwrap();
    assert_eq!(done.phase, RestorePhase::Complete);
}

// ============================================================================
// Decommission
// ============================================================================

#[tokio::test]
async fn test_decommission_refused_while_restore_targets_cluster() {
    let mut h = harness().await;
    let source = available_snapshot(&h, "fin-redis-rg").await;

    let restore = h
        .restores
        .begin(spec("fin-redis-rg-green", &source.id))
        .await
        .unwrap();

    let err = h.restores.decommission("fin-redis-rg-green").await.unwrap_err();
    assert!(matches!(err, OrchestratorError::RestoreConflict { .. }));

    // Completing the restore clears the guard
    h.restores.poll_once().await;
    h.restores.confirm_warmup(&restore.id).await.unwrap();
    h.restores.cutover(&restore.id).await.unwrap();
    drain_alert_kinds(&mut h.alerts_rx);

    h.restores.decommission("fin-redis-rg-green").await.unwrap();
    let kinds = drain_alert_kinds(&mut h.alerts_rx);
    assert!(kinds.contains(&AlertKind::ClusterDecommissioned));
}

#[tokio::test]
async fn test_decommission_unknown_cluster_refused() {
    let h = harness().await;
    let err = h.restores.decommission("no-such-cluster").await.unwrap_err();
    assert!(matches!(err, OrchestratorError::UnknownCluster(_)));
}
