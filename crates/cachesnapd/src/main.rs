//! cachesnapd - snapshot-lifecycle orchestrator daemon.
//!
//! Owns backup policies, snapshot scheduling and tracking, cross-region
//! copy, blue-green restore sequencing, and alert dispatch for managed
//! cache clusters.

use anyhow::{Context, Result};
use cachesnapd::alerts::{AlertDispatcher, AlertSink, JournalSink, LogSink, WebhookSink};
use cachesnapd::config::Config;
use cachesnapd::control_plane::{ControlPlane, HttpControlPlane, RetryPolicy, SimControlPlane};
use cachesnapd::copier::{self, CrossRegionCopier};
use cachesnapd::metrics::{self, Metrics};
use cachesnapd::policy_store::PolicyStore;
use cachesnapd::restore::RestoreOrchestrator;
use cachesnapd::rpc_server::{self, Daemon};
use cachesnapd::scheduler::SnapshotScheduler;
use cachesnapd::state::DaemonState;
use cachesnapd::tracker::SnapshotTracker;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const ALERT_CHANNEL_CAPACITY: usize = 256;
const COMPLETION_CHANNEL_CAPACITY: usize = 256;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("cachesnapd v{} starting", env!("CARGO_PKG_VERSION"));

    let config = Config::load();
    let data_dir = Path::new(&config.daemon.data_dir);
    tokio::fs::create_dir_all(data_dir)
        .await
        .context("Failed to create data directory")?;

    let metrics = Arc::new(Metrics::new()?);
    let retry = RetryPolicy::from_config(&config.control_plane);

    let control: Arc<dyn ControlPlane> = match config.control_plane.mode.as_str() {
        "sim" => {
            warn!("Using the in-memory sim control plane; no real snapshots are taken");
            Arc::new(SimControlPlane::new())
        }
        _ => Arc::new(HttpControlPlane::new(&config.control_plane.endpoint)?),
    };

    let (alerts_tx, alerts_rx) = mpsc::channel(ALERT_CHANNEL_CAPACITY);
    let (completions_tx, completions_rx) = mpsc::channel(COMPLETION_CHANNEL_CAPACITY);

    let policies = Arc::new(PolicyStore::load(data_dir).await?);
    info!("Loaded {} backup policies", policies.len().await);

    let tracker = Arc::new(
        SnapshotTracker::load(
            Arc::clone(&control),
            retry,
            data_dir,
            config.pending_alert_after(),
            alerts_tx.clone(),
            completions_tx,
            Arc::clone(&metrics),
        )
        .await?,
    );

    let scheduler = Arc::new(SnapshotScheduler::new(
        Arc::clone(&control),
        retry,
        &config.daemon.region,
        Arc::clone(&policies),
        Arc::clone(&tracker),
        alerts_tx.clone(),
        Arc::clone(&metrics),
    ));

    let copier = Arc::new(CrossRegionCopier::new(
        Arc::clone(&control),
        retry,
        Arc::clone(&tracker),
        alerts_tx.clone(),
        Arc::clone(&metrics),
    ));

    let restores = Arc::new(RestoreOrchestrator::new(
        Arc::clone(&control),
        retry,
        Arc::clone(&tracker),
        data_dir,
        alerts_tx.clone(),
        Arc::clone(&metrics),
    ));

    // Alert fan-out
    let mut sinks: Vec<Box<dyn AlertSink>> = vec![Box::new(LogSink)];
    if config.alerts.journal {
        sinks.push(Box::new(JournalSink::new(data_dir)));
    }
    for url in &config.alerts.webhooks {
        match WebhookSink::new(url) {
            Ok(sink) => sinks.push(Box::new(sink)),
            Err(e) => warn!("Skipping webhook sink {}: {}", url, e),
        }
    }
    let dispatcher = AlertDispatcher::new(sinks, Arc::clone(&metrics));
    tokio::spawn(dispatcher.run(alerts_rx));

    // Background loops
    tracker.spawn_poll_loop(config.poll_interval());
    scheduler.spawn_drift_loop(config.drift_check_interval());
    restores.spawn_poll_loop(config.restore_poll_interval());
    copier::spawn_worker(Arc::clone(&copier), Arc::clone(&policies), completions_rx);

    // Metrics endpoint, localhost only
    let metrics_for_http = Arc::clone(&metrics);
    let metrics_addr = config.daemon.metrics_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = metrics::serve(metrics_for_http, &metrics_addr).await {
            warn!("Metrics endpoint failed: {}", e);
        }
    });

    let daemon = Arc::new(Daemon {
        state: DaemonState::new(env!("CARGO_PKG_VERSION")),
        control,
        retry,
        policies,
        tracker,
        scheduler,
        copier,
        restores,
        alerts: alerts_tx,
        metrics,
    });

    info!("cachesnapd ready");

    tokio::select! {
        result = rpc_server::start_server(daemon, &config.daemon.socket_path) => {
            result.context("RPC server exited")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down gracefully");
        }
    }

    Ok(())
}
