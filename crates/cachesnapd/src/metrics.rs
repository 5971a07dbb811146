//! Prometheus metrics and the localhost HTTP endpoint.

use anyhow::Result;
use axum::extract::State;
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

pub struct Metrics {
    registry: Registry,
    pub snapshots_triggered_total: IntCounter,
    pub snapshot_outcomes_total: IntCounterVec,
    pub copies_started_total: IntCounter,
    pub restores_begun_total: IntCounter,
    pub alerts_dispatched_total: IntCounter,
    pub pending_snapshots: IntGauge,
}

impl Metrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let snapshots_triggered_total = IntCounter::new(
            "cachesnap_snapshots_triggered_total",
            "Snapshots this daemon asked the control plane to create",
        )?;
        let snapshot_outcomes_total = IntCounterVec::new(
            Opts::new(
                "cachesnap_snapshot_outcomes_total",
                "Terminal snapshot outcomes by status",
            ),
            &["status"],
        )?;
        let copies_started_total = IntCounter::new(
            "cachesnap_copies_started_total",
            "Cross-region copies started",
        )?;
        let restores_begun_total =
            IntCounter::new("cachesnap_restores_begun_total", "Restore requests begun")?;
        let alerts_dispatched_total = IntCounter::new(
            "cachesnap_alerts_dispatched_total",
            "Alert events handed to sinks",
        )?;
        let pending_snapshots = IntGauge::new(
            "cachesnap_pending_snapshots",
            "Snapshots currently awaiting a terminal status",
        )?;

        registry.register(Box::new(snapshots_triggered_total.clone()))?;
        registry.register(Box::new(snapshot_outcomes_total.clone()))?;
        registry.register(Box::new(copies_started_total.clone()))?;
        registry.register(Box::new(restores_begun_total.clone()))?;
        registry.register(Box::new(alerts_dispatched_total.clone()))?;
        registry.register(Box::new(pending_snapshots.clone()))?;

        Ok(Self {
            registry,
            snapshots_triggered_total,
            snapshot_outcomes_total,
            copies_started_total,
            restores_begun_total,
            alerts_dispatched_total,
            pending_snapshots,
        })
    }

    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buf = Vec::new();
        if encoder.encode(&self.registry.gather(), &mut buf).is_err() {
            return String::new();
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}

async fn metrics_handler(State(metrics): State<Arc<Metrics>>) -> String {
    metrics.render()
}

async fn healthz_handler() -> &'static str {
    "ok"
}

/// Serve /metrics and /healthz. Bind localhost only.
pub async fn serve(metrics: Arc<Metrics>, addr: &str) -> Result<()> {
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz_handler))
        .with_state(metrics)
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Metrics listening on http://{}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_render_includes_counters() {
        let metrics = Metrics::new().unwrap();
        metrics.snapshots_triggered_total.inc();
        metrics
            .snapshot_outcomes_total
            .with_label_values(&["available"])
            .inc();
        let text = metrics.render();
        assert!(text.contains("cachesnap_snapshots_triggered_total 1"));
        assert!(text.contains("cachesnap_snapshot_outcomes_total"));
    }
}
