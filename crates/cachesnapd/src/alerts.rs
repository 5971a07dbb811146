//! Alert dispatcher - fire-and-forget fan-out to notification sinks.
//!
//! Producers never wait on delivery: events are pushed with `try_send`
//! and a full channel drops the event with a log line rather than
//! back-pressuring the backup path. Sink failures are logged against
//! the sink name and swallowed.

use crate::metrics::Metrics;
use async_trait::async_trait;
use cachesnap_shared::event::AlertEvent;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const ALERT_JOURNAL_FILE: &str = "alerts.jsonl";

/// Non-blocking publish into the alert channel.
pub fn emit(tx: &mpsc::Sender<AlertEvent>, event: AlertEvent) {
    if let Err(e) = tx.try_send(event) {
        warn!("Alert channel full, dropping event: {}", e);
    }
}

#[async_trait]
pub trait AlertSink: Send + Sync {
    fn name(&self) -> &str;
    async fn deliver(&self, event: &AlertEvent) -> anyhow::Result<()>;
}

/// Structured tracing output; always configured
pub struct LogSink;

#[async_trait]
impl AlertSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn deliver(&self, event: &AlertEvent) -> anyhow::Result<()> {
        info!(
            kind = %event.kind,
            cluster = %event.cluster_id,
            snapshot = event.snapshot_id.as_deref().unwrap_or("-"),
            "{}",
            event.detail
        );
        Ok(())
    }
}

/// JSON POST to a chat/ticketing webhook
pub struct WebhookSink {
    name: String,
    url: String,
    client: reqwest::Client,
}

impl WebhookSink {
    pub fn new(url: &str) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(5))
            .build()?;
        let name = url
            .split('/')
            .nth(2)
            .map(|host| format!("webhook:{}", host))
            .unwrap_or_else(|| "webhook".to_string());
        Ok(Self {
            name,
            url: url.to_string(),
            client,
        })
    }
}

#[async_trait]
impl AlertSink for WebhookSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn deliver(&self, event: &AlertEvent) -> anyhow::Result<()> {
        let resp = self.client.post(&self.url).json(event).send().await?;
        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("webhook returned {}", status);
        }
        Ok(())
    }
}

/// Append-only JSONL journal under the data dir
pub struct JournalSink {
    path: PathBuf,
}

impl JournalSink {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join(ALERT_JOURNAL_FILE),
        }
    }
}

#[async_trait]
impl AlertSink for JournalSink {
    fn name(&self) -> &str {
        "journal"
    }

    async fn deliver(&self, event: &AlertEvent) -> anyhow::Result<()> {
        let json = serde_json::to_string(event)? + "\n";
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(json.as_bytes()).await?;
        Ok(())
    }
}

pub struct AlertDispatcher {
    sinks: Vec<Box<dyn AlertSink>>,
    metrics: Arc<Metrics>,
}

impl AlertDispatcher {
    pub fn new(sinks: Vec<Box<dyn AlertSink>>, metrics: Arc<Metrics>) -> Self {
        Self { sinks, metrics }
    }

    /// Consume events until the channel closes. Delivery failure to one
    /// sink never stops delivery to the others.
    pub async fn run(self, mut rx: mpsc::Receiver<AlertEvent>) {
        info!("Alert dispatcher running with {} sinks", self.sinks.len());
        while let Some(event) = rx.recv().await {
            self.metrics.alerts_dispatched_total.inc();
            for sink in &self.sinks {
                if let Err(e) = sink.deliver(&event).await {
                    warn!("Alert delivery to sink '{}' failed: {}", sink.name(), e);
                } else {
                    debug!("Delivered {} alert to sink '{}'", event.kind, sink.name());
                }
            }
        }
        debug!("Alert channel closed, dispatcher stopping");
    }
}
