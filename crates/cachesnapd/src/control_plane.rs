//! Control-plane boundary.
//!
//! Everything cachesnapd asks of the managed-cache provider goes
//! through the `ControlPlane` trait: snapshot CRUD, automatic-backup
//! configuration, and cluster lifecycle for restores. Two
//! implementations ship: an HTTP adapter for a real provider endpoint
//! and an in-memory simulator for local mode and tests.

use async_trait::async_trait;
use cachesnap_shared::error::OrchestratorError;
use cachesnap_shared::policy::SnapshotWindow;
use cachesnap_shared::snapshot::{SnapshotRecord, SnapshotStatus};
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use tracing::warn;

/// Automatic-backup configuration as the provider reports it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupConfig {
    pub retention_days: u8,
    pub window: SnapshotWindow,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            retention_days: 1,
            window: SnapshotWindow::default(),
        }
    }
}

/// Snapshot state observed on one describe call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotObservation {
    pub status: SnapshotStatus,
    pub size_bytes: Option<u64>,
}

/// Cluster state observed on one describe call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterStatus {
    Creating,
    Available,
    Deleting,
}

/// The provider surface cachesnapd depends on
#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn create_snapshot(&self, record: &SnapshotRecord) -> Result<(), OrchestratorError>;

    async fn describe_snapshot(
        &self,
        snapshot_id: &str,
    ) -> Result<SnapshotObservation, OrchestratorError>;

    async fn copy_snapshot(
        &self,
        source_id: &str,
        target_id: &str,
        target_region: &str,
    ) -> Result<(), OrchestratorError>;

    async fn delete_snapshot(&self, snapshot_id: &str) -> Result<(), OrchestratorError>;

    async fn describe_backup_config(
        &self,
        cluster_id: &str,
    ) -> Result<BackupConfig, OrchestratorError>;

    async fn apply_backup_config(
        &self,
        cluster_id: &str,
        config: &BackupConfig,
    ) -> Result<(), OrchestratorError>;

    async fn create_cluster_from_snapshot(
        &self,
        cluster_id: &str,
        snapshot_id: &str,
        node_type: &str,
        multi_az: bool,
    ) -> Result<(), OrchestratorError>;

    async fn describe_cluster(&self, cluster_id: &str) -> Result<ClusterStatus, OrchestratorError>;

    /// Re-point traffic at the given cluster
    async fn promote_cluster(&self, cluster_id: &str) -> Result<(), OrchestratorError>;

    async fn delete_cluster(&self, cluster_id: &str) -> Result<(), OrchestratorError>;
}

/// Bounded retry with exponential backoff for transient API errors
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(section: &crate::config::ControlPlaneSection) -> Self {
        Self {
            max_attempts: section.max_attempts.max(1),
            base_delay: Duration::from_millis(section.base_delay_ms),
            max_delay: Duration::from_millis(section.max_delay_ms),
        }
    }
}

/// Run `op` under the retry policy. Only transient errors are retried;
/// validation and terminal errors surface on the first attempt.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    what: &str,
    mut op: F,
) -> Result<T, OrchestratorError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, OrchestratorError>>,
{
    let mut delay = policy.base_delay;
    let mut attempt = 1;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < policy.max_attempts => {
                warn!(
                    "{} failed (attempt {}/{}): {}; retrying in {:?}",
                    what, attempt, policy.max_attempts, e, delay
                );
                let jitter = rand::thread_rng().gen_range(0..=delay.as_millis() as u64 / 4 + 1);
                tokio::time::sleep(delay + Duration::from_millis(jitter)).await;
                delay = (delay * 2).min(policy.max_delay);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

// ============================================================================
// Simulated control plane
// ============================================================================

#[derive(Debug, Clone)]
struct SimSnapshot {
    /// Describe calls left before the snapshot settles
    polls_left: u32,
    outcome: SnapshotStatus,
    size_bytes: u64,
    region: String,
}

#[derive(Debug, Clone)]
struct SimCluster {
    polls_left: u32,
    status: ClusterStatus,
}

#[derive(Default)]
struct SimInner {
    snapshots: HashMap<String, SimSnapshot>,
    backup_configs: HashMap<String, BackupConfig>,
    clusters: HashMap<String, SimCluster>,
    deleted_snapshots: HashSet<String>,
    /// Fail the next N API calls with a transient error
    transient_failures: u32,
    /// The next created snapshot settles to Failed
    fail_next_snapshot: bool,
    settle_polls: u32,
    apply_config_calls: u32,
    /// Added latency before mutating calls respond
    call_delay: Duration,
}

/// Deterministic in-memory control plane for local mode and tests.
///
/// Snapshots and clusters settle after a scripted number of describe
/// calls; failures are injected per call or per snapshot.
pub struct SimControlPlane {
    inner: Mutex<SimInner>,
}

impl SimControlPlane {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(SimInner {
                settle_polls: 1,
                ..SimInner::default()
            }),
        }
    }

    /// Describe calls a snapshot or cluster stays unsettled for
    pub fn set_settle_polls(&self, polls: u32) {
        self.inner.lock().unwrap().settle_polls = polls;
    }

    /// The next created snapshot settles to Failed
    pub fn fail_next_snapshot(&self) {
        self.inner.lock().unwrap().fail_next_snapshot = true;
    }

    /// Fail the next `count` API calls with a transient error
    pub fn fail_calls(&self, count: u32) {
        self.inner.lock().unwrap().transient_failures = count;
    }

    /// How often apply_backup_config has been called (idempotence checks)
    pub fn apply_config_calls(&self) -> u32 {
        self.inner.lock().unwrap().apply_config_calls
    }

    pub fn snapshot_deleted(&self, snapshot_id: &str) -> bool {
        self.inner.lock().unwrap().deleted_snapshots.contains(snapshot_id)
    }

    /// Delay create/describe-cluster/promote responses, so tests can
    /// hold a call in flight while another task races it
    pub fn set_call_delay(&self, delay: Duration) {
        self.inner.lock().unwrap().call_delay = delay;
    }

    async fn latency(&self) {
        let delay = self.inner.lock().unwrap().call_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    fn gate(inner: &mut SimInner, what: &str) -> Result<(), OrchestratorError> {
        if inner.transient_failures > 0 {
            inner.transient_failures -= 1;
            return Err(OrchestratorError::ExternalApi(format!(
                "simulated throttle on {}",
                what
            )));
        }
        Ok(())
    }
}

impl Default for SimControlPlane {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ControlPlane for SimControlPlane {
    async fn create_snapshot(&self, record: &SnapshotRecord) -> Result<(), OrchestratorError> {
        self.latency().await;
        let mut inner = self.inner.lock().unwrap();
        Self::gate(&mut inner, "create_snapshot")?;
        let outcome = if inner.fail_next_snapshot {
            inner.fail_next_snapshot = false;
            SnapshotStatus::Failed
        } else {
            SnapshotStatus::Available
        };
        let polls = inner.settle_polls;
        inner.snapshots.insert(
            record.id.clone(),
            SimSnapshot {
                polls_left: polls,
                outcome,
                size_bytes: 64 * 1024 * 1024,
                region: record.region.clone(),
            },
        );
        Ok(())
    }

    async fn describe_snapshot(
        &self,
        snapshot_id: &str,
    ) -> Result<SnapshotObservation, OrchestratorError> {
        let mut inner = self.inner.lock().unwrap();
        Self::gate(&mut inner, "describe_snapshot")?;
        let snap = inner
            .snapshots
            .get_mut(snapshot_id)
            .ok_or_else(|| OrchestratorError::UnknownSnapshot(snapshot_id.to_string()))?;
        if snap.polls_left > 0 {
            snap.polls_left -= 1;
            return Ok(SnapshotObservation {
                status: SnapshotStatus::Pending,
                size_bytes: None,
            });
        }
        Ok(SnapshotObservation {
            status: snap.outcome,
            size_bytes: Some(snap.size_bytes),
        })
    }

    async fn copy_snapshot(
        &self,
        source_id: &str,
        target_id: &str,
        target_region: &str,
    ) -> Result<(), OrchestratorError> {
        let mut inner = self.inner.lock().unwrap();
        Self::gate(&mut inner, "copy_snapshot")?;
        let size = inner
            .snapshots
            .get(source_id)
            .ok_or_else(|| OrchestratorError::UnknownSnapshot(source_id.to_string()))?
            .size_bytes;
        let polls = inner.settle_polls;
        inner.snapshots.insert(
            target_id.to_string(),
            SimSnapshot {
                polls_left: polls,
                outcome: SnapshotStatus::Available,
                size_bytes: size,
                region: target_region.to_string(),
            },
        );
        Ok(())
    }

    async fn delete_snapshot(&self, snapshot_id: &str) -> Result<(), OrchestratorError> {
        let mut inner = self.inner.lock().unwrap();
        Self::gate(&mut inner, "delete_snapshot")?;
        if inner.snapshots.remove(snapshot_id).is_none() {
            return Err(OrchestratorError::UnknownSnapshot(snapshot_id.to_string()));
        }
        inner.deleted_snapshots.insert(snapshot_id.to_string());
        Ok(())
    }

    async fn describe_backup_config(
        &self,
        cluster_id: &str,
    ) -> Result<BackupConfig, OrchestratorError> {
        let mut inner = self.inner.lock().unwrap();
        Self::gate(&mut inner, "describe_backup_config")?;
        Ok(inner
            .backup_configs
            .get(cluster_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn apply_backup_config(
        &self,
        cluster_id: &str,
        config: &BackupConfig,
    ) -> Result<(), OrchestratorError> {
        let mut inner = self.inner.lock().unwrap();
        Self::gate(&mut inner, "apply_backup_config")?;
        inner.apply_config_calls += 1;
        inner
            .backup_configs
            .insert(cluster_id.to_string(), config.clone());
        Ok(())
    }

    async fn create_cluster_from_snapshot(
        &self,
        cluster_id: &str,
        snapshot_id: &str,
        _node_type: &str,
        _multi_az: bool,
    ) -> Result<(), OrchestratorError> {
        let mut inner = self.inner.lock().unwrap();
        Self::gate(&mut inner, "create_cluster_from_snapshot")?;
        if !inner.snapshots.contains_key(snapshot_id) {
            return Err(OrchestratorError::UnknownSnapshot(snapshot_id.to_string()));
        }
        let polls = inner.settle_polls;
        inner.clusters.insert(
            cluster_id.to_string(),
            SimCluster {
                polls_left: polls,
                status: ClusterStatus::Creating,
            },
        );
        Ok(())
    }

    async fn describe_cluster(&self, cluster_id: &str) -> Result<ClusterStatus, OrchestratorError> {
        self.latency().await;
        let mut inner = self.inner.lock().unwrap();
        Self::gate(&mut inner, "describe_cluster")?;
        let cluster = inner
            .clusters
            .get_mut(cluster_id)
            .ok_or_else(|| OrchestratorError::UnknownCluster(cluster_id.to_string()))?;
        if cluster.status == ClusterStatus::Creating {
            if cluster.polls_left > 0 {
                cluster.polls_left -= 1;
            } else {
                cluster.status = ClusterStatus::Available;
            }
        }
        Ok(cluster.status)
    }

    async fn promote_cluster(&self, cluster_id: &str) -> Result<(), OrchestratorError> {
        self.latency().await;
        let mut inner = self.inner.lock().unwrap();
        Self::gate(&mut inner, "promote_cluster")?;
        match inner.clusters.get(cluster_id) {
            Some(c) if c.status == ClusterStatus::Available => Ok(()),
            Some(c) => Err(OrchestratorError::ExternalApi(format!(
                "cluster {} is {:?}, not available",
                cluster_id, c.status
            ))),
            None => Err(OrchestratorError::UnknownCluster(cluster_id.to_string())),
        }
    }

    async fn delete_cluster(&self, cluster_id: &str) -> Result<(), OrchestratorError> {
        let mut inner = self.inner.lock().unwrap();
        Self::gate(&mut inner, "delete_cluster")?;
        if inner.clusters.remove(cluster_id).is_none() {
            return Err(OrchestratorError::UnknownCluster(cluster_id.to_string()));
        }
        Ok(())
    }
}

// ============================================================================
// HTTP control plane
// ============================================================================

/// JSON-over-HTTP adapter against a configured provider endpoint.
///
/// The wire shape here is the contract a real provider adapter has to
/// serve; cachesnapd treats every non-2xx and transport error as a
/// transient `ExternalApi` failure.
pub struct HttpControlPlane {
    client: reqwest::Client,
    base: String,
}

#[derive(Serialize)]
struct CopyBody<'a> {
    target_id: &'a str,
    target_region: &'a str,
}

#[derive(Serialize)]
struct CreateClusterBody<'a> {
    snapshot_id: &'a str,
    node_type: &'a str,
    multi_az: bool,
}

#[derive(Deserialize)]
struct ClusterBody {
    status: ClusterStatus,
}

impl HttpControlPlane {
    pub fn new(endpoint: &str) -> Result<Self, OrchestratorError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| OrchestratorError::ExternalApi(e.to_string()))?;
        Ok(Self {
            client,
            base: endpoint.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, OrchestratorError> {
        let resp = self
            .client
            .get(self.url(path))
            .send()
            .await
            .map_err(|e| OrchestratorError::ExternalApi(e.to_string()))?;
        Self::decode(resp).await
    }

    async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, OrchestratorError> {
        let resp = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| OrchestratorError::ExternalApi(e.to_string()))?;
        Self::decode(resp).await
    }

    async fn delete(&self, path: &str) -> Result<(), OrchestratorError> {
        let resp = self
            .client
            .delete(self.url(path))
            .send()
            .await
            .map_err(|e| OrchestratorError::ExternalApi(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(OrchestratorError::ExternalApi(format!(
                "DELETE returned {}",
                status
            )));
        }
        Ok(())
    }

    async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, OrchestratorError> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(OrchestratorError::ExternalApi(format!(
                "{}: {}",
                status, body
            )));
        }
        resp.json::<T>()
            .await
            .map_err(|e| OrchestratorError::ExternalApi(e.to_string()))
    }
}

#[async_trait]
impl ControlPlane for HttpControlPlane {
    async fn create_snapshot(&self, record: &SnapshotRecord) -> Result<(), OrchestratorError> {
        let _: serde_json::Value = self.post_json("/snapshots", record).await?;
        Ok(())
    }

    async fn describe_snapshot(
        &self,
        snapshot_id: &str,
    ) -> Result<SnapshotObservation, OrchestratorError> {
        self.get_json(&format!("/snapshots/{}", snapshot_id)).await
    }

    async fn copy_snapshot(
        &self,
        source_id: &str,
        target_id: &str,
        target_region: &str,
    ) -> Result<(), OrchestratorError> {
        let body = CopyBody {
            target_id,
            target_region,
        };
        let _: serde_json::Value = self
            .post_json(&format!("/snapshots/{}/copy", source_id), &body)
            .await?;
        Ok(())
    }

    async fn delete_snapshot(&self, snapshot_id: &str) -> Result<(), OrchestratorError> {
        self.delete(&format!("/snapshots/{}", snapshot_id)).await
    }

    async fn describe_backup_config(
        &self,
        cluster_id: &str,
    ) -> Result<BackupConfig, OrchestratorError> {
        self.get_json(&format!("/clusters/{}/backup-config", cluster_id))
            .await
    }

    async fn apply_backup_config(
        &self,
        cluster_id: &str,
        config: &BackupConfig,
    ) -> Result<(), OrchestratorError> {
        let _: serde_json::Value = self
            .post_json(&format!("/clusters/{}/backup-config", cluster_id), config)
            .await?;
        Ok(())
    }

    async fn create_cluster_from_snapshot(
        &self,
        cluster_id: &str,
        snapshot_id: &str,
        node_type: &str,
        multi_az: bool,
    ) -> Result<(), OrchestratorError> {
        let body = CreateClusterBody {
            snapshot_id,
            node_type,
            multi_az,
        };
        let _: serde_json::Value = self
            .post_json(&format!("/clusters/{}", cluster_id), &body)
            .await?;
        Ok(())
    }

    async fn describe_cluster(&self, cluster_id: &str) -> Result<ClusterStatus, OrchestratorError> {
        let body: ClusterBody = self.get_json(&format!("/clusters/{}", cluster_id)).await?;
        Ok(body.status)
    }

    async fn promote_cluster(&self, cluster_id: &str) -> Result<(), OrchestratorError> {
        let _: serde_json::Value = self
            .post_json(&format!("/clusters/{}/promote", cluster_id), &())
            .await?;
        Ok(())
    }

    async fn delete_cluster(&self, cluster_id: &str) -> Result<(), OrchestratorError> {
        self.delete(&format!("/clusters/{}", cluster_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cachesnap_shared::snapshot::SnapshotTrigger;

    #[tokio::test]
    async fn test_sim_snapshot_settles_after_polls() {
        let sim = SimControlPlane::new();
        sim.set_settle_polls(2);

        let record = SnapshotRecord::new("c1", SnapshotTrigger::Manual, "us-east-1");
        sim.create_snapshot(&record).await.unwrap();

        for _ in 0..2 {
            let obs = sim.describe_snapshot(&record.id).await.unwrap();
            assert_eq!(obs.status, SnapshotStatus::Pending);
        }
        let obs = sim.describe_snapshot(&record.id).await.unwrap();
        assert_eq!(obs.status, SnapshotStatus::Available);
        assert!(obs.size_bytes.is_some());
    }

    #[tokio::test]
    async fn test_sim_scripted_failure() {
        let sim = SimControlPlane::new();
        sim.set_settle_polls(0);
        sim.fail_next_snapshot();

        let record = SnapshotRecord::new("c1", SnapshotTrigger::Automatic, "us-east-1");
        sim.create_snapshot(&record).await.unwrap();
        let obs = sim.describe_snapshot(&record.id).await.unwrap();
        assert_eq!(obs.status, SnapshotStatus::Failed);
    }

    #[tokio::test]
    async fn test_with_retry_recovers_from_transient_errors() {
        let sim = SimControlPlane::new();
        sim.fail_calls(2);

        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        };
        let config = with_retry(&policy, "describe_backup_config", || {
            sim.describe_backup_config("c1")
        })
        .await
        .unwrap();
        assert_eq!(config, BackupConfig::default());
    }

    #[tokio::test]
    async fn test_with_retry_gives_up_after_max_attempts() {
        let sim = SimControlPlane::new();
        sim.fail_calls(10);

        let policy = RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        };
        let err = with_retry(&policy, "describe_backup_config", || {
            sim.describe_backup_config("c1")
        })
        .await
        .unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_with_retry_does_not_retry_terminal_errors() {
        let sim = SimControlPlane::new();
        let policy = RetryPolicy::default();
        // Unknown snapshot is not transient; must surface immediately
        let err = with_retry(&policy, "describe_snapshot", || {
            sim.describe_snapshot("missing")
        })
        .await
        .unwrap_err();
        assert!(matches!(err, OrchestratorError::UnknownSnapshot(_)));
    }
}
