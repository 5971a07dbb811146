//! Policy store - per-cluster backup policies with JSON persistence.
//!
//! Policies are validated before they are accepted and rewritten
//! atomically (write to a sibling temp file, then rename) so a crash
//! mid-save never leaves a truncated store.

use cachesnap_shared::error::OrchestratorError;
use cachesnap_shared::policy::BackupPolicy;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info};

const POLICY_FILE: &str = "policies.json";

pub struct PolicyStore {
    path: PathBuf,
    policies: RwLock<HashMap<String, BackupPolicy>>,
}

impl PolicyStore {
    /// Load the store from the daemon data dir, creating it if missing
    pub async fn load(data_dir: &Path) -> Result<Self, OrchestratorError> {
        tokio::fs::create_dir_all(data_dir).await?;
        let path = data_dir.join(POLICY_FILE);

        let policies = if path.exists() {
            let contents = tokio::fs::read_to_string(&path).await?;
            let list: Vec<BackupPolicy> = serde_json::from_str(&contents)?;
            info!("Loaded {} backup policies from {}", list.len(), path.display());
            list.into_iter().map(|p| (p.cluster_id.clone(), p)).collect()
        } else {
            debug!("No policy file at {}, starting empty", path.display());
            HashMap::new()
        };

        Ok(Self {
            path,
            policies: RwLock::new(policies),
        })
    }

    pub async fn get(&self, cluster_id: &str) -> Option<BackupPolicy> {
        self.policies.read().await.get(cluster_id).cloned()
    }

    /// Validate and persist a policy. Fails with `InvalidPolicy`
    /// without touching the store when validation does not pass.
    pub async fn set(&self, policy: BackupPolicy) -> Result<(), OrchestratorError> {
        policy.validate()?;

        let mut policies = self.policies.write().await;
        policies.insert(policy.cluster_id.clone(), policy);
        self.persist(&policies).await?;
        Ok(())
    }

    pub async fn remove(&self, cluster_id: &str) -> Result<bool, OrchestratorError> {
        let mut policies = self.policies.write().await;
        let removed = policies.remove(cluster_id).is_some();
        if removed {
            self.persist(&policies).await?;
        }
        Ok(removed)
    }

    pub async fn all(&self) -> Vec<BackupPolicy> {
        let mut list: Vec<BackupPolicy> = self.policies.read().await.values().cloned().collect();
        list.sort_by(|a, b| a.cluster_id.cmp(&b.cluster_id));
        list
    }

    pub async fn len(&self) -> usize {
        self.policies.read().await.len()
    }

    async fn persist(
        &self,
        policies: &HashMap<String, BackupPolicy>,
    ) -> Result<(), OrchestratorError> {
        let mut list: Vec<&BackupPolicy> = policies.values().collect();
        list.sort_by(|a, b| a.cluster_id.cmp(&b.cluster_id));
        let json = serde_json::to_string_pretty(&list)?;

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json.as_bytes()).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!("Persisted {} backup policies", list.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cachesnap_shared::policy::{ClusterTier, SnapshotWindow};

    fn policy(cluster_id: &str) -> BackupPolicy {
        BackupPolicy {
            cluster_id: cluster_id.to_string(),
            retention_days: 14,
            window: SnapshotWindow::default(),
            reserved_memory_percent: 30,
            copy_to_region: Some("eu-west-1".to_string()),
            tier: ClusterTier::Production,
        }
    }

    #[tokio::test]
    async fn test_set_get_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = PolicyStore::load(dir.path()).await.unwrap();

        store.set(policy("fin-redis-rg")).await.unwrap();
        let got = store.get("fin-redis-rg").await.unwrap();
        assert_eq!(got.retention_days, 14);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_invalid_policy_rejected_and_not_stored() {
        let dir = tempfile::tempdir().unwrap();
        let store = PolicyStore::load(dir.path()).await.unwrap();

        let mut bad = policy("fin-redis-rg");
        bad.retention_days = 40;
        let err = store.set(bad).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidPolicy { .. }));
        assert!(store.get("fin-redis-rg").await.is_none());
    }

    #[tokio::test]
    async fn test_store_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = PolicyStore::load(dir.path()).await.unwrap();
            store.set(policy("a")).await.unwrap();
            store.set(policy("b")).await.unwrap();
        }
        let reloaded = PolicyStore::load(dir.path()).await.unwrap();
        assert_eq!(reloaded.len().await, 2);
        assert!(reloaded.get("a").await.is_some());
    }

    #[tokio::test]
    async fn test_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = PolicyStore::load(dir.path()).await.unwrap();
        store.set(policy("a")).await.unwrap();

        assert!(store.remove("a").await.unwrap());
        assert!(!store.remove("a").await.unwrap());
        assert!(store.get("a").await.is_none());
    }
}
