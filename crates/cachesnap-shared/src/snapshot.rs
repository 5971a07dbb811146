//! Snapshot records and their lifecycle.
//!
//! A record is created when a snapshot is triggered, transitions once
//! from pending to a terminal status, and is never mutated afterwards.
//! The tracker owns the single mutation path (finalize).

use crate::error::OrchestratorError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What caused a snapshot to be taken
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotTrigger {
    /// Taken by the provider inside the configured window
    Automatic,
    /// Requested explicitly by an operator
    Manual,
    /// Taken synchronously ahead of a classified change event
    PreChange,
}

impl std::fmt::Display for SnapshotTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Automatic => write!(f, "automatic"),
            Self::Manual => write!(f, "manual"),
            Self::PreChange => write!(f, "prechange"),
        }
    }
}

/// Snapshot status as reported by the control plane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotStatus {
    #[default]
    Pending,
    Available,
    Failed,
}

impl SnapshotStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Available | Self::Failed)
    }
}

impl std::fmt::Display for SnapshotStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Available => write!(f, "available"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Classified change events that require a pre-change snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeEvent {
    Deploy,
    ParameterChange,
    VersionUpgrade,
}

impl std::fmt::Display for ChangeEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Deploy => write!(f, "deploy"),
            Self::ParameterChange => write!(f, "parameter-change"),
            Self::VersionUpgrade => write!(f, "version-upgrade"),
        }
    }
}

/// Metadata for one snapshot, ours or a cross-region copy of ours
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub id: String,
    pub cluster_id: String,
    pub trigger: SnapshotTrigger,
    pub created_at: DateTime<Utc>,
    pub status: SnapshotStatus,
    pub size_bytes: Option<u64>,
    pub kms_key_id: Option<String>,
    /// Region the snapshot bytes live in
    pub region: String,
    /// Source snapshot id, set only on cross-region copies
    #[serde(default)]
    pub copied_from: Option<String>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Operator-supplied note for manual and pre-change triggers
    #[serde(default)]
    pub reason: Option<String>,
}

impl SnapshotRecord {
    pub fn new(cluster_id: &str, trigger: SnapshotTrigger, region: &str) -> Self {
        let created_at = Utc::now();
        Self {
            id: snapshot_id(cluster_id, trigger, created_at),
            cluster_id: cluster_id.to_string(),
            trigger,
            created_at,
            status: SnapshotStatus::Pending,
            size_bytes: None,
            kms_key_id: None,
            region: region.to_string(),
            copied_from: None,
            finished_at: None,
            reason: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Apply the one allowed transition: pending to a terminal status.
    pub fn finalize(
        &mut self,
        status: SnapshotStatus,
        size_bytes: Option<u64>,
    ) -> Result<(), OrchestratorError> {
        if self.is_terminal() {
            return Err(OrchestratorError::UnknownSnapshot(format!(
                "{} already reached terminal status {}",
                self.id, self.status
            )));
        }
        if !status.is_terminal() {
            return Err(OrchestratorError::UnknownSnapshot(format!(
                "{} cannot be finalized to non-terminal status {}",
                self.id, status
            )));
        }
        self.status = status;
        self.size_bytes = size_bytes.or(self.size_bytes);
        self.finished_at = Some(Utc::now());
        Ok(())
    }
}

/// Snapshot id format: `<cluster>-<trigger>-<yyyymmdd-hhmmss>`
pub fn snapshot_id(cluster_id: &str, trigger: SnapshotTrigger, at: DateTime<Utc>) -> String {
    format!("{}-{}-{}", cluster_id, trigger, at.format("%Y%m%d-%H%M%S"))
}
