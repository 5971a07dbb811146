//! Alert events flowing from the backup path to the dispatcher.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    SnapshotAvailable,
    SnapshotFailed,
    /// Pending longer than the configured bound; monitoring signal only
    SnapshotOverdue,
    SnapshotDeleted,
    /// Control-plane automatic-backup config no longer matches policy
    ConfigDrift,
    CopyStarted,
    RestorePhase,
    ClusterDecommissioned,
}

impl std::fmt::Display for AlertKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SnapshotAvailable => write!(f, "snapshot-available"),
            Self::SnapshotFailed => write!(f, "snapshot-failed"),
            Self::SnapshotOverdue => write!(f, "snapshot-overdue"),
            Self::SnapshotDeleted => write!(f, "snapshot-deleted"),
            Self::ConfigDrift => write!(f, "config-drift"),
            Self::CopyStarted => write!(f, "copy-started"),
            Self::RestorePhase => write!(f, "restore-phase"),
            Self::ClusterDecommissioned => write!(f, "cluster-decommissioned"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertEvent {
    pub kind: AlertKind,
    pub cluster_id: String,
    pub snapshot_id: Option<String>,
    pub detail: String,
    pub at: DateTime<Utc>,
}

impl AlertEvent {
    pub fn new(kind: AlertKind, cluster_id: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            kind,
            cluster_id: cluster_id.into(),
            snapshot_id: None,
            detail: detail.into(),
            at: Utc::now(),
        }
    }

    pub fn with_snapshot(mut self, snapshot_id: impl Into<String>) -> Self {
        self.snapshot_id = Some(snapshot_id.into());
        self
    }
}
