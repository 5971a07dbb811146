//! IPC protocol between cachesnapctl and cachesnapd.
//!
//! JSON lines over a Unix socket: one `Request` per line in, one
//! `Response` per line out.

use crate::policy::BackupPolicy;
use crate::restore::{RestoreRequest, RestoreSpec};
use crate::snapshot::{ChangeEvent, SnapshotRecord};
use serde::{Deserialize, Serialize};

/// IPC request from client to daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: u64,
    pub method: Method,
}

/// IPC response from daemon to client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub id: u64,
    pub result: Result<ResponseData, String>,
}

/// Request methods
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "params")]
pub enum Method {
    /// Ping daemon (health check)
    Ping,

    /// Get daemon status
    Status,

    /// Get the backup policy for one cluster
    PolicyGet { cluster_id: String },

    /// Store a backup policy (validated daemon-side)
    PolicySet { policy: BackupPolicy },

    /// List all stored policies
    PolicyList,

    /// Remove the policy for one cluster
    PolicyRemove { cluster_id: String },

    /// Trigger a manual snapshot
    TriggerSnapshot { cluster_id: String, reason: String },

    /// Take a synchronous pre-change snapshot for a classified change
    PreChangeSnapshot {
        cluster_id: String,
        change: ChangeEvent,
    },

    /// List tracked snapshots, optionally for one cluster
    ListSnapshots { cluster_id: Option<String> },

    /// Delete a snapshot on the control plane (never automatic)
    DeleteSnapshot { snapshot_id: String },

    /// Start a cross-region copy
    StartCopy {
        snapshot_id: String,
        target_region: String,
    },

    /// Begin a blue-green restore
    BeginRestore { spec: RestoreSpec },

    /// Record the shadow-read validation signal for a restore
    ConfirmWarmup { restore_id: String },

    /// Cut traffic over to the restored cluster
    Cutover { restore_id: String },

    /// Abort a non-terminal restore
    AbortRestore { restore_id: String },

    /// List active restore requests
    ListRestores,

    /// Decommission a cluster (explicit operator action)
    Decommission { cluster_id: String },
}

/// Response data variants
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ResponseData {
    /// Simple success/pong
    Ok,

    /// Daemon status
    Status(StatusData),

    Policy(BackupPolicy),
    Policies(Vec<BackupPolicy>),

    Snapshot(SnapshotRecord),
    Snapshots(Vec<SnapshotRecord>),

    Restore(RestoreRequest),
    Restores(Vec<RestoreRequest>),
}

/// Daemon status summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusData {
    pub version: String,
    pub uptime_seconds: u64,
    pub policies: usize,
    pub pending_snapshots: usize,
    pub active_restores: usize,
    pub snapshots_triggered: u64,
    pub copies_started: u64,
    pub alerts_dispatched: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_serialization_is_tagged() {
        let req = Request {
            id: 7,
            method: Method::TriggerSnapshot {
                cluster_id: "fin-redis-rg".to_string(),
                reason: "pre-deploy".to_string(),
            },
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"type\":\"TriggerSnapshot\""));
        assert!(json.contains("\"params\""));

        let back: Request = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, 7);
        assert!(matches!(back.method, Method::TriggerSnapshot { .. }));
    }

    #[test]
    fn test_error_response_roundtrip() {
        let resp = Response {
            id: 3,
            result: Err("A manual snapshot is already pending for cluster fin-redis-rg".into()),
        };
        let json = serde_json::to_string(&resp).unwrap();
        let back: Response = serde_json::from_str(&json).unwrap();
        assert!(back.result.is_err());
    }
}
