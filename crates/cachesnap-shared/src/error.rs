//! Error types for cachesnap.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Invalid policy: {reason}")]
    InvalidPolicy { reason: String },

    #[error("A manual snapshot is already pending for cluster {cluster_id}")]
    SchedulingConflict { cluster_id: String },

    #[error("Copy of {snapshot_id} to {region} is already in flight")]
    CopyInProgress {
        snapshot_id: String,
        region: String,
    },

    #[error("Snapshot {snapshot_id} is not in a usable terminal state")]
    SourceNotReady { snapshot_id: String },

    #[error("Restore {restore_id} has no warm-up confirmation; cutover refused")]
    WarmupIncomplete { restore_id: String },

    #[error("An active restore already targets cluster {cluster_id}")]
    RestoreConflict { cluster_id: String },

    #[error("Restore {restore_id} cannot leave phase {phase} this way")]
    PhaseViolation { restore_id: String, phase: String },

    #[error("Unknown snapshot: {0}")]
    UnknownSnapshot(String),

    #[error("Unknown restore: {0}")]
    UnknownRestore(String),

    #[error("Unknown cluster: {0}")]
    UnknownCluster(String),

    #[error("Control-plane API error: {0}")]
    ExternalApi(String),

    #[error("Snapshot {snapshot_id} failed on the provider side")]
    SnapshotFailed { snapshot_id: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl OrchestratorError {
    pub fn code(&self) -> i32 {
        match self {
            OrchestratorError::InvalidPolicy { .. } => -32000,
            OrchestratorError::SchedulingConflict { .. } => -32001,
            OrchestratorError::CopyInProgress { .. } => -32002,
            OrchestratorError::SourceNotReady { .. } => -32003,
            OrchestratorError::WarmupIncomplete { .. } => -32004,
            OrchestratorError::RestoreConflict { .. } => -32005,
            OrchestratorError::PhaseViolation { .. } => -32006,
            OrchestratorError::UnknownSnapshot(_) => -32010,
            OrchestratorError::UnknownRestore(_) => -32011,
            OrchestratorError::UnknownCluster(_) => -32012,
            OrchestratorError::ExternalApi(_) => -32020,
            OrchestratorError::SnapshotFailed { .. } => -32021,
            OrchestratorError::Io(_) => -32030,
            OrchestratorError::Json(_) => -32700,
        }
    }

    /// Transient errors are eligible for bounded retry with backoff.
    /// Everything else fails fast at the call boundary.
    pub fn is_transient(&self) -> bool {
        matches!(self, OrchestratorError::ExternalApi(_))
    }
}
