//! Shared types for cachesnap.
//!
//! Domain model (backup policies, snapshot and restore lifecycles),
//! the alert event model, the error taxonomy, and the daemon IPC
//! protocol used by cachesnapctl.

pub mod error;
pub mod event;
pub mod ipc;
pub mod policy;
pub mod restore;
pub mod snapshot;

pub use error::OrchestratorError;
pub use event::{AlertEvent, AlertKind};
pub use policy::{BackupPolicy, ClusterTier, SnapshotWindow};
pub use restore::{RestorePhase, RestoreRequest, RestoreSpec};
pub use snapshot::{ChangeEvent, SnapshotRecord, SnapshotStatus, SnapshotTrigger};
