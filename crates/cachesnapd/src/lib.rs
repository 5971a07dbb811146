//! cachesnapd - snapshot-lifecycle and DR orchestrator daemon.
//!
//! Sits atop a managed cache control-plane API and owns backup
//! policies, snapshot scheduling and tracking, cross-region copy,
//! blue-green restore sequencing, and alert dispatch.

pub mod alerts;
pub mod config;
pub mod control_plane;
pub mod copier;
pub mod metrics;
pub mod policy_store;
pub mod restore;
pub mod rpc_server;
pub mod scheduler;
pub mod state;
pub mod tracker;
