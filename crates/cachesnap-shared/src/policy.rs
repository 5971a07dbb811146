//! Per-cluster backup policy.
//!
//! A policy drives both the automatic-snapshot configuration pushed to
//! the control plane and the cross-region replication of completed
//! snapshots. Validation happens at the store boundary: an invalid
//! policy is never persisted.

use crate::error::OrchestratorError;
use serde::{Deserialize, Serialize};

/// Automatic snapshots cannot be retained longer than this (provider limit).
pub const MAX_RETENTION_DAYS: u8 = 35;

/// Reserved-memory bounds recommended for production tiers. Headroom
/// below 25% risks the snapshot fork running the node out of memory.
pub const PROD_RESERVED_MEMORY_MIN: u8 = 25;
pub const PROD_RESERVED_MEMORY_MAX: u8 = 50;

/// Minimum snapshot window length accepted by the control plane.
pub const MIN_WINDOW_MINUTES: u16 = 60;

/// Cluster tier, used to decide how strict reserved-memory checks are
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ClusterTier {
    #[default]
    Staging,
    Production,
}

impl std::fmt::Display for ClusterTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Staging => write!(f, "staging"),
            Self::Production => write!(f, "production"),
        }
    }
}

/// Daily time-of-day range (UTC) in which automatic snapshots may run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotWindow {
    pub start_hour: u8,
    pub start_minute: u8,
    pub duration_minutes: u16,
}

impl SnapshotWindow {
    pub fn new(start_hour: u8, start_minute: u8, duration_minutes: u16) -> Self {
        Self {
            start_hour,
            start_minute,
            duration_minutes,
        }
    }

    pub fn validate(&self) -> Result<(), OrchestratorError> {
        if self.start_hour > 23 || self.start_minute > 59 {
            return Err(OrchestratorError::InvalidPolicy {
                reason: format!(
                    "snapshot window start {:02}:{:02} is not a valid UTC time",
                    self.start_hour, self.start_minute
                ),
            });
        }
        if self.duration_minutes < MIN_WINDOW_MINUTES {
            return Err(OrchestratorError::InvalidPolicy {
                reason: format!(
                    "snapshot window must span at least {} minutes, got {}",
                    MIN_WINDOW_MINUTES, self.duration_minutes
                ),
            });
        }
        Ok(())
    }
}

impl Default for SnapshotWindow {
    fn default() -> Self {
        // Quiet hours for most fleets
        Self {
            start_hour: 3,
            start_minute: 0,
            duration_minutes: 60,
        }
    }
}

impl std::fmt::Display for SnapshotWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:02}:{:02}+{}m",
            self.start_hour, self.start_minute, self.duration_minutes
        )
    }
}

/// Backup policy for a single cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupPolicy {
    pub cluster_id: String,

    /// Automatic snapshot retention in days (1..=35)
    pub retention_days: u8,

    /// Daily automatic snapshot window (UTC)
    #[serde(default)]
    pub window: SnapshotWindow,

    /// Memory headroom reserved for the snapshot fork, as a percent
    pub reserved_memory_percent: u8,

    /// DR region completed snapshots are replicated to, if any
    #[serde(default)]
    pub copy_to_region: Option<String>,

    #[serde(default)]
    pub tier: ClusterTier,
}

impl BackupPolicy {
    pub fn validate(&self) -> Result<(), OrchestratorError> {
        if self.cluster_id.trim().is_empty() {
            return Err(OrchestratorError::InvalidPolicy {
                reason: "cluster_id must not be empty".to_string(),
            });
        }
        if self.retention_days == 0 || self.retention_days > MAX_RETENTION_DAYS {
            return Err(OrchestratorError::InvalidPolicy {
                reason: format!(
                    "retention_days must be within 1..={}, got {}",
                    MAX_RETENTION_DAYS, self.retention_days
                ),
            });
        }
        if self.reserved_memory_percent > 100 {
            return Err(OrchestratorError::InvalidPolicy {
                reason: format!(
                    "reserved_memory_percent must be within 0..=100, got {}",
                    self.reserved_memory_percent
                ),
            });
        }
        if self.tier == ClusterTier::Production
            && !(PROD_RESERVED_MEMORY_MIN..=PROD_RESERVED_MEMORY_MAX)
                .contains(&self.reserved_memory_percent)
        {
            return Err(OrchestratorError::InvalidPolicy {
                reason: format!(
                    "production clusters require reserved_memory_percent within {}..={}, got {}",
                    PROD_RESERVED_MEMORY_MIN,
                    PROD_RESERVED_MEMORY_MAX,
                    self.reserved_memory_percent
                ),
            });
        }
        self.window.validate()
    }
}
