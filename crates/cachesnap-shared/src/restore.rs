//! Blue-green restore lifecycle.
//!
//! requested -> restoring -> warming -> cutover -> complete, with abort
//! reachable from any non-terminal phase. Transition legality lives in
//! a pure function so the orchestrator carries no hidden state.

use crate::error::OrchestratorError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RestorePhase {
    #[default]
    Requested,
    Restoring,
    Warming,
    Cutover,
    Complete,
    Aborted,
}

impl RestorePhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Aborted)
    }
}

impl std::fmt::Display for RestorePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Requested => write!(f, "requested"),
            Self::Restoring => write!(f, "restoring"),
            Self::Warming => write!(f, "warming"),
            Self::Cutover => write!(f, "cutover"),
            Self::Complete => write!(f, "complete"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

/// Legal phase transitions for a restore request
pub fn allowed_transition(from: RestorePhase, to: RestorePhase) -> bool {
    use RestorePhase::*;
    match (from, to) {
        (Requested, Restoring) => true,
        (Restoring, Warming) => true,
        (Warming, Cutover) => true,
        (Cutover, Complete) => true,
        (from, Aborted) => !from.is_terminal(),
        _ => false,
    }
}

/// Operator input for starting a restore
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreSpec {
    pub target_cluster_id: String,
    pub snapshot_id: String,
    pub node_type: String,
    pub multi_az: bool,
}

/// One blue-green restore, owned by the orchestrator for its lifetime
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreRequest {
    pub id: String,
    pub target_cluster_id: String,
    pub snapshot_id: String,
    pub node_type: String,
    pub multi_az: bool,
    pub phase: RestorePhase,
    /// Set by the external shadow-read validation signal
    pub warmup_confirmed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RestoreRequest {
    pub fn new(spec: RestoreSpec) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            target_cluster_id: spec.target_cluster_id,
            snapshot_id: spec.snapshot_id,
            node_type: spec.node_type,
            multi_az: spec.multi_az,
            phase: RestorePhase::Requested,
            warmup_confirmed: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to the next phase, refusing illegal transitions.
    pub fn advance(&mut self, to: RestorePhase) -> Result<(), OrchestratorError> {
        if !allowed_transition(self.phase, to) {
            return Err(OrchestratorError::PhaseViolation {
                restore_id: self.id.clone(),
                phase: self.phase.to_string(),
            });
        }
        self.phase = to;
        self.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> RestoreSpec {
        RestoreSpec {
            target_cluster_id: "fin-redis-rg-green".to_string(),
            snapshot_id: "fin-redis-rg-manual-20260824-101530".to_string(),
            node_type: "cache.r6g.large".to_string(),
            multi_az: true,
        }
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut req = RestoreRequest::new(spec());
        req.advance(RestorePhase::Restoring).unwrap();
        req.advance(RestorePhase::Warming).unwrap();
        req.advance(RestorePhase::Cutover).unwrap();
        req.advance(RestorePhase::Complete).unwrap();
        assert!(req.phase.is_terminal());
    }

    #[test]
    fn test_cannot_skip_warming() {
        let mut req = RestoreRequest::new(spec());
        req.advance(RestorePhase::Restoring).unwrap();
        let err = req.advance(RestorePhase::Cutover).unwrap_err();
        assert!(matches!(err, OrchestratorError::PhaseViolation { .. }));
        assert_eq!(req.phase, RestorePhase::Restoring);
    }

    #[test]
    fn test_abort_from_any_nonterminal_phase() {
        for target in [
            RestorePhase::Requested,
            RestorePhase::Restoring,
            RestorePhase::Warming,
            RestorePhase::Cutover,
        ] {
            assert!(allowed_transition(target, RestorePhase::Aborted));
        }
        assert!(!allowed_transition(RestorePhase::Complete, RestorePhase::Aborted));
        assert!(!allowed_transition(RestorePhase::Aborted, RestorePhase::Aborted));
    }

    #[test]
    fn test_terminal_phases_are_final() {
        let mut req = RestoreRequest::new(spec());
        req.advance(RestorePhase::Aborted).unwrap();
        assert!(req.advance(RestorePhase::Restoring).is_err());
    }
}
