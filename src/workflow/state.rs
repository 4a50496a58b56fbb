//! Run lifecycle state machine.

use crate::error::ApiError;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureReason {
    UserCancelled,
    OutlineExhausted,
    CheckpointWriteFailed,
    ConsistencyFailed,
    AllSectionsFailed,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            FailureReason::UserCancelled => "UserCancelled",
            FailureReason::OutlineExhausted => "OutlineExhausted",
            FailureReason::CheckpointWriteFailed => "CheckpointWriteFailed",
            FailureReason::ConsistencyFailed => "ConsistencyFailed",
            FailureReason::AllSectionsFailed => "AllSectionsFailed",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    Created,
    OutlineReady,
    SectionsScheduled,
    SectionsComplete,
    PartiallyComplete,
    ConsistencyChecked,
    Finalized,
    Failed(FailureReason),
}

impl RunState {
    pub fn name(&self) -> &'static str {
        match self {
            RunState::Created => "Created",
            RunState::OutlineReady => "OutlineReady",
            RunState::SectionsScheduled => "SectionsScheduled",
            RunState::SectionsComplete => "SectionsComplete",
            RunState::PartiallyComplete => "PartiallyComplete",
            RunState::ConsistencyChecked => "ConsistencyChecked",
            RunState::Finalized => "Finalized",
            RunState::Failed(_) => "Failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Finalized | RunState::Failed(_))
    }

    /// States in which section artifacts exist and may be read or updated
    pub fn artifacts_available(&self) -> bool {
        matches!(
            self,
            RunState::SectionsComplete
                | RunState::PartiallyComplete
                | RunState::ConsistencyChecked
                | RunState::Finalized
        )
    }

    pub fn can_transition_to(&self, to: &RunState) -> bool {
        use RunState::*;
        match (self, to) {
            (Finalized, _) | (Failed(_), _) => false,
            (_, Failed(_)) => true,
            (Created, OutlineReady) => true,
            (OutlineReady, SectionsScheduled) => true,
            (SectionsScheduled, SectionsComplete) | (SectionsScheduled, PartiallyComplete) => true,
            (SectionsComplete, ConsistencyChecked) | (SectionsComplete, PartiallyComplete) => true,
            (ConsistencyChecked, Finalized) | (ConsistencyChecked, PartiallyComplete) => true,
            // Degraded delivery accepted, or failed tasks re-issued
            (PartiallyComplete, Finalized) | (PartiallyComplete, SectionsScheduled) => true,
            _ => false,
        }
    }

    /// The only way a run changes state
    pub fn transition(self, to: RunState) -> Result<RunState, ApiError> {
        if self.can_transition_to(&to) {
            Ok(to)
        } else {
            Err(ApiError::InvalidTransition {
                from: self.to_string(),
                to: to.to_string(),
            })
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Failed(reason) => write!(f, "Failed({})", reason),
            other => f.write_str(other.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path() {
        let state = RunState::Created
            .transition(RunState::OutlineReady)
            .and_then(|s| s.transition(RunState::SectionsScheduled))
            .and_then(|s| s.transition(RunState::SectionsComplete))
            .and_then(|s| s.transition(RunState::ConsistencyChecked))
            .and_then(|s| s.transition(RunState::Finalized))
            .unwrap();
        assert_eq!(state, RunState::Finalized);
        assert!(state.is_terminal());
    }

    #[test]
    fn degraded_paths() {
        let state = RunState::SectionsScheduled
            .transition(RunState::PartiallyComplete)
            .and_then(|s| s.transition(RunState::Finalized))
            .unwrap();
        assert_eq!(state, RunState::Finalized);

        let retried = RunState::ConsistencyChecked
            .transition(RunState::PartiallyComplete)
            .and_then(|s| s.transition(RunState::SectionsScheduled))
            .unwrap();
        assert_eq!(retried, RunState::SectionsScheduled);
    }

    #[test]
    fn illegal_transitions_are_rejected() {
        let err = RunState::Created
            .transition(RunState::Finalized)
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidTransition { .. }));
        assert!(RunState::PartiallyComplete
            .transition(RunState::ConsistencyChecked)
            .is_err());
        assert!(RunState::OutlineReady
            .transition(RunState::SectionsComplete)
            .is_err());
        assert!(RunState::Finalized
            .transition(RunState::Failed(FailureReason::UserCancelled))
            .is_err());
        assert!(RunState::Failed(FailureReason::OutlineExhausted)
            .transition(RunState::OutlineReady)
            .is_err());
    }

    #[test]
    fn any_live_state_can_fail() {
        for state in [
            RunState::Created,
            RunState::OutlineReady,
            RunState::SectionsScheduled,
            RunState::SectionsComplete,
            RunState::PartiallyComplete,
            RunState::ConsistencyChecked,
        ] {
            assert!(state
                .transition(RunState::Failed(FailureReason::CheckpointWriteFailed))
                .is_ok());
        }
    }

    #[test]
    fn display_includes_failure_reason() {
        assert_eq!(
            RunState::Failed(FailureReason::ConsistencyFailed).to_string(),
            "Failed(ConsistencyFailed)"
        );
        assert_eq!(RunState::OutlineReady.to_string(), "OutlineReady");
        assert!(!RunState::OutlineReady.artifacts_available());
        assert!(RunState::PartiallyComplete.artifacts_available());
    }
}
