//! Per-edge replication state machine
//!
//! ```text
//! Inactive -> Streaming -> Paused(reason) -> Streaming
//!             Streaming -> Draining -> Paused(Drained)
//!             Draining  -> Streaming            (drain aborted)
//! any       -> Removed                          (terminal)
//! ```
//!
//! Transitions consume the current state and return the next one, or an
//! `IllegalTransition` error leaving the caller to keep the old state.

use serde::{Deserialize, Serialize};

use crate::errors::{CdcError, CdcResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PauseReason {
    /// Transport failure; probed and resumed automatically
    TargetUnreachable,
    /// Source fenced for switchover
    Fenced,
    /// Drain finished; waiting for the new topology
    Drained,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum EdgeState {
    Inactive,
    Streaming,
    Paused(PauseReason),
    Draining,
    Removed,
}

impl EdgeState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Inactive => "Inactive",
            Self::Streaming => "Streaming",
            Self::Paused(PauseReason::TargetUnreachable) => "Paused(TargetUnreachable)",
            Self::Paused(PauseReason::Fenced) => "Paused(Fenced)",
            Self::Paused(PauseReason::Drained) => "Paused(Drained)",
            Self::Draining => "Draining",
            Self::Removed => "Removed",
        }
    }

    /// Forwarding messages in this state.
    pub fn is_routing(&self) -> bool {
        matches!(self, Self::Streaming | Self::Draining)
    }

    pub fn is_removed(&self) -> bool {
        matches!(self, Self::Removed)
    }

    fn illegal(self, to: &str) -> CdcError {
        CdcError::illegal_transition(self.name(), to)
    }

    /// Inactive -> Streaming
    pub fn activate(self) -> CdcResult<Self> {
        match self {
            Self::Inactive => Ok(Self::Streaming),
            other => Err(other.illegal("Streaming")),
        }
    }

    /// Streaming -> Paused. Draining may also pause on target loss.
    pub fn pause(self, reason: PauseReason) -> CdcResult<Self> {
        match self {
            Self::Streaming => Ok(Self::Paused(reason)),
            Self::Draining if reason == PauseReason::TargetUnreachable => Ok(Self::Paused(reason)),
            Self::Paused(current) if current == reason => Ok(self),
            other => Err(other.illegal("Paused")),
        }
    }

    /// Paused -> Streaming, resuming from the last acknowledged offset.
    pub fn resume(self) -> CdcResult<Self> {
        match self {
            Self::Paused(_) => Ok(Self::Streaming),
            Self::Streaming => Ok(Self::Streaming),
            other => Err(other.illegal("Streaming")),
        }
    }

    /// Streaming -> Draining
    pub fn begin_drain(self) -> CdcResult<Self> {
        match self {
            Self::Streaming | Self::Paused(PauseReason::TargetUnreachable) => Ok(Self::Draining),
            Self::Draining => Ok(self),
            other => Err(other.illegal("Draining")),
        }
    }

    /// Draining -> Paused(Drained)
    pub fn finish_drain(self) -> CdcResult<Self> {
        match self {
            Self::Draining | Self::Paused(PauseReason::Drained) => Ok(Self::Paused(PauseReason::Drained)),
            other => Err(other.illegal("Paused(Drained)")),
        }
    }

    /// Draining -> Streaming
    pub fn abort_drain(self) -> CdcResult<Self> {
        match self {
            Self::Draining | Self::Paused(PauseReason::TargetUnreachable) => Ok(Self::Streaming),
            other => Err(other.illegal("Streaming")),
        }
    }

    /// any -> Removed
    pub fn remove(self) -> CdcResult<Self> {
        match self {
            Self::Removed => Err(self.illegal("Removed")),
            _ => Ok(Self::Removed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normal_lifecycle() {
        let state = EdgeState::Inactive.activate().unwrap();
        assert!(state.is_routing());
        let state = state.pause(PauseReason::TargetUnreachable).unwrap();
        assert!(!state.is_routing());
        let state = state.resume().unwrap();
        assert_eq!(state, EdgeState::Streaming);
        assert_eq!(state.remove().unwrap(), EdgeState::Removed);
    }

    #[test]
    fn test_drain_cycle() {
        let state = EdgeState::Streaming.begin_drain().unwrap();
        assert!(state.is_routing());
        let drained = state.finish_drain().unwrap();
        assert_eq!(drained, EdgeState::Paused(PauseReason::Drained));
        assert!(!drained.is_routing());
        assert_eq!(EdgeState::Draining.abort_drain().unwrap(), EdgeState::Streaming);
    }

    #[test]
    fn test_removed_is_terminal() {
        assert!(EdgeState::Removed.activate().is_err());
        assert!(EdgeState::Removed.resume().is_err());
        assert!(EdgeState::Removed.begin_drain().is_err());
        assert!(EdgeState::Removed.remove().is_err());
    }

    #[test]
    fn test_inactive_cannot_pause_or_drain() {
        assert!(EdgeState::Inactive.pause(PauseReason::Fenced).is_err());
        assert!(EdgeState::Inactive.begin_drain().is_err());
    }

    #[test]
    fn test_illegal_transition_names_states() {
        let err = EdgeState::Removed.activate().unwrap_err();
        assert_eq!(
            err,
            CdcError::IllegalTransition {
                from: "Removed".into(),
                to: "Streaming".into()
            }
        );
    }
}
