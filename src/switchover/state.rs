//! Switchover state machine
//!
//! States are explicit and every transition is named. The coordinator moves
//! through them strictly in order:
//!
//! ```text
//! Idle -> Requested -> Fencing -> Draining -> Committing -> Propagating -> Unfencing -> Succeeded
//!                         \           \            \              \             \
//!                          `-----------`------------`-> RolledBack  `-------------`-> Failed
//! ```
//!
//! `RolledBack` means the prior topology is still authoritative everywhere.
//! `Failed` means the reversed snapshot reached the old source but not every
//! other cluster; the new source stays fenced until an operator re-pushes.

use serde::{Deserialize, Serialize};

use crate::errors::{CdcError, CdcResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum SwitchoverState {
    /// No switchover in progress
    Idle,
    Requested,
    /// New source is told not to stream yet
    Fencing,
    /// Old source refuses writes and flushes its outbound edges
    Draining,
    /// Reversed snapshot goes to the old source
    Committing,
    /// Reversed snapshot goes to every other cluster
    Propagating,
    /// New source starts streaming
    Unfencing,
    Succeeded,
    RolledBack { reason: String },
    Failed { reason: String },
}

impl Default for SwitchoverState {
    fn default() -> Self {
        Self::Idle
    }
}

impl SwitchoverState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Requested => "Requested",
            Self::Fencing => "Fencing",
            Self::Draining => "Draining",
            Self::Committing => "Committing",
            Self::Propagating => "Propagating",
            Self::Unfencing => "Unfencing",
            Self::Succeeded => "Succeeded",
            Self::RolledBack { .. } => "RolledBack",
            Self::Failed { .. } => "Failed",
        }
    }

    pub fn is_in_progress(&self) -> bool {
        !matches!(
            self,
            Self::Idle | Self::Succeeded | Self::RolledBack { .. } | Self::Failed { .. }
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::RolledBack { .. } | Self::Failed { .. })
    }

    /// Idle or any terminal state -> Requested
    pub fn request(self) -> CdcResult<Self> {
        if self.is_in_progress() {
            return Err(CdcError::illegal_transition(self.name(), "Requested"));
        }
        Ok(Self::Requested)
    }

    pub fn begin_fence(self) -> CdcResult<Self> {
        match self {
            Self::Requested => Ok(Self::Fencing),
            other => Err(CdcError::illegal_transition(other.name(), "Fencing")),
        }
    }

    pub fn begin_drain(self) -> CdcResult<Self> {
        match self {
            Self::Fencing => Ok(Self::Draining),
            other => Err(CdcError::illegal_transition(other.name(), "Draining")),
        }
    }

    pub fn begin_commit(self) -> CdcResult<Self> {
        match self {
            Self::Draining => Ok(Self::Committing),
            other => Err(CdcError::illegal_transition(other.name(), "Committing")),
        }
    }

    pub fn begin_propagate(self) -> CdcResult<Self> {
        match self {
            Self::Committing => Ok(Self::Propagating),
            other => Err(CdcError::illegal_transition(other.name(), "Propagating")),
        }
    }

    pub fn begin_unfence(self) -> CdcResult<Self> {
        match self {
            Self::Propagating => Ok(Self::Unfencing),
            other => Err(CdcError::illegal_transition(other.name(), "Unfencing")),
        }
    }

    pub fn succeed(self) -> CdcResult<Self> {
        match self {
            Self::Unfencing => Ok(Self::Succeeded),
            other => Err(CdcError::illegal_transition(other.name(), "Succeeded")),
        }
    }

    /// Before the old source committed: prior topology restored.
    pub fn roll_back(self, reason: impl Into<String>) -> CdcResult<Self> {
        match self {
            Self::Requested | Self::Fencing | Self::Draining | Self::Committing => {
                Ok(Self::RolledBack { reason: reason.into() })
            }
            other => Err(CdcError::illegal_transition(other.name(), "RolledBack")),
        }
    }

    /// After the old source committed: no way back.
    pub fn fail(self, reason: impl Into<String>) -> CdcResult<Self> {
        match self {
            Self::Propagating | Self::Unfencing => Ok(Self::Failed { reason: reason.into() }),
            other => Err(CdcError::illegal_transition(other.name(), "Failed")),
        }
    }
}
