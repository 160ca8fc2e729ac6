//! Cluster role and client write admission
//!
//! A cluster's role is derived from its committed configuration alone.
//! Client writes are admitted only where this cluster is the authority for
//! its data: not a target of any committed edge, and not draining for a
//! switchover.

use serde::{Deserialize, Serialize};

use crate::committed::CommittedConfig;
use crate::errors::{CdcError, CdcResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterRole {
    /// No committed edges touch this cluster
    Standalone,
    /// Only outbound edges
    Source,
    /// Inbound edges
    Target,
}

impl ClusterRole {
    pub fn of(cluster_id: &str, committed: &CommittedConfig) -> Self {
        let outbound = !committed.targets_of(cluster_id).is_empty();
        let inbound = !committed.sources_of(cluster_id).is_empty();
        match (outbound, inbound) {
            (false, false) => Self::Standalone,
            (true, false) => Self::Source,
            (_, true) => Self::Target,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Standalone => "standalone",
            Self::Source => "source",
            Self::Target => "target",
        }
    }

    pub fn accepts_client_writes(&self) -> bool {
        matches!(self, Self::Standalone | Self::Source)
    }
}

/// Write admission decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteAdmission {
    Admitted,
    /// Cluster receives replicated data
    RejectedTarget,
    /// Outbound edges are draining for a switchover
    RejectedDraining,
    /// Node shut down
    RejectedStopped,
}

impl WriteAdmission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Self::Admitted)
    }

    pub fn to_result(&self, cluster_id: &str) -> CdcResult<()> {
        let reason = match self {
            Self::Admitted => return Ok(()),
            Self::RejectedTarget => "cluster is a replication target; write to its source instead",
            Self::RejectedDraining => "cluster is draining for switchover",
            Self::RejectedStopped => "cluster is stopped",
        };
        Err(CdcError::WriteRejected {
            cluster_id: cluster_id.to_string(),
            reason: reason.to_string(),
        })
    }
}

pub fn check_write_admission(role: ClusterRole, draining: bool, stopped: bool) -> WriteAdmission {
    if stopped {
        WriteAdmission::RejectedStopped
    } else if !role.accepts_client_writes() {
        WriteAdmission::RejectedTarget
    } else if draining {
        WriteAdmission::RejectedDraining
    } else {
        WriteAdmission::Admitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::{ClusterBuilder, TopologyEdge, TopologySnapshot};

    fn committed(edges: Vec<TopologyEdge>) -> CommittedConfig {
        let clusters = ["a", "b", "c"]
            .iter()
            .map(|id| ClusterBuilder::new(*id).with_pchannel_count(1).build())
            .collect();
        CommittedConfig::new(1, TopologySnapshot::new(clusters, edges).unwrap())
    }

    #[test]
    fn test_roles_from_edges() {
        let config = committed(vec![TopologyEdge::new("a", "b"), TopologyEdge::new("a", "c")]);
        assert_eq!(ClusterRole::of("a", &config), ClusterRole::Source);
        assert_eq!(ClusterRole::of("b", &config), ClusterRole::Target);
        assert_eq!(ClusterRole::of("c", &config), ClusterRole::Target);
        assert_eq!(ClusterRole::of("zz", &config), ClusterRole::Standalone);
    }

    #[test]
    fn test_admission_matrix() {
        assert!(check_write_admission(ClusterRole::Source, false, false).is_admitted());
        assert!(check_write_admission(ClusterRole::Standalone, false, false).is_admitted());
        assert_eq!(
            check_write_admission(ClusterRole::Target, false, false),
            WriteAdmission::RejectedTarget
        );
        assert_eq!(
            check_write_admission(ClusterRole::Source, true, false),
            WriteAdmission::RejectedDraining
        );
        assert_eq!(
            check_write_admission(ClusterRole::Source, false, true),
            WriteAdmission::RejectedStopped
        );
    }

    #[test]
    fn test_rejection_is_write_rejected_error() {
        let err = WriteAdmission::RejectedTarget.to_result("b").unwrap_err();
        assert_eq!(err.code(), "XCDC_WRITE_REJECTED");
    }
}
