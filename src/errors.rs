//! Error taxonomy for the replication control plane
//!
//! Every fallible operation in the crate returns [`CdcResult`]. Variants carry
//! enough structure for the caller to act on them: the distributor reports
//! per-cluster detail, the allocator reports pool sizes, and the router
//! classifies what may be retried.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Replication control plane error
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum CdcError {
    // ==================
    // Authorization
    // ==================
    /// Caller lacks administrative privilege. Raised before any side effect.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    // ==================
    // Allocation
    // ==================
    /// Committed pchannel pool is smaller than the requested shard count
    #[error("insufficient channels on cluster '{cluster_id}': requested {requested}, committed pool has {available}")]
    InsufficientChannels {
        cluster_id: String,
        requested: usize,
        available: usize,
    },

    // ==================
    // Distribution
    // ==================
    /// Some clusters committed the snapshot, others did not
    #[error(
        "configuration applied on {} of {} clusters; failed: {}",
        .succeeded.len(),
        .succeeded.len() + .failed.len(),
        describe_failures(.failed)
    )]
    DistributionPartialFailure {
        succeeded: Vec<String>,
        failed: Vec<(String, String)>,
    },

    // ==================
    // Replication
    // ==================
    /// Target rejected a replicated message because its committed config lags
    #[error("target '{cluster_id}' config is stale for '{pchannel}': {reason}")]
    TargetConfigStale {
        cluster_id: String,
        pchannel: String,
        reason: String,
    },

    /// Write refused by cluster role or switchover fence
    #[error("write rejected on '{cluster_id}': {reason}")]
    WriteRejected { cluster_id: String, reason: String },

    // ==================
    // Switchover
    // ==================
    /// Drain did not complete in time; prior topology remains authoritative
    #[error("switchover drain on '{cluster_id}' did not complete within {waited_ms}ms")]
    SwitchoverTimeout { cluster_id: String, waited_ms: u64 },

    /// Another switchover holds the coordinator
    #[error("switchover already in progress: {0}")]
    SwitchoverInProgress(String),

    // ==================
    // Registry / topology
    // ==================
    /// Cluster id already registered with a conflicting pchannel ordering
    #[error("duplicate cluster '{cluster_id}': {reason}")]
    DuplicateCluster { cluster_id: String, reason: String },

    /// Snapshot or edge set violates a structural rule
    #[error("invalid topology: {0}")]
    InvalidTopology(String),

    #[error("unknown cluster: {0}")]
    UnknownCluster(String),

    // ==================
    // Engine pass-through
    // ==================
    #[error("collection not found: {0}")]
    CollectionNotFound(String),

    #[error("collection already exists: {0}")]
    CollectionAlreadyExists(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    // ==================
    // Infrastructure
    // ==================
    /// State machine refused a transition
    #[error("illegal transition from {from} to {to}")]
    IllegalTransition { from: String, to: String },

    /// Bounded wait gave up at its hard deadline
    #[error("deadline exceeded after {waited_ms}ms waiting for {what}")]
    DeadlineExceeded { what: String, waited_ms: u64 },

    /// Remote cluster could not be reached or answered garbage
    #[error("transport error talking to '{cluster_id}': {message}")]
    Transport { cluster_id: String, message: String },

    /// Durable metadata could not be read or written
    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("configuration error: {0}")]
    Config(String),
}

fn describe_failures(failed: &[(String, String)]) -> String {
    failed
        .iter()
        .map(|(cluster, reason)| format!("{} ({})", cluster, reason))
        .collect::<Vec<_>>()
        .join(", ")
}

impl CdcError {
    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::PermissionDenied(message.into())
    }

    pub fn invalid_topology(message: impl Into<String>) -> Self {
        Self::InvalidTopology(message.into())
    }

    pub fn transport(cluster_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            cluster_id: cluster_id.into(),
            message: message.into(),
        }
    }

    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence(message.into())
    }

    pub fn illegal_transition(from: &str, to: &str) -> Self {
        Self::IllegalTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    pub fn stale(
        cluster_id: impl Into<String>,
        pchannel: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::TargetConfigStale {
            cluster_id: cluster_id.into(),
            pchannel: pchannel.into(),
            reason: reason.into(),
        }
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            Self::PermissionDenied(_) => "XCDC_PERMISSION_DENIED",
            Self::InsufficientChannels { .. } => "XCDC_INSUFFICIENT_CHANNELS",
            Self::DistributionPartialFailure { .. } => "XCDC_DISTRIBUTION_PARTIAL_FAILURE",
            Self::TargetConfigStale { .. } => "XCDC_TARGET_CONFIG_STALE",
            Self::WriteRejected { .. } => "XCDC_WRITE_REJECTED",
            Self::SwitchoverTimeout { .. } => "XCDC_SWITCHOVER_TIMEOUT",
            Self::SwitchoverInProgress(_) => "XCDC_SWITCHOVER_IN_PROGRESS",
            Self::DuplicateCluster { .. } => "XCDC_DUPLICATE_CLUSTER",
            Self::InvalidTopology(_) => "XCDC_INVALID_TOPOLOGY",
            Self::UnknownCluster(_) => "XCDC_UNKNOWN_CLUSTER",
            Self::CollectionNotFound(_) => "XCDC_COLLECTION_NOT_FOUND",
            Self::CollectionAlreadyExists(_) => "XCDC_COLLECTION_EXISTS",
            Self::InvalidArgument(_) => "XCDC_INVALID_ARGUMENT",
            Self::IllegalTransition { .. } => "XCDC_ILLEGAL_TRANSITION",
            Self::DeadlineExceeded { .. } => "XCDC_DEADLINE_EXCEEDED",
            Self::Transport { .. } => "XCDC_TRANSPORT",
            Self::Persistence(_) => "XCDC_PERSISTENCE",
            Self::Config(_) => "XCDC_CONFIG",
        }
    }

    /// HTTP status used when the error crosses the wire
    pub fn status_code(&self) -> u16 {
        match self {
            Self::PermissionDenied(_) => 403,
            Self::CollectionNotFound(_) | Self::UnknownCluster(_) => 404,
            Self::CollectionAlreadyExists(_)
            | Self::DuplicateCluster { .. }
            | Self::SwitchoverInProgress(_)
            | Self::TargetConfigStale { .. }
            | Self::WriteRejected { .. }
            | Self::IllegalTransition { .. } => 409,
            Self::InsufficientChannels { .. }
            | Self::InvalidTopology(_)
            | Self::InvalidArgument(_)
            | Self::Config(_) => 422,
            Self::Transport { .. } => 502,
            Self::DistributionPartialFailure { .. } => 502,
            Self::SwitchoverTimeout { .. } | Self::DeadlineExceeded { .. } => 504,
            Self::Persistence(_) => 500,
        }
    }

    /// Whether the router may retry the operation that produced this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TargetConfigStale { .. } | Self::Transport { .. })
    }
}

/// Result type for control plane operations
pub type CdcResult<T> = Result<T, CdcError>;
