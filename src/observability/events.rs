//! Observable control plane events
//!
//! Every structured log line carries an `event` field drawn from this closed
//! vocabulary so operators can grep and alert on stable names.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Lifecycle
    NodeStarted,
    NodeStopped,
    HttpServerStarted,

    // Registry and configuration
    ClusterRegistered,
    /// Persisted configuration read back at startup
    ConfigLoaded,
    /// No persisted configuration; standalone snapshot committed
    ConfigBootstrapped,
    ConfigCommitted,
    /// Identical snapshot re-applied
    ConfigUnchanged,
    ConfigRejected,

    // Distribution
    ClusterPushSucceeded,
    ClusterPushFailed,
    ConnectionOpened,
    ConnectionStale,

    // Allocation
    VchannelsAllocated,
    AllocationRejected,

    // Routing
    EdgeStateChanged,
    EdgeRemoved,
    ReplicationRejected,
    /// Retry budget exhausted on a lane
    ReplicationAlert,
    ReplicationRecovered,
    /// A source pchannel arrived with a new log incarnation
    SourceLogRestarted,

    // Switchover
    SourceFenced,
    SourceUnfenced,
    DrainComplete,
    DrainTimeout,
    SwitchoverStep,

    HealthWait,
}

impl Event {
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::NodeStarted => "NODE_STARTED",
            Event::NodeStopped => "NODE_STOPPED",
            Event::HttpServerStarted => "HTTP_SERVER_STARTED",

            Event::ClusterRegistered => "CLUSTER_REGISTERED",
            Event::ConfigLoaded => "CONFIG_LOADED",
            Event::ConfigBootstrapped => "CONFIG_BOOTSTRAPPED",
            Event::ConfigCommitted => "CONFIG_COMMITTED",
            Event::ConfigUnchanged => "CONFIG_UNCHANGED",
            Event::ConfigRejected => "CONFIG_REJECTED",

            Event::ClusterPushSucceeded => "CLUSTER_PUSH_SUCCEEDED",
            Event::ClusterPushFailed => "CLUSTER_PUSH_FAILED",
            Event::ConnectionOpened => "CONNECTION_OPENED",
            Event::ConnectionStale => "CONNECTION_STALE",

            Event::VchannelsAllocated => "VCHANNELS_ALLOCATED",
            Event::AllocationRejected => "ALLOCATION_REJECTED",

            Event::EdgeStateChanged => "EDGE_STATE_CHANGED",
            Event::EdgeRemoved => "EDGE_REMOVED",
            Event::ReplicationRejected => "REPLICATION_REJECTED",
            Event::ReplicationAlert => "REPLICATION_ALERT",
            Event::ReplicationRecovered => "REPLICATION_RECOVERED",
            Event::SourceLogRestarted => "SOURCE_LOG_RESTARTED",

            Event::SourceFenced => "SOURCE_FENCED",
            Event::SourceUnfenced => "SOURCE_UNFENCED",
            Event::DrainComplete => "DRAIN_COMPLETE",
            Event::DrainTimeout => "DRAIN_TIMEOUT",
            Event::SwitchoverStep => "SWITCHOVER_STEP",

            Event::HealthWait => "HEALTH_WAIT",
        }
    }

    /// Events that need operator attention.
    pub fn is_alert(&self) -> bool {
        matches!(
            self,
            Event::ReplicationAlert | Event::DrainTimeout | Event::ClusterPushFailed
        )
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
