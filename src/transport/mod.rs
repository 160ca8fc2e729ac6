//! Cluster transport
//!
//! [`ClusterClient`] is everything the control plane asks of a remote
//! cluster; [`Connector`] opens clients from connection parameters. The
//! [`ConnectionPool`] keeps one client per cluster id and reconnects when a
//! client goes stale or the cluster's connection parameters change.

pub mod http;
mod local;
mod pool;

pub use http::{DrainRequest, ErrorBody, HttpClusterClient, HttpConnector};
pub use local::LocalNetwork;
pub use pool::ConnectionPool;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::committed::CommitOutcome;
use crate::errors::CdcResult;
use crate::node::NodeStatus;
use crate::router::{ApplyAck, ReplicateMessage};
use crate::topology::{ConnectionParam, TopologySnapshot};

#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Cluster this client talks to
    fn cluster_id(&self) -> &str;

    /// Atomically replace the cluster's committed configuration.
    async fn update_replicate_configuration(&self, snapshot: &TopologySnapshot) -> CdcResult<CommitOutcome>;

    /// Deliver one replicated message to this cluster as a target.
    async fn replicate(&self, message: &ReplicateMessage) -> CdcResult<ApplyAck>;

    /// Readiness probe.
    async fn healthz(&self) -> CdcResult<bool>;

    /// Keep outbound edges from activating until unfenced.
    async fn fence_source(&self) -> CdcResult<()>;

    async fn unfence_source(&self) -> CdcResult<()>;

    /// Stop client writes and flush outbound edges, bounded by `timeout`.
    async fn drain_source(&self, timeout: Duration) -> CdcResult<()>;

    /// Undo a drain: accept writes and stream again.
    async fn resume_source(&self) -> CdcResult<()>;

    async fn status(&self) -> CdcResult<NodeStatus>;
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, cluster_id: &str, param: &ConnectionParam) -> CdcResult<Arc<dyn ClusterClient>>;
}
