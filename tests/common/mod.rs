//! Shared fixtures for integration tests
//!
//! Clusters run in-process on a [`LocalNetwork`]; the controller reaches them
//! through the same network unless a test wires a node to its own.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use xcdc::committed::CommitOutcome;
use xcdc::controller::{Controller, ControllerOptions};
use xcdc::errors::{CdcError, CdcResult};
use xcdc::node::{ClusterNode, NodeOptions, NodeStatus};
use xcdc::router::{ApplyAck, ReplicateMessage, RouterSettings};
use xcdc::topology::{ClusterDescriptor, ConnectionParam, TopologyEdge, TopologySnapshot};
use xcdc::transport::{ClusterClient, Connector, LocalNetwork};

pub const ROOT: &str = "root:Milvus";

/// Router tuned for tests: short backoff, small retry budget.
pub fn fast_router() -> RouterSettings {
    RouterSettings {
        pump_interval_ms: 10,
        initial_backoff_ms: 1,
        max_backoff_ms: 10,
        retry_budget: 3,
        batch_size: 256,
    }
}

pub fn edge(source: &str, target: &str) -> TopologyEdge {
    TopologyEdge::new(source, target)
}

pub struct Fixture {
    pub network: LocalNetwork,
    pub controller: Controller,
    pub nodes: BTreeMap<String, Arc<ClusterNode>>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_options(ControllerOptions {
            call_timeout: Duration::from_secs(2),
            drain_timeout: Duration::from_secs(2),
            ..Default::default()
        })
    }

    pub fn with_options(options: ControllerOptions) -> Self {
        let network = LocalNetwork::new();
        let controller = Controller::new(Arc::new(network.clone()), options);
        Self {
            network,
            controller,
            nodes: BTreeMap::new(),
        }
    }

    /// Controller whose configuration pushes can be refused per cluster.
    /// Clusters still reach each other directly.
    pub fn with_push_faults() -> (Self, PushFaults) {
        let network = LocalNetwork::new();
        let faults = PushFaults::new(network.clone());
        let controller = Controller::new(
            Arc::new(faults.clone()),
            ControllerOptions {
                call_timeout: Duration::from_secs(2),
                drain_timeout: Duration::from_secs(2),
                ..Default::default()
            },
        );
        let fx = Self {
            network,
            controller,
            nodes: BTreeMap::new(),
        };
        (fx, faults)
    }

    /// Open an in-memory cluster on the shared network and register it.
    pub fn add_cluster(&mut self, cluster_id: &str, pchannels: usize) -> Arc<ClusterNode> {
        let options = NodeOptions::new(cluster_id, pchannels).with_router(fast_router());
        let connector: Arc<dyn Connector> = Arc::new(self.network.clone());
        self.add_node(options, connector)
    }

    /// Open a cluster from explicit options and outbound connector.
    pub fn add_node(&mut self, options: NodeOptions, connector: Arc<dyn Connector>) -> Arc<ClusterNode> {
        let pchannels = options.physical_pchannels;
        let node = ClusterNode::open(options, connector).unwrap();
        self.network.attach(&node);
        self.controller
            .register_cluster(
                ROOT,
                ClusterDescriptor::new(node.cluster_id(), node.connection_param().clone(), pchannels),
            )
            .unwrap();
        self.nodes.insert(node.cluster_id().to_string(), node.clone());
        node
    }

    /// Open a cluster persisting its committed config under `data_dir` and register it.
    pub fn add_durable(&mut self, cluster_id: &str, pchannels: usize, data_dir: &Path) -> Arc<ClusterNode> {
        let options = NodeOptions::new(cluster_id, pchannels)
            .with_router(fast_router())
            .with_data_dir(data_dir);
        let connector: Arc<dyn Connector> = Arc::new(self.network.clone());
        self.add_node(options, connector)
    }

    /// Stop a durable cluster and reopen it from `data_dir` with `pchannels` physical channels.
    pub async fn restart(&mut self, cluster_id: &str, pchannels: usize, data_dir: &Path) -> Arc<ClusterNode> {
        if let Some(old) = self.nodes.remove(cluster_id) {
            old.shutdown();
            self.network.detach(&old.connection_param().uri);
        }
        let options = NodeOptions::new(cluster_id, pchannels)
            .with_router(fast_router())
            .with_data_dir(data_dir);
        let node = ClusterNode::open(options, Arc::new(self.network.clone())).unwrap();
        self.network.attach(&node);
        self.nodes.insert(cluster_id.to_string(), node.clone());
        self.controller
            .wait_healthy(cluster_id, Duration::from_secs(2))
            .await
            .unwrap();
        node
    }

    pub fn node(&self, cluster_id: &str) -> &Arc<ClusterNode> {
        &self.nodes[cluster_id]
    }

    /// Pump every node until nothing is pending anywhere.
    pub async fn converge(&self) {
        self.try_converge(Duration::from_secs(5))
            .await
            .expect("replication did not converge");
    }

    /// Like [`converge`](Self::converge) but reports the remaining lag instead of panicking.
    pub async fn try_converge(&self, timeout: Duration) -> Result<(), u64> {
        let deadline = Instant::now() + timeout;
        loop {
            for node in self.nodes.values() {
                node.replication().pump_all().await;
            }
            let lag: u64 = self.nodes.values().map(|n| n.replication().lag()).sum();
            if lag == 0 {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(lag);
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    }
}

/// Create a collection and load it so its rows can be queried.
pub fn create_loaded(node: &ClusterNode, name: &str, shards: usize) {
    node.create_collection(name, shards).unwrap();
    node.load_collection(name, 1).unwrap();
}

pub fn ids(range: std::ops::Range<i64>) -> Vec<i64> {
    range.collect()
}

// =============================================================================
// Push faults
// =============================================================================

/// Connector that refuses configuration pushes to selected clusters; every
/// other call goes through to the wrapped network.
#[derive(Clone)]
pub struct PushFaults {
    inner: LocalNetwork,
    refused: Arc<Mutex<HashSet<String>>>,
}

impl PushFaults {
    pub fn new(inner: LocalNetwork) -> Self {
        Self {
            inner,
            refused: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn refuse(&self, cluster_id: &str) {
        self.refused.lock().insert(cluster_id.to_string());
    }

    pub fn allow(&self, cluster_id: &str) {
        self.refused.lock().remove(cluster_id);
    }
}

#[async_trait]
impl Connector for PushFaults {
    async fn connect(&self, cluster_id: &str, param: &ConnectionParam) -> CdcResult<Arc<dyn ClusterClient>> {
        let inner = self.inner.connect(cluster_id, param).await?;
        Ok(Arc::new(FaultyClient {
            inner,
            refused: self.refused.clone(),
        }))
    }
}

struct FaultyClient {
    inner: Arc<dyn ClusterClient>,
    refused: Arc<Mutex<HashSet<String>>>,
}

#[async_trait]
impl ClusterClient for FaultyClient {
    fn cluster_id(&self) -> &str {
        self.inner.cluster_id()
    }

    async fn update_replicate_configuration(&self, snapshot: &TopologySnapshot) -> CdcResult<CommitOutcome> {
        if self.refused.lock().contains(self.inner.cluster_id()) {
            return Err(CdcError::transport(self.inner.cluster_id(), "configuration push refused"));
        }
        self.inner.update_replicate_configuration(snapshot).await
    }

    async fn replicate(&self, message: &ReplicateMessage) -> CdcResult<ApplyAck> {
        self.inner.replicate(message).await
    }

    async fn healthz(&self) -> CdcResult<bool> {
        self.inner.healthz().await
    }

    async fn fence_source(&self) -> CdcResult<()> {
        self.inner.fence_source().await
    }

    async fn unfence_source(&self) -> CdcResult<()> {
        self.inner.unfence_source().await
    }

    async fn drain_source(&self, timeout: Duration) -> CdcResult<()> {
        self.inner.drain_source(timeout).await
    }

    async fn resume_source(&self) -> CdcResult<()> {
        self.inner.resume_source().await
    }

    async fn status(&self) -> CdcResult<NodeStatus> {
        self.inner.status().await
    }
}
