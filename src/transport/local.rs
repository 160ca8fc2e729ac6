//! In-process transport
//!
//! Nodes attach to a [`LocalNetwork`] under their advertised URI. Clients
//! authenticate with the node's own user table when connecting, hold only a
//! weak reference to the node, and fail with a transport error once the node
//! is stopped, dropped, or marked unreachable.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::auth::Principal;
use crate::committed::CommitOutcome;
use crate::errors::{CdcError, CdcResult};
use crate::node::{ClusterNode, NodeStatus};
use crate::router::{ApplyAck, ReplicateMessage};
use crate::topology::{ConnectionParam, TopologySnapshot};

use super::{ClusterClient, Connector};

#[derive(Default)]
struct Inner {
    nodes: RwLock<HashMap<String, Weak<ClusterNode>>>,
    unreachable: RwLock<HashSet<String>>,
}

/// Address book of in-process nodes
#[derive(Clone, Default)]
pub struct LocalNetwork {
    inner: Arc<Inner>,
}

impl LocalNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `node` reachable at its advertised URI.
    pub fn attach(&self, node: &Arc<ClusterNode>) {
        self.inner
            .nodes
            .write()
            .insert(node.connection_param().uri.clone(), Arc::downgrade(node));
    }

    pub fn detach(&self, uri: &str) {
        self.inner.nodes.write().remove(uri);
    }

    /// Simulate a partition between this network and `cluster_id`.
    pub fn set_reachable(&self, cluster_id: &str, reachable: bool) {
        let mut unreachable = self.inner.unreachable.write();
        if reachable {
            unreachable.remove(cluster_id);
        } else {
            unreachable.insert(cluster_id.to_string());
        }
    }

    fn is_reachable(&self, cluster_id: &str) -> bool {
        !self.inner.unreachable.read().contains(cluster_id)
    }

    fn lookup(&self, cluster_id: &str, uri: &str) -> CdcResult<Arc<ClusterNode>> {
        if !self.is_reachable(cluster_id) {
            return Err(CdcError::transport(cluster_id, "cluster unreachable"));
        }
        let node = self
            .inner
            .nodes
            .read()
            .get(uri)
            .and_then(Weak::upgrade)
            .ok_or_else(|| CdcError::transport(cluster_id, format!("nothing listening at '{}'", uri)))?;
        if node.is_stopped() {
            return Err(CdcError::transport(cluster_id, "cluster is stopped"));
        }
        if node.cluster_id() != cluster_id {
            return Err(CdcError::transport(
                cluster_id,
                format!("'{}' is served by cluster '{}'", uri, node.cluster_id()),
            ));
        }
        Ok(node)
    }
}

#[async_trait]
impl Connector for LocalNetwork {
    async fn connect(&self, cluster_id: &str, param: &ConnectionParam) -> CdcResult<Arc<dyn ClusterClient>> {
        let node = self.lookup(cluster_id, &param.uri)?;
        let principal = node.auth().authenticate(&param.token)?;
        Ok(Arc::new(LocalClient {
            cluster_id: cluster_id.to_string(),
            uri: param.uri.clone(),
            node: Arc::downgrade(&node),
            principal,
            network: self.clone(),
        }))
    }
}

struct LocalClient {
    cluster_id: String,
    uri: String,
    node: Weak<ClusterNode>,
    principal: Principal,
    network: LocalNetwork,
}

impl LocalClient {
    fn node(&self) -> CdcResult<Arc<ClusterNode>> {
        if !self.network.is_reachable(&self.cluster_id) {
            return Err(CdcError::transport(&self.cluster_id, "cluster unreachable"));
        }
        match self.node.upgrade() {
            Some(node) if !node.is_stopped() => Ok(node),
            _ => Err(CdcError::transport(
                &self.cluster_id,
                format!("connection to '{}' closed", self.uri),
            )),
        }
    }
}

#[async_trait]
impl ClusterClient for LocalClient {
    fn cluster_id(&self) -> &str {
        &self.cluster_id
    }

    async fn update_replicate_configuration(&self, snapshot: &TopologySnapshot) -> CdcResult<CommitOutcome> {
        self.node()?.apply_configuration(&self.principal, snapshot.clone())
    }

    async fn replicate(&self, message: &ReplicateMessage) -> CdcResult<ApplyAck> {
        self.node()?.apply_replicated(&self.principal, message)
    }

    async fn healthz(&self) -> CdcResult<bool> {
        Ok(self.node()?.healthy())
    }

    async fn fence_source(&self) -> CdcResult<()> {
        self.node()?.fence_source(&self.principal)
    }

    async fn unfence_source(&self) -> CdcResult<()> {
        self.node()?.unfence_source(&self.principal)
    }

    async fn drain_source(&self, timeout: Duration) -> CdcResult<()> {
        let node = self.node()?;
        node.drain_source(&self.principal, timeout).await
    }

    async fn resume_source(&self) -> CdcResult<()> {
        self.node()?.resume_source(&self.principal)
    }

    async fn status(&self) -> CdcResult<NodeStatus> {
        Ok(self.node()?.status())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeOptions;
    use crate::transport::ConnectionPool;

    fn attached(network: &LocalNetwork, id: &str) -> Arc<ClusterNode> {
        let node = ClusterNode::open(NodeOptions::new(id, 2), Arc::new(network.clone())).unwrap();
        network.attach(&node);
        node
    }

    #[tokio::test]
    async fn test_connect_and_health() {
        let network = LocalNetwork::new();
        let _a = attached(&network, "a");
        let client = network
            .connect("a", &ConnectionParam::new("local://a", "root:Milvus"))
            .await
            .unwrap();
        assert!(client.healthz().await.unwrap());
        assert_eq!(client.status().await.unwrap().cluster_id, "a");
    }

    #[tokio::test]
    async fn test_bad_token_is_denied() {
        let network = LocalNetwork::new();
        let _a = attached(&network, "a");
        let err = network
            .connect("a", &ConnectionParam::new("local://a", "root:wrong"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, CdcError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn test_unreachable_and_stopped() {
        let network = LocalNetwork::new();
        let a = attached(&network, "a");
        let client = network
            .connect("a", &ConnectionParam::new("local://a", "root:Milvus"))
            .await
            .unwrap();

        network.set_reachable("a", false);
        assert!(matches!(client.healthz().await, Err(CdcError::Transport { .. })));
        network.set_reachable("a", true);
        assert!(client.healthz().await.unwrap());

        a.shutdown();
        assert!(matches!(client.healthz().await, Err(CdcError::Transport { .. })));
    }

    #[tokio::test]
    async fn test_pool_reuses_until_stale() {
        let network = LocalNetwork::new();
        let _a = attached(&network, "a");
        let pool = ConnectionPool::new(Arc::new(network.clone()));
        let param = ConnectionParam::new("local://a", "root:Milvus");

        let first = pool.get("a", &param).await.unwrap();
        let second = pool.get("a", &param).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        pool.mark_stale("a");
        assert!(!pool.is_pooled("a"));
        let third = pool.get("a", &param).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
        assert!(pool.is_pooled("a"));
    }

    #[tokio::test]
    async fn test_pool_reconnects_on_param_change() {
        let network = LocalNetwork::new();
        let _a = attached(&network, "a");
        let pool = ConnectionPool::new(Arc::new(network.clone()));

        let first = pool
            .get("a", &ConnectionParam::new("local://a", "root:Milvus"))
            .await
            .unwrap();
        let err = pool
            .get("a", &ConnectionParam::new("local://elsewhere", "root:Milvus"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, CdcError::Transport { .. }));
        let again = pool
            .get("a", &ConnectionParam::new("local://a", "root:Milvus"))
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&first, &again));
    }
}
