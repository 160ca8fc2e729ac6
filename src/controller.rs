//! Operator facade
//!
//! Ties the registry, topology store, distributor and switchover coordinator
//! together behind token-authenticated calls. The topology store records
//! operator intent: it is replaced before a push so that retrying after a
//! partial failure re-sends the same snapshot.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::auth::{default_users, AuthTable, Principal, UserEntry};
use crate::distributor::{DistributionReport, Distributor};
use crate::errors::{CdcError, CdcResult};
use crate::node::NodeStatus;
use crate::observability::{Event, MetricsRegistry, MetricsSnapshot};
use crate::registry::{ClusterRegistry, RegisterOutcome};
use crate::switchover::{
    SwitchoverCoordinator, SwitchoverReport, SwitchoverRequest, SwitchoverState, SwitchoverTimeouts,
};
use crate::topology::{ClusterDescriptor, TopologyEdge, TopologySnapshot, TopologyStore};
use crate::transport::{ConnectionPool, Connector};
use crate::wait::{wait_until, Backoff};

#[derive(Debug, Clone)]
pub struct ControllerOptions {
    pub users: Vec<UserEntry>,
    /// Bound on each per-cluster call
    pub call_timeout: Duration,
    /// Bound on a switchover's drain
    pub drain_timeout: Duration,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            users: default_users(),
            call_timeout: Duration::from_secs(10),
            drain_timeout: Duration::from_secs(30),
        }
    }
}

pub struct Controller {
    auth: AuthTable,
    registry: Arc<ClusterRegistry>,
    store: Arc<TopologyStore>,
    pool: Arc<ConnectionPool>,
    distributor: Arc<Distributor>,
    coordinator: SwitchoverCoordinator,
    metrics: Arc<MetricsRegistry>,
}

impl Controller {
    pub fn new(connector: Arc<dyn Connector>, options: ControllerOptions) -> Self {
        let metrics = Arc::new(MetricsRegistry::new());
        let registry = Arc::new(ClusterRegistry::new());
        let store = Arc::new(TopologyStore::new());
        let pool = Arc::new(ConnectionPool::new(connector));
        let distributor = Arc::new(Distributor::new(pool.clone(), metrics.clone(), options.call_timeout));
        let coordinator = SwitchoverCoordinator::new(
            registry.clone(),
            store.clone(),
            distributor.clone(),
            metrics.clone(),
            SwitchoverTimeouts {
                drain: options.drain_timeout,
                call: options.call_timeout,
            },
        );
        Self {
            auth: AuthTable::new(options.users),
            registry,
            store,
            pool,
            distributor,
            coordinator,
            metrics,
        }
    }

    pub fn authenticate(&self, token: &str) -> CdcResult<Principal> {
        self.auth.authenticate(token)
    }

    fn admin(&self, token: &str, action: &str) -> CdcResult<Principal> {
        let principal = self.authenticate(token)?;
        principal.require_admin(action)?;
        Ok(principal)
    }

    pub fn registry(&self) -> &ClusterRegistry {
        &self.registry
    }

    pub fn edges(&self) -> Vec<TopologyEdge> {
        self.store.edges().as_ref().clone()
    }

    /// Snapshot the controller would push right now.
    pub fn snapshot(&self) -> CdcResult<TopologySnapshot> {
        self.store.snapshot(&self.registry)
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn switchover_state(&self) -> SwitchoverState {
        self.coordinator.state()
    }

    pub fn last_switchover(&self) -> Option<SwitchoverState> {
        self.coordinator.last_outcome()
    }

    pub fn register_cluster(&self, token: &str, descriptor: ClusterDescriptor) -> CdcResult<RegisterOutcome> {
        self.admin(token, "register cluster")?;
        self.registry.register(descriptor)
    }

    /// Grow a registered cluster's pchannel list. Takes effect on the next push.
    pub fn grow_cluster(&self, token: &str, cluster_id: &str, pchannel_num: usize) -> CdcResult<RegisterOutcome> {
        self.admin(token, "grow cluster")?;
        self.registry.grow(cluster_id, pchannel_num)
    }

    /// Replace the edge set and push the resulting snapshot to every cluster.
    pub async fn update_replicate_configuration(
        &self,
        token: &str,
        edges: Vec<TopologyEdge>,
    ) -> CdcResult<DistributionReport> {
        let principal = self.admin(token, "update replicate configuration")?;
        let snapshot = self.store.replace(&self.registry, edges)?;
        self.distributor.distribute(&principal, &snapshot).await?.into_result()
    }

    /// Push the current edge set again, e.g. after growing a cluster.
    pub async fn republish(&self, token: &str) -> CdcResult<DistributionReport> {
        let principal = self.admin(token, "update replicate configuration")?;
        let snapshot = self.snapshot()?;
        self.distributor.distribute(&principal, &snapshot).await?.into_result()
    }

    /// Register the snapshot's clusters and take its edges, without pushing.
    pub fn adopt(&self, token: &str, snapshot: &TopologySnapshot) -> CdcResult<()> {
        self.admin(token, "update replicate configuration")?;
        snapshot.validate()?;
        for descriptor in &snapshot.clusters {
            self.registry.register(descriptor.clone())?;
        }
        self.store
            .replace(&self.registry, snapshot.cross_cluster_topology.clone())?;
        Ok(())
    }

    /// Adopt a complete snapshot and push it.
    pub async fn push_snapshot(&self, token: &str, snapshot: TopologySnapshot) -> CdcResult<DistributionReport> {
        let principal = self.admin(token, "update replicate configuration")?;
        self.adopt(token, &snapshot)?;
        let snapshot = self.snapshot()?;
        self.distributor.distribute(&principal, &snapshot).await?.into_result()
    }

    pub async fn switchover(
        &self,
        token: &str,
        old_source: &str,
        new_source: &str,
        pchannel_num: Option<usize>,
    ) -> CdcResult<SwitchoverReport> {
        let principal = self.authenticate(token)?;
        let mut request = SwitchoverRequest::new(old_source, new_source);
        request.pchannel_num = pchannel_num;
        self.coordinator.switchover(&principal, request).await
    }

    fn descriptor(&self, cluster_id: &str) -> CdcResult<ClusterDescriptor> {
        self.registry
            .descriptor(cluster_id)
            .ok_or_else(|| CdcError::UnknownCluster(cluster_id.to_string()))
    }

    /// Poll a registered cluster until it answers healthy.
    pub async fn wait_healthy(&self, cluster_id: &str, timeout: Duration) -> CdcResult<()> {
        let descriptor = self.descriptor(cluster_id)?;
        let pool = &self.pool;
        let descriptor = &descriptor;
        debug!(event = %Event::HealthWait, cluster_id, timeout_ms = timeout.as_millis() as u64, "waiting for health");
        wait_until(
            &format!("cluster '{}' to become healthy", cluster_id),
            timeout,
            Backoff::new(Duration::from_millis(20), Duration::from_secs(2)),
            move || async move {
                match pool.get(&descriptor.cluster_id, &descriptor.connection_param).await {
                    Ok(client) => {
                        let healthy = matches!(client.healthz().await, Ok(true));
                        if !healthy {
                            pool.mark_stale(&descriptor.cluster_id);
                        }
                        healthy
                    }
                    Err(_) => false,
                }
            },
        )
        .await
    }

    pub async fn cluster_status(&self, cluster_id: &str) -> CdcResult<NodeStatus> {
        let descriptor = self.descriptor(cluster_id)?;
        let client = self
            .pool
            .get(&descriptor.cluster_id, &descriptor.connection_param)
            .await?;
        let result = client.status().await;
        if matches!(result, Err(CdcError::Transport { .. })) {
            self.pool.mark_stale(cluster_id);
        }
        result
    }
}
