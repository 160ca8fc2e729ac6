//! Fluent construction of descriptors and snapshots

use crate::errors::CdcResult;

use super::types::{ClusterDescriptor, ConnectionParam, TopologyEdge, TopologySnapshot};

/// Builds a [`ClusterDescriptor`] with deterministic pchannel names.
#[derive(Debug, Clone)]
pub struct ClusterBuilder {
    cluster_id: String,
    connection_param: ConnectionParam,
    pchannel_count: usize,
}

impl ClusterBuilder {
    pub fn new(cluster_id: impl Into<String>) -> Self {
        Self {
            cluster_id: cluster_id.into(),
            connection_param: ConnectionParam::default(),
            pchannel_count: 16,
        }
    }

    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.connection_param.uri = uri.into();
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.connection_param.token = token.into();
        self
    }

    pub fn with_mtls(
        mut self,
        ca_pem_path: impl Into<String>,
        client_pem_path: impl Into<String>,
        client_key_path: impl Into<String>,
    ) -> Self {
        self.connection_param = self
            .connection_param
            .with_mtls(ca_pem_path, client_pem_path, client_key_path);
        self
    }

    pub fn with_pchannel_count(mut self, count: usize) -> Self {
        self.pchannel_count = count;
        self
    }

    pub fn build(self) -> ClusterDescriptor {
        ClusterDescriptor::new(self.cluster_id, self.connection_param, self.pchannel_count)
    }
}

/// Builds a validated [`TopologySnapshot`].
///
/// ```ignore
/// let snapshot = ReplicateConfigurationBuilder::new()
///     .with_cluster(ClusterBuilder::new("a").with_uri("http://a:19530").build())
///     .with_cluster(ClusterBuilder::new("b").with_uri("http://b:19530").build())
///     .with_topology("a", "b")
///     .build()?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct ReplicateConfigurationBuilder {
    clusters: Vec<ClusterDescriptor>,
    edges: Vec<TopologyEdge>,
}

impl ReplicateConfigurationBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cluster(mut self, cluster: ClusterDescriptor) -> Self {
        self.clusters.push(cluster);
        self
    }

    pub fn with_topology(mut self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.edges.push(TopologyEdge::new(source, target));
        self
    }

    pub fn build(self) -> CdcResult<TopologySnapshot> {
        TopologySnapshot::new(self.clusters, self.edges)
    }
}
