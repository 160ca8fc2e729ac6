//! Topology value types
//!
//! A [`TopologySnapshot`] is an immutable description of every participating
//! cluster and the directed replication edges between them. Snapshots are
//! always applied whole; there is no incremental edge add or remove.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::errors::{CdcError, CdcResult};

/// Separator between a cluster id and its pchannel index
pub const PCHANNEL_INFIX: &str = "-rootcoord-dml_";

/// Deterministic pchannel name for `cluster_id` at `index`.
pub fn pchannel_name(cluster_id: &str, index: usize) -> String {
    format!("{}{}{}", cluster_id, PCHANNEL_INFIX, index)
}

/// All pchannel names for a cluster owning `count` channels.
pub fn pchannel_names(cluster_id: &str, count: usize) -> Vec<String> {
    (0..count).map(|i| pchannel_name(cluster_id, i)).collect()
}

/// Split a pchannel name into its owning cluster id and index.
pub fn parse_pchannel(name: &str) -> Option<(&str, usize)> {
    let (cluster_id, index) = name.rsplit_once(PCHANNEL_INFIX)?;
    if cluster_id.is_empty() {
        return None;
    }
    index.parse().ok().map(|i| (cluster_id, i))
}

/// How to reach a cluster.
///
/// The mTLS paths are optional; when all three are present the HTTP transport
/// presents a client identity and trusts the given CA.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionParam {
    pub uri: String,

    /// `user:password` credential
    #[serde(default)]
    pub token: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_pem_path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_pem_path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_key_path: Option<String>,
}

impl ConnectionParam {
    pub fn new(uri: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            token: token.into(),
            ..Default::default()
        }
    }

    pub fn with_mtls(
        mut self,
        ca_pem_path: impl Into<String>,
        client_pem_path: impl Into<String>,
        client_key_path: impl Into<String>,
    ) -> Self {
        self.ca_pem_path = Some(ca_pem_path.into());
        self.client_pem_path = Some(client_pem_path.into());
        self.client_key_path = Some(client_key_path.into());
        self
    }

    pub fn uses_mtls(&self) -> bool {
        self.client_pem_path.is_some() && self.client_key_path.is_some()
    }
}

/// A cluster taking part in replication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterDescriptor {
    pub cluster_id: String,
    pub connection_param: ConnectionParam,
    /// Ordered; entry `i` is always `pchannel_name(cluster_id, i)`
    pub pchannels: Vec<String>,
}

impl ClusterDescriptor {
    /// Descriptor with `pchannel_count` deterministically named pchannels.
    pub fn new(
        cluster_id: impl Into<String>,
        connection_param: ConnectionParam,
        pchannel_count: usize,
    ) -> Self {
        let cluster_id = cluster_id.into();
        let pchannels = pchannel_names(&cluster_id, pchannel_count);
        Self {
            cluster_id,
            connection_param,
            pchannels,
        }
    }

    pub fn pchannel_count(&self) -> usize {
        self.pchannels.len()
    }

    /// Same cluster with its pchannel list regenerated at `count`.
    pub fn with_pchannel_count(&self, count: usize) -> Self {
        Self::new(self.cluster_id.clone(), self.connection_param.clone(), count)
    }

    /// True when `self.pchannels` is a prefix of `other.pchannels`.
    pub fn is_prefix_of(&self, other: &ClusterDescriptor) -> bool {
        self.pchannels.len() <= other.pchannels.len()
            && self.pchannels.iter().zip(&other.pchannels).all(|(a, b)| a == b)
    }

    pub fn validate(&self) -> CdcResult<()> {
        if self.cluster_id.trim().is_empty() {
            return Err(CdcError::invalid_topology("cluster_id must not be empty"));
        }
        if self.cluster_id.contains(PCHANNEL_INFIX) {
            return Err(CdcError::invalid_topology(format!(
                "cluster_id '{}' must not contain '{}'",
                self.cluster_id, PCHANNEL_INFIX
            )));
        }
        if self.pchannels.is_empty() {
            return Err(CdcError::invalid_topology(format!(
                "cluster '{}' lists no pchannels",
                self.cluster_id
            )));
        }
        for (index, name) in self.pchannels.iter().enumerate() {
            if *name != pchannel_name(&self.cluster_id, index) {
                return Err(CdcError::invalid_topology(format!(
                    "cluster '{}' pchannel {} is '{}', expected '{}'",
                    self.cluster_id,
                    index,
                    name,
                    pchannel_name(&self.cluster_id, index)
                )));
            }
        }
        Ok(())
    }
}

/// Directed replication edge.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TopologyEdge {
    pub source_cluster_id: String,
    pub target_cluster_id: String,
}

impl TopologyEdge {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source_cluster_id: source.into(),
            target_cluster_id: target.into(),
        }
    }

    pub fn reversed(&self) -> Self {
        Self::new(self.target_cluster_id.clone(), self.source_cluster_id.clone())
    }
}

impl std::fmt::Display for TopologyEdge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}->{}", self.source_cluster_id, self.target_cluster_id)
    }
}

/// Complete replication topology, always applied as a whole.
///
/// Clusters are kept sorted by id and edges sorted and deduplicated, so two
/// snapshots describing the same topology compare equal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologySnapshot {
    pub clusters: Vec<ClusterDescriptor>,
    #[serde(default)]
    pub cross_cluster_topology: Vec<TopologyEdge>,
}

impl TopologySnapshot {
    /// Build a validated, normalized snapshot.
    pub fn new(clusters: Vec<ClusterDescriptor>, edges: Vec<TopologyEdge>) -> CdcResult<Self> {
        let snapshot = Self {
            clusters,
            cross_cluster_topology: edges,
        }
        .normalized();
        snapshot.validate()?;
        Ok(snapshot)
    }

    /// Sort clusters by id, sort and dedupe edges.
    pub fn normalized(mut self) -> Self {
        self.clusters.sort_by(|a, b| a.cluster_id.cmp(&b.cluster_id));
        self.cross_cluster_topology.sort();
        self.cross_cluster_topology.dedup();
        self
    }

    /// Structural validation.
    ///
    /// Rejects empty or repeated cluster ids, malformed pchannel lists,
    /// self-loops, edges naming unknown clusters, and any cluster that is both
    /// a source and a target (chains and cycles). Targets do not re-log what
    /// they apply.
    pub fn validate(&self) -> CdcResult<()> {
        let mut seen = BTreeSet::new();
        for cluster in &self.clusters {
            cluster.validate()?;
            if !seen.insert(cluster.cluster_id.as_str()) {
                return Err(CdcError::invalid_topology(format!(
                    "cluster '{}' appears more than once",
                    cluster.cluster_id
                )));
            }
        }

        for edge in &self.cross_cluster_topology {
            if edge.source_cluster_id == edge.target_cluster_id {
                return Err(CdcError::invalid_topology(format!(
                    "self-loop on cluster '{}'",
                    edge.source_cluster_id
                )));
            }
            for end in [&edge.source_cluster_id, &edge.target_cluster_id] {
                if !seen.contains(end.as_str()) {
                    return Err(CdcError::invalid_topology(format!(
                        "edge {} references cluster '{}' missing from clusters",
                        edge, end
                    )));
                }
            }
        }

        validate_no_chain(&self.cross_cluster_topology)
    }

    pub fn cluster(&self, cluster_id: &str) -> Option<&ClusterDescriptor> {
        self.clusters.iter().find(|c| c.cluster_id == cluster_id)
    }

    pub fn contains_cluster(&self, cluster_id: &str) -> bool {
        self.cluster(cluster_id).is_some()
    }

    /// Ordered pchannels of `cluster_id`, empty when the cluster is absent.
    pub fn pchannels_of(&self, cluster_id: &str) -> &[String] {
        self.cluster(cluster_id)
            .map(|c| c.pchannels.as_slice())
            .unwrap_or(&[])
    }

    pub fn contains_pchannel(&self, cluster_id: &str, pchannel: &str) -> bool {
        self.pchannels_of(cluster_id).iter().any(|p| p == pchannel)
    }

    pub fn edges(&self) -> &[TopologyEdge] {
        &self.cross_cluster_topology
    }

    pub fn has_edge(&self, source: &str, target: &str) -> bool {
        self.cross_cluster_topology
            .iter()
            .any(|e| e.source_cluster_id == source && e.target_cluster_id == target)
    }

    pub fn targets_of(&self, cluster_id: &str) -> Vec<&str> {
        self.cross_cluster_topology
            .iter()
            .filter(|e| e.source_cluster_id == cluster_id)
            .map(|e| e.target_cluster_id.as_str())
            .collect()
    }

    pub fn sources_of(&self, cluster_id: &str) -> Vec<&str> {
        self.cross_cluster_topology
            .iter()
            .filter(|e| e.target_cluster_id == cluster_id)
            .map(|e| e.source_cluster_id.as_str())
            .collect()
    }

    pub fn cluster_ids(&self) -> Vec<&str> {
        self.clusters.iter().map(|c| c.cluster_id.as_str()).collect()
    }

    /// Same snapshot with every cluster regenerated at `count` pchannels.
    pub fn with_pchannel_count(&self, count: usize) -> Self {
        Self {
            clusters: self
                .clusters
                .iter()
                .map(|c| c.with_pchannel_count(count))
                .collect(),
            cross_cluster_topology: self.cross_cluster_topology.clone(),
        }
    }
}

/// Reject a cluster that appears both as a source and as a target.
fn validate_no_chain(edges: &[TopologyEdge]) -> CdcResult<()> {
    let sources: BTreeSet<&str> = edges.iter().map(|e| e.source_cluster_id.as_str()).collect();
    match edges
        .iter()
        .find(|e| sources.contains(e.target_cluster_id.as_str()))
    {
        Some(edge) => Err(CdcError::invalid_topology(format!(
            "cluster '{}' is the target of {} and also a replication source; chained topologies are not supported",
            edge.target_cluster_id, edge
        ))),
        None => Ok(()),
    }
}
