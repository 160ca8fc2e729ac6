//! Topology Store
//!
//! Holds the operator's current set of replication edges. Snapshots are
//! assembled from the registry's descriptors plus this edge set, and the edge
//! set is only ever replaced whole.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::errors::{CdcError, CdcResult};
use crate::registry::ClusterRegistry;

use super::types::{TopologyEdge, TopologySnapshot};

#[derive(Debug, Default)]
pub struct TopologyStore {
    edges: RwLock<Arc<Vec<TopologyEdge>>>,
}

impl TopologyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current edges.
    pub fn edges(&self) -> Arc<Vec<TopologyEdge>> {
        self.edges.read().clone()
    }

    /// Snapshot from every registered cluster and `edges`, without storing.
    pub fn compose(registry: &ClusterRegistry, edges: Vec<TopologyEdge>) -> CdcResult<TopologySnapshot> {
        for edge in &edges {
            for end in [&edge.source_cluster_id, &edge.target_cluster_id] {
                if !registry.contains(end) {
                    return Err(CdcError::UnknownCluster(end.clone()));
                }
            }
        }
        TopologySnapshot::new(registry.descriptors(), edges)
    }

    /// Atomically replace the edge set. Returns the resulting snapshot.
    pub fn replace(
        &self,
        registry: &ClusterRegistry,
        edges: Vec<TopologyEdge>,
    ) -> CdcResult<TopologySnapshot> {
        let snapshot = Self::compose(registry, edges)?;
        *self.edges.write() = Arc::new(snapshot.cross_cluster_topology.clone());
        Ok(snapshot)
    }

    /// Snapshot of the current edge set over the registry.
    pub fn snapshot(&self, registry: &ClusterRegistry) -> CdcResult<TopologySnapshot> {
        Self::compose(registry, self.edges().as_ref().clone())
    }

    /// Edge set with `old_source` replaced by `new_source` as the source.
    ///
    /// Requires the edge `old_source -> new_source`. Every edge leaving the old
    /// source is re-pointed at the new source, and the old source becomes a
    /// target of the new one. Edges not leaving the old source are kept.
    pub fn reversed_edges(&self, old_source: &str, new_source: &str) -> CdcResult<Vec<TopologyEdge>> {
        reverse_edges(&self.edges(), old_source, new_source)
    }
}

/// See [`TopologyStore::reversed_edges`].
pub fn reverse_edges(
    edges: &[TopologyEdge],
    old_source: &str,
    new_source: &str,
) -> CdcResult<Vec<TopologyEdge>> {
    let pivot = TopologyEdge::new(old_source, new_source);
    if !edges.contains(&pivot) {
        return Err(CdcError::invalid_topology(format!(
            "cannot switch over: no edge {}",
            pivot
        )));
    }

    let mut reversed: Vec<TopologyEdge> = edges
        .iter()
        .map(|edge| {
            if edge.source_cluster_id != old_source {
                edge.clone()
            } else if edge.target_cluster_id == new_source {
                edge.reversed()
            } else {
                TopologyEdge::new(new_source, edge.target_cluster_id.clone())
            }
        })
        .collect();
    reversed.sort();
    reversed.dedup();
    Ok(reversed)
}
