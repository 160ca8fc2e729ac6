//! Cluster Registry
//!
//! The operator-side set of known clusters. Each entry carries its connection
//! parameters and its ordered pchannel list. Pchannel lists only grow: a
//! registration that shrinks or reorders a live cluster's channels is refused.

use std::collections::BTreeMap;

use parking_lot::RwLock;
use tracing::info;

use crate::errors::{CdcError, CdcResult};
use crate::observability::Event;
use crate::topology::ClusterDescriptor;

/// Outcome of a registration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// New cluster id
    Added,
    /// Connection changed or pchannels grew
    Updated,
    /// Identical to the existing entry
    Unchanged,
}

/// Registry of clusters keyed by cluster id.
#[derive(Debug, Default)]
pub struct ClusterRegistry {
    clusters: RwLock<BTreeMap<String, ClusterDescriptor>>,
}

impl ClusterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or update a cluster.
    ///
    /// Fails with `DuplicateCluster` when the id is already registered with
    /// a pchannel list that is not a prefix of the new one.
    pub fn register(&self, descriptor: ClusterDescriptor) -> CdcResult<RegisterOutcome> {
        descriptor.validate()?;

        let mut clusters = self.clusters.write();
        let outcome = match clusters.get(&descriptor.cluster_id) {
            None => RegisterOutcome::Added,
            Some(existing) if *existing == descriptor => return Ok(RegisterOutcome::Unchanged),
            Some(existing) => {
                if !existing.is_prefix_of(&descriptor) {
                    return Err(CdcError::DuplicateCluster {
                        cluster_id: descriptor.cluster_id.clone(),
                        reason: format!(
                            "registered with {} pchannels, new descriptor has {} with a conflicting order",
                            existing.pchannel_count(),
                            descriptor.pchannel_count()
                        ),
                    });
                }
                RegisterOutcome::Updated
            }
        };

        info!(
            event = %Event::ClusterRegistered,
            cluster_id = %descriptor.cluster_id,
            pchannels = descriptor.pchannel_count(),
            outcome = ?outcome,
            "cluster registered"
        );
        clusters.insert(descriptor.cluster_id.clone(), descriptor);
        Ok(outcome)
    }

    /// Grow a registered cluster to `count` pchannels.
    pub fn grow(&self, cluster_id: &str, count: usize) -> CdcResult<RegisterOutcome> {
        let current = self
            .descriptor(cluster_id)
            .ok_or_else(|| CdcError::UnknownCluster(cluster_id.to_string()))?;
        if count < current.pchannel_count() {
            return Err(CdcError::DuplicateCluster {
                cluster_id: cluster_id.to_string(),
                reason: format!(
                    "pchannels can only grow: {} registered, {} requested",
                    current.pchannel_count(),
                    count
                ),
            });
        }
        self.register(current.with_pchannel_count(count))
    }

    /// Ordered pchannels of a registered cluster.
    pub fn pchannels_of(&self, cluster_id: &str) -> Option<Vec<String>> {
        self.clusters.read().get(cluster_id).map(|c| c.pchannels.clone())
    }

    pub fn descriptor(&self, cluster_id: &str) -> Option<ClusterDescriptor> {
        self.clusters.read().get(cluster_id).cloned()
    }

    pub fn contains(&self, cluster_id: &str) -> bool {
        self.clusters.read().contains_key(cluster_id)
    }

    /// All descriptors, ordered by cluster id.
    pub fn descriptors(&self) -> Vec<ClusterDescriptor> {
        self.clusters.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.clusters.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.read().is_empty()
    }
}
