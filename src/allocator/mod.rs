//! Vchannel Allocator
//!
//! Chooses the pchannels that back a new collection's shards. The candidate
//! pool is the local cluster's pchannel list in the committed configuration,
//! never the physical channel count. A cluster restarted with more pchannels
//! keeps allocating from the committed pool until a snapshot naming the new
//! channels has been applied, so no target ever receives a create-collection
//! message on a pchannel its own committed config does not know.
//!
//! Selection is round-robin over a per-cluster cursor guarded by its own
//! lock. Allocation is synchronous and reads only local state.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::committed::CommittedConfigCell;
use crate::errors::{CdcError, CdcResult};
use crate::observability::{Event, MetricsRegistry};

/// Virtual channel name for shard `shard_index` of `collection_id` on `pchannel`.
pub fn vchannel_name(pchannel: &str, collection_id: i64, shard_index: usize) -> String {
    format!("{}_{}v{}", pchannel, collection_id, shard_index)
}

/// One shard's channel binding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VChannel {
    pub name: String,
    pub pchannel: String,
    pub shard_index: usize,
}

/// Immutable channel layout of a collection, fixed at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionChannelAssignment {
    pub collection_id: i64,
    pub vchannels: Vec<VChannel>,
}

impl CollectionChannelAssignment {
    /// Bind `pchannels[i]` to shard `i`.
    pub fn new(collection_id: i64, pchannels: Vec<String>) -> Self {
        let vchannels = pchannels
            .into_iter()
            .enumerate()
            .map(|(shard_index, pchannel)| VChannel {
                name: vchannel_name(&pchannel, collection_id, shard_index),
                pchannel,
                shard_index,
            })
            .collect();
        Self {
            collection_id,
            vchannels,
        }
    }

    pub fn shard_count(&self) -> usize {
        self.vchannels.len()
    }

    pub fn pchannels(&self) -> Vec<&str> {
        self.vchannels.iter().map(|v| v.pchannel.as_str()).collect()
    }

    pub fn pchannel_of_shard(&self, shard_index: usize) -> Option<&str> {
        self.vchannels.get(shard_index).map(|v| v.pchannel.as_str())
    }
}

pub struct VchannelAllocator {
    config: Arc<CommittedConfigCell>,
    cursors: Mutex<HashMap<String, Arc<Mutex<usize>>>>,
    metrics: Arc<MetricsRegistry>,
}

impl VchannelAllocator {
    pub fn new(config: Arc<CommittedConfigCell>, metrics: Arc<MetricsRegistry>) -> Self {
        Self {
            config,
            cursors: Mutex::new(HashMap::new()),
            metrics,
        }
    }

    fn cursor(&self, cluster_id: &str) -> Arc<Mutex<usize>> {
        self.cursors
            .lock()
            .entry(cluster_id.to_string())
            .or_default()
            .clone()
    }

    /// Pick `shard_count` distinct pchannels of `cluster_id` from the committed pool.
    ///
    /// Never returns a partial allocation.
    pub fn allocate(&self, shard_count: usize, cluster_id: &str) -> CdcResult<Vec<String>> {
        if shard_count == 0 {
            return Err(CdcError::InvalidArgument("shard count must be at least 1".into()));
        }

        let cursor = self.cursor(cluster_id);
        let mut cursor = cursor.lock();

        let committed = self.config.current();
        let pool = committed.pchannels_of(cluster_id);
        if shard_count > pool.len() {
            self.metrics.increment_allocations_rejected();
            warn!(
                event = %Event::AllocationRejected,
                cluster_id,
                requested = shard_count,
                available = pool.len(),
                revision = committed.revision(),
                "committed pchannel pool too small"
            );
            return Err(CdcError::InsufficientChannels {
                cluster_id: cluster_id.to_string(),
                requested: shard_count,
                available: pool.len(),
            });
        }

        let start = *cursor % pool.len();
        let picked: Vec<String> = (0..shard_count)
            .map(|i| pool[(start + i) % pool.len()].clone())
            .collect();
        *cursor = (start + shard_count) % pool.len();

        self.metrics.increment_allocations();
        debug!(
            event = %Event::VchannelsAllocated,
            cluster_id,
            revision = committed.revision(),
            pchannels = ?picked,
            "allocated"
        );
        Ok(picked)
    }

    /// Allocate and bind shards for a new collection.
    pub fn assign(
        &self,
        collection_id: i64,
        shard_count: usize,
        cluster_id: &str,
    ) -> CdcResult<CollectionChannelAssignment> {
        let pchannels = self.allocate(shard_count, cluster_id)?;
        Ok(CollectionChannelAssignment::new(collection_id, pchannels))
    }
}
