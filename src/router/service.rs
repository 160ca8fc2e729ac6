//! Replication service of one source cluster
//!
//! Keeps one [`EdgeReplicator`] per committed outbound edge, reconciled after
//! every configuration commit, and pumps them from a background task woken by
//! local writes or a periodic tick.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::catalog::ChannelLogs;
use crate::committed::CommittedConfigCell;
use crate::errors::{CdcError, CdcResult};
use crate::observability::{Event, MetricsRegistry};
use crate::topology::TopologyEdge;
use crate::transport::ConnectionPool;
use crate::wait::{wait_until, Backoff};

use super::edge::{EdgeReplicator, EdgeStatus};
use super::state::{EdgeState, PauseReason};
use super::RouterSettings;

pub struct ReplicationService {
    cluster_id: String,
    config: Arc<CommittedConfigCell>,
    logs: Arc<ChannelLogs>,
    pool: Arc<ConnectionPool>,
    settings: RouterSettings,
    metrics: Arc<MetricsRegistry>,
    edges: RwLock<BTreeMap<String, Arc<EdgeReplicator>>>,
    /// Acknowledged offsets of removed edges, keyed by target then pchannel
    saved_offsets: Mutex<HashMap<String, HashMap<String, u64>>>,
    fenced: AtomicBool,
    draining: AtomicBool,
    wake: Notify,
}

impl ReplicationService {
    pub fn new(
        cluster_id: impl Into<String>,
        config: Arc<CommittedConfigCell>,
        logs: Arc<ChannelLogs>,
        pool: Arc<ConnectionPool>,
        settings: RouterSettings,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            cluster_id: cluster_id.into(),
            config,
            logs,
            pool,
            settings,
            metrics,
            edges: RwLock::new(BTreeMap::new()),
            saved_offsets: Mutex::new(HashMap::new()),
            fenced: AtomicBool::new(false),
            draining: AtomicBool::new(false),
            wake: Notify::new(),
        }
    }

    pub fn cluster_id(&self) -> &str {
        &self.cluster_id
    }

    /// Align edges with the committed configuration.
    ///
    /// New edges start Inactive and activate unless fenced. Edges missing
    /// from the committed config become Removed and are dropped. A commit
    /// also ends any drain.
    pub fn reconcile(&self) {
        let committed = self.config.current();
        let pchannels = committed.pchannels_of(&self.cluster_id).to_vec();
        let targets: Vec<String> = committed
            .targets_of(&self.cluster_id)
            .into_iter()
            .map(str::to_string)
            .collect();
        let fenced = self.is_fenced();

        let mut edges = self.edges.write();

        let removed: Vec<String> = edges
            .keys()
            .filter(|t| !targets.contains(t))
            .cloned()
            .collect();
        for target in removed {
            if let Some(edge) = edges.remove(&target) {
                edge.transition_or_skip("remove", EdgeState::remove);
                self.saved_offsets.lock().insert(target.clone(), edge.acked_offsets());
                info!(
                    event = %Event::EdgeRemoved,
                    edge = %edge.edge(),
                    revision = committed.revision(),
                    pending = edge.lag(),
                    "edge removed by new topology"
                );
            }
        }

        for target in targets {
            let Some(descriptor) = committed.snapshot().cluster(&target) else {
                continue;
            };
            let edge = edges
                .entry(target.clone())
                .or_insert_with(|| {
                    Arc::new(EdgeReplicator::new(
                        TopologyEdge::new(self.cluster_id.clone(), target.clone()),
                        descriptor.connection_param.clone(),
                        self.pool.clone(),
                        self.settings.clone(),
                        self.metrics.clone(),
                    ))
                })
                .clone();

            edge.set_target(descriptor.connection_param.clone());
            let saved = self.saved_offsets.lock().remove(&target).unwrap_or_default();
            edge.ensure_lanes(&pchannels, &self.logs, &saved);

            edge.transition_or_skip("activate", |s| match s {
                EdgeState::Inactive if !fenced => s.activate(),
                EdgeState::Paused(PauseReason::Drained) => s.resume(),
                EdgeState::Draining => s.abort_drain(),
                other => Ok(other),
            });
        }

        self.draining.store(false, Ordering::SeqCst);
        drop(edges);
        self.notify();
    }

    fn edge_list(&self) -> Vec<Arc<EdgeReplicator>> {
        self.edges.read().values().cloned().collect()
    }

    pub fn notify(&self) {
        self.wake.notify_one();
    }

    /// One pass over every edge. Returns messages acknowledged.
    pub async fn pump_all(&self) -> usize {
        let edges = self.edge_list();
        join_all(edges.iter().map(|e| e.pump())).await.into_iter().sum()
    }

    /// Pending messages across all edges.
    pub fn lag(&self) -> u64 {
        self.edge_list().iter().map(|e| e.lag()).sum()
    }

    pub fn is_fenced(&self) -> bool {
        self.fenced.load(Ordering::SeqCst)
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    /// Any edge currently forwarding as source.
    pub fn is_actively_routing(&self) -> bool {
        self.edge_list().iter().any(|e| e.state().is_routing())
    }

    pub fn edge_state(&self, target: &str) -> Option<EdgeState> {
        self.edges.read().get(target).map(|e| e.state())
    }

    pub fn status(&self) -> Vec<EdgeStatus> {
        self.edge_list().iter().map(|e| e.status()).collect()
    }

    /// Keep outbound edges from streaming.
    pub fn fence(&self) {
        self.fenced.store(true, Ordering::SeqCst);
        for edge in self.edge_list() {
            edge.transition_or_skip("fence", |s| match s {
                EdgeState::Streaming => s.pause(PauseReason::Fenced),
                other => Ok(other),
            });
        }
        info!(event = %Event::SourceFenced, cluster_id = %self.cluster_id, "outbound replication fenced");
    }

    pub fn unfence(&self) {
        self.fenced.store(false, Ordering::SeqCst);
        for edge in self.edge_list() {
            edge.transition_or_skip("unfence", |s| match s {
                EdgeState::Inactive => s.activate(),
                EdgeState::Paused(PauseReason::Fenced) => s.resume(),
                other => Ok(other),
            });
        }
        info!(event = %Event::SourceUnfenced, cluster_id = %self.cluster_id, "outbound replication unfenced");
        self.notify();
    }

    /// Mark the source as draining; client writes are refused from here on.
    pub fn begin_drain(&self) {
        self.draining.store(true, Ordering::SeqCst);
    }

    /// Flush every outbound edge.
    ///
    /// On success edges end in `Paused(Drained)` and writes stay refused
    /// until the next commit or [`Self::resume`]. On timeout edges go back to
    /// streaming, writes are accepted again and `SwitchoverTimeout` is returned.
    pub async fn drain(&self, timeout: Duration) -> CdcResult<()> {
        self.begin_drain();

        let result = wait_until(
            "outbound edges to drain",
            timeout,
            Backoff::new(self.settings.initial_backoff(), self.settings.max_backoff()),
            move || async move {
                for edge in self.edge_list() {
                    edge.transition_or_skip("drain", |s| match s {
                        EdgeState::Streaming | EdgeState::Paused(PauseReason::TargetUnreachable) => {
                            s.begin_drain()
                        }
                        other => Ok(other),
                    });
                }
                self.pump_all().await;
                self.lag() == 0
            },
        )
        .await;

        match result {
            Ok(()) => {
                for edge in self.edge_list() {
                    edge.transition_or_skip("finish_drain", |s| match s {
                        EdgeState::Draining => s.finish_drain(),
                        other => Ok(other),
                    });
                }
                info!(event = %Event::DrainComplete, cluster_id = %self.cluster_id, "outbound edges drained");
                Ok(())
            }
            Err(CdcError::DeadlineExceeded { waited_ms, .. }) => {
                self.resume();
                warn!(
                    event = %Event::DrainTimeout,
                    cluster_id = %self.cluster_id,
                    waited_ms,
                    pending = self.lag(),
                    "drain did not complete; prior topology stays authoritative"
                );
                Err(CdcError::SwitchoverTimeout {
                    cluster_id: self.cluster_id.clone(),
                    waited_ms,
                })
            }
            Err(other) => {
                self.resume();
                Err(other)
            }
        }
    }

    /// Undo a drain.
    pub fn resume(&self) {
        for edge in self.edge_list() {
            edge.transition_or_skip("resume", |s| match s {
                EdgeState::Draining => s.abort_drain(),
                EdgeState::Paused(PauseReason::Drained) => s.resume(),
                other => Ok(other),
            });
        }
        self.draining.store(false, Ordering::SeqCst);
        self.notify();
    }

    /// Background pump loop until `shutdown` flips to true.
    pub fn spawn(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(service.settings.pump_interval());
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    _ = service.wake.notified() => {}
                    _ = tick.tick() => {}
                }
                let forwarded = service.pump_all().await;
                if forwarded > 0 {
                    debug!(cluster_id = %service.cluster_id, forwarded, "pump pass");
                }
            }
        })
    }
}
