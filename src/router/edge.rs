//! One source -> target edge
//!
//! An edge owns one lane per committed source pchannel. A lane forwards its
//! pchannel's log strictly in offset order and only advances its
//! acknowledged offset after the target acknowledges; lanes run in parallel.
//!
//! A rejected message is never skipped. The lane backs off and retries the
//! same offset; only that lane waits, other lanes of the edge keep flowing.
//! After `retry_budget` consecutive failures the lane raises one alert.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::catalog::{ChannelLog, ChannelLogs};
use crate::errors::{CdcError, CdcResult};
use crate::observability::{Event, MetricsRegistry};
use crate::topology::{ConnectionParam, TopologyEdge};
use crate::transport::ConnectionPool;
use crate::wait::Backoff;

use super::message::ReplicateMessage;
use super::state::{EdgeState, PauseReason};
use super::RouterSettings;

struct LaneProgress {
    backoff: Backoff,
    retry_at: Option<Instant>,
    consecutive_failures: u32,
    alerted: bool,
    last_error: Option<String>,
}

struct Lane {
    pchannel: String,
    log: Arc<ChannelLog>,
    /// Next offset to send; everything below is acknowledged
    acked: AtomicU64,
    progress: tokio::sync::Mutex<LaneProgress>,
}

impl Lane {
    fn new(log: Arc<ChannelLog>, acked: u64, settings: &RouterSettings) -> Self {
        Self {
            pchannel: log.pchannel().to_string(),
            log,
            acked: AtomicU64::new(acked),
            progress: tokio::sync::Mutex::new(LaneProgress {
                backoff: Backoff::new(settings.initial_backoff(), settings.max_backoff()),
                retry_at: None,
                consecutive_failures: 0,
                alerted: false,
                last_error: None,
            }),
        }
    }

    fn acked(&self) -> u64 {
        self.acked.load(Ordering::Acquire)
    }

    /// Acknowledged offsets only move forward.
    fn ack(&self, next: u64) {
        self.acked.fetch_max(next, Ordering::AcqRel);
    }

    fn lag(&self) -> u64 {
        self.log.end_offset().saturating_sub(self.acked())
    }
}

/// Observable state of one lane
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaneStatus {
    pub pchannel: String,
    pub acked_offset: u64,
    pub end_offset: u64,
    pub consecutive_failures: u32,
    pub alerted: bool,
    pub last_error: Option<String>,
}

/// Observable state of one edge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeStatus {
    pub source_cluster_id: String,
    pub target_cluster_id: String,
    pub state: EdgeState,
    pub lag: u64,
    pub lanes: Vec<LaneStatus>,
}

enum SendFailure {
    Unreachable,
    Rejected,
}

pub struct EdgeReplicator {
    edge: TopologyEdge,
    target: RwLock<ConnectionParam>,
    lanes: RwLock<Vec<Arc<Lane>>>,
    state: Mutex<EdgeState>,
    probe: Mutex<(Backoff, Option<Instant>)>,
    pool: Arc<ConnectionPool>,
    settings: RouterSettings,
    metrics: Arc<MetricsRegistry>,
}

impl EdgeReplicator {
    pub fn new(
        edge: TopologyEdge,
        target: ConnectionParam,
        pool: Arc<ConnectionPool>,
        settings: RouterSettings,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        let probe = Backoff::new(settings.initial_backoff(), settings.max_backoff());
        Self {
            edge,
            target: RwLock::new(target),
            lanes: RwLock::new(Vec::new()),
            state: Mutex::new(EdgeState::Inactive),
            probe: Mutex::new((probe, None)),
            pool,
            settings,
            metrics,
        }
    }

    pub fn edge(&self) -> &TopologyEdge {
        &self.edge
    }

    pub fn target_id(&self) -> &str {
        &self.edge.target_cluster_id
    }

    pub fn state(&self) -> EdgeState {
        *self.state.lock()
    }

    /// Apply a transition; illegal ones leave the state untouched.
    pub fn transition(&self, f: impl FnOnce(EdgeState) -> CdcResult<EdgeState>) -> CdcResult<EdgeState> {
        let mut state = self.state.lock();
        let from = *state;
        let to = f(from)?;
        if to != from {
            info!(
                event = %Event::EdgeStateChanged,
                edge = %self.edge,
                from = from.name(),
                to = to.name(),
                "edge state changed"
            );
        }
        *state = to;
        Ok(to)
    }

    /// Best-effort [`Self::transition`]; a refused one is logged and skipped.
    pub fn transition_or_skip(&self, action: &'static str, f: impl FnOnce(EdgeState) -> CdcResult<EdgeState>) {
        if let Err(e) = self.transition(f) {
            debug!(edge = %self.edge, action, state = self.state().name(), error = %e, "edge transition skipped");
        }
    }

    pub fn set_target(&self, param: ConnectionParam) {
        let mut target = self.target.write();
        if *target != param {
            self.pool.mark_stale(&self.edge.target_cluster_id);
            *target = param;
        }
    }

    /// Add lanes for committed pchannels not yet covered.
    ///
    /// Lanes are never removed: the committed pool only grows.
    pub fn ensure_lanes(&self, pchannels: &[String], logs: &ChannelLogs, saved: &HashMap<String, u64>) {
        let mut lanes = self.lanes.write();
        for pchannel in pchannels {
            if lanes.iter().any(|l| l.pchannel == *pchannel) {
                continue;
            }
            if let Some(log) = logs.get(pchannel) {
                let start = saved.get(pchannel).copied().unwrap_or(0);
                lanes.push(Arc::new(Lane::new(log, start, &self.settings)));
            }
        }
    }

    /// Acknowledged offset of every lane, for resuming a re-created edge.
    pub fn acked_offsets(&self) -> HashMap<String, u64> {
        self.lanes
            .read()
            .iter()
            .map(|l| (l.pchannel.clone(), l.acked()))
            .collect()
    }

    pub fn lag(&self) -> u64 {
        self.lanes.read().iter().map(|l| l.lag()).sum()
    }

    pub fn lane_count(&self) -> usize {
        self.lanes.read().len()
    }

    /// One forwarding pass over every lane. Returns messages acknowledged.
    pub async fn pump(&self) -> usize {
        match self.state() {
            EdgeState::Streaming | EdgeState::Draining => {}
            EdgeState::Paused(PauseReason::TargetUnreachable) => {
                if !self.probe_target().await {
                    return 0;
                }
            }
            _ => return 0,
        }

        let lanes: Vec<Arc<Lane>> = self.lanes.read().clone();
        join_all(lanes.iter().map(|lane| self.pump_lane(lane)))
            .await
            .into_iter()
            .sum()
    }

    /// Health probe of an unreachable target, paced by backoff.
    async fn probe_target(&self) -> bool {
        {
            let probe = self.probe.lock();
            if let Some(at) = probe.1 {
                if Instant::now() < at {
                    return false;
                }
            }
        }

        let param = self.target.read().clone();
        let healthy = match self.pool.get(&self.edge.target_cluster_id, &param).await {
            Ok(client) => matches!(client.healthz().await, Ok(true)),
            Err(_) => false,
        };

        let mut probe = self.probe.lock();
        if healthy {
            probe.0.reset();
            probe.1 = None;
            drop(probe);
            self.transition_or_skip("recover", |s| match s {
                EdgeState::Paused(PauseReason::TargetUnreachable) => s.resume(),
                other => Ok(other),
            });
            info!(event = %Event::ReplicationRecovered, edge = %self.edge, "target reachable again");
            true
        } else {
            self.pool.mark_stale(&self.edge.target_cluster_id);
            let delay = probe.0.next_delay();
            probe.1 = Some(Instant::now() + delay);
            false
        }
    }

    async fn pump_lane(&self, lane: &Lane) -> usize {
        let Ok(mut progress) = lane.progress.try_lock() else {
            return 0;
        };
        if let Some(at) = progress.retry_at {
            if Instant::now() < at {
                return 0;
            }
        }

        let entries = lane.log.read_from(lane.acked(), self.settings.batch_size);
        let mut forwarded = 0;
        for entry in entries {
            if !self.state().is_routing() {
                break;
            }
            let message = ReplicateMessage {
                source_cluster_id: self.edge.source_cluster_id.clone(),
                source_pchannel: lane.pchannel.clone(),
                incarnation: lane.log.incarnation(),
                offset: entry.offset,
                body: entry.body,
            };

            match self.send(&message).await {
                Ok(()) => {
                    lane.ack(entry.offset + 1);
                    forwarded += 1;
                    self.metrics.increment_forwarded();
                    if progress.consecutive_failures > 0 {
                        if progress.alerted {
                            info!(
                                event = %Event::ReplicationRecovered,
                                edge = %self.edge,
                                pchannel = %lane.pchannel,
                                "lane recovered"
                            );
                        }
                        progress.consecutive_failures = 0;
                        progress.alerted = false;
                        progress.last_error = None;
                        progress.retry_at = None;
                        progress.backoff.reset();
                    }
                }
                Err((failure, err)) => {
                    self.record_failure(lane, &mut progress, &message, &err);
                    if let SendFailure::Unreachable = failure {
                        self.transition_or_skip("pause", |s| s.pause(PauseReason::TargetUnreachable));
                    }
                    break;
                }
            }
        }
        forwarded
    }

    async fn send(&self, message: &ReplicateMessage) -> Result<(), (SendFailure, CdcError)> {
        let target_id = &self.edge.target_cluster_id;
        let param = self.target.read().clone();
        let client = self
            .pool
            .get(target_id, &param)
            .await
            .map_err(|e| (classify(&e), e))?;

        match client.replicate(message).await {
            Ok(_) => Ok(()),
            Err(e) => {
                if matches!(e, CdcError::Transport { .. }) {
                    self.pool.mark_stale(target_id);
                }
                Err((classify(&e), e))
            }
        }
    }

    fn record_failure(
        &self,
        lane: &Lane,
        progress: &mut LaneProgress,
        message: &ReplicateMessage,
        err: &CdcError,
    ) {
        progress.consecutive_failures += 1;
        progress.last_error = Some(err.to_string());
        let delay = progress.backoff.next_delay();
        progress.retry_at = Some(Instant::now() + delay);

        match err {
            CdcError::TargetConfigStale { .. } => self.metrics.increment_stale_rejections(),
            CdcError::Transport { .. } => self.metrics.increment_transport_failures(),
            _ => {}
        }

        warn!(
            event = %Event::ReplicationRejected,
            edge = %self.edge,
            pchannel = %lane.pchannel,
            offset = message.offset,
            kind = message.body.kind(),
            retryable = err.is_retryable(),
            attempt = progress.consecutive_failures,
            retry_in_ms = delay.as_millis() as u64,
            error = %err,
            "message not accepted by target; will retry"
        );

        if progress.consecutive_failures >= self.settings.retry_budget && !progress.alerted {
            progress.alerted = true;
            self.metrics.increment_alerts();
            error!(
                event = %Event::ReplicationAlert,
                edge = %self.edge,
                pchannel = %lane.pchannel,
                offset = message.offset,
                attempts = progress.consecutive_failures,
                error = %err,
                "replication retry budget exhausted; operator attention required"
            );
        }
    }

    pub fn status(&self) -> EdgeStatus {
        let lanes = self
            .lanes
            .read()
            .iter()
            .map(|lane| {
                let (failures, alerted, last_error) = match lane.progress.try_lock() {
                    Ok(p) => (p.consecutive_failures, p.alerted, p.last_error.clone()),
                    Err(_) => (0, false, None),
                };
                LaneStatus {
                    pchannel: lane.pchannel.clone(),
                    acked_offset: lane.acked(),
                    end_offset: lane.log.end_offset(),
                    consecutive_failures: failures,
                    alerted,
                    last_error,
                }
            })
            .collect::<Vec<_>>();
        EdgeStatus {
            source_cluster_id: self.edge.source_cluster_id.clone(),
            target_cluster_id: self.edge.target_cluster_id.clone(),
            state: self.state(),
            lag: lanes.iter().map(|l| l.end_offset.saturating_sub(l.acked_offset)).sum(),
            lanes,
        }
    }
}

fn classify(err: &CdcError) -> SendFailure {
    match err {
        CdcError::Transport { .. } => SendFailure::Unreachable,
        _ => SendFailure::Rejected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LocalNetwork;

    fn edge() -> EdgeReplicator {
        EdgeReplicator::new(
            TopologyEdge::new("a", "b"),
            ConnectionParam::new("local://b", "root:Milvus"),
            Arc::new(ConnectionPool::new(Arc::new(LocalNetwork::new()))),
            RouterSettings::default(),
            Arc::new(MetricsRegistry::new()),
        )
    }

    #[test]
    fn test_refused_transition_keeps_state() {
        let edge = edge();
        edge.transition_or_skip("finish_drain", EdgeState::finish_drain);
        assert_eq!(edge.state(), EdgeState::Inactive);

        edge.transition_or_skip("activate", EdgeState::activate);
        assert_eq!(edge.state(), EdgeState::Streaming);
        edge.transition_or_skip("remove", EdgeState::remove);
        edge.transition_or_skip("remove", EdgeState::remove);
        assert_eq!(edge.state(), EdgeState::Removed);
        assert!(edge.transition(EdgeState::resume).is_err());
    }
}
