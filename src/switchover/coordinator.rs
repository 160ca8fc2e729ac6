//! Switchover Coordinator
//!
//! Reverses a replication edge without a window in which both ends stream
//! as source. The new source is fenced first, the old source is drained, the
//! reversed snapshot is committed on the old source before anyone else, then
//! on every other cluster, and only then is the new source unfenced.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::Principal;
use crate::distributor::{DistributionReport, Distributor};
use crate::errors::{CdcError, CdcResult};
use crate::observability::{Event, MetricsRegistry, ObservationScope};
use crate::registry::ClusterRegistry;
use crate::topology::{ClusterDescriptor, TopologyEdge, TopologySnapshot, TopologyStore};
use crate::transport::{ClusterClient, ConnectionPool};

use super::state::SwitchoverState;

/// Operator request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchoverRequest {
    pub old_source: String,
    pub new_source: String,
    /// Grow every cluster to at least this many pchannels
    #[serde(default)]
    pub pchannel_num: Option<usize>,
}

impl SwitchoverRequest {
    pub fn new(old_source: impl Into<String>, new_source: impl Into<String>) -> Self {
        Self {
            old_source: old_source.into(),
            new_source: new_source.into(),
            pchannel_num: None,
        }
    }

    pub fn with_pchannel_num(mut self, pchannel_num: usize) -> Self {
        self.pchannel_num = Some(pchannel_num);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchoverReport {
    pub id: Uuid,
    pub old_source: String,
    pub new_source: String,
    pub edges: Vec<TopologyEdge>,
    pub distribution: DistributionReport,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwitchoverTimeouts {
    /// Bound on the old source's drain
    pub drain: Duration,
    /// Bound on each fence / unfence / resume call
    pub call: Duration,
}

impl Default for SwitchoverTimeouts {
    fn default() -> Self {
        Self {
            drain: Duration::from_secs(30),
            call: Duration::from_secs(10),
        }
    }
}

struct Plan {
    old: ClusterDescriptor,
    new: ClusterDescriptor,
    descriptors: Vec<ClusterDescriptor>,
    snapshot: TopologySnapshot,
}

/// Resets the coordinator to Idle when the switchover ends, however it ends.
struct Claim<'a> {
    state: &'a Mutex<SwitchoverState>,
    last: &'a Mutex<Option<SwitchoverState>>,
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        *self.last.lock() = Some(state.clone());
        *state = SwitchoverState::Idle;
    }
}

pub struct SwitchoverCoordinator {
    registry: Arc<ClusterRegistry>,
    store: Arc<TopologyStore>,
    distributor: Arc<Distributor>,
    pool: Arc<ConnectionPool>,
    metrics: Arc<MetricsRegistry>,
    timeouts: SwitchoverTimeouts,
    state: Mutex<SwitchoverState>,
    last: Mutex<Option<SwitchoverState>>,
}

impl SwitchoverCoordinator {
    pub fn new(
        registry: Arc<ClusterRegistry>,
        store: Arc<TopologyStore>,
        distributor: Arc<Distributor>,
        metrics: Arc<MetricsRegistry>,
        timeouts: SwitchoverTimeouts,
    ) -> Self {
        Self {
            pool: distributor.pool().clone(),
            registry,
            store,
            distributor,
            metrics,
            timeouts,
            state: Mutex::new(SwitchoverState::Idle),
            last: Mutex::new(None),
        }
    }

    pub fn state(&self) -> SwitchoverState {
        self.state.lock().clone()
    }

    /// Final state of the most recent switchover.
    pub fn last_outcome(&self) -> Option<SwitchoverState> {
        self.last.lock().clone()
    }

    fn claim(&self, request: &SwitchoverRequest) -> CdcResult<Claim<'_>> {
        let mut state = self.state.lock();
        if state.is_in_progress() {
            return Err(CdcError::SwitchoverInProgress(format!(
                "cannot switch {} -> {} while in phase {}",
                request.old_source,
                request.new_source,
                state.name()
            )));
        }
        *state = state.clone().request()?;
        Ok(Claim {
            state: &self.state,
            last: &self.last,
        })
    }

    fn advance(&self, id: Uuid, f: impl FnOnce(SwitchoverState) -> CdcResult<SwitchoverState>) -> CdcResult<()> {
        let mut state = self.state.lock();
        let from = state.name();
        let next = f(state.clone())?;
        info!(
            event = %Event::SwitchoverStep,
            switchover_id = %id,
            from,
            to = next.name(),
            "switchover step"
        );
        *state = next;
        Ok(())
    }

    fn plan(&self, request: &SwitchoverRequest) -> CdcResult<Plan> {
        let lookup = |id: &str| {
            self.registry
                .descriptor(id)
                .ok_or_else(|| CdcError::UnknownCluster(id.to_string()))
        };
        lookup(&request.old_source)?;
        lookup(&request.new_source)?;

        let mut descriptors = self.registry.descriptors();
        if let Some(target) = request.pchannel_num {
            if let Some(d) = descriptors.iter().find(|d| d.pchannel_count() > target) {
                return Err(CdcError::InvalidArgument(format!(
                    "pchannel_num {} would shrink '{}' from {} pchannels",
                    target,
                    d.cluster_id,
                    d.pchannel_count()
                )));
            }
            descriptors = descriptors.iter().map(|d| d.with_pchannel_count(target)).collect();
        }

        let edges = self.store.reversed_edges(&request.old_source, &request.new_source)?;
        let snapshot = TopologySnapshot::new(descriptors.clone(), edges)?;
        let find = |id: &str| {
            descriptors
                .iter()
                .find(|d| d.cluster_id == id)
                .cloned()
                .ok_or_else(|| CdcError::UnknownCluster(id.to_string()))
        };
        Ok(Plan {
            old: find(&request.old_source)?,
            new: find(&request.new_source)?,
            descriptors,
            snapshot,
        })
    }

    async fn bounded<T>(
        &self,
        cluster_id: &str,
        limit: Duration,
        call: impl Future<Output = CdcResult<T>>,
    ) -> CdcResult<T> {
        match tokio::time::timeout(limit, call).await {
            Ok(result) => result,
            Err(_) => {
                self.pool.mark_stale(cluster_id);
                Err(CdcError::transport(
                    cluster_id,
                    format!("no answer within {}ms", limit.as_millis()),
                ))
            }
        }
    }

    async fn client(&self, descriptor: &ClusterDescriptor) -> CdcResult<Arc<dyn ClusterClient>> {
        self.pool.get(&descriptor.cluster_id, &descriptor.connection_param).await
    }

    /// Best-effort undo; the original error is what the caller sees.
    async fn undo(&self, what: &str, client: &Arc<dyn ClusterClient>, call: impl Future<Output = CdcResult<()>>) {
        if let Err(e) = self.bounded(client.cluster_id(), self.timeouts.call, call).await {
            warn!(
                event = %Event::SwitchoverStep,
                cluster_id = client.cluster_id(),
                undo = what,
                error = %e,
                "undo step failed"
            );
        }
    }

    /// Make `request.new_source` the source of the edge it currently receives.
    pub async fn switchover(&self, principal: &Principal, request: SwitchoverRequest) -> CdcResult<SwitchoverReport> {
        principal.require_admin("switchover")?;
        let _claim = self.claim(&request)?;
        let id = Uuid::new_v4();
        let scope = ObservationScope::new("SWITCHOVER")
            .with_field("switchover_id", id)
            .with_field("old_source", &request.old_source)
            .with_field("new_source", &request.new_source);
        let started = std::time::Instant::now();

        match self.run(id, principal, &request).await {
            Ok((edges, distribution)) => {
                self.metrics.increment_switchovers_succeeded();
                scope.complete();
                Ok(SwitchoverReport {
                    id,
                    old_source: request.old_source,
                    new_source: request.new_source,
                    edges,
                    distribution,
                    elapsed_ms: started.elapsed().as_millis() as u64,
                })
            }
            Err(e) => {
                self.metrics.increment_switchovers_failed();
                scope.fail(&e.to_string());
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        id: Uuid,
        principal: &Principal,
        request: &SwitchoverRequest,
    ) -> CdcResult<(Vec<TopologyEdge>, DistributionReport)> {
        let plan = match self.plan(request) {
            Ok(plan) => plan,
            Err(e) => {
                self.advance(id, |s| s.roll_back(e.to_string()))?;
                return Err(e);
            }
        };

        // 1. fence the new source so it cannot stream on commit
        self.advance(id, SwitchoverState::begin_fence)?;
        let connected = async { Ok::<_, CdcError>((self.client(&plan.old).await?, self.client(&plan.new).await?)) };
        let (old, new) = match connected.await {
            Ok(clients) => clients,
            Err(e) => {
                self.advance(id, |s| s.roll_back(e.to_string()))?;
                return Err(e);
            }
        };
        if let Err(e) = self
            .bounded(&plan.new.cluster_id, self.timeouts.call, new.fence_source())
            .await
        {
            self.undo("unfence new source", &new, new.unfence_source()).await;
            self.advance(id, |s| s.roll_back(e.to_string()))?;
            return Err(e);
        }

        // 2. drain the old source
        self.advance(id, SwitchoverState::begin_drain)?;
        let drain_limit = self.timeouts.drain + self.timeouts.call;
        if let Err(e) = self
            .bounded(&plan.old.cluster_id, drain_limit, old.drain_source(self.timeouts.drain))
            .await
        {
            self.undo("resume old source", &old, old.resume_source()).await;
            self.undo("unfence new source", &new, new.unfence_source()).await;
            self.advance(id, |s| s.roll_back(e.to_string()))?;
            return Err(match e {
                CdcError::SwitchoverTimeout { .. } => e,
                CdcError::Transport { .. } => CdcError::SwitchoverTimeout {
                    cluster_id: plan.old.cluster_id.clone(),
                    waited_ms: drain_limit.as_millis() as u64,
                },
                other => other,
            });
        }

        // 3. demote the old source first
        self.advance(id, SwitchoverState::begin_commit)?;
        let mut report = self
            .distributor
            .distribute_to(principal, &plan.snapshot, &[plan.old.cluster_id.clone()])
            .await?;
        if let Err(e) = report.clone().into_result() {
            self.undo("resume old source", &old, old.resume_source()).await;
            self.undo("unfence new source", &new, new.unfence_source()).await;
            self.advance(id, |s| s.roll_back(e.to_string()))?;
            return Err(e);
        }

        // 4. everyone else, concurrently
        self.advance(id, SwitchoverState::begin_propagate)?;
        let rest: Vec<String> = plan
            .snapshot
            .cluster_ids()
            .into_iter()
            .filter(|c| *c != plan.old.cluster_id)
            .map(str::to_string)
            .collect();
        let propagated = self.distributor.distribute_to(principal, &plan.snapshot, &rest).await?;
        report.merge(propagated);
        if let Err(e) = report.clone().into_result() {
            self.advance(id, |s| s.fail(e.to_string()))?;
            return Err(e);
        }

        // 5. new source may stream now
        self.advance(id, SwitchoverState::begin_unfence)?;
        if let Err(e) = self
            .bounded(&plan.new.cluster_id, self.timeouts.call, new.unfence_source())
            .await
        {
            self.advance(id, |s| s.fail(e.to_string()))?;
            return Err(e);
        }

        for descriptor in plan.descriptors {
            self.registry.register(descriptor)?;
        }
        let edges = plan.snapshot.cross_cluster_topology.clone();
        self.store.replace(&self.registry, edges.clone())?;
        self.advance(id, SwitchoverState::succeed)?;
        Ok((edges, report))
    }
}
