//! Configuration Distributor
//!
//! Pushes one full [`TopologySnapshot`] to every cluster it names, in
//! parallel, over pooled connections. Each cluster commits or rejects the
//! snapshot atomically on its own; the distributor only collects the
//! outcomes. Authorization is checked once, before any cluster is contacted.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::auth::Principal;
use crate::committed::CommitOutcome;
use crate::errors::{CdcError, CdcResult};
use crate::observability::{Event, MetricsRegistry, ObservationScope};
use crate::topology::{ClusterDescriptor, TopologySnapshot};
use crate::transport::ConnectionPool;

/// What one cluster did with the snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ClusterOutcome {
    Applied { outcome: CommitOutcome },
    Failed { error: CdcError },
}

impl ClusterOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }
}

/// Per-cluster outcomes of one push
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionReport {
    pub outcomes: BTreeMap<String, ClusterOutcome>,
}

impl DistributionReport {
    pub fn succeeded(&self) -> Vec<String> {
        self.outcomes
            .iter()
            .filter(|(_, o)| o.is_applied())
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn failed(&self) -> Vec<(String, String)> {
        self.outcomes
            .iter()
            .filter_map(|(id, o)| match o {
                ClusterOutcome::Failed { error } => Some((id.clone(), error.to_string())),
                ClusterOutcome::Applied { .. } => None,
            })
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.outcomes.values().all(ClusterOutcome::is_applied)
    }

    /// Clusters whose committed config actually changed.
    pub fn changed(&self) -> Vec<String> {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, ClusterOutcome::Applied { outcome } if outcome.is_change()))
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn merge(&mut self, other: DistributionReport) {
        self.outcomes.extend(other.outcomes);
    }

    /// `DistributionPartialFailure` unless every cluster applied.
    pub fn into_result(self) -> CdcResult<Self> {
        if self.is_complete() {
            Ok(self)
        } else {
            Err(CdcError::DistributionPartialFailure {
                succeeded: self.succeeded(),
                failed: self.failed(),
            })
        }
    }
}

pub struct Distributor {
    pool: Arc<ConnectionPool>,
    metrics: Arc<MetricsRegistry>,
    call_timeout: Duration,
}

impl Distributor {
    pub fn new(pool: Arc<ConnectionPool>, metrics: Arc<MetricsRegistry>, call_timeout: Duration) -> Self {
        Self {
            pool,
            metrics,
            call_timeout,
        }
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// Push `snapshot` to every cluster it names.
    pub async fn distribute(&self, principal: &Principal, snapshot: &TopologySnapshot) -> CdcResult<DistributionReport> {
        let ids: Vec<String> = snapshot.cluster_ids().into_iter().map(str::to_string).collect();
        self.distribute_to(principal, snapshot, &ids).await
    }

    /// Push `snapshot` to the named subset of its clusters.
    pub async fn distribute_to(
        &self,
        principal: &Principal,
        snapshot: &TopologySnapshot,
        cluster_ids: &[String],
    ) -> CdcResult<DistributionReport> {
        principal.require_admin("update replicate configuration")?;
        snapshot.validate()?;
        let targets = cluster_ids
            .iter()
            .map(|id| {
                snapshot
                    .cluster(id)
                    .ok_or_else(|| CdcError::UnknownCluster(id.clone()))
            })
            .collect::<CdcResult<Vec<_>>>()?;

        let scope = ObservationScope::new("DISTRIBUTION")
            .with_field("clusters", targets.len())
            .with_field("edges", snapshot.edges().len());

        let results = join_all(targets.into_iter().map(|d| self.push_one(d, snapshot))).await;
        let report = DistributionReport {
            outcomes: results.into_iter().collect(),
        };

        if report.is_complete() {
            scope.complete();
        } else {
            scope.fail(&format!("{} cluster(s) failed", report.failed().len()));
        }
        Ok(report)
    }

    async fn push_one(&self, descriptor: &ClusterDescriptor, snapshot: &TopologySnapshot) -> (String, ClusterOutcome) {
        let cluster_id = descriptor.cluster_id.clone();
        let call = async {
            let client = self.pool.get(&cluster_id, &descriptor.connection_param).await?;
            client.update_replicate_configuration(snapshot).await
        };
        let result = match tokio::time::timeout(self.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(CdcError::transport(
                &cluster_id,
                format!("no answer within {}ms", self.call_timeout.as_millis()),
            )),
        };

        let outcome = match result {
            Ok(outcome) => {
                self.metrics.increment_pushes_succeeded();
                info!(
                    event = %Event::ClusterPushSucceeded,
                    cluster_id = %cluster_id,
                    revision = outcome.revision(),
                    changed = outcome.is_change(),
                    "cluster applied configuration"
                );
                ClusterOutcome::Applied { outcome }
            }
            Err(error) => {
                self.metrics.increment_pushes_failed();
                if matches!(error, CdcError::Transport { .. }) {
                    self.pool.mark_stale(&cluster_id);
                }
                warn!(
                    event = %Event::ClusterPushFailed,
                    cluster_id = %cluster_id,
                    code = error.code(),
                    error = %error,
                    "cluster did not apply configuration"
                );
                ClusterOutcome::Failed { error }
            }
        };
        (cluster_id, outcome)
    }
}
