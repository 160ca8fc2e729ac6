//! One cluster's local control plane
//!
//! A [`ClusterNode`] owns the cluster's committed configuration, its
//! allocator, its pchannel logs and its replication service. It is the
//! receiving end of every remote call: configuration pushes, replicated
//! messages, and switchover controls. Client collection calls go through
//! write admission and land in the engine pass-through.

mod admission;

pub use admission::{check_write_admission, ClusterRole, WriteAdmission};

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::allocator::{CollectionChannelAssignment, VchannelAllocator};
use crate::auth::{default_users, AuthTable, Principal, UserEntry};
use crate::catalog::{new_collection_id, Catalog, ChannelLogs, CollectionInfo, IndexSpec, MessageBody};
use crate::committed::{CommitOutcome, CommittedConfig, CommittedConfigCell};
use crate::errors::{CdcError, CdcResult};
use crate::observability::{Event, MetricsRegistry, MetricsSnapshot};
use crate::router::{ApplyAck, EdgeStatus, ReplicateMessage, ReplicationService, RouterSettings};
use crate::topology::{
    parse_pchannel, pchannel_name, pchannel_names, ClusterDescriptor, ConnectionParam,
    TopologySnapshot,
};
use crate::transport::{ConnectionPool, Connector};

/// How to open a node
#[derive(Debug, Clone)]
pub struct NodeOptions {
    pub cluster_id: String,
    /// Pchannels the cluster physically owns right now
    pub physical_pchannels: usize,
    /// Durable metadata location; `None` keeps everything in memory
    pub data_dir: Option<PathBuf>,
    /// How peers reach this cluster; used for the bootstrap snapshot
    pub connection_param: ConnectionParam,
    pub users: Vec<UserEntry>,
    /// Replica count applied to replicated `load` messages
    pub local_load_replicas: Option<u32>,
    pub router: RouterSettings,
}

impl NodeOptions {
    pub fn new(cluster_id: impl Into<String>, physical_pchannels: usize) -> Self {
        let cluster_id = cluster_id.into();
        Self {
            connection_param: ConnectionParam::new(format!("local://{}", cluster_id), "root:Milvus"),
            cluster_id,
            physical_pchannels,
            data_dir: None,
            users: default_users(),
            local_load_replicas: None,
            router: RouterSettings::default(),
        }
    }

    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(data_dir.into());
        self
    }

    pub fn with_connection_param(mut self, param: ConnectionParam) -> Self {
        self.connection_param = param;
        self
    }

    pub fn with_users(mut self, users: Vec<UserEntry>) -> Self {
        self.users = users;
        self
    }

    pub fn with_local_load_replicas(mut self, replicas: u32) -> Self {
        self.local_load_replicas = Some(replicas);
        self
    }

    pub fn with_router(mut self, router: RouterSettings) -> Self {
        self.router = router;
        self
    }
}

/// Externally visible node state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStatus {
    pub cluster_id: String,
    pub role: ClusterRole,
    pub revision: u64,
    pub physical_pchannels: usize,
    pub committed_pchannels: usize,
    pub fenced: bool,
    pub draining: bool,
    pub edges: Vec<EdgeStatus>,
    pub metrics: MetricsSnapshot,
}

fn shard_of(id: i64, shard_count: usize) -> usize {
    id.rem_euclid(shard_count as i64) as usize
}

/// Next expected offset of one source pchannel, within one log incarnation
#[derive(Debug, Clone, Copy)]
struct AppliedCursor {
    incarnation: Uuid,
    next: u64,
}

pub struct ClusterNode {
    options: NodeOptions,
    physical: Vec<String>,
    config: Arc<CommittedConfigCell>,
    allocator: VchannelAllocator,
    catalog: Catalog,
    logs: Arc<ChannelLogs>,
    replication: Arc<ReplicationService>,
    auth: AuthTable,
    applied: Mutex<HashMap<String, AppliedCursor>>,
    /// Held shared by client writes, exclusively when a drain begins
    write_gate: RwLock<()>,
    stopped: AtomicBool,
    shutdown: watch::Sender<bool>,
    metrics: Arc<MetricsRegistry>,
}

impl ClusterNode {
    /// Open a node, loading its committed configuration.
    ///
    /// With nothing persisted, a standalone snapshot over the physical
    /// pchannels is committed. With a persisted config, its pchannel list is
    /// kept even when the cluster now owns more channels.
    pub fn open(options: NodeOptions, connector: Arc<dyn Connector>) -> CdcResult<Arc<Self>> {
        let physical = pchannel_names(&options.cluster_id, options.physical_pchannels);
        let own = ClusterDescriptor::new(
            options.cluster_id.clone(),
            options.connection_param.clone(),
            options.physical_pchannels,
        );
        own.validate()?;

        let config = Arc::new(match &options.data_dir {
            Some(dir) => CommittedConfigCell::open(dir)?,
            None => CommittedConfigCell::in_memory(),
        });

        let metrics = Arc::new(MetricsRegistry::new());
        if config.is_empty() {
            let outcome = config.commit(TopologySnapshot::new(vec![own], vec![])?)?;
            metrics.increment_configs_committed();
            info!(
                event = %Event::ConfigBootstrapped,
                cluster_id = %options.cluster_id,
                pchannels = options.physical_pchannels,
                revision = outcome.revision(),
                "no committed configuration; bootstrapped standalone"
            );
        } else {
            let committed = config.current();
            let committed_count = committed.pchannels_of(&options.cluster_id).len();
            if committed_count > options.physical_pchannels {
                return Err(CdcError::Config(format!(
                    "cluster '{}' has {} committed pchannels but only {} physical",
                    options.cluster_id, committed_count, options.physical_pchannels
                )));
            }
            info!(
                event = %Event::ConfigLoaded,
                cluster_id = %options.cluster_id,
                revision = committed.revision(),
                committed_pchannels = committed_count,
                physical_pchannels = options.physical_pchannels,
                "loaded committed configuration"
            );
        }

        let logs = Arc::new(ChannelLogs::new(&physical));
        let pool = Arc::new(ConnectionPool::new(connector));
        let replication = Arc::new(ReplicationService::new(
            options.cluster_id.clone(),
            config.clone(),
            logs.clone(),
            pool,
            options.router.clone(),
            metrics.clone(),
        ));
        replication.reconcile();

        let (shutdown, _) = watch::channel(false);
        let node = Arc::new(Self {
            allocator: VchannelAllocator::new(config.clone(), metrics.clone()),
            auth: AuthTable::new(options.users.clone()),
            options,
            physical,
            config,
            catalog: Catalog::new(),
            logs,
            replication,
            applied: Mutex::new(HashMap::new()),
            write_gate: RwLock::new(()),
            stopped: AtomicBool::new(false),
            shutdown,
            metrics,
        });
        info!(
            event = %Event::NodeStarted,
            cluster_id = %node.cluster_id(),
            role = node.role().as_str(),
            "node open"
        );
        Ok(node)
    }

    /// Spawn the replication pump.
    pub fn start(&self) -> JoinHandle<()> {
        self.replication.spawn(self.shutdown.subscribe())
    }

    /// Stop serving; remote calls fail with a transport error afterwards.
    pub fn shutdown(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            let _ = self.shutdown.send(true);
            info!(event = %Event::NodeStopped, cluster_id = %self.cluster_id(), "node stopped");
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Flips to true on [`shutdown`](Self::shutdown).
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    fn ensure_running(&self) -> CdcResult<()> {
        if self.is_stopped() {
            Err(CdcError::transport(self.cluster_id(), "cluster is stopped"))
        } else {
            Ok(())
        }
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    pub fn cluster_id(&self) -> &str {
        &self.options.cluster_id
    }

    pub fn connection_param(&self) -> &ConnectionParam {
        &self.options.connection_param
    }

    pub fn physical_pchannels(&self) -> &[String] {
        &self.physical
    }

    pub fn committed(&self) -> Arc<CommittedConfig> {
        self.config.current()
    }

    pub fn role(&self) -> ClusterRole {
        ClusterRole::of(self.cluster_id(), &self.committed())
    }

    pub fn allocator(&self) -> &VchannelAllocator {
        &self.allocator
    }

    pub fn replication(&self) -> &Arc<ReplicationService> {
        &self.replication
    }

    pub fn auth(&self) -> &AuthTable {
        &self.auth
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn healthy(&self) -> bool {
        !self.is_stopped()
    }

    pub fn status(&self) -> NodeStatus {
        let committed = self.committed();
        NodeStatus {
            cluster_id: self.cluster_id().to_string(),
            role: ClusterRole::of(self.cluster_id(), &committed),
            revision: committed.revision(),
            physical_pchannels: self.physical.len(),
            committed_pchannels: committed.pchannels_of(self.cluster_id()).len(),
            fenced: self.replication.is_fenced(),
            draining: self.replication.is_draining(),
            edges: self.replication.status(),
            metrics: self.metrics.snapshot(),
        }
    }

    // =========================================================================
    // CONFIGURATION
    // =========================================================================

    /// Atomically replace the committed configuration.
    ///
    /// Identical snapshots are a no-op. On rejection nothing changes.
    pub fn apply_configuration(
        &self,
        principal: &Principal,
        snapshot: TopologySnapshot,
    ) -> CdcResult<CommitOutcome> {
        principal.require_admin("update replicate configuration")?;
        self.ensure_running()?;

        let result = self
            .config
            .commit_checked(snapshot, |current, next| self.check_snapshot(current, next));

        match result {
            Ok(outcome @ CommitOutcome::Committed { revision }) => {
                self.metrics.increment_configs_committed();
                let committed = self.committed();
                info!(
                    event = %Event::ConfigCommitted,
                    cluster_id = %self.cluster_id(),
                    revision,
                    role = ClusterRole::of(self.cluster_id(), &committed).as_str(),
                    pchannels = committed.pchannels_of(self.cluster_id()).len(),
                    edges = committed.snapshot().edges().len(),
                    "replicate configuration committed"
                );
                self.replication.reconcile();
                Ok(outcome)
            }
            Ok(outcome) => {
                self.metrics.increment_configs_unchanged();
                info!(
                    event = %Event::ConfigUnchanged,
                    cluster_id = %self.cluster_id(),
                    revision = outcome.revision(),
                    "identical configuration; nothing to do"
                );
                // an identical commit still ends a drain
                if self.replication.is_draining() {
                    self.replication.reconcile();
                }
                Ok(outcome)
            }
            Err(e) => {
                self.metrics.increment_configs_rejected();
                warn!(
                    event = %Event::ConfigRejected,
                    cluster_id = %self.cluster_id(),
                    error = %e,
                    "replicate configuration rejected"
                );
                Err(e)
            }
        }
    }

    fn check_snapshot(&self, current: &CommittedConfig, next: &TopologySnapshot) -> CdcResult<()> {
        next.validate()?;
        let own = next.cluster(self.cluster_id()).ok_or_else(|| {
            CdcError::invalid_topology(format!(
                "snapshot does not include local cluster '{}'",
                self.cluster_id()
            ))
        })?;
        if own.pchannel_count() > self.physical.len() {
            return Err(CdcError::invalid_topology(format!(
                "snapshot lists {} pchannels for '{}' but it owns {}",
                own.pchannel_count(),
                self.cluster_id(),
                self.physical.len()
            )));
        }
        if let Some(previous) = current.snapshot().cluster(self.cluster_id()) {
            if !previous.is_prefix_of(own) {
                return Err(CdcError::invalid_topology(format!(
                    "snapshot would shrink '{}' from {} to {} pchannels",
                    self.cluster_id(),
                    previous.pchannel_count(),
                    own.pchannel_count()
                )));
            }
        }
        Ok(())
    }

    // =========================================================================
    // SWITCHOVER CONTROLS
    // =========================================================================

    pub fn fence_source(&self, principal: &Principal) -> CdcResult<()> {
        principal.require_admin("fence replication")?;
        self.ensure_running()?;
        self.replication.fence();
        Ok(())
    }

    pub fn unfence_source(&self, principal: &Principal) -> CdcResult<()> {
        principal.require_admin("unfence replication")?;
        self.ensure_running()?;
        self.replication.unfence();
        Ok(())
    }

    /// Refuse client writes, then flush every outbound edge within `timeout`.
    pub async fn drain_source(&self, principal: &Principal, timeout: Duration) -> CdcResult<()> {
        principal.require_admin("drain replication")?;
        self.ensure_running()?;
        {
            let _gate = self.write_gate.write();
            self.replication.begin_drain();
        }
        self.replication.drain(timeout).await
    }

    pub fn resume_source(&self, principal: &Principal) -> CdcResult<()> {
        principal.require_admin("resume replication")?;
        self.ensure_running()?;
        self.replication.resume();
        Ok(())
    }

    // =========================================================================
    // CLIENT COLLECTION CALLS
    // =========================================================================

    fn admit_write(&self) -> CdcResult<()> {
        let admission = check_write_admission(
            self.role(),
            self.replication.is_draining(),
            self.is_stopped(),
        );
        if !admission.is_admitted() {
            self.metrics.increment_writes_rejected();
        }
        admission.to_result(self.cluster_id())
    }

    fn append(&self, pchannel: &str, body: MessageBody) {
        if let Some(log) = self.logs.get(pchannel) {
            log.append(body);
        }
    }

    fn broadcast(&self, assignment: &CollectionChannelAssignment, body: MessageBody) {
        let mut seen: Vec<&str> = Vec::new();
        for pchannel in assignment.pchannels() {
            if !seen.contains(&pchannel) {
                seen.push(pchannel);
                self.append(pchannel, body.clone());
            }
        }
        self.replication.notify();
    }

    /// Create a collection whose shards are allocated from the committed pool.
    pub fn create_collection(&self, name: &str, shard_count: usize) -> CdcResult<CollectionInfo> {
        let _gate = self.write_gate.read();
        self.admit_write()?;
        if self.catalog.has(name) {
            return Err(CdcError::CollectionAlreadyExists(name.to_string()));
        }

        let collection_id = new_collection_id();
        let assignment = self.allocator.assign(collection_id, shard_count, self.cluster_id())?;
        self.catalog.create(name, assignment.clone())?;
        self.broadcast(
            &assignment,
            MessageBody::CreateCollection {
                collection_id,
                name: name.to_string(),
                pchannels: assignment.pchannels().into_iter().map(str::to_string).collect(),
            },
        );
        self.catalog.describe(name)
    }

    pub fn drop_collection(&self, name: &str) -> CdcResult<()> {
        let _gate = self.write_gate.read();
        self.admit_write()?;
        let info = self.catalog.describe(name)?;
        self.catalog.drop_collection(info.collection_id, name);
        self.broadcast(
            &info.assignment,
            MessageBody::DropCollection {
                collection_id: info.collection_id,
                name: name.to_string(),
            },
        );
        Ok(())
    }

    fn write_rows(
        &self,
        name: &str,
        ids: &[i64],
        apply: impl FnOnce(&Catalog, i64) -> CdcResult<()>,
        body: impl Fn(i64, Vec<i64>) -> MessageBody,
    ) -> CdcResult<()> {
        let _gate = self.write_gate.read();
        self.admit_write()?;
        let info = self.catalog.describe(name)?;
        apply(&self.catalog, info.collection_id)?;

        let shard_count = info.assignment.shard_count();
        let mut by_shard: Vec<Vec<i64>> = vec![Vec::new(); shard_count];
        for id in ids {
            by_shard[shard_of(*id, shard_count)].push(*id);
        }
        for (shard, shard_ids) in by_shard.into_iter().enumerate() {
            if shard_ids.is_empty() {
                continue;
            }
            if let Some(pchannel) = info.assignment.pchannel_of_shard(shard) {
                self.append(pchannel, body(info.collection_id, shard_ids));
            }
        }
        self.replication.notify();
        Ok(())
    }

    pub fn insert(&self, name: &str, ids: &[i64]) -> CdcResult<()> {
        self.write_rows(
            name,
            ids,
            |catalog, id| catalog.insert(id, name, ids),
            |collection_id, ids| MessageBody::Insert {
                collection_id,
                name: name.to_string(),
                ids,
            },
        )
    }

    pub fn upsert(&self, name: &str, ids: &[i64]) -> CdcResult<()> {
        self.write_rows(
            name,
            ids,
            |catalog, id| catalog.upsert(id, name, ids),
            |collection_id, ids| MessageBody::Upsert {
                collection_id,
                name: name.to_string(),
                ids,
            },
        )
    }

    pub fn delete(&self, name: &str, ids: &[i64]) -> CdcResult<()> {
        self.write_rows(
            name,
            ids,
            |catalog, id| catalog.delete(id, name, ids),
            |collection_id, ids| MessageBody::Delete {
                collection_id,
                name: name.to_string(),
                ids,
            },
        )
    }

    fn collection_ddl(
        &self,
        name: &str,
        apply: impl FnOnce(&Catalog, i64) -> CdcResult<()>,
        body: impl FnOnce(i64) -> MessageBody,
    ) -> CdcResult<()> {
        let _gate = self.write_gate.read();
        self.admit_write()?;
        let info = self.catalog.describe(name)?;
        apply(&self.catalog, info.collection_id)?;
        self.broadcast(&info.assignment, body(info.collection_id));
        Ok(())
    }

    pub fn create_index(&self, name: &str, field: &str, index_type: &str) -> CdcResult<()> {
        let spec = IndexSpec {
            field: field.to_string(),
            index_type: index_type.to_string(),
        };
        self.collection_ddl(
            name,
            |catalog, id| catalog.create_index(id, name, spec),
            |collection_id| MessageBody::CreateIndex {
                collection_id,
                name: name.to_string(),
                field: field.to_string(),
                index_type: index_type.to_string(),
            },
        )
    }

    pub fn load_collection(&self, name: &str, replica_number: u32) -> CdcResult<()> {
        self.collection_ddl(
            name,
            |catalog, id| catalog.load(id, name, replica_number),
            |collection_id| MessageBody::Load {
                collection_id,
                name: name.to_string(),
                replica_number,
            },
        )
    }

    pub fn release_collection(&self, name: &str) -> CdcResult<()> {
        self.collection_ddl(
            name,
            |catalog, id| catalog.release(id, name),
            |collection_id| MessageBody::Release {
                collection_id,
                name: name.to_string(),
            },
        )
    }

    /// Sorted primary keys. Reads are served in every role.
    pub fn query_ids(&self, name: &str) -> CdcResult<Vec<i64>> {
        self.catalog.query_ids(name)
    }

    pub fn describe_collection(&self, name: &str) -> CdcResult<CollectionInfo> {
        self.catalog.describe(name)
    }

    pub fn has_collection(&self, name: &str) -> bool {
        self.catalog.has(name)
    }

    pub fn list_collections(&self) -> Vec<String> {
        self.catalog.names()
    }

    // =========================================================================
    // REPLICATED MESSAGES (TARGET SIDE)
    // =========================================================================

    /// Map a source pchannel to the local pchannel with the same index,
    /// checking both against the committed configuration.
    fn map_source_pchannel(
        &self,
        committed: &CommittedConfig,
        source_cluster_id: &str,
        source_pchannel: &str,
    ) -> CdcResult<String> {
        let stale = |reason: String| CdcError::stale(self.cluster_id(), source_pchannel, reason);

        if !committed.contains_pchannel(source_cluster_id, source_pchannel) {
            return Err(stale(format!(
                "source pchannel not in committed view of '{}' (revision {})",
                source_cluster_id,
                committed.revision()
            )));
        }
        let (owner, index) = parse_pchannel(source_pchannel)
            .ok_or_else(|| CdcError::InvalidArgument(format!("malformed pchannel '{}'", source_pchannel)))?;
        if owner != source_cluster_id {
            return Err(CdcError::InvalidArgument(format!(
                "pchannel '{}' does not belong to '{}'",
                source_pchannel, source_cluster_id
            )));
        }
        let local = pchannel_name(self.cluster_id(), index);
        if !committed.contains_pchannel(self.cluster_id(), &local) {
            return Err(stale(format!(
                "local pchannel '{}' not committed (revision {})",
                local,
                committed.revision()
            )));
        }
        Ok(local)
    }

    /// Validate and apply one replicated message.
    ///
    /// Rejections caused by a lagging committed config are
    /// `TargetConfigStale`; the sender keeps the message and retries.
    pub fn apply_replicated(&self, principal: &Principal, message: &ReplicateMessage) -> CdcResult<ApplyAck> {
        principal.require_admin("replicate messages")?;
        self.ensure_running()?;

        let committed = self.committed();
        let source = message.source_cluster_id.as_str();
        if !committed.has_edge(source, self.cluster_id()) {
            return Err(CdcError::stale(
                self.cluster_id(),
                &message.source_pchannel,
                format!(
                    "no committed edge {}->{} (revision {})",
                    source,
                    self.cluster_id(),
                    committed.revision()
                ),
            ));
        }
        self.map_source_pchannel(&committed, source, &message.source_pchannel)?;

        let local_assignment = match &message.body {
            MessageBody::CreateCollection {
                collection_id,
                pchannels,
                ..
            } => {
                let local = pchannels
                    .iter()
                    .map(|p| self.map_source_pchannel(&committed, source, p))
                    .collect::<CdcResult<Vec<_>>>()?;
                Some(CollectionChannelAssignment::new(*collection_id, local))
            }
            _ => None,
        };

        let mut applied = self.applied.lock();
        let cursor = applied
            .entry(message.source_pchannel.clone())
            .or_insert(AppliedCursor {
                incarnation: message.incarnation,
                next: 0,
            });
        if cursor.incarnation != message.incarnation {
            info!(
                event = %Event::SourceLogRestarted,
                cluster_id = %self.cluster_id(),
                source_pchannel = %message.source_pchannel,
                previous_next = cursor.next,
                "source log restarted; offsets reset"
            );
            *cursor = AppliedCursor {
                incarnation: message.incarnation,
                next: 0,
            };
        }
        if message.offset < cursor.next {
            self.metrics.increment_duplicated();
            return Ok(ApplyAck {
                offset: message.offset,
                duplicate: true,
            });
        }

        self.apply_body(&message.body, local_assignment)?;
        cursor.next = message.offset + 1;
        self.metrics.increment_applied();
        Ok(ApplyAck {
            offset: message.offset,
            duplicate: false,
        })
    }

    fn apply_body(&self, body: &MessageBody, assignment: Option<CollectionChannelAssignment>) -> CdcResult<()> {
        match body {
            MessageBody::CreateCollection { name, .. } => {
                if let Some(assignment) = assignment {
                    self.catalog.create(name, assignment)?;
                }
                Ok(())
            }
            MessageBody::DropCollection { collection_id, name } => {
                self.catalog.drop_collection(*collection_id, name);
                Ok(())
            }
            MessageBody::Insert { collection_id, name, ids } => self.catalog.insert(*collection_id, name, ids),
            MessageBody::Upsert { collection_id, name, ids } => self.catalog.upsert(*collection_id, name, ids),
            MessageBody::Delete { collection_id, name, ids } => self.catalog.delete(*collection_id, name, ids),
            MessageBody::CreateIndex {
                collection_id,
                name,
                field,
                index_type,
            } => self.catalog.create_index(
                *collection_id,
                name,
                IndexSpec {
                    field: field.clone(),
                    index_type: index_type.clone(),
                },
            ),
            MessageBody::Load {
                collection_id,
                name,
                replica_number,
            } => {
                let replicas = self.options.local_load_replicas.unwrap_or(*replica_number);
                self.catalog.load(*collection_id, name, replicas)
            }
            MessageBody::Release { collection_id, name } => self.catalog.release(*collection_id, name),
        }
    }
}

impl Drop for ClusterNode {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}
