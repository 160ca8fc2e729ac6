//! Committed configuration
//!
//! The most recently applied topology snapshot of one cluster. It is the only
//! state the allocator and the router read; the cluster's physical pchannel
//! count is never consulted for routing or allocation decisions.
//!
//! Readers take an `Arc` to an immutable [`CommittedConfig`]; a commit builds
//! the next value, persists it, then swaps the pointer in a single assignment.
//! Readers therefore see either the old snapshot or the new one.

mod persist;

pub use persist::ConfigFile;

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::errors::CdcResult;
use crate::topology::TopologySnapshot;

/// One applied snapshot with its local revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommittedConfig {
    revision: u64,
    committed_at: DateTime<Utc>,
    snapshot: TopologySnapshot,
}

impl CommittedConfig {
    pub fn new(revision: u64, snapshot: TopologySnapshot) -> Self {
        Self {
            revision,
            committed_at: Utc::now(),
            snapshot: snapshot.normalized(),
        }
    }

    /// Revision 0: nothing applied yet.
    pub fn empty() -> Self {
        Self::new(0, TopologySnapshot::default())
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn committed_at(&self) -> DateTime<Utc> {
        self.committed_at
    }

    pub fn snapshot(&self) -> &TopologySnapshot {
        &self.snapshot
    }

    pub fn pchannels_of(&self, cluster_id: &str) -> &[String] {
        self.snapshot.pchannels_of(cluster_id)
    }

    pub fn contains_pchannel(&self, cluster_id: &str, pchannel: &str) -> bool {
        self.snapshot.contains_pchannel(cluster_id, pchannel)
    }

    pub fn has_edge(&self, source: &str, target: &str) -> bool {
        self.snapshot.has_edge(source, target)
    }

    pub fn targets_of(&self, cluster_id: &str) -> Vec<&str> {
        self.snapshot.targets_of(cluster_id)
    }

    pub fn sources_of(&self, cluster_id: &str) -> Vec<&str> {
        self.snapshot.sources_of(cluster_id)
    }
}

/// Result of applying a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CommitOutcome {
    Committed { revision: u64 },
    /// Snapshot equal to the committed one; nothing changed
    Unchanged { revision: u64 },
}

impl CommitOutcome {
    pub fn revision(&self) -> u64 {
        match self {
            Self::Committed { revision } | Self::Unchanged { revision } => *revision,
        }
    }

    pub fn is_change(&self) -> bool {
        matches!(self, Self::Committed { .. })
    }
}

/// Shared, atomically swapped holder of a cluster's committed config.
#[derive(Debug)]
pub struct CommittedConfigCell {
    current: RwLock<Arc<CommittedConfig>>,
    commit_lock: Mutex<()>,
    file: Option<ConfigFile>,
}

impl CommittedConfigCell {
    /// Volatile cell, starts empty.
    pub fn in_memory() -> Self {
        Self {
            current: RwLock::new(Arc::new(CommittedConfig::empty())),
            commit_lock: Mutex::new(()),
            file: None,
        }
    }

    /// Durable cell backed by `<data_dir>/metadata/replicate_config.json`.
    pub fn open(data_dir: &Path) -> CdcResult<Self> {
        let file = ConfigFile::new(data_dir);
        let current = file.read()?.unwrap_or_else(CommittedConfig::empty);
        Ok(Self {
            current: RwLock::new(Arc::new(current)),
            commit_lock: Mutex::new(()),
            file: Some(file),
        })
    }

    pub fn current(&self) -> Arc<CommittedConfig> {
        self.current.read().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.current().revision() == 0
    }

    /// Apply `snapshot`; see [`Self::commit_checked`].
    pub fn commit(&self, snapshot: TopologySnapshot) -> CdcResult<CommitOutcome> {
        self.commit_checked(snapshot, |_, _| Ok(()))
    }

    /// Apply `snapshot` after `check` accepts it against the current config.
    ///
    /// Commits are serialized. An identical snapshot returns `Unchanged`
    /// without touching disk. On any error the committed config is untouched.
    pub fn commit_checked<F>(&self, snapshot: TopologySnapshot, check: F) -> CdcResult<CommitOutcome>
    where
        F: FnOnce(&CommittedConfig, &TopologySnapshot) -> CdcResult<()>,
    {
        let _serial = self.commit_lock.lock();
        let snapshot = snapshot.normalized();
        let current = self.current();

        if current.revision() > 0 && *current.snapshot() == snapshot {
            return Ok(CommitOutcome::Unchanged {
                revision: current.revision(),
            });
        }
        check(&current, &snapshot)?;

        let next = CommittedConfig::new(current.revision() + 1, snapshot);
        if let Some(file) = &self.file {
            file.write_atomic(&next)?;
        }
        let revision = next.revision();
        *self.current.write() = Arc::new(next);
        Ok(CommitOutcome::Committed { revision })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::CdcError;
    use crate::topology::{ClusterBuilder, TopologyEdge};
    use tempfile::TempDir;

    fn snapshot(pchannels: usize) -> TopologySnapshot {
        TopologySnapshot::new(
            vec![
                ClusterBuilder::new("a").with_pchannel_count(pchannels).build(),
                ClusterBuilder::new("b").with_pchannel_count(pchannels).build(),
            ],
            vec![TopologyEdge::new("a", "b")],
        )
        .unwrap()
    }

    #[test]
    fn test_commit_then_identical_is_unchanged() {
        let cell = CommittedConfigCell::in_memory();
        assert!(cell.is_empty());
        assert_eq!(cell.commit(snapshot(4)).unwrap(), CommitOutcome::Committed { revision: 1 });
        assert_eq!(cell.commit(snapshot(4)).unwrap(), CommitOutcome::Unchanged { revision: 1 });
        assert_eq!(cell.commit(snapshot(5)).unwrap(), CommitOutcome::Committed { revision: 2 });
    }

    #[test]
    fn test_rejected_check_leaves_config_untouched() {
        let cell = CommittedConfigCell::in_memory();
        cell.commit(snapshot(4)).unwrap();
        let err = cell
            .commit_checked(snapshot(8), |_, _| Err(CdcError::invalid_topology("no")))
            .unwrap_err();
        assert!(matches!(err, CdcError::InvalidTopology(_)));
        assert_eq!(cell.current().pchannels_of("a").len(), 4);
    }

    #[test]
    fn test_readers_keep_their_snapshot_across_commit() {
        let cell = CommittedConfigCell::in_memory();
        cell.commit(snapshot(4)).unwrap();
        let held = cell.current();
        cell.commit(snapshot(6)).unwrap();
        assert_eq!(held.pchannels_of("a").len(), 4);
        assert_eq!(cell.current().pchannels_of("a").len(), 6);
    }

    #[test]
    fn test_durable_cell_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let cell = CommittedConfigCell::open(dir.path()).unwrap();
            cell.commit(snapshot(16)).unwrap();
        }
        let reopened = CommittedConfigCell::open(dir.path()).unwrap();
        assert_eq!(reopened.current().revision(), 1);
        assert_eq!(reopened.current().pchannels_of("b").len(), 16);
        assert!(reopened.current().has_edge("a", "b"));
    }
}
