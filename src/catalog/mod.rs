//! Storage engine pass-through
//!
//! A deliberately small in-memory stand-in for the vector engine: collections
//! hold primary-key sets, an optional index descriptor and a load state. Only
//! what replication needs to observe is modelled. Dropped collection ids are
//! remembered so late replicated mutations for them are ignored.

mod log;

pub use log::{ChannelLog, ChannelLogs, LogEntry, MessageBody};

use std::collections::{BTreeMap, BTreeSet, HashSet};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::allocator::CollectionChannelAssignment;
use crate::errors::{CdcError, CdcResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub field: String,
    pub index_type: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LoadState {
    Released,
    Loaded { replica_number: u32 },
}

#[derive(Debug, Clone)]
struct Collection {
    collection_id: i64,
    assignment: CollectionChannelAssignment,
    rows: BTreeSet<i64>,
    index: Option<IndexSpec>,
    load: LoadState,
}

/// Externally visible description of a collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionInfo {
    pub collection_id: i64,
    pub name: String,
    pub assignment: CollectionChannelAssignment,
    pub row_count: usize,
    pub index: Option<IndexSpec>,
    pub load: LoadState,
}

#[derive(Debug, Default)]
pub struct Catalog {
    collections: RwLock<BTreeMap<String, Collection>>,
    dropped: RwLock<HashSet<i64>>,
}

/// Fresh collection id, unique across clusters.
pub fn new_collection_id() -> i64 {
    (Uuid::new_v4().as_u128() as i64) & i64::MAX
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a collection. Returns `false` when the same collection id
    /// already exists or was dropped.
    pub fn create(&self, name: &str, assignment: CollectionChannelAssignment) -> CdcResult<bool> {
        let collection_id = assignment.collection_id;
        if self.dropped.read().contains(&collection_id) {
            return Ok(false);
        }
        let mut collections = self.collections.write();
        if let Some(existing) = collections.get(name) {
            if existing.collection_id == collection_id {
                return Ok(false);
            }
            return Err(CdcError::CollectionAlreadyExists(name.to_string()));
        }
        collections.insert(
            name.to_string(),
            Collection {
                collection_id,
                assignment,
                rows: BTreeSet::new(),
                index: None,
                load: LoadState::Released,
            },
        );
        Ok(true)
    }

    /// Drop by name and id. Returns `false` when already gone.
    pub fn drop_collection(&self, collection_id: i64, name: &str) -> bool {
        self.dropped.write().insert(collection_id);
        let mut collections = self.collections.write();
        match collections.get(name) {
            Some(c) if c.collection_id == collection_id => {
                collections.remove(name);
                true
            }
            _ => false,
        }
    }

    pub fn is_dropped(&self, collection_id: i64) -> bool {
        self.dropped.read().contains(&collection_id)
    }

    fn with_collection<T>(
        &self,
        collection_id: i64,
        name: &str,
        f: impl FnOnce(&mut Collection) -> T,
    ) -> CdcResult<Option<T>> {
        if self.is_dropped(collection_id) {
            return Ok(None);
        }
        let mut collections = self.collections.write();
        match collections.get_mut(name) {
            Some(c) if c.collection_id == collection_id => Ok(Some(f(c))),
            _ => Err(CdcError::CollectionNotFound(name.to_string())),
        }
    }

    pub fn insert(&self, collection_id: i64, name: &str, ids: &[i64]) -> CdcResult<()> {
        self.with_collection(collection_id, name, |c| c.rows.extend(ids.iter().copied()))?;
        Ok(())
    }

    pub fn upsert(&self, collection_id: i64, name: &str, ids: &[i64]) -> CdcResult<()> {
        self.insert(collection_id, name, ids)
    }

    pub fn delete(&self, collection_id: i64, name: &str, ids: &[i64]) -> CdcResult<()> {
        self.with_collection(collection_id, name, |c| {
            for id in ids {
                c.rows.remove(id);
            }
        })?;
        Ok(())
    }

    pub fn create_index(&self, collection_id: i64, name: &str, index: IndexSpec) -> CdcResult<()> {
        self.with_collection(collection_id, name, |c| c.index = Some(index))?;
        Ok(())
    }

    pub fn load(&self, collection_id: i64, name: &str, replica_number: u32) -> CdcResult<()> {
        self.with_collection(collection_id, name, |c| {
            c.load = LoadState::Loaded { replica_number }
        })?;
        Ok(())
    }

    pub fn release(&self, collection_id: i64, name: &str) -> CdcResult<()> {
        self.with_collection(collection_id, name, |c| c.load = LoadState::Released)?;
        Ok(())
    }

    /// Sorted primary keys of a loaded collection.
    pub fn query_ids(&self, name: &str) -> CdcResult<Vec<i64>> {
        let collections = self.collections.read();
        let collection = collections
            .get(name)
            .ok_or_else(|| CdcError::CollectionNotFound(name.to_string()))?;
        if collection.load == LoadState::Released {
            return Err(CdcError::InvalidArgument(format!(
                "collection '{}' is not loaded",
                name
            )));
        }
        Ok(collection.rows.iter().copied().collect())
    }

    pub fn has(&self, name: &str) -> bool {
        self.collections.read().contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.collections.read().keys().cloned().collect()
    }

    pub fn describe(&self, name: &str) -> CdcResult<CollectionInfo> {
        let collections = self.collections.read();
        let c = collections
            .get(name)
            .ok_or_else(|| CdcError::CollectionNotFound(name.to_string()))?;
        Ok(CollectionInfo {
            collection_id: c.collection_id,
            name: name.to_string(),
            assignment: c.assignment.clone(),
            row_count: c.rows.len(),
            index: c.index.clone(),
            load: c.load,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assignment(id: i64) -> CollectionChannelAssignment {
        CollectionChannelAssignment::new(id, vec!["a-rootcoord-dml_0".into()])
    }

    #[test]
    fn test_create_is_idempotent_per_id() {
        let catalog = Catalog::new();
        assert!(catalog.create("x", assignment(1)).unwrap());
        assert!(!catalog.create("x", assignment(1)).unwrap());
        assert!(matches!(
            catalog.create("x", assignment(2)),
            Err(CdcError::CollectionAlreadyExists(_))
        ));
    }

    #[test]
    fn test_rows_and_query() {
        let catalog = Catalog::new();
        catalog.create("x", assignment(1)).unwrap();
        catalog.insert(1, "x", &[3, 1, 2]).unwrap();
        catalog.delete(1, "x", &[2]).unwrap();
        assert!(catalog.query_ids("x").is_err());

        catalog.load(1, "x", 1).unwrap();
        assert_eq!(catalog.query_ids("x").unwrap(), vec![1, 3]);
    }

    #[test]
    fn test_late_mutations_after_drop_ignored() {
        let catalog = Catalog::new();
        catalog.create("x", assignment(1)).unwrap();
        assert!(catalog.drop_collection(1, "x"));
        catalog.insert(1, "x", &[9]).unwrap();
        assert!(!catalog.create("x", assignment(1)).unwrap());
        assert!(!catalog.has("x"));
    }

    #[test]
    fn test_missing_collection() {
        let catalog = Catalog::new();
        assert!(matches!(catalog.insert(5, "nope", &[1]), Err(CdcError::CollectionNotFound(_))));
    }

    #[test]
    fn test_collection_ids_non_negative() {
        for _ in 0..100 {
            assert!(new_collection_id() >= 0);
        }
    }
}
