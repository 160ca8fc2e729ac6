//! Per-pchannel mutation logs
//!
//! Each physical channel is an append-only, offset-addressed sequence of
//! mutations. The router tails these logs; offsets are dense and start at 0.
//! Logs live in memory, so every open starts a new incarnation with its own
//! id and offsets counted from 0 again.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A mutation recorded on a pchannel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageBody {
    CreateCollection {
        collection_id: i64,
        name: String,
        /// Source pchannel of each shard, by shard index
        pchannels: Vec<String>,
    },
    DropCollection {
        collection_id: i64,
        name: String,
    },
    Insert {
        collection_id: i64,
        name: String,
        ids: Vec<i64>,
    },
    Delete {
        collection_id: i64,
        name: String,
        ids: Vec<i64>,
    },
    Upsert {
        collection_id: i64,
        name: String,
        ids: Vec<i64>,
    },
    CreateIndex {
        collection_id: i64,
        name: String,
        field: String,
        index_type: String,
    },
    Load {
        collection_id: i64,
        name: String,
        replica_number: u32,
    },
    Release {
        collection_id: i64,
        name: String,
    },
}

impl MessageBody {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CreateCollection { .. } => "create_collection",
            Self::DropCollection { .. } => "drop_collection",
            Self::Insert { .. } => "insert",
            Self::Delete { .. } => "delete",
            Self::Upsert { .. } => "upsert",
            Self::CreateIndex { .. } => "create_index",
            Self::Load { .. } => "load",
            Self::Release { .. } => "release",
        }
    }

    pub fn collection_id(&self) -> i64 {
        match self {
            Self::CreateCollection { collection_id, .. }
            | Self::DropCollection { collection_id, .. }
            | Self::Insert { collection_id, .. }
            | Self::Delete { collection_id, .. }
            | Self::Upsert { collection_id, .. }
            | Self::CreateIndex { collection_id, .. }
            | Self::Load { collection_id, .. }
            | Self::Release { collection_id, .. } => *collection_id,
        }
    }
}

/// An entry read back from a log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub offset: u64,
    pub body: MessageBody,
}

#[derive(Debug)]
pub struct ChannelLog {
    pchannel: String,
    incarnation: Uuid,
    entries: RwLock<Vec<MessageBody>>,
}

impl ChannelLog {
    pub fn new(pchannel: impl Into<String>) -> Self {
        Self {
            pchannel: pchannel.into(),
            incarnation: Uuid::new_v4(),
            entries: RwLock::new(Vec::new()),
        }
    }

    pub fn pchannel(&self) -> &str {
        &self.pchannel
    }

    /// Id of this log's lifetime; offsets are only comparable within one.
    pub fn incarnation(&self) -> Uuid {
        self.incarnation
    }

    /// Append and return the entry's offset.
    pub fn append(&self, body: MessageBody) -> u64 {
        let mut entries = self.entries.write();
        entries.push(body);
        (entries.len() - 1) as u64
    }

    /// Offset the next append will receive.
    pub fn end_offset(&self) -> u64 {
        self.entries.read().len() as u64
    }

    /// Up to `max` entries starting at `offset`.
    pub fn read_from(&self, offset: u64, max: usize) -> Vec<LogEntry> {
        let entries = self.entries.read();
        entries
            .iter()
            .enumerate()
            .skip(offset as usize)
            .take(max)
            .map(|(i, body)| LogEntry {
                offset: i as u64,
                body: body.clone(),
            })
            .collect()
    }
}

/// The logs of every physical pchannel a cluster owns.
#[derive(Debug, Default)]
pub struct ChannelLogs {
    logs: BTreeMap<String, Arc<ChannelLog>>,
}

impl ChannelLogs {
    pub fn new(pchannels: &[String]) -> Self {
        Self {
            logs: pchannels
                .iter()
                .map(|p| (p.clone(), Arc::new(ChannelLog::new(p.clone()))))
                .collect(),
        }
    }

    pub fn get(&self, pchannel: &str) -> Option<Arc<ChannelLog>> {
        self.logs.get(pchannel).cloned()
    }

    pub fn len(&self) -> usize {
        self.logs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.logs.is_empty()
    }
}
