//! Replicated message envelope

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::catalog::MessageBody;

/// A source log entry on its way to a target cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicateMessage {
    pub source_cluster_id: String,
    pub source_pchannel: String,
    /// Lifetime of the source log the offset belongs to
    #[serde(default)]
    pub incarnation: Uuid,
    /// Offset within `source_pchannel`
    pub offset: u64,
    pub body: MessageBody,
}

/// Target's acknowledgement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyAck {
    pub offset: u64,
    /// Already applied earlier; nothing changed
    pub duplicate: bool,
}
