//! Connection pool keyed by cluster id

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::errors::CdcResult;
use crate::observability::Event;
use crate::topology::ConnectionParam;

use super::{ClusterClient, Connector};

struct Pooled {
    param: ConnectionParam,
    client: Arc<dyn ClusterClient>,
    stale: bool,
}

/// One long-lived client per cluster.
///
/// A pooled client is reused while its connection parameters match and it
/// has not been marked stale. Connecting happens outside the lock so a slow
/// cluster does not hold up the others.
pub struct ConnectionPool {
    connector: Arc<dyn Connector>,
    entries: RwLock<HashMap<String, Pooled>>,
}

impl ConnectionPool {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get(&self, cluster_id: &str, param: &ConnectionParam) -> CdcResult<Arc<dyn ClusterClient>> {
        if let Some(entry) = self.entries.read().get(cluster_id) {
            if !entry.stale && entry.param == *param {
                return Ok(entry.client.clone());
            }
        }

        let client = self.connector.connect(cluster_id, param).await?;
        info!(event = %Event::ConnectionOpened, cluster_id, uri = %param.uri, "connected");
        self.entries.write().insert(
            cluster_id.to_string(),
            Pooled {
                param: param.clone(),
                client: client.clone(),
                stale: false,
            },
        );
        Ok(client)
    }

    /// Force the next `get` for `cluster_id` to reconnect.
    pub fn mark_stale(&self, cluster_id: &str) {
        if let Some(entry) = self.entries.write().get_mut(cluster_id) {
            if !entry.stale {
                debug!(event = %Event::ConnectionStale, cluster_id, "connection marked stale");
            }
            entry.stale = true;
        }
    }

    pub fn evict(&self, cluster_id: &str) {
        self.entries.write().remove(cluster_id);
    }

    pub fn is_pooled(&self, cluster_id: &str) -> bool {
        self.entries
            .read()
            .get(cluster_id)
            .map(|e| !e.stale)
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
