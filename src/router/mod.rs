//! Replication Message Router
//!
//! On a source cluster, mirrors every committed mutation from its pchannel
//! logs to each target named by a committed outbound edge. Delivery is
//! at-least-once and ordered per pchannel; targets deduplicate by offset.

mod edge;
mod message;
mod service;
mod state;

pub use edge::{EdgeReplicator, EdgeStatus, LaneStatus};
pub use message::{ApplyAck, ReplicateMessage};
pub use service::ReplicationService;
pub use state::{EdgeState, PauseReason};

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Router tuning, as found under `replication` in the node config
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterSettings {
    /// Idle pump period; local writes wake the pump immediately
    #[serde(default = "default_pump_interval_ms")]
    pub pump_interval_ms: u64,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Consecutive failures on one lane before an alert is raised
    #[serde(default = "default_retry_budget")]
    pub retry_budget: u32,

    /// Messages read from a log per lane per pass
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_pump_interval_ms() -> u64 {
    200
}
fn default_initial_backoff_ms() -> u64 {
    50
}
fn default_max_backoff_ms() -> u64 {
    5_000
}
fn default_retry_budget() -> u32 {
    10
}
fn default_batch_size() -> usize {
    256
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            pump_interval_ms: default_pump_interval_ms(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            retry_budget: default_retry_budget(),
            batch_size: default_batch_size(),
        }
    }
}

impl RouterSettings {
    pub fn pump_interval(&self) -> Duration {
        Duration::from_millis(self.pump_interval_ms.max(1))
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.batch_size == 0 {
            return Err("replication.batch_size must be > 0".into());
        }
        if self.retry_budget == 0 {
            return Err("replication.retry_budget must be > 0".into());
        }
        if self.max_backoff_ms < self.initial_backoff_ms {
            return Err("replication.max_backoff_ms must be >= initial_backoff_ms".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_defaults_from_empty_json() {
        let settings: RouterSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings, RouterSettings::default());
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_settings_validation() {
        let settings = RouterSettings {
            batch_size: 0,
            ..Default::default()
        };
        assert!(settings.validate().is_err());

        let settings = RouterSettings {
            initial_backoff_ms: 100,
            max_backoff_ms: 10,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }
}
