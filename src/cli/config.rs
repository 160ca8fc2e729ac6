//! Configuration files for `xcdc serve` and the controller commands

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::auth::{default_users, UserEntry};
use crate::controller::ControllerOptions;
use crate::http_server::HttpServerConfig;
use crate::node::NodeOptions;
use crate::observability::LogConfig;
use crate::router::RouterSettings;
use crate::topology::{ClusterDescriptor, ConnectionParam, TopologyEdge, TopologySnapshot, PCHANNEL_INFIX};

use super::errors::{CliError, CliResult};

fn read_json<T: DeserializeOwned>(path: &Path, what: &str) -> CliResult<T> {
    let content = fs::read_to_string(path)
        .map_err(|e| CliError::config_error(format!("Failed to read {} '{}': {}", what, path.display(), e)))?;
    serde_json::from_str(&content)
        .map_err(|e| CliError::config_error(format!("Invalid {} JSON: {}", what, e)))
}

/// Load a snapshot file and validate it.
pub fn load_snapshot(path: &Path) -> CliResult<TopologySnapshot> {
    let snapshot: TopologySnapshot = read_json(path, "snapshot")?;
    snapshot
        .validate()
        .map_err(|e| CliError::config_error(format!("Invalid snapshot: {}", e)))?;
    Ok(snapshot.normalized())
}

/// Node configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub cluster_id: String,

    /// Physical pchannels owned by this cluster (default 16)
    #[serde(default = "default_pchannel_num")]
    pub pchannel_num: usize,

    /// Where the committed configuration is persisted; in-memory when absent
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    /// How peers reach this node; defaults to the listener on loopback
    #[serde(default)]
    pub advertise: Option<ConnectionParam>,

    #[serde(default)]
    pub http: HttpServerConfig,

    #[serde(default = "default_users")]
    pub users: Vec<UserEntry>,

    /// Replica count applied to replicated loads
    #[serde(default)]
    pub local_load_replicas: Option<u32>,

    #[serde(default)]
    pub replication: RouterSettings,

    #[serde(default)]
    pub log: LogConfig,
}

fn default_pchannel_num() -> usize {
    16
}

impl NodeConfig {
    pub fn load(path: &Path) -> CliResult<Self> {
        let config: NodeConfig = read_json(path, "config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> CliResult<()> {
        if self.cluster_id.is_empty() {
            return Err(CliError::config_error("cluster_id must not be empty"));
        }
        if self.cluster_id.contains(PCHANNEL_INFIX) {
            return Err(CliError::config_error(format!(
                "cluster_id '{}' must not contain '{}'",
                self.cluster_id, PCHANNEL_INFIX
            )));
        }
        if self.pchannel_num == 0 {
            return Err(CliError::config_error("pchannel_num must be > 0"));
        }
        if self.users.is_empty() {
            return Err(CliError::config_error("at least one user is required"));
        }
        if let Some(0) = self.local_load_replicas {
            return Err(CliError::config_error("local_load_replicas must be > 0"));
        }
        self.replication
            .validate()
            .map_err(|e| CliError::config_error(format!("Replication config error: {}", e)))?;
        Ok(())
    }

    /// Connection parameters peers and the controller should use.
    pub fn advertised(&self) -> ConnectionParam {
        self.advertise.clone().unwrap_or_else(|| {
            let token = self
                .users
                .iter()
                .find(|u| u.admin)
                .map(|u| format!("{}:{}", u.name, u.password))
                .unwrap_or_default();
            ConnectionParam::new(format!("http://127.0.0.1:{}", self.http.port), token)
        })
    }

    pub fn to_options(&self) -> NodeOptions {
        let mut options = NodeOptions::new(self.cluster_id.clone(), self.pchannel_num)
            .with_connection_param(self.advertised())
            .with_users(self.users.clone())
            .with_router(self.replication.clone());
        if let Some(dir) = &self.data_dir {
            options = options.with_data_dir(dir.clone());
        }
        if let Some(replicas) = self.local_load_replicas {
            options = options.with_local_load_replicas(replicas);
        }
        options
    }
}

/// Controller configuration file; the topology it names is the current one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    #[serde(default = "default_users")]
    pub users: Vec<UserEntry>,

    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,

    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,

    #[serde(default)]
    pub clusters: Vec<ClusterDescriptor>,

    #[serde(default)]
    pub cross_cluster_topology: Vec<TopologyEdge>,

    #[serde(default)]
    pub log: LogConfig,
}

fn default_call_timeout_ms() -> u64 {
    10_000
}

fn default_drain_timeout_ms() -> u64 {
    30_000
}

impl ControllerConfig {
    pub fn load(path: &Path) -> CliResult<Self> {
        let config: ControllerConfig = read_json(path, "config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> CliResult<()> {
        if self.call_timeout_ms == 0 {
            return Err(CliError::config_error("call_timeout_ms must be > 0"));
        }
        if self.drain_timeout_ms == 0 {
            return Err(CliError::config_error("drain_timeout_ms must be > 0"));
        }
        if !self.clusters.is_empty() {
            self.topology()
                .validate()
                .map_err(|e| CliError::config_error(format!("Invalid topology: {}", e)))?;
        }
        Ok(())
    }

    pub fn options(&self) -> ControllerOptions {
        ControllerOptions {
            users: self.users.clone(),
            call_timeout: Duration::from_millis(self.call_timeout_ms),
            drain_timeout: Duration::from_millis(self.drain_timeout_ms),
        }
    }

    pub fn topology(&self) -> TopologySnapshot {
        TopologySnapshot {
            clusters: self.clusters.clone(),
            cross_cluster_topology: self.cross_cluster_topology.clone(),
        }
        .normalized()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &tempfile::TempDir, name: &str, body: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(body.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_node_config_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "node.json", r#"{"cluster_id": "by-dev"}"#);
        let config = NodeConfig::load(&path).unwrap();
        assert_eq!(config.pchannel_num, 16);
        assert_eq!(config.http.port, 19530);
        assert_eq!(config.advertised().uri, "http://127.0.0.1:19530");
        assert_eq!(config.advertised().token, "root:Milvus");

        let options = config.to_options();
        assert_eq!(options.physical_pchannels, 16);
        assert!(options.data_dir.is_none());
    }

    #[test]
    fn test_node_config_rejects_infix() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "node.json", r#"{"cluster_id": "a-rootcoord-dml"}"#);
        let err = NodeConfig::load(&path).unwrap_err();
        assert_eq!(err.code_str(), "XCDC_CLI_CONFIG_ERROR");
    }

    #[test]
    fn test_node_config_rejects_zero_pchannels() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "node.json", r#"{"cluster_id": "a", "pchannel_num": 0}"#);
        assert!(NodeConfig::load(&path).is_err());
    }

    #[test]
    fn test_missing_file() {
        let err = NodeConfig::load(Path::new("/nonexistent/xcdc-node.json")).unwrap_err();
        assert!(err.message().contains("Failed to read config"));
    }

    #[test]
    fn test_controller_config_topology() {
        let dir = tempfile::tempdir().unwrap();
        let body = r#"{
            "clusters": [
                {"cluster_id": "b", "connection_param": {"uri": "http://b:19530", "token": "root:Milvus"},
                 "pchannels": ["b-rootcoord-dml_0"]},
                {"cluster_id": "a", "connection_param": {"uri": "http://a:19530", "token": "root:Milvus"},
                 "pchannels": ["a-rootcoord-dml_0"]}
            ],
            "cross_cluster_topology": [{"source_cluster_id": "a", "target_cluster_id": "b"}]
        }"#;
        let path = write_file(&dir, "controller.json", body);
        let config = ControllerConfig::load(&path).unwrap();
        let topology = config.topology();
        assert_eq!(topology.cluster_ids(), vec!["a", "b"]);
        assert!(topology.has_edge("a", "b"));
        assert_eq!(config.options().drain_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_controller_config_rejects_mutual_edges() {
        let dir = tempfile::tempdir().unwrap();
        let body = r#"{
            "clusters": [
                {"cluster_id": "a", "connection_param": {"uri": "http://a"}, "pchannels": ["a-rootcoord-dml_0"]},
                {"cluster_id": "b", "connection_param": {"uri": "http://b"}, "pchannels": ["b-rootcoord-dml_0"]}
            ],
            "cross_cluster_topology": [
                {"source_cluster_id": "a", "target_cluster_id": "b"},
                {"source_cluster_id": "b", "target_cluster_id": "a"}
            ]
        }"#;
        let path = write_file(&dir, "controller.json", body);
        assert!(ControllerConfig::load(&path).is_err());
    }

    #[test]
    fn test_load_snapshot_validates() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            &dir,
            "snapshot.json",
            r#"{"clusters": [{"cluster_id": "a", "connection_param": {"uri": "u"}, "pchannels": ["wrong"]}]}"#,
        );
        assert!(load_snapshot(&path).is_err());
    }
}
