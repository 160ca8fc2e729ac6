//! CLI command implementations
//!
//! `serve` runs one cluster node until interrupted. Every other command is a
//! one-shot client: it performs its call, prints one JSON object and exits.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::{json, Value};
use tracing::info;

use crate::controller::Controller;
use crate::errors::CdcResult;
use crate::http_server::HttpServer;
use crate::node::ClusterNode;
use crate::observability::init_logging;
use crate::topology::ConnectionParam;
use crate::transport::{Connector, HttpConnector};
use crate::wait;

use super::args::{Cli, Command};
use super::config::{load_snapshot, ControllerConfig, NodeConfig};
use super::errors::{CliError, CliResult};
use super::io::{write_error, write_response};

/// Parse arguments and run the selected command.
pub fn run() -> CliResult<()> {
    let cli = Cli::parse_args();
    let result = run_command(cli.command);
    if let Err(e) = &result {
        // Best effort; the caller still reports the error on stderr.
        let _ = write_error(e.code_str(), e.message());
    }
    result
}

pub fn run_command(command: Command) -> CliResult<()> {
    match command {
        Command::Serve { config, pchannels } => serve(&config, pchannels),
        Command::Push {
            config,
            snapshot,
            token,
        } => push(&config, &snapshot, &token),
        Command::Switchover {
            config,
            old,
            new,
            pchannel_num,
            token,
        } => switchover(&config, &old, &new, pchannel_num, &token),
        Command::WaitHealthy {
            uri,
            cluster_id,
            timeout_ms,
        } => wait_healthy(&uri, &cluster_id, timeout_ms),
        Command::Validate { snapshot } => validate(&snapshot),
        Command::Status {
            uri,
            cluster_id,
            token,
        } => status(&uri, &cluster_id, &token),
    }
}

fn runtime() -> CliResult<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new()
        .map_err(|e| CliError::boot_failed(format!("Failed to create tokio runtime: {}", e)))
}

fn to_value<T: Serialize>(value: &T) -> CliResult<Value> {
    Ok(serde_json::to_value(value)?)
}

/// Run a node: open it, start the replication pump, serve HTTP until ctrl-c.
pub fn serve(config_path: &Path, pchannels: Option<usize>) -> CliResult<()> {
    let mut config = NodeConfig::load(config_path)?;
    if let Some(count) = pchannels {
        config.pchannel_num = count;
        config.validate()?;
    }
    init_logging(&config.log);

    let rt = runtime()?;
    rt.block_on(async {
        let connector: Arc<dyn Connector> = Arc::new(HttpConnector::default());
        let node = ClusterNode::open(config.to_options(), connector)
            .map_err(|e| CliError::boot_failed(format!("{}: {}", e.code(), e)))?;
        let pump = node.start();

        let signal_node = node.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                signal_node.shutdown();
            }
        });

        let server = HttpServer::new(config.http.clone(), node.clone());
        let served = server.start(node.shutdown_signal()).await;
        node.shutdown();
        let _ = pump.await;
        served.map_err(|e| CliError::boot_failed(format!("HTTP server failed: {}", e)))?;
        info!(cluster_id = %config.cluster_id, "serve exited");
        CliResult::Ok(())
    })
}

fn controller(config: &ControllerConfig) -> Controller {
    let connector = HttpConnector::new(Duration::from_millis(config.call_timeout_ms));
    Controller::new(Arc::new(connector), config.options())
}

/// Push a snapshot file to every cluster it names.
pub fn push(config_path: &Path, snapshot_path: &Path, token: &str) -> CliResult<()> {
    let config = ControllerConfig::load(config_path)?;
    init_logging(&config.log);
    let snapshot = load_snapshot(snapshot_path)?;

    let rt = runtime()?;
    let report = rt.block_on(controller(&config).push_snapshot(token, snapshot))?;
    write_response(to_value(&report)?)
}

/// Reverse `old -> new` starting from the topology in the controller config.
pub fn switchover(
    config_path: &Path,
    old: &str,
    new: &str,
    pchannel_num: Option<usize>,
    token: &str,
) -> CliResult<()> {
    let config = ControllerConfig::load(config_path)?;
    if config.clusters.is_empty() {
        return Err(CliError::config_error("controller config names no clusters"));
    }
    init_logging(&config.log);

    let controller = controller(&config);
    controller.adopt(token, &config.topology())?;

    let rt = runtime()?;
    let report = rt.block_on(controller.switchover(token, old, new, pchannel_num))?;
    write_response(to_value(&report)?)
}

/// Poll `uri`'s health endpoint.
pub fn wait_healthy(uri: &str, cluster_id: &str, timeout_ms: u64) -> CliResult<()> {
    let timeout = Duration::from_millis(timeout_ms);
    let rt = runtime()?;
    rt.block_on(async {
        let connector = HttpConnector::default();
        let client = connector
            .connect(cluster_id, &ConnectionParam::new(uri, ""))
            .await?;
        wait::wait_healthy(cluster_id, client.as_ref(), timeout).await?;
        CdcResult::Ok(())
    })?;
    write_response(json!({ "cluster_id": cluster_id, "healthy": true }))
}

/// Validate a snapshot file offline.
pub fn validate(snapshot_path: &Path) -> CliResult<()> {
    let snapshot = load_snapshot(snapshot_path)?;
    write_response(json!({
        "valid": true,
        "clusters": snapshot.cluster_ids(),
        "edges": snapshot.cross_cluster_topology.len(),
    }))
}

/// Fetch a node's status.
pub fn status(uri: &str, cluster_id: &str, token: &str) -> CliResult<()> {
    let rt = runtime()?;
    let status = rt.block_on(async {
        let connector = HttpConnector::default();
        let client = connector
            .connect(cluster_id, &ConnectionParam::new(uri, token))
            .await?;
        client.status().await
    })?;
    write_response(to_value(&status)?)
}
