//! CLI module for xcdc
//!
//! Provides command-line interface for:
//! - serve: Run a cluster node
//! - push: Distribute a replicate configuration
//! - switchover: Reverse a replication edge
//! - wait-healthy: Poll a node until ready
//! - validate: Check a snapshot file offline
//! - status: Print a node's replication status

mod args;
mod commands;
mod config;
mod errors;
mod io;

pub use args::{Cli, Command};
pub use commands::{run, run_command};
pub use config::{load_snapshot, ControllerConfig, NodeConfig};
pub use errors::{CliError, CliErrorCode, CliResult};
pub use io::{write_error, write_response};
