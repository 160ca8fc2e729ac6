//! CLI argument definitions using clap
//!
//! Commands:
//! - xcdc serve --config <path> [--pchannels <n>]
//! - xcdc push --config <path> --snapshot <path>
//! - xcdc switchover --config <path> --old <id> --new <id> [--pchannel-num <n>]
//! - xcdc wait-healthy --uri <uri> [--timeout-ms <ms>]
//! - xcdc validate --snapshot <path>
//! - xcdc status --uri <uri>

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// xcdc - cross-cluster CDC replication controller
#[derive(Parser, Debug)]
#[command(name = "xcdc")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a cluster node
    Serve {
        /// Path to node configuration file
        #[arg(long, default_value = "./xcdc-node.json")]
        config: PathBuf,

        /// Override the number of physical pchannels
        #[arg(long)]
        pchannels: Option<usize>,
    },

    /// Push a replicate configuration to every cluster it names
    Push {
        /// Path to controller configuration file
        #[arg(long, default_value = "./xcdc-controller.json")]
        config: PathBuf,

        /// Snapshot file with `clusters` and `cross_cluster_topology`
        #[arg(long)]
        snapshot: PathBuf,

        /// Operator `user:password`
        #[arg(long, default_value = "root:Milvus")]
        token: String,
    },

    /// Reverse the edge OLD -> NEW
    Switchover {
        /// Path to controller configuration file; its topology is the current one
        #[arg(long, default_value = "./xcdc-controller.json")]
        config: PathBuf,

        #[arg(long)]
        old: String,

        #[arg(long)]
        new: String,

        /// Grow every cluster to this many pchannels
        #[arg(long)]
        pchannel_num: Option<usize>,

        /// Operator `user:password`
        #[arg(long, default_value = "root:Milvus")]
        token: String,
    },

    /// Poll a node's health endpoint until it answers OK
    WaitHealthy {
        #[arg(long)]
        uri: String,

        #[arg(long, default_value = "cluster")]
        cluster_id: String,

        #[arg(long, default_value_t = 30_000)]
        timeout_ms: u64,
    },

    /// Validate a snapshot file without contacting anyone
    Validate {
        #[arg(long)]
        snapshot: PathBuf,
    },

    /// Print a node's replication status
    Status {
        #[arg(long)]
        uri: String,

        #[arg(long, default_value = "cluster")]
        cluster_id: String,

        #[arg(long, default_value = "root:Milvus")]
        token: String,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_switchover() {
        let cli = Cli::try_parse_from([
            "xcdc",
            "switchover",
            "--old",
            "a",
            "--new",
            "b",
            "--pchannel-num",
            "17",
        ])
        .unwrap();
        match cli.command {
            Command::Switchover {
                old,
                new,
                pchannel_num,
                token,
                ..
            } => {
                assert_eq!((old.as_str(), new.as_str()), ("a", "b"));
                assert_eq!(pchannel_num, Some(17));
                assert_eq!(token, "root:Milvus");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_serve_pchannel_override() {
        let cli = Cli::try_parse_from(["xcdc", "serve", "--pchannels", "17"]).unwrap();
        assert!(matches!(cli.command, Command::Serve { pchannels: Some(17), .. }));
    }
}
