//! xcdc - cross-cluster CDC replication control plane
//!
//! Distributes replicate configurations to clusters, allocates vchannels
//! against each cluster's committed pchannel pool, routes writes from source
//! to target clusters, and coordinates source/target switchover.

pub mod allocator;
pub mod auth;
pub mod catalog;
pub mod cli;
pub mod committed;
pub mod controller;
pub mod distributor;
pub mod errors;
pub mod http_server;
pub mod node;
pub mod observability;
pub mod registry;
pub mod router;
pub mod switchover;
pub mod topology;
pub mod transport;
pub mod wait;
