//! # HTTP Server Module
//!
//! HTTP surface of a cluster node.
//!
//! # Endpoints
//!
//! - `/healthz` - Readiness probe, answers `OK`
//! - `/v1/replicate/*` - Configuration push, replicated messages, switchover controls, status
//! - `/v1/collections/*` - Client collection API

pub mod config;
pub mod routes;
pub mod server;

pub use config::HttpServerConfig;
pub use routes::node_routes;
pub use server::HttpServer;
