//! # HTTP Server
//!
//! Serves one cluster node's routes.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::node::ClusterNode;
use crate::observability::Event;

use super::config::HttpServerConfig;
use super::routes::node_routes;

pub struct HttpServer {
    config: HttpServerConfig,
    router: Router,
}

impl HttpServer {
    pub fn new(config: HttpServerConfig, node: Arc<ClusterNode>) -> Self {
        let router = Self::build_router(node);
        Self { config, router }
    }

    fn build_router(node: Arc<ClusterNode>) -> Router {
        node_routes(node).layer(TraceLayer::new_for_http())
    }

    pub fn socket_addr(&self) -> String {
        self.config.socket_addr()
    }

    /// Get the router (for testing)
    pub fn router(self) -> Router {
        self.router
    }

    /// Serve until `shutdown` flips to true.
    pub async fn start(self, mut shutdown: watch::Receiver<bool>) -> Result<(), std::io::Error> {
        let addr: SocketAddr = self
            .config
            .socket_addr()
            .parse()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, format!("{}", e)))?;

        let listener = TcpListener::bind(addr).await?;
        info!(event = %Event::HttpServerStarted, %addr, "listening");
        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                while shutdown.changed().await.is_ok() {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeOptions;
    use crate::transport::LocalNetwork;

    #[test]
    fn test_server_with_custom_port() {
        let node = ClusterNode::open(NodeOptions::new("a", 2), Arc::new(LocalNetwork::new())).unwrap();
        let server = HttpServer::new(HttpServerConfig::with_port(8080), node);
        assert_eq!(server.socket_addr(), "0.0.0.0:8080");
    }
}
