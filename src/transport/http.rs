//! HTTP transport
//!
//! JSON over HTTP with a bearer `user:password` token. When the connection
//! parameters carry PEM paths the client presents a certificate and trusts
//! the given CA.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Certificate, Client, Identity, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::committed::CommitOutcome;
use crate::errors::{CdcError, CdcResult};
use crate::node::NodeStatus;
use crate::router::{ApplyAck, ReplicateMessage};
use crate::topology::{ConnectionParam, TopologySnapshot};

use super::{ClusterClient, Connector};

pub const CONFIGURATION_PATH: &str = "/v1/replicate/configuration";
pub const MESSAGES_PATH: &str = "/v1/replicate/messages";
pub const FENCE_PATH: &str = "/v1/replicate/fence";
pub const UNFENCE_PATH: &str = "/v1/replicate/unfence";
pub const DRAIN_PATH: &str = "/v1/replicate/drain";
pub const RESUME_PATH: &str = "/v1/replicate/resume";
pub const STATUS_PATH: &str = "/v1/replicate/status";
pub const HEALTH_PATH: &str = "/healthz";

/// Body of every non-2xx response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: CdcError,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrainRequest {
    pub timeout_ms: u64,
}

/// Opens [`HttpClusterClient`]s
#[derive(Debug, Clone)]
pub struct HttpConnector {
    request_timeout: Duration,
}

impl HttpConnector {
    pub fn new(request_timeout: Duration) -> Self {
        Self { request_timeout }
    }
}

impl Default for HttpConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

fn read_pem(cluster_id: &str, path: &str) -> CdcResult<Vec<u8>> {
    std::fs::read(path)
        .map_err(|e| CdcError::Config(format!("cluster '{}': cannot read '{}': {}", cluster_id, path, e)))
}

impl HttpConnector {
    fn build_client(&self, cluster_id: &str, param: &ConnectionParam) -> CdcResult<Client> {
        let mut builder = Client::builder().use_rustls_tls().timeout(self.request_timeout);

        if let Some(ca) = &param.ca_pem_path {
            let cert = Certificate::from_pem(&read_pem(cluster_id, ca)?)
                .map_err(|e| CdcError::Config(format!("cluster '{}': bad CA '{}': {}", cluster_id, ca, e)))?;
            builder = builder.add_root_certificate(cert);
        }
        if let (Some(cert), Some(key)) = (&param.client_pem_path, &param.client_key_path) {
            let mut pem = read_pem(cluster_id, cert)?;
            pem.push(b'\n');
            pem.extend(read_pem(cluster_id, key)?);
            let identity = Identity::from_pem(&pem)
                .map_err(|e| CdcError::Config(format!("cluster '{}': bad client identity: {}", cluster_id, e)))?;
            builder = builder.identity(identity);
        }

        builder
            .build()
            .map_err(|e| CdcError::transport(cluster_id, format!("client setup failed: {}", e)))
    }
}

#[async_trait]
impl Connector for HttpConnector {
    async fn connect(&self, cluster_id: &str, param: &ConnectionParam) -> CdcResult<Arc<dyn ClusterClient>> {
        let client = self.build_client(cluster_id, param)?;
        Ok(Arc::new(HttpClusterClient {
            cluster_id: cluster_id.to_string(),
            base_url: param.uri.trim_end_matches('/').to_string(),
            token: param.token.clone(),
            client,
        }))
    }
}

/// Remote cluster reached over HTTP
pub struct HttpClusterClient {
    cluster_id: String,
    base_url: String,
    token: String,
    client: Client,
}

impl HttpClusterClient {
    fn build_request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        self.client.request(method, url).bearer_auth(&self.token)
    }

    fn transport_error(&self, e: reqwest::Error) -> CdcError {
        CdcError::transport(&self.cluster_id, e.to_string())
    }

    async fn send<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> CdcResult<T> {
        let response = request.send().await.map_err(|e| self.transport_error(e))?;
        let status = response.status();
        if status.is_success() {
            return response.json().await.map_err(|e| self.transport_error(e));
        }

        let text = response.text().await.unwrap_or_default();
        match serde_json::from_str::<ErrorBody>(&text) {
            Ok(body) => Err(body.error),
            Err(_) => Err(CdcError::transport(
                &self.cluster_id,
                format!("unexpected response ({}): {}", status, text),
            )),
        }
    }

    async fn post_empty(&self, path: &str) -> CdcResult<()> {
        let _: serde_json::Value = self.send(self.build_request(Method::POST, path)).await?;
        Ok(())
    }
}

#[async_trait]
impl ClusterClient for HttpClusterClient {
    fn cluster_id(&self) -> &str {
        &self.cluster_id
    }

    async fn update_replicate_configuration(&self, snapshot: &TopologySnapshot) -> CdcResult<CommitOutcome> {
        self.send(self.build_request(Method::POST, CONFIGURATION_PATH).json(snapshot))
            .await
    }

    async fn replicate(&self, message: &ReplicateMessage) -> CdcResult<ApplyAck> {
        self.send(self.build_request(Method::POST, MESSAGES_PATH).json(message))
            .await
    }

    async fn healthz(&self) -> CdcResult<bool> {
        let response = self
            .build_request(Method::GET, HEALTH_PATH)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        if response.status() != StatusCode::OK {
            return Ok(false);
        }
        let body = response.text().await.map_err(|e| self.transport_error(e))?;
        Ok(body.trim() == "OK")
    }

    async fn fence_source(&self) -> CdcResult<()> {
        self.post_empty(FENCE_PATH).await
    }

    async fn unfence_source(&self) -> CdcResult<()> {
        self.post_empty(UNFENCE_PATH).await
    }

    async fn drain_source(&self, timeout: Duration) -> CdcResult<()> {
        let request = DrainRequest {
            timeout_ms: timeout.as_millis() as u64,
        };
        let _: serde_json::Value = self
            .send(self.build_request(Method::POST, DRAIN_PATH).json(&request))
            .await?;
        Ok(())
    }

    async fn resume_source(&self) -> CdcResult<()> {
        self.post_empty(RESUME_PATH).await
    }

    async fn status(&self) -> CdcResult<NodeStatus> {
        self.send(self.build_request(Method::GET, STATUS_PATH)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_without_tls_material() {
        let connector = HttpConnector::default();
        let client = connector
            .connect("a", &ConnectionParam::new("http://127.0.0.1:1/", "root:Milvus"))
            .await
            .unwrap();
        assert_eq!(client.cluster_id(), "a");
    }

    #[tokio::test]
    async fn test_missing_pem_is_config_error() {
        let connector = HttpConnector::default();
        let param = ConnectionParam::new("https://a", "root:Milvus").with_mtls(
            "/nonexistent/ca.pem",
            "/nonexistent/client.pem",
            "/nonexistent/client.key",
        );
        let err = connector.connect("a", &param).await.err().unwrap();
        assert!(matches!(err, CdcError::Config(_)));
    }

    #[tokio::test]
    async fn test_refused_connection_is_transport_error() {
        let connector = HttpConnector::new(Duration::from_millis(500));
        let client = connector
            .connect("a", &ConnectionParam::new("http://127.0.0.1:1", "root:Milvus"))
            .await
            .unwrap();
        assert!(matches!(client.healthz().await, Err(CdcError::Transport { .. })));
    }

    #[test]
    fn test_error_body_shape() {
        let body = ErrorBody {
            error: CdcError::permission_denied("nope"),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert!(json["error"]["PermissionDenied"].is_string());
    }
}
