//! Node HTTP Routes
//!
//! Replication control endpoints used by the controller and by peer
//! clusters, plus the client collection API. Every endpoint except
//! `/healthz` requires a bearer `user:password` token.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::auth::Principal;
use crate::catalog::CollectionInfo;
use crate::committed::CommitOutcome;
use crate::errors::CdcError;
use crate::node::{ClusterNode, NodeStatus};
use crate::router::{ApplyAck, ReplicateMessage};
use crate::topology::TopologySnapshot;
use crate::transport::http::{
    CONFIGURATION_PATH, DRAIN_PATH, FENCE_PATH, HEALTH_PATH, MESSAGES_PATH, RESUME_PATH, STATUS_PATH,
    UNFENCE_PATH,
};
use crate::transport::{DrainRequest, ErrorBody};

// ==================
// Request/Response Types
// ==================

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateCollectionRequest {
    pub name: String,
    #[serde(default = "default_shard_count")]
    pub shard_count: usize,
}

fn default_shard_count() -> usize {
    1
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IdsRequest {
    pub ids: Vec<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateIndexRequest {
    pub field: String,
    pub index_type: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoadRequest {
    #[serde(default = "default_replica_number")]
    pub replica_number: u32,
}

fn default_replica_number() -> u32 {
    1
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AckResponse {
    pub ok: bool,
}

const ACK: AckResponse = AckResponse { ok: true };

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ErrorBody>)>;

fn api_error(error: CdcError) -> (StatusCode, Json<ErrorBody>) {
    let status = StatusCode::from_u16(error.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(ErrorBody { error }))
}

fn authenticate(node: &ClusterNode, headers: &HeaderMap) -> Result<Principal, (StatusCode, Json<ErrorBody>)> {
    let token = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| api_error(CdcError::permission_denied("missing bearer token")))?;
    node.auth().authenticate(token).map_err(api_error)
}

// ==================
// Routes
// ==================

pub fn node_routes(node: Arc<ClusterNode>) -> Router {
    Router::new()
        .route(HEALTH_PATH, get(healthz_handler))
        .route(CONFIGURATION_PATH, post(configuration_handler))
        .route(MESSAGES_PATH, post(messages_handler))
        .route(FENCE_PATH, post(fence_handler))
        .route(UNFENCE_PATH, post(unfence_handler))
        .route(DRAIN_PATH, post(drain_handler))
        .route(RESUME_PATH, post(resume_handler))
        .route(STATUS_PATH, get(status_handler))
        .route("/v1/collections", get(list_collections_handler).post(create_collection_handler))
        .route(
            "/v1/collections/:name",
            get(describe_collection_handler).delete(drop_collection_handler),
        )
        .route("/v1/collections/:name/insert", post(insert_handler))
        .route("/v1/collections/:name/upsert", post(upsert_handler))
        .route("/v1/collections/:name/delete", post(delete_handler))
        .route("/v1/collections/:name/index", post(create_index_handler))
        .route("/v1/collections/:name/load", post(load_handler))
        .route("/v1/collections/:name/release", post(release_handler))
        .route("/v1/collections/:name/ids", get(query_ids_handler))
        .with_state(node)
}

// ==================
// Replication Handlers
// ==================

async fn healthz_handler(State(node): State<Arc<ClusterNode>>) -> impl IntoResponse {
    if node.healthy() {
        (StatusCode::OK, "OK")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "STOPPED")
    }
}

async fn configuration_handler(
    State(node): State<Arc<ClusterNode>>,
    headers: HeaderMap,
    Json(snapshot): Json<TopologySnapshot>,
) -> ApiResult<CommitOutcome> {
    let principal = authenticate(&node, &headers)?;
    node.apply_configuration(&principal, snapshot).map(Json).map_err(api_error)
}

async fn messages_handler(
    State(node): State<Arc<ClusterNode>>,
    headers: HeaderMap,
    Json(message): Json<ReplicateMessage>,
) -> ApiResult<ApplyAck> {
    let principal = authenticate(&node, &headers)?;
    node.apply_replicated(&principal, &message).map(Json).map_err(api_error)
}

async fn fence_handler(State(node): State<Arc<ClusterNode>>, headers: HeaderMap) -> ApiResult<AckResponse> {
    let principal = authenticate(&node, &headers)?;
    node.fence_source(&principal).map(|_| Json(ACK)).map_err(api_error)
}

async fn unfence_handler(State(node): State<Arc<ClusterNode>>, headers: HeaderMap) -> ApiResult<AckResponse> {
    let principal = authenticate(&node, &headers)?;
    node.unfence_source(&principal).map(|_| Json(ACK)).map_err(api_error)
}

async fn drain_handler(
    State(node): State<Arc<ClusterNode>>,
    headers: HeaderMap,
    Json(request): Json<DrainRequest>,
) -> ApiResult<AckResponse> {
    let principal = authenticate(&node, &headers)?;
    node.drain_source(&principal, Duration::from_millis(request.timeout_ms))
        .await
        .map(|_| Json(ACK))
        .map_err(api_error)
}

async fn resume_handler(State(node): State<Arc<ClusterNode>>, headers: HeaderMap) -> ApiResult<AckResponse> {
    let principal = authenticate(&node, &headers)?;
    node.resume_source(&principal).map(|_| Json(ACK)).map_err(api_error)
}

async fn status_handler(State(node): State<Arc<ClusterNode>>, headers: HeaderMap) -> ApiResult<NodeStatus> {
    authenticate(&node, &headers)?;
    Ok(Json(node.status()))
}

// ==================
// Collection Handlers
// ==================

async fn list_collections_handler(State(node): State<Arc<ClusterNode>>, headers: HeaderMap) -> ApiResult<Vec<String>> {
    authenticate(&node, &headers)?;
    Ok(Json(node.list_collections()))
}

async fn create_collection_handler(
    State(node): State<Arc<ClusterNode>>,
    headers: HeaderMap,
    Json(request): Json<CreateCollectionRequest>,
) -> ApiResult<CollectionInfo> {
    authenticate(&node, &headers)?;
    node.create_collection(&request.name, request.shard_count)
        .map(Json)
        .map_err(api_error)
}

async fn describe_collection_handler(
    State(node): State<Arc<ClusterNode>>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> ApiResult<CollectionInfo> {
    authenticate(&node, &headers)?;
    node.describe_collection(&name).map(Json).map_err(api_error)
}

async fn drop_collection_handler(
    State(node): State<Arc<ClusterNode>>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> ApiResult<AckResponse> {
    authenticate(&node, &headers)?;
    node.drop_collection(&name).map(|_| Json(ACK)).map_err(api_error)
}

async fn insert_handler(
    State(node): State<Arc<ClusterNode>>,
    Path(name): Path<String>,
    headers: HeaderMap,
    Json(request): Json<IdsRequest>,
) -> ApiResult<AckResponse> {
    authenticate(&node, &headers)?;
    node.insert(&name, &request.ids).map(|_| Json(ACK)).map_err(api_error)
}

async fn upsert_handler(
    State(node): State<Arc<ClusterNode>>,
    Path(name): Path<String>,
    headers: HeaderMap,
    Json(request): Json<IdsRequest>,
) -> ApiResult<AckResponse> {
    authenticate(&node, &headers)?;
    node.upsert(&name, &request.ids).map(|_| Json(ACK)).map_err(api_error)
}

async fn delete_handler(
    State(node): State<Arc<ClusterNode>>,
    Path(name): Path<String>,
    headers: HeaderMap,
    Json(request): Json<IdsRequest>,
) -> ApiResult<AckResponse> {
    authenticate(&node, &headers)?;
    node.delete(&name, &request.ids).map(|_| Json(ACK)).map_err(api_error)
}

async fn create_index_handler(
    State(node): State<Arc<ClusterNode>>,
    Path(name): Path<String>,
    headers: HeaderMap,
    Json(request): Json<CreateIndexRequest>,
) -> ApiResult<AckResponse> {
    authenticate(&node, &headers)?;
    node.create_index(&name, &request.field, &request.index_type)
        .map(|_| Json(ACK))
        .map_err(api_error)
}

async fn load_handler(
    State(node): State<Arc<ClusterNode>>,
    Path(name): Path<String>,
    headers: HeaderMap,
    Json(request): Json<LoadRequest>,
) -> ApiResult<AckResponse> {
    authenticate(&node, &headers)?;
    node.load_collection(&name, request.replica_number)
        .map(|_| Json(ACK))
        .map_err(api_error)
}

async fn release_handler(
    State(node): State<Arc<ClusterNode>>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> ApiResult<AckResponse> {
    authenticate(&node, &headers)?;
    node.release_collection(&name).map(|_| Json(ACK)).map_err(api_error)
}

async fn query_ids_handler(
    State(node): State<Arc<ClusterNode>>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Vec<i64>> {
    authenticate(&node, &headers)?;
    node.query_ids(&name).map(Json).map_err(api_error)
}
