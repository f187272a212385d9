use crate::coordinator::lease_table::LockCommand;
use crate::coordinator::raft::storage::TypeConfig;
use crate::coordinator::raft::RaftCoordinator;
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use openraft::raft::{
    AppendEntriesRequest, InstallSnapshotRequest, InstallSnapshotResponse, VoteRequest,
};
use std::sync::Arc;

pub fn create_raft_router(coordinator: Arc<RaftCoordinator>) -> Router {
    Router::new()
        .route("/raft/vote", post(handle_vote))
        .route("/raft/append_entries", post(handle_append_entries))
        .route("/raft/install_snapshot", post(handle_install_snapshot))
        .route("/raft/write", post(handle_write))
        .with_state(coordinator)
}

fn raft_error(e: impl std::fmt::Display) -> axum::response::Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({ "error": e.to_string() })),
    )
        .into_response()
}

async fn handle_vote(
    State(coordinator): State<Arc<RaftCoordinator>>,
    Json(req): Json<VoteRequest<u64>>,
) -> impl IntoResponse {
    match coordinator.raft().vote(req).await {
        Ok(resp) => (StatusCode::OK, Json(resp)).into_response(),
        Err(e) => raft_error(e),
    }
}

async fn handle_append_entries(
    State(coordinator): State<Arc<RaftCoordinator>>,
    Json(req): Json<AppendEntriesRequest<TypeConfig>>,
) -> impl IntoResponse {
    match coordinator.raft().append_entries(req).await {
        Ok(resp) => (StatusCode::OK, Json(resp)).into_response(),
        Err(e) => raft_error(e),
    }
}

async fn handle_install_snapshot(
    State(coordinator): State<Arc<RaftCoordinator>>,
    Json(req): Json<InstallSnapshotRequest<TypeConfig>>,
) -> impl IntoResponse {
    let resp: Result<InstallSnapshotResponse<u64>, _> = coordinator.raft().install_snapshot(req).await;
    match resp {
        Ok(resp) => (StatusCode::OK, Json(resp)).into_response(),
        Err(e) => raft_error(e),
    }
}

/// Applies a lease command forwarded by a follower. Only the leader accepts.
async fn handle_write(
    State(coordinator): State<Arc<RaftCoordinator>>,
    Json(command): Json<LockCommand>,
) -> impl IntoResponse {
    match coordinator.raft().client_write(command).await {
        Ok(resp) => (StatusCode::OK, Json(resp.data)).into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}
