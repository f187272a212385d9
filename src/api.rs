use crate::daemon::Auctioneer;
use crate::dispatcher::AuctionRunner;
use crate::error::{DispatchError, IntakeError, RegistryError};
use crate::intake;
use crate::types::{Brain, LifecycleState};
use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Auction intake. Served only while this instance holds the lease.
pub fn create_router(runner: Arc<dyn AuctionRunner>) -> Router {
    Router::new()
        .route("/v1/lrps", post(submit_lrps))
        .route("/v1/tasks", post(submit_task))
        .with_state(runner)
}

/// Health and status. Served for the life of the process, whether or not
/// this instance holds the lease; raft routes are merged in when configured.
pub fn create_control_router(auctioneer: Arc<Auctioneer>) -> Router {
    let router = Router::new()
        .route("/health", get(health_check))
        .route("/status", get(get_status))
        .with_state(auctioneer.clone());

    match auctioneer.raft() {
        Some(raft) => router.merge(crate::coordinator::raft::create_raft_router(raft.clone())),
        None => router,
    }
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

#[derive(Serialize)]
struct StatusResponse {
    holder_id: String,
    state: LifecycleState,
    active: bool,
    default_brain: Option<String>,
    brains: Vec<Brain>,
    in_flight: usize,
    intake_addr: Option<SocketAddr>,
    registration_addr: Option<SocketAddr>,
    raft: Option<RaftStatus>,
}

#[derive(Serialize)]
struct RaftStatus {
    node_id: u64,
    is_leader: bool,
    leader_id: Option<u64>,
}

async fn get_status(State(auctioneer): State<Arc<Auctioneer>>) -> impl IntoResponse {
    let state = auctioneer.state().current();
    let registry = auctioneer.registry();

    Json(StatusResponse {
        holder_id: auctioneer.holder_id().to_string(),
        state,
        active: state.is_active(),
        default_brain: registry.default_brain().map(|b| b.name.clone()),
        brains: registry.brains().iter().map(|b| Brain::clone(b)).collect(),
        in_flight: auctioneer.dispatcher().in_flight(),
        intake_addr: auctioneer.intake_addr().get(),
        registration_addr: auctioneer.registration_addr().get(),
        raft: auctioneer.raft().map(|raft| RaftStatus {
            node_id: raft.node_id(),
            is_leader: raft.is_leader(),
            leader_id: raft.leader_id(),
        }),
    })
}

fn error_response(status: StatusCode, message: impl std::fmt::Display) -> Response {
    (status, Json(serde_json::json!({ "error": message.to_string() }))).into_response()
}

fn intake_error(e: IntakeError) -> Response {
    match e {
        IntakeError::BodyUnreadable(_) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
        IntakeError::PayloadTooLarge(_) => error_response(StatusCode::PAYLOAD_TOO_LARGE, e),
        IntakeError::MalformedPayload(_) | IntakeError::Invalid(_) => error_response(StatusCode::BAD_REQUEST, e),
    }
}

fn dispatch_error(e: DispatchError) -> Response {
    match e {
        DispatchError::Registry(RegistryError::NotReady(_)) | DispatchError::ShuttingDown => {
            warn!("Auction not dispatched: {}", e);
            error_response(StatusCode::SERVICE_UNAVAILABLE, e)
        }
        _ => {
            error!("Auction dispatch failed: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e)
        }
    }
}

pub(crate) fn read_body(body: Result<Bytes, BytesRejection>) -> Result<Bytes, IntakeError> {
    body.map_err(|e| match e.status() {
        StatusCode::PAYLOAD_TOO_LARGE => IntakeError::PayloadTooLarge(e.body_text()),
        _ => IntakeError::BodyUnreadable(e.body_text()),
    })
}

async fn submit_lrps(
    State(runner): State<Arc<dyn AuctionRunner>>,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let batch = match read_body(body).and_then(|b| intake::decode_lrp_batch(&b)) {
        Ok(batch) => batch,
        Err(e) => {
            warn!("Rejecting LRP batch: {}", e);
            return intake_error(e);
        }
    };

    let received = batch.received();
    let valid = batch.accepted.len();
    debug!("Received {} LRP starts, {} valid", received, valid);

    match runner.schedule_lrps(batch.accepted).await {
        Ok(receipt) => {
            if let Some(brain) = receipt.brain {
                info!("Accepted {} of {} LRP starts for brain {}", valid, received, brain);
            }
            StatusCode::ACCEPTED.into_response()
        }
        Err(e) => dispatch_error(e),
    }
}

async fn submit_task(
    State(runner): State<Arc<dyn AuctionRunner>>,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let task = match read_body(body).and_then(|b| intake::decode_task(&b)) {
        Ok(task) => task,
        Err(e) => {
            warn!("Rejecting task start: {}", e);
            return intake_error(e);
        }
    };

    let task_guid = task.task_guid.clone();
    match runner.schedule_task(task).await {
        Ok(receipt) => {
            debug!("Task {} queued for {:?}", task_guid, receipt.brain);
            StatusCode::ACCEPTED.into_response()
        }
        Err(e) => dispatch_error(e),
    }
}
