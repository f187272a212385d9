//! Brain registration listener.

use crate::api::read_body;
use crate::brain::BrainRegistry;
use crate::error::{IntakeError, RegistryError};
use crate::types::Brain;
use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use std::sync::Arc;
use tracing::{error, warn};

pub fn create_registration_router(registry: Arc<BrainRegistry>) -> Router {
    Router::new()
        .route("/v1/brains", post(register_brain).get(list_brains))
        .with_state(registry)
}

async fn register_brain(
    State(registry): State<Arc<BrainRegistry>>,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let body = match read_body(body) {
        Ok(body) => body,
        Err(e) => {
            error!("Failed to read brain registration: {}", e);
            let status = match e {
                IntakeError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            return (status, Json(serde_json::json!({ "error": e.to_string() }))).into_response();
        }
    };

    match registry.register_payload(&body) {
        Ok(brain) => (StatusCode::CREATED, Json(Brain::clone(&brain))).into_response(),
        Err(e @ RegistryError::MalformedRegistration(_)) => {
            warn!("Rejecting brain registration: {}", e);
            (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "error": e.to_string() })),
            )
                .into_response()
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

async fn list_brains(State(registry): State<Arc<BrainRegistry>>) -> impl IntoResponse {
    let brains: Vec<Brain> = registry.brains().iter().map(|b| Brain::clone(b)).collect();
    Json(brains)
}
