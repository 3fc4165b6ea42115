use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::Utc;
use leafbridge_core::Message;
use leafbridge_identity::{DeviceRepository, DeviceSnapshot};
use leafbridge_router::{ConfirmationCallback, CoordinatorError, RouteAck, RouteError};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::state::AppState;
use crate::wire::WireMessage;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/devices", get(list_devices))
        .route("/inputs/:input", post(post_input))
        .route("/methods/:method", post(post_method))
        .with_state(state)
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> Result<Json<Value>, StatusCode> {
    let status = if state.coordinator.is_shutting_down() {
        "draining"
    } else {
        "healthy"
    };
    Ok(Json(json!({
        "status": status,
        "service": "leafbridge-node",
        "module_id": state.config.identity.edge_module_id,
        "devices": state.repository().len(),
        "timestamp": Utc::now().to_rfc3339()
    })))
}

pub async fn list_devices(State(state): State<Arc<AppState>>) -> Json<Vec<DeviceSnapshot>> {
    Json(state.repository().snapshot())
}

/// Inbound module input. Only the configured input is accepted.
pub async fn post_input(
    State(state): State<Arc<AppState>>,
    Path(input): Path<String>,
    Json(wire): Json<WireMessage>,
) -> Result<Json<RouteAck>, StatusCode> {
    if !input.eq_ignore_ascii_case(&state.config.routing.input_name) {
        warn!(input = %input, "Message on unknown input");
        return Err(StatusCode::NOT_FOUND);
    }

    let message = Message::try_from(wire).map_err(|e| {
        warn!(error = %e, "Message body is not valid base64");
        StatusCode::BAD_REQUEST
    })?;

    match state.router.route(message).await {
        Ok(ack) => Ok(Json(ack)),
        Err(err) => {
            let status = route_error_status(&err);
            if status.is_server_error() {
                error!(error = %err, "Failed to route message");
            } else {
                warn!(error = %err, "Message refused");
            }
            Err(status)
        }
    }
}

fn route_error_status(err: &RouteError) -> StatusCode {
    match err {
        RouteError::EmptyDeviceId | RouteError::MissingSourceRoute { .. } => {
            StatusCode::BAD_REQUEST
        }
        RouteError::BufferFull { .. } => StatusCode::TOO_MANY_REQUESTS,
        RouteError::PassThrough(_) | RouteError::Delivery { .. } => StatusCode::BAD_GATEWAY,
        RouteError::Lifecycle(_) => StatusCode::CONFLICT,
    }
}

/// Direct method invocation. The confirmation callback is the only method
/// the gateway serves.
pub async fn post_method(
    State(state): State<Arc<AppState>>,
    Path(method): Path<String>,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), StatusCode> {
    if !method.eq_ignore_ascii_case(&state.config.routing.callback_method) {
        warn!(method = %method, "Unknown method invoked");
        return Err(StatusCode::NOT_FOUND);
    }

    let callback = ConfirmationCallback::from_slice(&body).map_err(|e| {
        warn!(error = %e, "Malformed confirmation callback");
        StatusCode::BAD_REQUEST
    })?;
    info!(
        device_id = %callback.device_id,
        result_code = callback.result_code,
        "Confirmation callback received"
    );

    match state.coordinator.on_confirmation(callback).await {
        Ok(outcome) => {
            let code = outcome.status_code();
            let status = StatusCode::from_u16(code).unwrap_or(StatusCode::OK);
            Ok((status, Json(json!({ "status": code, "payload": outcome }))))
        }
        Err(CoordinatorError::Cancelled) => Err(StatusCode::SERVICE_UNAVAILABLE),
        Err(err) => {
            error!(error = %err, "Confirmation handling failed");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
