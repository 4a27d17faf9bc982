use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::{error::LicenseError, AppState};

// ── Health ────────────────────────────────────────────────────────────────────

pub async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

// ── Admin: create ─────────────────────────────────────────────────────────────

fn default_days() -> u32 {
    30
}

#[derive(Debug, Deserialize)]
pub struct CreateRequest {
    #[serde(default = "default_days")]
    pub days: u32,
}

pub async fn create_license(
    State(state): State<AppState>,
    Json(body): Json<CreateRequest>,
) -> Response {
    match state.registry.create(body.days) {
        Ok(lic) => {
            info!(key = %lic.key, days = body.days, "license created");
            Json(json!({
                "ok": true,
                "key": lic.key,
                "expires_at": lic.expires_at,
            }))
            .into_response()
        }
        Err(e) => error_response(e),
    }
}

// ── Admin: list ───────────────────────────────────────────────────────────────

pub async fn list_licenses(State(state): State<AppState>) -> Response {
    match state.registry.list() {
        Ok(licenses) => Json(licenses).into_response(),
        Err(e) => error_response(e),
    }
}

// ── Activate ──────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ActivateRequest {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub client_id: String,
}

pub async fn activate(
    State(state): State<AppState>,
    Json(body): Json<ActivateRequest>,
) -> Response {
    match state.registry.activate(&body.key, &body.client_id) {
        Ok(activation) => {
            info!(key = %body.key, client_id = %body.client_id, "license activated");
            Json(json!({
                "ok": true,
                "expires_at": activation.expires_at,
            }))
            .into_response()
        }
        Err(e) => error_response(e),
    }
}

// ── Validate ──────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ValidateRequest {
    #[serde(default)]
    pub key: String,
    pub client_id: Option<String>,
}

pub async fn validate(
    State(state): State<AppState>,
    Json(body): Json<ValidateRequest>,
) -> Response {
    match state.registry.validate(&body.key, body.client_id.as_deref()) {
        Ok(v) => Json(json!({
            "ok": v.ok,
            "active_client": v.active_client,
            "expires_at": v.expires_at,
        }))
        .into_response(),
        Err(e) => error_response(e),
    }
}

// ── Heartbeat ─────────────────────────────────────────────────────────────────

/// Shared request shape for the seat-holder operations.
#[derive(Debug, Deserialize)]
pub struct SeatRequest {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub client_id: String,
}

pub async fn heartbeat(State(state): State<AppState>, Json(body): Json<SeatRequest>) -> Response {
    match state.registry.heartbeat(&body.key, &body.client_id) {
        Ok(()) => Json(json!({"ok": true})).into_response(),
        Err(e) => error_response(e),
    }
}

// ── Deactivate ────────────────────────────────────────────────────────────────

pub async fn deactivate(State(state): State<AppState>, Json(body): Json<SeatRequest>) -> Response {
    match state.registry.deactivate(&body.key, &body.client_id) {
        Ok(()) => {
            info!(key = %body.key, client_id = %body.client_id, "license deactivated");
            Json(json!({"ok": true})).into_response()
        }
        Err(e) => error_response(e),
    }
}

// ── Error mapping ─────────────────────────────────────────────────────────────

/// Map a registry failure to its wire representation. Conflict discloses the
/// current holder; storage detail is logged, never echoed.
fn error_response(err: LicenseError) -> Response {
    match err {
        LicenseError::InvalidInput(msg) => (
            StatusCode::BAD_REQUEST,
            Json(json!({"ok": false, "error": msg})),
        )
            .into_response(),
        LicenseError::NotFound => (
            StatusCode::NOT_FOUND,
            Json(json!({"ok": false, "error": "invalid key"})),
        )
            .into_response(),
        LicenseError::Expired => (
            StatusCode::FORBIDDEN,
            Json(json!({"ok": false, "error": "expired"})),
        )
            .into_response(),
        LicenseError::Conflict { active_client } => (
            StatusCode::CONFLICT,
            Json(json!({
                "ok": false,
                "error": "already active on another client",
                "active_client": active_client,
            })),
        )
            .into_response(),
        LicenseError::Forbidden => (
            StatusCode::FORBIDDEN,
            Json(json!({"ok": false, "error": "not active for this client"})),
        )
            .into_response(),
        LicenseError::Storage(e) => {
            tracing::error!(error = %e, "storage failure");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"ok": false, "error": "internal server error"})),
            )
                .into_response()
        }
    }
}
