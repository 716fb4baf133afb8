//! HTTP request handlers.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::Uri;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use warrior_shield::StatusReport;

use crate::error::ApiError;
use crate::middleware::ClientAddress;
use crate::state::AppState;

/// Query parameters for the status endpoint.
#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    /// Address to report on; defaults to the caller.
    pub ip: Option<String>,
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Status message.
    pub status: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
}

/// Handle GET /health - health check endpoint.
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_secs: state.uptime_secs(),
    })
}

/// Handle GET /admin/ip-status - abuse status of one address.
pub async fn ip_status(
    State(state): State<Arc<AppState>>,
    Extension(ClientAddress(caller)): Extension<ClientAddress>,
    Query(query): Query<StatusQuery>,
) -> Json<StatusReport> {
    // Same resolution as the gate, so clients tracked under raw text can be inspected
    let addr = query
        .ip
        .as_deref()
        .map_or(caller, |raw| state.gate().address(raw));

    Json(state.gate().status(&addr))
}

/// Fallback for unknown routes.
pub async fn not_found(uri: Uri) -> ApiError {
    ApiError::NotFound(uri.path().to_string())
}
