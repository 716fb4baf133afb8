//! Admission middleware.
//!
//! Wraps every application route: blocked clients are refused with 403
//! before the handler runs, and allowed requests report their final status
//! back to the gate once the handler has responded.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::debug;
use warrior_shield::{Address, Admission};

use crate::state::AppState;

/// Client address resolved by the admission middleware.
///
/// Inserted into request extensions so handlers see the same address the
/// gate classified.
#[derive(Debug, Clone)]
pub struct ClientAddress(pub Address);

/// Body of the 403 response sent to blocked clients.
#[derive(Debug, Serialize)]
pub struct BlockedResponse {
    /// Fixed error label.
    pub error: &'static str,
    /// Human readable explanation.
    pub message: String,
    /// Seconds until the block lapses.
    pub unblock_in_seconds: u64,
}

impl BlockedResponse {
    /// Build the body for a block with `remaining_seconds` left.
    #[must_use]
    pub fn new(remaining_seconds: u64) -> Self {
        Self {
            error: "IP address blocked",
            message: format!(
                "Your IP address has been temporarily blocked due to abusive behavior. \
                 Unblock in {remaining_seconds} seconds."
            ),
            unblock_in_seconds: remaining_seconds,
        }
    }
}

impl IntoResponse for BlockedResponse {
    fn into_response(self) -> Response {
        let retry_after = HeaderValue::from(self.unblock_in_seconds);
        let mut response = (StatusCode::FORBIDDEN, Json(self)).into_response();
        response.headers_mut().insert(header::RETRY_AFTER, retry_after);
        response
    }
}

/// Check admission before the handler and record the outcome after it.
///
/// The recorded status is whatever the inner service returned, including
/// 404s from the fallback and 429s produced further down the stack.
pub async fn admission_middleware(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    mut request: Request,
    next: Next,
) -> Response {
    let addr = state.client_address(peer, request.headers());
    let gate = state.gate();

    if let Admission::Block {
        remaining_seconds,
        reason,
    } = gate.check_admission(&addr)
    {
        debug!(ip = %addr, reason = %reason, remaining_seconds, "Refusing blocked client");
        return BlockedResponse::new(remaining_seconds).into_response();
    }

    request.extensions_mut().insert(ClientAddress(addr.clone()));
    let response = next.run(request).await;

    gate.record_outcome(&addr, response.status().as_u16());
    response
}
