//! Route configuration for the API.

use std::sync::Arc;

use axum::middleware;
use axum::routing::{get, Router};
use tower_http::trace::TraceLayer;

use crate::handlers::{health_check, ip_status, not_found};
use crate::middleware::admission_middleware;
use crate::state::AppState;

/// Create the API router with only the built-in routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    create_router_with(state, Router::new())
}

/// Create the API router around application routes.
///
/// `app_routes` and the admin endpoints sit behind the admission middleware,
/// as does the 404 fallback. `/health` stays outside it so health checks are never
/// classified. The router must be served with
/// `into_make_service_with_connect_info::<SocketAddr>()`.
pub fn create_router_with(state: Arc<AppState>, app_routes: Router<Arc<AppState>>) -> Router {
    let guarded = Router::new()
        .route("/admin/ip-status", get(ip_status))
        .merge(app_routes)
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            admission_middleware,
        ));

    Router::new()
        .route("/health", get(health_check))
        .merge(guarded)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
