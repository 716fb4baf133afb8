//! API server implementation.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tracing::info;

use crate::config::ServerConfig;
use crate::error::{ApiError, ApiResult};
use crate::routes::create_router_with;
use crate::state::AppState;

/// HTTP server with abuse detection in front of every application route.
///
/// Owns the admission gate's background sweeper for as long as it serves.
#[derive(Debug, Clone)]
pub struct ApiServer {
    state: Arc<AppState>,
    app_routes: Router<Arc<AppState>>,
}

impl ApiServer {
    /// Create a server with only the built-in routes.
    ///
    /// # Errors
    ///
    /// Returns an error if the abuse detection thresholds are invalid.
    pub fn new(config: ServerConfig) -> ApiResult<Self> {
        Ok(Self {
            state: Arc::new(AppState::new(config)?),
            app_routes: Router::new(),
        })
    }

    /// Add application routes behind the admission middleware.
    #[must_use]
    pub fn with_routes(mut self, routes: Router<Arc<AppState>>) -> Self {
        self.app_routes = self.app_routes.merge(routes);
        self
    }

    /// Get the server state for external access.
    #[must_use]
    pub fn state(&self) -> Arc<AppState> {
        self.state.clone()
    }

    /// Create the router without starting the server.
    ///
    /// Useful for testing or embedding in another server.
    pub fn router(&self) -> Router {
        create_router_with(self.state.clone(), self.app_routes.clone())
    }

    /// Start the server on the configured address.
    ///
    /// This method runs until the server encounters a fatal error.
    ///
    /// # Errors
    ///
    /// Returns an error if binding to the address fails.
    pub async fn serve(&self) -> ApiResult<()> {
        self.serve_with_shutdown(std::future::pending()).await
    }

    /// Start the server with graceful shutdown support.
    ///
    /// The server will shut down when the provided future completes.
    ///
    /// # Errors
    ///
    /// Returns an error if binding to the address fails.
    pub async fn serve_with_shutdown<F>(&self, shutdown: F) -> ApiResult<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let addr = self.state.config().bind_addr;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ApiError::BindFailed(addr, e))?;
        let local_addr = listener.local_addr().unwrap_or(addr);

        info!(addr = %local_addr, "API server listening");

        let sweeper = self.state.gate().spawn_sweeper();
        let result = axum::serve(
            listener,
            self.router()
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()));
        sweeper.abort();

        info!("API server shut down");
        result
    }
}
