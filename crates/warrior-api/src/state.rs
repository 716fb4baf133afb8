//! Shared state for the API server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::http::HeaderMap;
use warrior_shield::{Address, AdmissionGate};

use crate::config::ServerConfig;
use crate::error::ApiResult;

/// Header a reverse proxy uses to pass the original client address.
pub const FORWARDED_FOR: &str = "x-forwarded-for";

/// Shared state for the API server.
#[derive(Debug)]
pub struct AppState {
    /// Server configuration.
    config: Arc<ServerConfig>,
    /// Abuse detection gate shared by every request.
    gate: Arc<AdmissionGate>,
    /// Server start time.
    start_time: Instant,
}

impl AppState {
    /// Build the state and its admission gate.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Config`](crate::error::ApiError::Config) if the
    /// abuse detection thresholds are invalid.
    pub fn new(config: ServerConfig) -> ApiResult<Self> {
        let gate = AdmissionGate::new(config.shield.clone())?;
        Ok(Self::with_gate(config, Arc::new(gate)))
    }

    /// Build the state around an existing gate.
    #[must_use]
    pub fn with_gate(config: ServerConfig, gate: Arc<AdmissionGate>) -> Self {
        Self {
            config: Arc::new(config),
            gate,
            start_time: Instant::now(),
        }
    }

    /// Get the configuration.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Get the admission gate.
    #[must_use]
    pub fn gate(&self) -> &Arc<AdmissionGate> {
        &self.gate
    }

    /// Get server uptime in seconds.
    #[must_use]
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Resolve the client address for a request.
    ///
    /// Uses the first `X-Forwarded-For` hop when forwarding is trusted and the
    /// header is present, otherwise the socket peer.
    #[must_use]
    pub fn client_address(&self, peer: SocketAddr, headers: &HeaderMap) -> Address {
        if self.config.trust_forwarded_for {
            let first_hop = headers
                .get(FORWARDED_FOR)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
                .map(str::trim)
                .filter(|hop| !hop.is_empty());

            if let Some(hop) = first_hop {
                return self.gate.address(hop);
            }
        }
        Address::from_ip(peer.ip())
    }
}
