//! API server configuration.

use std::net::SocketAddr;

use warrior_shield::ShieldConfig;

/// Default listen port.
pub const DEFAULT_PORT: u16 = 9999;

/// Configuration for the API server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the HTTP server to.
    pub bind_addr: SocketAddr,
    /// Take the client address from the first `X-Forwarded-For` hop.
    ///
    /// Only enable behind a reverse proxy that overwrites the header.
    pub trust_forwarded_for: bool,
    /// Abuse detection thresholds.
    pub shield: ShieldConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            trust_forwarded_for: false,
            shield: ShieldConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Create a new configuration with the specified bind address.
    #[must_use]
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ..Self::default()
        }
    }

    /// Trust (or ignore) `X-Forwarded-For`.
    #[must_use]
    pub const fn with_trust_forwarded_for(mut self, trust: bool) -> Self {
        self.trust_forwarded_for = trust;
        self
    }

    /// Set the abuse detection thresholds.
    #[must_use]
    pub fn with_shield(mut self, shield: ShieldConfig) -> Self {
        self.shield = shield;
        self
    }
}
