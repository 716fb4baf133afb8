//! Command-line argument parsing with clap.

use std::net::SocketAddr;

use clap::{ArgAction, Parser};
use warrior_shield::config::{
    DEFAULT_BLOCK_DURATION_SECONDS, DEFAULT_MAX_FAILURE_RATE_PCT, DEFAULT_MAX_RATE_LIMIT_RATE_PCT,
    DEFAULT_MAX_RPM, DEFAULT_MIN_REQUESTS, DEFAULT_WINDOW_SECONDS,
};
use warrior_shield::ShieldConfig;

use crate::config::ServerConfig;

/// Warrior API server with IP abuse detection.
#[derive(Parser, Debug, Clone)]
#[command(name = "warrior-api")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Address to listen on.
    #[arg(short, long, env = "WARRIOR_BIND", default_value = "0.0.0.0:9999")]
    pub bind: SocketAddr,

    /// Use the first X-Forwarded-For hop as the client address.
    #[arg(long, env = "WARRIOR_TRUST_FORWARDED_FOR")]
    pub trust_forwarded_for: bool,

    /// Sliding window length in seconds.
    #[arg(long, env = "WARRIOR_WINDOW_SECONDS", default_value_t = DEFAULT_WINDOW_SECONDS)]
    pub window_seconds: u64,

    /// Requests per minute above which a client is blocked.
    #[arg(long, env = "WARRIOR_MAX_RPM", default_value_t = DEFAULT_MAX_RPM)]
    pub max_rpm: u64,

    /// Failure percentage above which a client is blocked.
    #[arg(long, env = "WARRIOR_MAX_FAILURE_RATE", default_value_t = DEFAULT_MAX_FAILURE_RATE_PCT)]
    pub max_failure_rate: f64,

    /// Rate-limited percentage above which a client is blocked.
    #[arg(
        long,
        env = "WARRIOR_MAX_RATE_LIMIT_RATE",
        default_value_t = DEFAULT_MAX_RATE_LIMIT_RATE_PCT
    )]
    pub max_rate_limit_rate: f64,

    /// Block length in seconds.
    #[arg(long, env = "WARRIOR_BLOCK_DURATION", default_value_t = DEFAULT_BLOCK_DURATION_SECONDS)]
    pub block_duration: u64,

    /// Requests needed in the window before any rule applies.
    #[arg(long, env = "WARRIOR_MIN_REQUESTS", default_value_t = DEFAULT_MIN_REQUESTS)]
    pub min_requests: u64,

    /// Never block loopback clients.
    #[arg(
        long,
        env = "WARRIOR_WHITELIST_LOCALHOST",
        default_value_t = true,
        action = ArgAction::Set
    )]
    pub whitelist_localhost: bool,

    /// Extra addresses that are never blocked.
    #[arg(short, long, env = "WARRIOR_WHITELIST", value_delimiter = ',')]
    pub whitelist: Vec<String>,

    /// Emit logs as JSON.
    #[arg(long, env = "WARRIOR_LOG_JSON")]
    pub log_json: bool,
}

impl Cli {
    /// Build the server configuration from the parsed arguments.
    ///
    /// Thresholds are validated later, when the admission gate is created.
    #[must_use]
    pub fn into_config(self) -> ServerConfig {
        let shield = ShieldConfig {
            window_seconds: self.window_seconds,
            max_rpm: self.max_rpm,
            max_failure_rate_pct: self.max_failure_rate,
            max_rate_limit_rate_pct: self.max_rate_limit_rate,
            block_duration_seconds: self.block_duration,
            min_requests: self.min_requests,
            whitelist_localhost: self.whitelist_localhost,
            whitelist: self.whitelist,
        };

        ServerConfig::new(self.bind)
            .with_trust_forwarded_for(self.trust_forwarded_for)
            .with_shield(shield)
    }
}
