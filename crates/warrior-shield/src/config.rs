//! Abuse detection configuration.
//!
//! All thresholds live in one typed structure. It is validated exactly once,
//! when the [`AdmissionGate`](crate::AdmissionGate) is built, so a bad value
//! stops the process at startup instead of surfacing mid-traffic.

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

use crate::error::{ShieldError, ShieldResult};

/// Default trailing window over which metrics are computed.
pub const DEFAULT_WINDOW_SECONDS: u64 = 60;
/// Default request-per-minute ceiling.
pub const DEFAULT_MAX_RPM: u64 = 60_000;
/// Default failure percentage ceiling.
pub const DEFAULT_MAX_FAILURE_RATE_PCT: f64 = 50.0;
/// Default rate-limited percentage ceiling.
pub const DEFAULT_MAX_RATE_LIMIT_RATE_PCT: f64 = 90.0;
/// Default minimum evidence before any verdict can block.
pub const DEFAULT_MIN_REQUESTS: u64 = 20;
/// Default block length (5 minutes).
pub const DEFAULT_BLOCK_DURATION_SECONDS: u64 = 300;

/// Thresholds and settings for abuse detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShieldConfig {
    /// Trailing window, in seconds, over which metrics are computed.
    /// Also the sweep period and the inactivity horizon for records.
    pub window_seconds: u64,
    /// Maximum requests per minute, extrapolated from the window.
    pub max_rpm: u64,
    /// Maximum failure percentage (4xx/5xx other than 429).
    pub max_failure_rate_pct: f64,
    /// Maximum percentage of requests answered with 429.
    pub max_rate_limit_rate_pct: f64,
    /// How long an address stays blocked after a positive verdict.
    pub block_duration_seconds: u64,
    /// Requests required in the window before any rule can block.
    pub min_requests: u64,
    /// Seed the whitelist with the loopback aliases.
    pub whitelist_localhost: bool,
    /// Extra addresses or hostnames that are never blocked.
    pub whitelist: Vec<String>,
}

impl Default for ShieldConfig {
    fn default() -> Self {
        Self {
            window_seconds: DEFAULT_WINDOW_SECONDS,
            max_rpm: DEFAULT_MAX_RPM,
            max_failure_rate_pct: DEFAULT_MAX_FAILURE_RATE_PCT,
            max_rate_limit_rate_pct: DEFAULT_MAX_RATE_LIMIT_RATE_PCT,
            block_duration_seconds: DEFAULT_BLOCK_DURATION_SECONDS,
            min_requests: DEFAULT_MIN_REQUESTS,
            whitelist_localhost: true,
            whitelist: Vec::new(),
        }
    }
}

impl ShieldConfig {
    /// Create a new builder starting from the defaults.
    #[must_use]
    pub fn builder() -> ShieldConfigBuilder {
        ShieldConfigBuilder::default()
    }

    /// Validate every threshold.
    ///
    /// # Errors
    ///
    /// Returns [`ShieldError::Config`] naming the first invalid field.
    pub fn validate(&self) -> ShieldResult<()> {
        if self.window_seconds == 0 {
            return Err(ShieldError::config("window_seconds", "must be positive"));
        }
        if seconds_to_delta(self.window_seconds).is_none() {
            return Err(ShieldError::config("window_seconds", "out of range"));
        }
        if self.block_duration_seconds == 0 {
            return Err(ShieldError::config(
                "block_duration_seconds",
                "must be positive",
            ));
        }
        if seconds_to_delta(self.block_duration_seconds).is_none() {
            return Err(ShieldError::config("block_duration_seconds", "out of range"));
        }
        if self.max_rpm == 0 {
            return Err(ShieldError::config("max_rpm", "must be positive"));
        }
        validate_pct("max_failure_rate_pct", self.max_failure_rate_pct)?;
        validate_pct("max_rate_limit_rate_pct", self.max_rate_limit_rate_pct)?;
        if self.whitelist.iter().any(|entry| entry.trim().is_empty()) {
            return Err(ShieldError::config("whitelist", "entries must not be empty"));
        }
        Ok(())
    }

    /// The metrics window as a time delta.
    ///
    /// Saturates on values `validate` would reject.
    #[must_use]
    pub fn window(&self) -> TimeDelta {
        seconds_to_delta(self.window_seconds).unwrap_or(TimeDelta::MAX)
    }

    /// The block duration as a time delta.
    ///
    /// Saturates on values `validate` would reject.
    #[must_use]
    pub fn block_duration(&self) -> TimeDelta {
        seconds_to_delta(self.block_duration_seconds).unwrap_or(TimeDelta::MAX)
    }

    /// The window as a std duration, for the sweep interval.
    #[must_use]
    pub const fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.window_seconds)
    }
}

fn validate_pct(field: &'static str, value: f64) -> ShieldResult<()> {
    if !value.is_finite() {
        return Err(ShieldError::config(field, "must be a finite number"));
    }
    if !(0.0..=100.0).contains(&value) {
        return Err(ShieldError::config(field, format!("{value} is outside 0..=100")));
    }
    Ok(())
}

pub(crate) fn seconds_to_delta(seconds: u64) -> Option<TimeDelta> {
    i64::try_from(seconds).ok().and_then(TimeDelta::try_seconds)
}

/// Builder for [`ShieldConfig`].
#[derive(Debug, Clone, Default)]
pub struct ShieldConfigBuilder {
    config: ShieldConfig,
}

impl ShieldConfigBuilder {
    /// Set the metrics window.
    #[must_use]
    pub const fn window_seconds(mut self, seconds: u64) -> Self {
        self.config.window_seconds = seconds;
        self
    }

    /// Set the requests-per-minute ceiling.
    #[must_use]
    pub const fn max_rpm(mut self, rpm: u64) -> Self {
        self.config.max_rpm = rpm;
        self
    }

    /// Set the failure percentage ceiling.
    #[must_use]
    pub const fn max_failure_rate_pct(mut self, pct: f64) -> Self {
        self.config.max_failure_rate_pct = pct;
        self
    }

    /// Set the rate-limited percentage ceiling.
    #[must_use]
    pub const fn max_rate_limit_rate_pct(mut self, pct: f64) -> Self {
        self.config.max_rate_limit_rate_pct = pct;
        self
    }

    /// Set the block duration.
    #[must_use]
    pub const fn block_duration_seconds(mut self, seconds: u64) -> Self {
        self.config.block_duration_seconds = seconds;
        self
    }

    /// Set the minimum evidence threshold.
    #[must_use]
    pub const fn min_requests(mut self, count: u64) -> Self {
        self.config.min_requests = count;
        self
    }

    /// Enable or disable the loopback whitelist seed.
    #[must_use]
    pub const fn whitelist_localhost(mut self, enabled: bool) -> Self {
        self.config.whitelist_localhost = enabled;
        self
    }

    /// Add a whitelisted address or hostname.
    #[must_use]
    pub fn whitelist_ip(mut self, ip: impl Into<String>) -> Self {
        self.config.whitelist.push(ip.into());
        self
    }

    /// Build the configuration without validating it.
    #[must_use]
    pub fn build(self) -> ShieldConfig {
        self.config
    }
}
