//! Fixed-threshold abuse rules.

use std::fmt;

use serde::Serialize;

use crate::config::ShieldConfig;
use crate::metrics::Metrics;

/// Why an address was blocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    /// Request rate extrapolated to a minute exceeded `max_rpm`.
    ExcessiveRequestRate,
    /// Too many 4xx/5xx responses: probing or scanning.
    HighFailureRate,
    /// Kept hitting the upstream rate limiter.
    PersistentRateLimitViolations,
    /// Blocked by an operator.
    Manual,
}

impl BlockReason {
    /// Stable reason code.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ExcessiveRequestRate => "excessive_request_rate",
            Self::HighFailureRate => "high_failure_rate",
            Self::PersistentRateLimitViolations => "persistent_rate_limit_violations",
            Self::Manual => "manual",
        }
    }
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of classifying an address's metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// No rule matched, or not enough evidence yet.
    Allow,
    /// A rule matched.
    Block(BlockReason),
}

impl Verdict {
    /// Whether the verdict blocks.
    #[must_use]
    pub const fn is_blocked(&self) -> bool {
        matches!(self, Self::Block(_))
    }

    /// The matching rule, if any.
    #[must_use]
    pub const fn reason(&self) -> Option<BlockReason> {
        match self {
            Self::Allow => None,
            Self::Block(reason) => Some(*reason),
        }
    }
}

/// Pure decision function from metrics to [`Verdict`].
///
/// Rules are evaluated in order and the first match wins:
///
/// 1. fewer than `min_requests` in the window: allow
/// 2. extrapolated requests per minute above `max_rpm`: block
/// 3. failure rate above `max_failure_rate_pct`: block
/// 4. rate-limited share above `max_rate_limit_rate_pct`: block
#[derive(Debug, Clone, Copy)]
pub struct AbuseClassifier {
    window_seconds: u64,
    max_rpm: u64,
    max_failure_rate_pct: f64,
    max_rate_limit_rate_pct: f64,
    min_requests: u64,
}

impl AbuseClassifier {
    /// Create a classifier from (validated) configuration.
    #[must_use]
    pub const fn from_config(config: &ShieldConfig) -> Self {
        Self {
            window_seconds: config.window_seconds,
            max_rpm: config.max_rpm,
            max_failure_rate_pct: config.max_failure_rate_pct,
            max_rate_limit_rate_pct: config.max_rate_limit_rate_pct,
            min_requests: config.min_requests,
        }
    }

    /// Classify a metrics snapshot.
    #[must_use]
    pub fn classify(&self, metrics: &Metrics) -> Verdict {
        if metrics.total < self.min_requests {
            return Verdict::Allow;
        }
        if self.requests_per_minute(metrics) > self.max_rpm as f64 {
            return Verdict::Block(BlockReason::ExcessiveRequestRate);
        }
        if metrics.failure_rate_pct > self.max_failure_rate_pct {
            return Verdict::Block(BlockReason::HighFailureRate);
        }
        if metrics.rate_limit_rate_pct > self.max_rate_limit_rate_pct {
            return Verdict::Block(BlockReason::PersistentRateLimitViolations);
        }
        Verdict::Allow
    }

    /// Window total scaled to one minute.
    #[must_use]
    pub fn requests_per_minute(&self, metrics: &Metrics) -> f64 {
        metrics.total as f64 * 60.0 / self.window_seconds.max(1) as f64
    }
}
