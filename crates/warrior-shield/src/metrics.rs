//! Rolling-window statistics over an address's events.

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;

use crate::recorder::{window_start, IpRecord, Outcome, RequestEvent};

/// Statistics for one address over the trailing window. Derived, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Metrics {
    /// Requests in the window.
    #[serde(rename = "total_requests")]
    pub total: u64,
    /// Requests that failed (4xx/5xx other than 429).
    #[serde(rename = "failed_requests")]
    pub failed: u64,
    /// Requests answered with 429.
    pub rate_limited: u64,
    /// `failed / total * 100`, zero when there is no traffic.
    #[serde(rename = "failure_rate")]
    pub failure_rate_pct: f64,
    /// `rate_limited / total * 100`, zero when there is no traffic.
    #[serde(rename = "rate_limit_rate")]
    pub rate_limit_rate_pct: f64,
    /// Average over the whole configured window, not an instantaneous rate.
    pub requests_per_second: f64,
}

/// Computes [`Metrics`] from a snapshot of events.
///
/// Takes no lock itself; callers hand it a record they already hold or a
/// copied event list. Events outside `[now - window, now]` are ignored even
/// if the record has not pruned them yet.
#[derive(Debug, Clone, Copy)]
pub struct MetricsAggregator {
    window: TimeDelta,
}

impl MetricsAggregator {
    /// Create an aggregator for the given window.
    #[must_use]
    pub const fn new(window: TimeDelta) -> Self {
        Self { window }
    }

    /// Compute metrics for a record as of `now`.
    #[must_use]
    pub fn compute(&self, record: &IpRecord, now: DateTime<Utc>) -> Metrics {
        self.compute_events(record.events(), now)
    }

    /// Compute metrics for any sequence of events as of `now`.
    #[must_use]
    pub fn compute_events<'a>(
        &self,
        events: impl IntoIterator<Item = &'a RequestEvent>,
        now: DateTime<Utc>,
    ) -> Metrics {
        let cutoff = window_start(now, self.window);
        let mut metrics = Metrics::default();

        for event in events {
            if event.timestamp < cutoff || event.timestamp > now {
                continue;
            }
            metrics.total += 1;
            match event.outcome {
                Outcome::Failed => metrics.failed += 1,
                Outcome::RateLimited => metrics.rate_limited += 1,
                Outcome::Success => {}
            }
        }

        if metrics.total > 0 {
            let total = metrics.total as f64;
            metrics.failure_rate_pct = metrics.failed as f64 / total * 100.0;
            metrics.rate_limit_rate_pct = metrics.rate_limited as f64 / total * 100.0;
            metrics.requests_per_second = total / self.window_secs();
        }

        metrics
    }

    /// The window length in (fractional) seconds.
    #[must_use]
    pub fn window_secs(&self) -> f64 {
        self.window.num_milliseconds() as f64 / 1000.0
    }
}
