//! Request admission: the single entry point for the abuse detection layer.

use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::address::Address;
use crate::blocklist::{BlockEntry, BlockRegistry};
use crate::classifier::{AbuseClassifier, BlockReason, Verdict};
use crate::config::ShieldConfig;
use crate::error::ShieldResult;
use crate::metrics::{Metrics, MetricsAggregator};
use crate::recorder::{Outcome, RequestEvent, RequestRecorder};
use crate::status::{StatusReport, StatusReporter};
use crate::whitelist::WhitelistStore;

/// Pre-handler decision for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Let the request through.
    Allow,
    /// Reject with 403.
    Block {
        /// Seconds until the block lapses.
        remaining_seconds: u64,
        /// Why the address is blocked.
        reason: BlockReason,
    },
}

impl Admission {
    /// Check if the request is allowed.
    #[must_use]
    pub const fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }

    /// Check if the request is blocked.
    #[must_use]
    pub const fn is_blocked(&self) -> bool {
        matches!(self, Self::Block { .. })
    }
}

/// What one sweep removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Expired block entries removed.
    pub blocks_removed: usize,
    /// Inactive per-address records removed.
    pub records_removed: usize,
}

/// Abuse detection service.
///
/// Built once from validated configuration and shared by handle. The request
/// pipeline calls [`check_admission`](Self::check_admission) before the
/// handler and [`record_outcome`](Self::record_outcome) with the final status
/// afterwards.
#[derive(Debug)]
pub struct AdmissionGate {
    config: ShieldConfig,
    whitelist: WhitelistStore,
    recorder: RequestRecorder,
    aggregator: MetricsAggregator,
    classifier: AbuseClassifier,
    blocks: BlockRegistry,
}

impl AdmissionGate {
    /// Create a gate from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ShieldError::Config`](crate::ShieldError::Config) if any
    /// threshold is invalid.
    pub fn new(config: ShieldConfig) -> ShieldResult<Self> {
        config.validate()?;

        let window = config.window();
        let gate = Self {
            whitelist: WhitelistStore::from_config(&config),
            recorder: RequestRecorder::new(window),
            aggregator: MetricsAggregator::new(window),
            classifier: AbuseClassifier::from_config(&config),
            blocks: BlockRegistry::new(),
            config,
        };

        info!(
            window_seconds = gate.config.window_seconds,
            max_rpm = gate.config.max_rpm,
            max_failure_rate_pct = gate.config.max_failure_rate_pct,
            max_rate_limit_rate_pct = gate.config.max_rate_limit_rate_pct,
            min_requests = gate.config.min_requests,
            block_duration_seconds = gate.config.block_duration_seconds,
            whitelisted = gate.whitelist.len(),
            "Admission gate initialized"
        );
        Ok(gate)
    }

    /// Create a gate with default configuration.
    ///
    /// # Errors
    ///
    /// Never fails in practice; the defaults are valid.
    pub fn with_defaults() -> ShieldResult<Self> {
        Self::new(ShieldConfig::default())
    }

    /// Canonicalize a raw client address.
    ///
    /// Unparseable input is tracked under its own raw text rather than
    /// rejected, so traffic is never dropped over an address edge case.
    #[must_use]
    pub fn address(&self, raw: &str) -> Address {
        match Address::parse(raw) {
            Ok(addr) => addr,
            Err(e) => {
                debug!(error = %e, "Tracking unparseable client address as-is");
                Address::parse_lossy(raw)
            }
        }
    }

    // ==================== Request Path ====================

    /// Decide whether a request from `addr` may proceed.
    #[must_use]
    pub fn check_admission(&self, addr: &Address) -> Admission {
        self.check_admission_at(addr, Utc::now())
    }

    /// [`check_admission`](Self::check_admission) at an explicit time.
    #[must_use]
    pub fn check_admission_at(&self, addr: &Address, now: DateTime<Utc>) -> Admission {
        if self.whitelist.contains(addr) {
            return Admission::Allow;
        }

        match self.blocks.get(addr, now) {
            Some(entry) => {
                let remaining_seconds = entry.remaining_seconds(now);
                debug!(ip = %addr, remaining_seconds, "Rejecting request from blocked IP");
                Admission::Block {
                    remaining_seconds,
                    reason: entry.reason,
                }
            }
            None => Admission::Allow,
        }
    }

    /// Record the final status of a request from `addr` and classify.
    ///
    /// Whitelisted addresses are recorded but never classified.
    pub fn record_outcome(&self, addr: &Address, status: u16) -> Verdict {
        self.record_outcome_at(addr, status, Utc::now())
    }

    /// [`record_outcome`](Self::record_outcome) at an explicit time.
    pub fn record_outcome_at(&self, addr: &Address, status: u16, now: DateTime<Utc>) -> Verdict {
        let event = RequestEvent::new(now, Outcome::from_status(status));

        if self.whitelist.contains(addr) {
            self.recorder.record_with(addr, event, |_| ());
            return Verdict::Allow;
        }

        // Classify and block under the address's lock so verdicts follow completion order
        self.recorder.record_with(addr, event, |record| {
            let stamped = record.last_seen().unwrap_or(now);
            let metrics = self.aggregator.compute(record, stamped);
            let verdict = self.classifier.classify(&metrics);

            if let Verdict::Block(reason) = verdict {
                self.block_for_abuse(addr, stamped, reason, &metrics);
            }
            verdict
        })
    }

    fn block_for_abuse(
        &self,
        addr: &Address,
        now: DateTime<Utc>,
        reason: BlockReason,
        metrics: &Metrics,
    ) {
        let entry = self
            .blocks
            .insert(addr, now, self.config.block_duration(), reason);
        warn!(
            ip = %addr,
            reason = %reason,
            total_requests = metrics.total,
            failure_rate = format_args!("{:.1}", metrics.failure_rate_pct),
            rate_limit_rate = format_args!("{:.1}", metrics.rate_limit_rate_pct),
            requests_per_minute =
                format_args!("{:.1}", self.classifier.requests_per_minute(metrics)),
            unblock_in_seconds = entry.remaining_seconds(now),
            "Blocked abusive IP"
        );
    }

    // ==================== Whitelist ====================

    /// Trust `addr`, lifting any active block on it.
    ///
    /// Returns `false` if it was already trusted.
    pub fn whitelist_ip(&self, addr: &Address) -> bool {
        self.blocks.unblock(addr);
        self.whitelist.add(addr.clone())
    }

    /// Stop trusting `addr`. Returns `true` if it was trusted.
    pub fn remove_from_whitelist(&self, addr: &Address) -> bool {
        self.whitelist.remove(addr)
    }

    /// Check whether `addr` is trusted.
    #[must_use]
    pub fn is_whitelisted(&self, addr: &Address) -> bool {
        self.whitelist.contains(addr)
    }

    // ==================== Manual Blocking ====================

    /// Block `addr` by hand, for `duration` or the configured default.
    pub fn block_ip(&self, addr: &Address, duration: Option<Duration>) -> BlockEntry {
        self.block_ip_at(addr, duration, Utc::now())
    }

    /// [`block_ip`](Self::block_ip) at an explicit time.
    pub fn block_ip_at(
        &self,
        addr: &Address,
        duration: Option<Duration>,
        now: DateTime<Utc>,
    ) -> BlockEntry {
        let duration = duration
            .and_then(|d| TimeDelta::from_std(d).ok())
            .filter(|d| *d > TimeDelta::zero())
            .unwrap_or_else(|| self.config.block_duration());
        self.blocks.insert(addr, now, duration, BlockReason::Manual)
    }

    /// Lift a block early. Returns `true` if one was present.
    pub fn unblock_ip(&self, addr: &Address) -> bool {
        self.blocks.unblock(addr)
    }

    /// Check whether `addr` would currently be rejected.
    #[must_use]
    pub fn is_blocked(&self, addr: &Address) -> bool {
        self.check_admission(addr).is_blocked()
    }

    // ==================== Inspection ====================

    /// Operational status of `addr`.
    #[must_use]
    pub fn status(&self, addr: &Address) -> StatusReport {
        self.status_at(addr, Utc::now())
    }

    /// [`status`](Self::status) at an explicit time.
    #[must_use]
    pub fn status_at(&self, addr: &Address, now: DateTime<Utc>) -> StatusReport {
        self.reporter().status(addr, now)
    }

    /// Borrowing status reporter over this gate's state.
    #[must_use]
    pub const fn reporter(&self) -> StatusReporter<'_> {
        StatusReporter {
            whitelist: &self.whitelist,
            blocks: &self.blocks,
            recorder: &self.recorder,
            aggregator: self.aggregator,
        }
    }

    /// Window metrics for `addr` as of `now`.
    #[must_use]
    pub fn metrics_at(&self, addr: &Address, now: DateTime<Utc>) -> Metrics {
        self.recorder
            .inspect(addr, |record| self.aggregator.compute(record, now))
            .unwrap_or_default()
    }

    /// Number of block entries held.
    #[must_use]
    pub fn blocked_count(&self) -> usize {
        self.blocks.blocked_count()
    }

    /// Number of addresses with recorded history.
    #[must_use]
    pub fn tracked_count(&self) -> usize {
        self.recorder.tracked_count()
    }

    /// The validated configuration.
    #[must_use]
    pub const fn config(&self) -> &ShieldConfig {
        &self.config
    }

    /// The block registry.
    #[must_use]
    pub const fn blocks(&self) -> &BlockRegistry {
        &self.blocks
    }

    /// The request recorder.
    #[must_use]
    pub const fn recorder(&self) -> &RequestRecorder {
        &self.recorder
    }

    // ==================== Maintenance ====================

    /// Remove expired blocks and inactive records.
    pub fn sweep(&self, now: DateTime<Utc>) -> SweepStats {
        let stats = SweepStats {
            blocks_removed: self.blocks.sweep(now),
            records_removed: self.recorder.sweep(now),
        };
        if stats.blocks_removed > 0 || stats.records_removed > 0 {
            info!(
                blocks_removed = stats.blocks_removed,
                records_removed = stats.records_removed,
                tracked = self.recorder.tracked_count(),
                blocked = self.blocks.blocked_count(),
                "Sweep completed"
            );
        }
        stats
    }

    /// Run [`sweep`](Self::sweep) every `window_seconds` on the tokio runtime.
    ///
    /// The task holds only a weak handle and exits once the gate is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let gate: Weak<Self> = Arc::downgrade(self);
        let period = self.config.sweep_interval();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately
            interval.tick().await;

            loop {
                interval.tick().await;
                let Some(gate) = gate.upgrade() else {
                    debug!("Admission gate dropped, sweeper exiting");
                    break;
                };
                gate.sweep(Utc::now());
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ShieldError;
    use crate::status::AddressState;
    use proptest::prelude::*;

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn at(secs: i64) -> DateTime<Utc> {
        t0() + TimeDelta::seconds(secs)
    }

    fn gate() -> AdmissionGate {
        AdmissionGate::with_defaults().unwrap()
    }

    fn addr(s: &str) -> Address {
        Address::parse_lossy(s)
    }

    // ==================== Construction Tests ====================

    #[test]
    fn test_invalid_config_rejected() {
        let config = ShieldConfig::builder().window_seconds(0).build();
        assert!(matches!(
            AdmissionGate::new(config),
            Err(ShieldError::Config { field: "window_seconds", .. })
        ));
    }

    #[test]
    fn test_address_canonicalization() {
        let gate = gate();
        assert_eq!(gate.address("::1").as_str(), "127.0.0.1");
        assert_eq!(gate.address("garbage!").as_str(), "garbage!");
    }

    // ==================== Admission Tests ====================

    #[test]
    fn test_unknown_address_allowed() {
        assert!(gate().check_admission_at(&addr("10.0.0.1"), t0()).is_allowed());
    }

    #[test]
    fn test_high_failure_rate_blocks() {
        let gate = gate();
        let ip = addr("10.0.0.2");

        // 25 requests in the window, 15 of them failing (60%)
        for i in 0..25 {
            let status = if i < 15 { 404 } else { 200 };
            gate.record_outcome_at(&ip, status, at(i));
        }

        let admission = gate.check_admission_at(&ip, at(25));
        assert!(matches!(
            admission,
            Admission::Block {
                remaining_seconds: 1..=300,
                reason: BlockReason::HighFailureRate,
            }
        ));
    }

    #[test]
    fn test_below_min_requests_not_blocked() {
        let gate = gate();
        let ip = addr("10.0.0.3");

        for i in 0..19 {
            assert_eq!(gate.record_outcome_at(&ip, 500, at(i)), Verdict::Allow);
        }

        assert!(gate.check_admission_at(&ip, at(20)).is_allowed());
    }

    #[test]
    fn test_auto_unblock_after_expiry() {
        let gate = gate();
        let ip = addr("10.0.0.4");
        gate.block_ip_at(&ip, None, t0());

        assert!(gate.check_admission_at(&ip, at(299)).is_blocked());
        assert!(gate.check_admission_at(&ip, at(301)).is_allowed());
        assert_eq!(gate.blocked_count(), 0);
    }

    #[test]
    fn test_localhost_never_blocked() {
        let gate = gate();
        let ip = gate.address("127.0.0.1");

        for i in 0..1000 {
            let verdict = gate.record_outcome_at(&ip, 500, at(i % 60));
            assert_eq!(verdict, Verdict::Allow);
            assert!(gate.check_admission_at(&ip, at(i % 60)).is_allowed());
        }

        let report = gate.status_at(&ip, at(59));
        assert_eq!(report.status, AddressState::Whitelisted);
        assert!(report.metrics.total > 0);
        assert_eq!(gate.blocked_count(), 0);
    }

    #[test]
    fn test_rate_limited_pattern_blocks() {
        let gate = gate();
        let ip = addr("10.0.0.5");

        let mut last = Verdict::Allow;
        for i in 0..20 {
            last = gate.record_outcome_at(&ip, 429, at(i));
        }

        assert_eq!(last, Verdict::Block(BlockReason::PersistentRateLimitViolations));
    }

    #[test]
    fn test_repeat_violation_refreshes_expiry() {
        let gate = gate();
        let ip = addr("10.0.0.6");

        for i in 0..20 {
            gate.record_outcome_at(&ip, 500, at(i));
        }
        // Request admitted before the block landed completes later
        gate.record_outcome_at(&ip, 500, at(50));

        assert_eq!(
            gate.blocks().get(&ip, at(50)).map(|e| e.expires_at),
            Some(at(350))
        );
    }

    #[test]
    fn test_window_survives_unblock() {
        let config = ShieldConfig::builder().block_duration_seconds(10).build();
        let gate = AdmissionGate::new(config).unwrap();
        let ip = addr("10.0.0.7");

        for i in 0..20 {
            gate.record_outcome_at(&ip, 500, at(i));
        }
        // Blocked at t0+19 for 10s
        assert!(gate.check_admission_at(&ip, at(28)).is_blocked());
        assert!(gate.check_admission_at(&ip, at(30)).is_allowed());

        // Pre-block failures still in the window count immediately
        assert!(gate.record_outcome_at(&ip, 200, at(31)).is_blocked());
    }

    #[test]
    fn test_late_completion_counts_earlier_peers() {
        let gate = gate();
        let ip = addr("10.0.0.8");

        for _ in 0..19 {
            assert_eq!(gate.record_outcome_at(&ip, 500, at(20)), Verdict::Allow);
        }
        // Read the clock before its peers, reached the lock after them
        let verdict = gate.record_outcome_at(&ip, 500, at(20) - TimeDelta::milliseconds(1));

        assert_eq!(verdict, Verdict::Block(BlockReason::HighFailureRate));
        assert_eq!(gate.blocks().get(&ip, at(20)).map(|e| e.expires_at), Some(at(320)));
        let events = gate.recorder().snapshot(&ip);
        assert_eq!(events.len(), 20);
        assert!(events.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[test]
    fn test_late_completion_does_not_shorten_block() {
        let gate = gate();
        let ip = addr("10.0.0.9");

        for i in 0..20 {
            gate.record_outcome_at(&ip, 500, at(i));
        }
        gate.record_outcome_at(&ip, 500, at(40));
        gate.record_outcome_at(&ip, 500, at(30));

        assert_eq!(gate.blocks().get(&ip, at(40)).map(|e| e.expires_at), Some(at(340)));
    }

    // ==================== Whitelist Tests ====================

    #[test]
    fn test_whitelist_lifts_block() {
        let gate = gate();
        let ip = addr("10.0.1.1");
        gate.block_ip_at(&ip, None, t0());

        assert!(gate.whitelist_ip(&ip));
        assert!(gate.check_admission_at(&ip, at(1)).is_allowed());
        assert_eq!(gate.blocked_count(), 0);
    }

    #[test]
    fn test_whitelist_idempotent() {
        let gate = gate();
        let ip = addr("10.0.1.2");
        let before = gate.whitelist.len();

        assert!(gate.whitelist_ip(&ip));
        assert!(!gate.whitelist_ip(&ip));
        assert!(!gate.whitelist_ip(&ip));
        assert_eq!(gate.whitelist.len(), before + 1);
    }

    #[test]
    fn test_remove_from_whitelist_restores_classification() {
        let gate = gate();
        let ip = addr("10.0.1.3");
        gate.whitelist_ip(&ip);
        assert!(gate.remove_from_whitelist(&ip));
        assert!(!gate.is_whitelisted(&ip));

        for i in 0..20 {
            gate.record_outcome_at(&ip, 403, at(i));
        }
        assert!(gate.check_admission_at(&ip, at(21)).is_blocked());
    }

    // ==================== Manual Block Tests ====================

    #[test]
    fn test_manual_block_custom_duration() {
        let gate = gate();
        let ip = addr("10.0.2.1");

        let entry = gate.block_ip_at(&ip, Some(Duration::from_secs(30)), t0());
        assert_eq!(entry.reason, BlockReason::Manual);
        assert_eq!(entry.expires_at, at(30));

        assert!(gate.unblock_ip(&ip));
        assert!(gate.check_admission_at(&ip, at(1)).is_allowed());
    }

    #[test]
    fn test_manual_block_zero_duration_uses_default() {
        let gate = gate();
        let entry = gate.block_ip_at(&addr("10.0.2.2"), Some(Duration::ZERO), t0());
        assert_eq!(entry.expires_at, at(300));
    }

    // ==================== Sweep Tests ====================

    #[test]
    fn test_sweep_bounds_memory() {
        let gate = gate();
        for i in 0..100 {
            let ip = addr(&format!("10.1.0.{i}"));
            gate.record_outcome_at(&ip, 200, t0());
        }
        gate.block_ip_at(&addr("10.1.0.1"), None, t0());
        assert_eq!(gate.tracked_count(), 100);

        let stats = gate.sweep(at(301));
        assert_eq!(
            stats,
            SweepStats {
                blocks_removed: 1,
                records_removed: 100,
            }
        );
        assert_eq!(gate.tracked_count(), 0);
        assert_eq!(gate.blocked_count(), 0);
    }

    #[test]
    fn test_status_of_unseen_address() {
        let report = gate().status_at(&addr("10.2.0.1"), t0());
        assert_eq!(report.status, AddressState::Active);
        assert_eq!(report.metrics, Metrics::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_task_runs() {
        let config = ShieldConfig::builder().window_seconds(1).build();
        let gate = Arc::new(AdmissionGate::new(config).unwrap());
        let long_ago = Utc::now() - TimeDelta::seconds(3600);
        gate.record_outcome_at(&addr("10.3.0.1"), 200, long_ago);
        gate.block_ip_at(&addr("10.3.0.2"), Some(Duration::from_secs(1)), long_ago);

        let handle = gate.spawn_sweeper();
        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert_eq!(gate.tracked_count(), 0);
        assert_eq!(gate.blocked_count(), 0);
        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_exits_when_gate_dropped() {
        let gate = Arc::new(AdmissionGate::with_defaults().unwrap());
        let handle = gate.spawn_sweeper();
        drop(gate);

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(handle.is_finished());
    }

    #[test]
    fn test_concurrent_outcomes_no_lost_updates() {
        let config = ShieldConfig::builder().whitelist_localhost(false).build();
        let gate = Arc::new(AdmissionGate::new(config).unwrap());
        let ip = addr("10.4.0.1");
        let now = Utc::now();

        std::thread::scope(|scope| {
            for _ in 0..8 {
                let gate = Arc::clone(&gate);
                let ip = ip.clone();
                scope.spawn(move || {
                    for _ in 0..50 {
                        gate.record_outcome_at(&ip, 200, now);
                    }
                });
            }
        });

        assert_eq!(gate.metrics_at(&ip, now).total, 400);
    }

    proptest! {
        #[test]
        fn whitelisted_never_blocked(statuses in prop::collection::vec(400u16..600, 1..200)) {
            let gate = gate();
            let ip = addr("10.5.0.1");
            gate.whitelist_ip(&ip);

            for (i, status) in statuses.iter().enumerate() {
                let verdict = gate.record_outcome_at(&ip, *status, at(i as i64 % 60));
                prop_assert!(!verdict.is_blocked());
            }
            prop_assert!(gate.check_admission_at(&ip, at(60)).is_allowed());
        }
    }
}
