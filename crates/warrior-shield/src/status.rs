//! Read-only view of an address's current state.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::address::Address;
use crate::blocklist::BlockRegistry;
use crate::classifier::BlockReason;
use crate::metrics::{Metrics, MetricsAggregator};
use crate::recorder::RequestRecorder;
use crate::whitelist::WhitelistStore;

/// Coarse state of an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressState {
    /// Not blocked and not trusted.
    Active,
    /// Currently blocked.
    Blocked,
    /// Trusted; never blocked.
    Whitelisted,
}

/// Status of one address, shaped for the admin endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    /// Canonical address.
    pub ip: Address,
    /// Coarse state.
    pub status: AddressState,
    /// Always `true` when present; only present while blocked.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked: Option<bool>,
    /// Rule that caused the block.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<BlockReason>,
    /// Expiry as Unix epoch seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unblock_time: Option<i64>,
    /// Seconds until the block lapses.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_seconds: Option<u64>,
    /// Window metrics; all zero for addresses never seen.
    pub metrics: Metrics,
}

/// Builds [`StatusReport`]s from the gate's components.
#[derive(Debug, Clone, Copy)]
pub struct StatusReporter<'a> {
    pub(crate) whitelist: &'a WhitelistStore,
    pub(crate) blocks: &'a BlockRegistry,
    pub(crate) recorder: &'a RequestRecorder,
    pub(crate) aggregator: MetricsAggregator,
}

impl StatusReporter<'_> {
    /// Report on `addr` as of `now`.
    ///
    /// Whitelisting takes precedence over any block, matching admission order.
    #[must_use]
    pub fn status(&self, addr: &Address, now: DateTime<Utc>) -> StatusReport {
        let metrics = self
            .recorder
            .inspect(addr, |record| self.aggregator.compute(record, now))
            .unwrap_or_default();

        let mut report = StatusReport {
            ip: addr.clone(),
            status: AddressState::Active,
            blocked: None,
            reason: None,
            unblock_time: None,
            remaining_seconds: None,
            metrics,
        };

        if self.whitelist.contains(addr) {
            report.status = AddressState::Whitelisted;
        } else if let Some(entry) = self.blocks.get(addr, now) {
            report.status = AddressState::Blocked;
            report.blocked = Some(true);
            report.reason = Some(entry.reason);
            report.unblock_time = Some(entry.expires_at.timestamp());
            report.remaining_seconds = Some(entry.remaining_seconds(now));
        }

        report
    }
}
