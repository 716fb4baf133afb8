//! Temporarily blocked addresses with expiry.

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, info};

use crate::address::Address;
use crate::classifier::BlockReason;

/// A live block on one address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BlockEntry {
    /// Rule or operator action that caused the block.
    pub reason: BlockReason,
    /// When the block was (last) inserted.
    pub blocked_at: DateTime<Utc>,
    /// When the block lapses.
    pub expires_at: DateTime<Utc>,
}

impl BlockEntry {
    /// Whether the block has lapsed as of `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Whole seconds until expiry, rounded up; zero once expired.
    #[must_use]
    pub fn remaining_seconds(&self, now: DateTime<Utc>) -> u64 {
        let remaining = self.expires_at.signed_duration_since(now);
        if remaining <= TimeDelta::zero() {
            return 0;
        }
        let secs = remaining.num_seconds();
        let partial = remaining - TimeDelta::seconds(secs) > TimeDelta::zero();
        (secs + i64::from(partial)) as u64
    }
}

/// Set of currently blocked addresses.
///
/// Expired entries are dropped lazily when checked and in bulk by
/// [`sweep`](Self::sweep).
#[derive(Debug, Default)]
pub struct BlockRegistry {
    blocked: DashMap<Address, BlockEntry>,
}

impl BlockRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Block `addr` until `now + duration`.
    ///
    /// A repeat block replaces the existing entry, so the expiry is refreshed
    /// from the new `now` rather than stacked.
    pub fn insert(
        &self,
        addr: &Address,
        now: DateTime<Utc>,
        duration: TimeDelta,
        reason: BlockReason,
    ) -> BlockEntry {
        let entry = BlockEntry {
            reason,
            blocked_at: now,
            expires_at: now.checked_add_signed(duration).unwrap_or(DateTime::<Utc>::MAX_UTC),
        };

        if self.blocked.insert(addr.clone(), entry).is_some() {
            info!(ip = %addr, reason = %reason, expires_at = %entry.expires_at, "IP re-blocked");
        } else {
            info!(ip = %addr, reason = %reason, expires_at = %entry.expires_at, "IP blocked");
        }

        entry
    }

    /// Remaining block time for `addr`, or `None` if it is not blocked.
    ///
    /// A stale entry found here is removed on the spot.
    #[must_use]
    pub fn check(&self, addr: &Address, now: DateTime<Utc>) -> Option<u64> {
        self.get(addr, now).map(|entry| entry.remaining_seconds(now))
    }

    /// The live entry for `addr`, dropping it if it has expired.
    #[must_use]
    pub fn get(&self, addr: &Address, now: DateTime<Utc>) -> Option<BlockEntry> {
        let entry = *self.blocked.get(addr)?;
        if entry.is_expired(now) {
            self.expire(addr, now);
            return None;
        }
        Some(entry)
    }

    /// Lift a block early. Returns `true` if one was present.
    pub fn unblock(&self, addr: &Address) -> bool {
        let removed = self.blocked.remove(addr).is_some();
        if removed {
            info!(ip = %addr, "IP unblocked");
        }
        removed
    }

    /// Remove every expired entry, one address at a time.
    ///
    /// Returns the number of entries removed.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let keys: Vec<Address> = self.blocked.iter().map(|e| e.key().clone()).collect();
        keys.iter().filter(|addr| self.expire(addr, now)).count()
    }

    /// Number of entries, including expired ones not yet swept.
    #[must_use]
    pub fn blocked_count(&self) -> usize {
        self.blocked.len()
    }

    /// All live blocks as of `now`.
    #[must_use]
    pub fn list_blocked(&self, now: DateTime<Utc>) -> Vec<(Address, BlockEntry)> {
        self.blocked
            .iter()
            .filter(|e| !e.value().is_expired(now))
            .map(|e| (e.key().clone(), *e.value()))
            .collect()
    }

    fn expire(&self, addr: &Address, now: DateTime<Utc>) -> bool {
        let removed = self
            .blocked
            .remove_if(addr, |_, entry| entry.is_expired(now))
            .is_some();
        if removed {
            debug!(ip = %addr, "Unblocked IP (block expired)");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> Address {
        Address::parse_lossy(s)
    }

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn secs(n: i64) -> TimeDelta {
        TimeDelta::seconds(n)
    }

    // ==================== BlockEntry Tests ====================

    #[test]
    fn test_entry_remaining_rounds_up() {
        let entry = BlockEntry {
            reason: BlockReason::Manual,
            blocked_at: t0(),
            expires_at: t0() + secs(10),
        };

        assert_eq!(entry.remaining_seconds(t0()), 10);
        assert_eq!(entry.remaining_seconds(t0() + TimeDelta::milliseconds(9_500)), 1);
        assert_eq!(entry.remaining_seconds(t0() + secs(10)), 0);
        assert_eq!(entry.remaining_seconds(t0() + secs(11)), 0);
    }

    #[test]
    fn test_entry_expiry_boundary() {
        let entry = BlockEntry {
            reason: BlockReason::Manual,
            blocked_at: t0(),
            expires_at: t0() + secs(5),
        };
        assert!(!entry.is_expired(t0() + secs(4)));
        assert!(entry.is_expired(t0() + secs(5)));
    }

    // ==================== BlockRegistry Tests ====================

    #[test]
    fn test_unknown_address_not_blocked() {
        let registry = BlockRegistry::new();
        assert_eq!(registry.check(&addr("10.0.0.1"), t0()), None);
    }

    #[test]
    fn test_insert_then_check() {
        let registry = BlockRegistry::new();
        let ip = addr("10.0.0.2");

        let entry = registry.insert(&ip, t0(), secs(300), BlockReason::HighFailureRate);
        assert_eq!(entry.expires_at, t0() + secs(300));

        assert_eq!(registry.check(&ip, t0() + secs(299)), Some(1));
        assert_eq!(registry.check(&ip, t0() + secs(301)), None);
    }

    #[test]
    fn test_lazy_expiry_drops_entry() {
        let registry = BlockRegistry::new();
        let ip = addr("10.0.0.3");
        registry.insert(&ip, t0(), secs(60), BlockReason::Manual);
        assert_eq!(registry.blocked_count(), 1);

        assert_eq!(registry.check(&ip, t0() + secs(60)), None);
        assert_eq!(registry.blocked_count(), 0);
    }

    #[test]
    fn test_repeat_insert_refreshes_expiry() {
        let registry = BlockRegistry::new();
        let ip = addr("10.0.0.4");

        registry.insert(&ip, t0(), secs(300), BlockReason::HighFailureRate);
        let entry = registry.insert(
            &ip,
            t0() + secs(100),
            secs(300),
            BlockReason::ExcessiveRequestRate,
        );

        assert_eq!(entry.expires_at, t0() + secs(400));
        assert_eq!(registry.blocked_count(), 1);
        let live = registry.get(&ip, t0() + secs(350)).unwrap();
        assert_eq!(live.reason, BlockReason::ExcessiveRequestRate);
    }

    #[test]
    fn test_unblock() {
        let registry = BlockRegistry::new();
        let ip = addr("10.0.0.5");
        registry.insert(&ip, t0(), secs(60), BlockReason::Manual);

        assert!(registry.unblock(&ip));
        assert!(!registry.unblock(&ip));
        assert_eq!(registry.check(&ip, t0()), None);
    }

    #[test]
    fn test_sweep_removes_only_expired() {
        let registry = BlockRegistry::new();
        registry.insert(&addr("10.0.1.1"), t0(), secs(10), BlockReason::Manual);
        registry.insert(&addr("10.0.1.2"), t0(), secs(100), BlockReason::Manual);
        registry.insert(&addr("10.0.1.3"), t0(), secs(20), BlockReason::Manual);

        assert_eq!(registry.sweep(t0() + secs(50)), 2);
        assert_eq!(registry.blocked_count(), 1);
        assert!(registry.check(&addr("10.0.1.2"), t0() + secs(50)).is_some());
    }

    #[test]
    fn test_list_blocked_filters_expired() {
        let registry = BlockRegistry::new();
        registry.insert(&addr("10.0.2.1"), t0(), secs(10), BlockReason::Manual);
        registry.insert(&addr("10.0.2.2"), t0(), secs(100), BlockReason::HighFailureRate);

        let live = registry.list_blocked(t0() + secs(50));
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].0, addr("10.0.2.2"));
    }
}
