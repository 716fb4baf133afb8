//! Per-address request history.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use crate::address::Address;

/// Outcome class of a completed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Anything that is not a 4xx/5xx.
    Success,
    /// A 4xx/5xx other than 429.
    Failed,
    /// A 429, whoever generated it.
    RateLimited,
}

impl Outcome {
    /// Classify a final HTTP status code.
    #[must_use]
    pub const fn from_status(status: u16) -> Self {
        match status {
            429 => Self::RateLimited,
            400..=599 => Self::Failed,
            _ => Self::Success,
        }
    }
}

/// One observed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestEvent {
    /// When the request completed.
    pub timestamp: DateTime<Utc>,
    /// How it completed.
    pub outcome: Outcome,
}

impl RequestEvent {
    /// Create a new event.
    #[must_use]
    pub const fn new(timestamp: DateTime<Utc>, outcome: Outcome) -> Self {
        Self { timestamp, outcome }
    }
}

/// Recent events for one address, oldest first.
#[derive(Debug, Default)]
pub struct IpRecord {
    events: VecDeque<RequestEvent>,
    last_seen: Option<DateTime<Utc>>,
    /// Set by the sweeper just before the record leaves the map.
    retired: bool,
}

impl IpRecord {
    /// Append `event`, stamped no earlier than the newest event held.
    ///
    /// A request that read the clock before a concurrent peer but reached the
    /// lock after it is ordered by completion, keeping `events` sorted.
    fn push(&mut self, mut event: RequestEvent, window: TimeDelta) {
        if let Some(seen) = self.last_seen {
            event.timestamp = event.timestamp.max(seen);
        }
        self.events.push_back(event);
        self.last_seen = Some(event.timestamp);
        self.prune(event.timestamp, window);
    }

    /// Drop events older than `now - window`.
    fn prune(&mut self, now: DateTime<Utc>, window: TimeDelta) {
        let cutoff = window_start(now, window);
        while self.events.front().is_some_and(|e| e.timestamp < cutoff) {
            self.events.pop_front();
        }
    }

    /// Events currently held, including any not yet pruned.
    pub fn events(&self) -> impl ExactSizeIterator<Item = &RequestEvent> {
        self.events.iter()
    }

    /// Number of events currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether no events are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Timestamp of the most recent event.
    #[must_use]
    pub const fn last_seen(&self) -> Option<DateTime<Utc>> {
        self.last_seen
    }

    /// Whether the address has been quiet for at least `window`.
    #[must_use]
    pub fn is_inactive(&self, now: DateTime<Utc>, window: TimeDelta) -> bool {
        self.last_seen.is_none_or(|seen| now.signed_duration_since(seen) >= window)
    }
}

/// Start of the trailing window ending at `now`.
pub(crate) fn window_start(now: DateTime<Utc>, window: TimeDelta) -> DateTime<Utc> {
    now.checked_sub_signed(window).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

type Slot = Arc<Mutex<IpRecord>>;

/// Per-address event store with per-address locking.
///
/// The map shard lock is only held long enough to clone the address's slot;
/// appends and reads happen under that address's own mutex, so traffic from
/// different addresses never serializes.
#[derive(Debug)]
pub struct RequestRecorder {
    records: DashMap<Address, Slot>,
    window: TimeDelta,
}

impl RequestRecorder {
    /// Create a recorder keeping `window` worth of history per address.
    #[must_use]
    pub fn new(window: TimeDelta) -> Self {
        Self {
            records: DashMap::new(),
            window,
        }
    }

    /// Append an event for `addr`, creating its record if absent, and prune
    /// events that fell out of the window.
    pub fn record(&self, addr: &Address, now: DateTime<Utc>, outcome: Outcome) {
        self.record_with(addr, RequestEvent::new(now, outcome), |_| ());
    }

    /// Append an event, then run `inspect` on the record while still holding
    /// the address's lock.
    ///
    /// Used by the gate so that recording and classification of one address
    /// happen in completion order. The stamped time of the new event is
    /// [`IpRecord::last_seen`].
    pub fn record_with<R>(
        &self,
        addr: &Address,
        event: RequestEvent,
        inspect: impl FnOnce(&IpRecord) -> R,
    ) -> R {
        loop {
            let slot = self.slot(addr);
            let mut record = slot.lock();
            if record.retired {
                // Swept between lookup and lock; the map now holds a fresh slot.
                continue;
            }
            record.push(event, self.window);
            return inspect(&record);
        }
    }

    /// Run `inspect` on an address's record without creating one.
    pub fn inspect<R>(&self, addr: &Address, inspect: impl FnOnce(&IpRecord) -> R) -> Option<R> {
        let slot = self.records.get(addr).map(|s| Arc::clone(s.value()))?;
        let record = slot.lock();
        Some(inspect(&record))
    }

    /// Copy of an address's current events.
    #[must_use]
    pub fn snapshot(&self, addr: &Address) -> Vec<RequestEvent> {
        self.inspect(addr, |record| record.events().copied().collect())
            .unwrap_or_default()
    }

    /// Number of addresses with a live record.
    #[must_use]
    pub fn tracked_count(&self) -> usize {
        self.records.len()
    }

    /// Remove records that have been inactive for at least the window.
    ///
    /// Records locked by an in-flight request are skipped rather than waited
    /// on. Returns the number of records removed.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let keys: Vec<Address> = self.records.iter().map(|e| e.key().clone()).collect();
        let mut removed = 0;

        for addr in keys {
            let gone = self.records.remove_if(&addr, |_, slot| {
                let Some(mut record) = slot.try_lock() else {
                    return false;
                };
                if record.is_inactive(now, self.window) {
                    record.retired = true;
                    true
                } else {
                    record.prune(now, self.window);
                    false
                }
            });
            if gone.is_some() {
                debug!(ip = %addr, "Inactive record removed");
                removed += 1;
            }
        }

        removed
    }

    /// The configured window.
    #[must_use]
    pub const fn window(&self) -> TimeDelta {
        self.window
    }

    fn slot(&self, addr: &Address) -> Slot {
        if let Some(slot) = self.records.get(addr) {
            return Arc::clone(slot.value());
        }
        Arc::clone(
            self.records
                .entry(addr.clone())
                .or_insert_with(|| Arc::new(Mutex::new(IpRecord::default())))
                .value(),
        )
    }
}
