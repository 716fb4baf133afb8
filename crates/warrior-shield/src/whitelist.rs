//! Addresses that are never blocked.

use dashmap::DashSet;
use tracing::info;

use crate::address::{Address, LOOPBACK_ALIASES};
use crate::config::ShieldConfig;

/// Set of trusted addresses, seeded from configuration and mutable at runtime.
///
/// Entries are canonicalized on insert, so `::1` and `localhost` land on the
/// same entry as `127.0.0.1`. Hostnames other than `localhost` are kept as
/// lower-cased text.
#[derive(Debug, Default)]
pub struct WhitelistStore {
    entries: DashSet<Address>,
}

impl WhitelistStore {
    /// Create an empty whitelist.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a whitelist seeded from configuration.
    #[must_use]
    pub fn from_config(config: &ShieldConfig) -> Self {
        let store = Self::new();
        if config.whitelist_localhost {
            for alias in LOOPBACK_ALIASES {
                store.entries.insert(Address::parse_lossy(alias));
            }
        }
        for entry in &config.whitelist {
            store.entries.insert(Address::parse_lossy(entry));
        }
        store
    }

    /// Check whether an address is trusted.
    #[must_use]
    pub fn contains(&self, addr: &Address) -> bool {
        self.entries.contains(addr)
    }

    /// Trust an address. Returns `false` if it was already present.
    pub fn add(&self, addr: Address) -> bool {
        let added = self.entries.insert(addr.clone());
        if added {
            info!(ip = %addr, "IP whitelisted");
        }
        added
    }

    /// Stop trusting an address. Returns `true` if it was present.
    pub fn remove(&self, addr: &Address) -> bool {
        let removed = self.entries.remove(addr).is_some();
        if removed {
            info!(ip = %addr, "IP removed from whitelist");
        }
        removed
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the whitelist is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn addr(s: &str) -> Address {
        Address::parse_lossy(s)
    }

    #[test]
    fn test_seeded_with_loopback() {
        let store = WhitelistStore::from_config(&ShieldConfig::default());

        assert!(store.contains(&addr("127.0.0.1")));
        assert!(store.contains(&addr("::1")));
        assert!(store.contains(&addr("localhost")));
        // All aliases collapse onto one canonical entry
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_localhost_seed_disabled() {
        let config = ShieldConfig::builder().whitelist_localhost(false).build();
        let store = WhitelistStore::from_config(&config);

        assert!(store.is_empty());
        assert!(!store.contains(&addr("127.0.0.1")));
    }

    #[test]
    fn test_config_entries() {
        let config = ShieldConfig::builder()
            .whitelist_localhost(false)
            .whitelist_ip("10.0.0.9")
            .whitelist_ip("Monitor.Internal")
            .build();
        let store = WhitelistStore::from_config(&config);

        assert!(store.contains(&addr("10.0.0.9")));
        assert!(store.contains(&addr("monitor.internal")));
    }

    #[test]
    fn test_add_is_idempotent() {
        let store = WhitelistStore::new();

        assert!(store.add(addr("10.0.0.1")));
        assert!(!store.add(addr("10.0.0.1")));
        assert!(!store.add(addr(" 10.0.0.1 ")));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_remove() {
        let store = WhitelistStore::new();
        store.add(addr("10.0.0.1"));

        assert!(store.remove(&addr("10.0.0.1")));
        assert!(!store.remove(&addr("10.0.0.1")));
        assert!(!store.contains(&addr("10.0.0.1")));
    }

    proptest! {
        #[test]
        fn repeated_adds_keep_one_entry(octets in any::<[u8; 4]>(), repeats in 1usize..20) {
            let store = WhitelistStore::new();
            let ip = addr(&std::net::Ipv4Addr::from(octets).to_string());

            prop_assert!(store.add(ip.clone()));
            for _ in 1..repeats {
                prop_assert!(!store.add(ip.clone()));
            }
            prop_assert_eq!(store.len(), 1);
            prop_assert!(store.contains(&ip));
        }
    }
}
