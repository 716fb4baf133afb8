//! Client address canonicalization.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use serde::{Serialize, Serializer};

use crate::error::{ShieldError, ShieldResult};

/// Canonical form shared by every loopback alias.
pub const LOOPBACK: &str = "127.0.0.1";

/// Aliases seeded into the whitelist when `whitelist_localhost` is set.
pub const LOOPBACK_ALIASES: [&str; 3] = ["127.0.0.1", "::1", "localhost"];

/// Placeholder for requests that carry no address at all.
const UNKNOWN: &str = "unknown";

/// A canonicalized client address.
///
/// Equivalent textual forms map to the same value: loopback variants fold to
/// `127.0.0.1` and IPv4-mapped IPv6 folds to plain IPv4. Cheap to clone.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(Arc<str>);

impl Address {
    /// Canonicalize a textual client address.
    ///
    /// Accepts bare IPv4/IPv6, bracketed IPv6 and the `localhost` hostname.
    ///
    /// # Errors
    ///
    /// Returns [`ShieldError::MalformedAddress`] if the text is not one of those.
    pub fn parse(raw: &str) -> ShieldResult<Self> {
        let trimmed = raw.trim();
        let unbracketed = trimmed
            .strip_prefix('[')
            .and_then(|s| s.strip_suffix(']'))
            .unwrap_or(trimmed);

        if unbracketed.eq_ignore_ascii_case("localhost") {
            return Ok(Self::from_ip(IpAddr::V4(Ipv4Addr::LOCALHOST)));
        }

        unbracketed
            .parse::<IpAddr>()
            .map(Self::from_ip)
            .map_err(|_| ShieldError::MalformedAddress(raw.to_string()))
    }

    /// Canonicalize, falling back to the raw text for unparseable input.
    ///
    /// The fallback is lower-cased and trimmed so repeats of the same bad
    /// value still share one record.
    #[must_use]
    pub fn parse_lossy(raw: &str) -> Self {
        Self::parse(raw).unwrap_or_else(|_| {
            let fallback = raw.trim().to_ascii_lowercase();
            if fallback.is_empty() {
                Self(Arc::from(UNKNOWN))
            } else {
                Self(Arc::from(fallback))
            }
        })
    }

    /// Canonicalize an already-parsed IP address.
    #[must_use]
    pub fn from_ip(ip: IpAddr) -> Self {
        let ip = match ip {
            IpAddr::V6(v6) => v6.to_ipv4_mapped().map_or(IpAddr::V6(v6), IpAddr::V4),
            v4 @ IpAddr::V4(_) => v4,
        };
        if ip.is_loopback() {
            Self(Arc::from(LOOPBACK))
        } else {
            Self(Arc::from(ip.to_string()))
        }
    }

    /// The canonical text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The address as an IP, if it is one.
    #[must_use]
    pub fn ip(&self) -> Option<IpAddr> {
        self.0.parse().ok()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<IpAddr> for Address {
    fn from(ip: IpAddr) -> Self {
        Self::from_ip(ip)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}
