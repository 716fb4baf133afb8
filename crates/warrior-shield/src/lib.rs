//! # warrior-shield
//!
//! IP-based abuse detection and temporary blocking for the Warrior API.
//!
//! Every request passes through an [`AdmissionGate`] twice: once before the
//! handler runs, to reject addresses that are currently blocked, and once
//! after, to record the final HTTP status and re-classify the address.
//!
//! ## Components
//!
//! - [`WhitelistStore`] - Addresses that are never blocked
//! - [`RequestRecorder`] - Per-address event history with per-address locking
//! - [`MetricsAggregator`] - Rolling-window statistics
//! - [`AbuseClassifier`] - Fixed-threshold rules producing a [`Verdict`]
//! - [`BlockRegistry`] - Blocked addresses with lazy and swept expiry
//! - [`StatusReporter`] - Read-only view for operators
//!
//! # Example
//!
//! ```rust
//! use warrior_shield::{Admission, AdmissionGate, ShieldConfig};
//!
//! let gate = AdmissionGate::new(ShieldConfig::default()).expect("valid config");
//! let ip = gate.address("203.0.113.7");
//!
//! match gate.check_admission(&ip) {
//!     Admission::Allow => {
//!         // ... run the handler, then report its final status
//!         let verdict = gate.record_outcome(&ip, 404);
//!         assert!(!verdict.is_blocked());
//!     }
//!     Admission::Block { remaining_seconds, .. } => {
//!         println!("Blocked for another {remaining_seconds}s");
//!     }
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod address;
pub mod blocklist;
pub mod classifier;
pub mod config;
pub mod error;
pub mod gate;
pub mod metrics;
pub mod recorder;
pub mod status;
pub mod whitelist;

// Re-export main types
pub use address::Address;
pub use blocklist::{BlockEntry, BlockRegistry};
pub use classifier::{AbuseClassifier, BlockReason, Verdict};
pub use config::{ShieldConfig, ShieldConfigBuilder};
pub use error::{ShieldError, ShieldResult};
pub use gate::{Admission, AdmissionGate, SweepStats};
pub use metrics::{Metrics, MetricsAggregator};
pub use recorder::{IpRecord, Outcome, RequestEvent, RequestRecorder};
pub use status::{AddressState, StatusReport, StatusReporter};
pub use whitelist::WhitelistStore;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::address::Address;
    pub use crate::classifier::{BlockReason, Verdict};
    pub use crate::config::ShieldConfig;
    pub use crate::error::{ShieldError, ShieldResult};
    pub use crate::gate::{Admission, AdmissionGate};
    pub use crate::status::{AddressState, StatusReport};
}
