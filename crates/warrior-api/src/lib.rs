//! # warrior-api
//!
//! HTTP surface for the Warrior API with IP-based abuse detection.
//!
//! Every application route sits behind an admission middleware backed by
//! [`warrior_shield::AdmissionGate`]: clients that are blocked get a 403,
//! everyone else is served and their final status code is fed back into the
//! gate's sliding window.
//!
//! ## Example
//!
//! ```rust,no_run
//! use warrior_api::{ApiServer, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let server = ApiServer::new(ServerConfig::default()).unwrap();
//!     // server.serve().await.unwrap();
//! }
//! ```
//!
//! ## Endpoints
//!
//! | Endpoint | Method | Description |
//! |----------|--------|-------------|
//! | `/health` | GET | Liveness check, never classified |
//! | `/admin/ip-status` | GET | Abuse status of `?ip=` or the caller |

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod state;

// Re-export main types
pub use cli::Cli;
pub use config::ServerConfig;
pub use error::{ApiError, ApiResult};
pub use middleware::{BlockedResponse, ClientAddress};
pub use routes::{create_router, create_router_with};
pub use server::ApiServer;
pub use state::AppState;
