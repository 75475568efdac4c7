//! # Wafflehaus
//!
//! Policy filters for a cloud networking control-plane API (OpenStack
//! Neutron), packaged as tower middleware in front of a forwarding proxy:
//!
//! - **Default IP policy**: Subnet allocation pools are clipped so the first
//!   few and the last address of every CIDR stay reserved
//! - **Last IP check**: Ports cannot be updated to hold no fixed IPs
//! - **Context**: Identity headers become a typed request context
//! - **Trusted shared networks**: Network listings hide untrusted shared networks
//! - **Nova interaction**: Nova is told about port changes Neutron accepted
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Axum HTTP Server                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Request ID → Trace → Context → Filters (tower layers)      │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Core: resource matching, allocation pool arithmetic        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Proxy handler (reqwest) ──► Neutron                        │
//! │  ComputeApi (reqwest)    ──► Nova / Neutron callbacks       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use wafflehaus::{AppState, Config, build_router};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let state = AppState::new(config)?;
//!     let app = build_router(state)?;
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:9797").await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```
//!
//! The pure pieces can be used without the server:
//!
//! ```rust
//! use wafflehaus::allocation::{IpVersion, default_pool};
//!
//! let pool = default_pool("192.168.199.0/24", IpVersion::V4).unwrap();
//! assert_eq!(pool.to_string(), "192.168.199.5-192.168.199.254");
//! ```

pub mod allocation;
pub mod clients;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod resource;
pub mod routes;
pub mod state;
pub mod utils;

// Re-exports for convenience
pub use allocation::{AllocationPool, EmptyPoolPolicy, IpVersion, apply_default_policy, default_pool, intersect_and_coalesce};
pub use clients::{ComputeApi, HttpComputeApi};
pub use config::Config;
pub use error::{AppError, AppResult, ConfigurationError, ValidationError};
pub use resource::{ResourceConfig, parse_resources};
pub use routes::{build_router, build_router_with};
pub use state::AppState;
