//! Shared application state for the proxy and local handlers.
//!
//! The filters carry their own `Arc`ed settings; this state only holds what
//! the forwarding handler and the health endpoints need.

use std::sync::Arc;
use std::time::Instant;

use crate::config::Config;
use crate::error::{AppError, AppResult};

/// Shared application state for Axum handlers.
///
/// Cloned per request; everything inside is behind `Arc` or cheap to clone.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<Config>,
    /// Pooled client used to forward requests to Neutron
    pub http: reqwest::Client,
    /// Timestamp when the application started
    pub started_at: Instant,
}

impl AppState {
    /// Build state from configuration.
    ///
    /// The upstream client never follows redirects so Neutron's own
    /// `Location` headers reach the caller unchanged.
    pub fn new(config: Config) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.upstream_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| AppError::Internal(format!("upstream client: {e}")))?;

        Ok(Self {
            config: Arc::new(config),
            http,
            started_at: Instant::now(),
        })
    }

    /// Get the application uptime in seconds.
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
