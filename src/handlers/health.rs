//! Health and readiness endpoints.
//!
//! # Endpoints
//!
//! - `GET /health` - Liveness with version and per-filter configuration
//! - `GET /ready` - Readiness probe; 503 when Neutron cannot be reached
//!
//! Both are answered locally and never pass through the policy filters.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use chrono::Utc;
use tracing::{instrument, warn};

use crate::models::{FilterStatus, HealthResponse};
use crate::state::AppState;

/// Health check endpoint.
///
/// Always returns 200 OK with status details in the body.
///
/// # Response Body
///
/// ```json
/// {
///   "status": "healthy",
///   "version": "0.1.0",
///   "upstream_url": "http://127.0.0.1:9696",
///   "runtime_override": false,
///   "filters": [{"name": "context", "enabled": true}],
///   "uptime_seconds": 42,
///   "timestamp": "2024-01-15T10:30:00Z"
/// }
/// ```
#[instrument(skip(state))]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        upstream_url: state.config.upstream_url.clone(),
        runtime_override: state.config.runtime_override,
        filters: FilterStatus::from_config(&state.config),
        uptime_seconds: state.uptime_seconds(),
        timestamp: Utc::now(),
    })
}

/// Readiness check endpoint.
///
/// Ready when Neutron answers at all; any HTTP status counts, since an
/// unauthenticated probe is usually refused.
#[instrument(skip(state))]
pub async fn readiness_check(State(state): State<AppState>) -> Result<StatusCode, StatusCode> {
    match state.http.get(&state.config.upstream_url).send().await {
        Ok(_) => Ok(StatusCode::OK),
        Err(e) => {
            warn!(upstream = %state.config.upstream_url, error = %e, "Upstream not reachable");
            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
    }
}
