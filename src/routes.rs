//! Application routing configuration with the filter chain.
//!
//! # Middleware Stack (applied in order)
//!
//! ```text
//! Request
//!    │
//!    ▼
//! ┌──────────────────────┐
//! │   Request ID         │ ← Adds x-request-id header
//! └──────────┬───────────┘
//!            ▼
//! ┌──────────────────────┐
//! │     Tracing          │ ← HTTP request/response logging
//! └──────────┬───────────┘
//!            ├──────────────► /health, /ready (local)
//!            ▼
//! ┌──────────────────────┐
//! │   Context            │ ← 403 without identity (if required)
//! ├──────────────────────┤
//! │   Shared networks    │ ← filters GET /v2.0/networks?shared=…
//! ├──────────────────────┤
//! │   Last IP check      │ ← 403 on PUT ports with empty fixed_ips
//! ├──────────────────────┤
//! │   Default IP policy  │ ← rewrites POST /v2.0/subnets pools, 400 if invalid
//! ├──────────────────────┤
//! │   Nova interaction   │ ← Nova callbacks after port changes
//! └──────────┬───────────┘
//!            ▼
//!      Forward to Neutron
//! ```

use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::get;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::clients::{CallbackError, ComputeApi, HttpComputeApi};
use crate::handlers;
use crate::middleware::{
    ContextLayer, DefaultIpPolicyLayer, LastIpCheckLayer, NovaInteractionLayer, RequestIdLayer,
    TrustedSharedNetworkLayer,
};
use crate::state::AppState;

/// Build the application router with the reqwest-backed Nova/Neutron client.
///
/// # Errors
///
/// Returns `CallbackError` if the Nova or Neutron HTTP client cannot be built.
pub fn build_router(state: AppState) -> Result<Router, CallbackError> {
    let api = HttpComputeApi::new(&state.config.nova_interaction)?;
    Ok(build_router_with(state, Arc::new(api)))
}

/// Build the application router around a given [`ComputeApi`].
pub fn build_router_with(state: AppState, api: Arc<dyn ComputeApi>) -> Router {
    let config = state.config.clone();
    let runtime_override = config.runtime_override;
    let max_body = config.max_request_body_size;

    if runtime_override {
        info!("Per-request filter toggles enabled (RUNTIME_OVERRIDE)");
    }

    // =========================================================================
    // Filter chain around the forwarding fallback (last added runs first)
    // =========================================================================
    let proxied = Router::new()
        .fallback(handlers::forward)
        .layer(NovaInteractionLayer::new(&config.nova_interaction, runtime_override, api))
        .layer(DefaultIpPolicyLayer::new(&config.ip_policy, runtime_override, max_body))
        .layer(LastIpCheckLayer::new(&config.last_ip_check, runtime_override, max_body))
        .layer(TrustedSharedNetworkLayer::new(&config.shared_networks, runtime_override))
        .layer(ContextLayer::new(&config.context, runtime_override));

    let mut router = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .merge(proxied);

    // =========================================================================
    // Outer middleware (order matters - applied bottom to top)
    // =========================================================================

    // 1. Request body size limit
    info!(
        max_size_mb = max_body / (1024 * 1024),
        "Request body size limit configured"
    );
    router = router.layer(DefaultBodyLimit::max(max_body));

    // 2. Tracing
    router = router.layer(TraceLayer::new_for_http());

    // 3. Request ID
    router = router.layer(RequestIdLayer::new());

    router.with_state(state)
}
