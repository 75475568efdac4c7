//! Policy filters for the networking API, as tower middleware.
//!
//! Each filter is a `Layer`/`Service` pair that holds its configuration in an
//! `Arc` and asks a [`ResourceConfig`](crate::resource::ResourceConfig)
//! whether a request concerns it before doing anything else.
//!
//! - **Request ID**: Generation and propagation of `x-request-id`
//! - **Context**: Identity headers → [`RequestContext`] in request extensions
//! - **Trusted shared networks**: Hides shared networks from network listings
//! - **Last IP check**: Refuses port updates that remove every fixed IP
//! - **Default IP policy**: Clips subnet allocation pools to the usable range
//! - **Nova interaction**: Tells Nova about port changes after Neutron succeeds
//!
//! # Architecture
//!
//! ```text
//! Request → Request ID → Context → Shared Nets → Last IP → IP Policy → Nova → Upstream
//!                           ↓                       ↓          ↓
//!                      403 no auth           403 empty   400 bad pools
//! ```
//!
//! # Runtime Toggle
//!
//! When `RUNTIME_OVERRIDE` is on, a request may carry
//! `X_WAFFLEHAUS_<FILTER>_ENABLED: true|false` to flip a single filter for
//! that request only. See [`FilterToggle`].

pub mod context;
pub mod default_ip_policy;
pub mod last_ip_check;
pub mod nova_interaction;
pub mod request_id;
pub mod shared_networks;

use axum::body::{Body, Bytes};
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE, HeaderValue};
use axum::http::{HeaderMap, Request, Response, StatusCode};
use serde_json::Value;

use crate::error::AppError;
use crate::utils::parse_bool;

pub use context::{ContextLayer, RequestContext, RequestContextExt};
pub use default_ip_policy::DefaultIpPolicyLayer;
pub use last_ip_check::LastIpCheckLayer;
pub use nova_interaction::NovaInteractionLayer;
pub use request_id::{REQUEST_ID_HEADER, RequestIdExt, RequestIdLayer};
pub use shared_networks::TrustedSharedNetworkLayer;

// =============================================================================
// Filter Toggle
// =============================================================================

/// Per-filter enable switch with optional per-request override.
#[derive(Debug, Clone)]
pub struct FilterToggle {
    name: &'static str,
    header: String,
    enabled: bool,
    runtime_override: bool,
}

impl FilterToggle {
    /// `name` is the snake_case filter name used in logs and metrics.
    ///
    /// The override header is `X_WAFFLEHAUS_<NAME>_ENABLED` with the
    /// underscores of `name` removed, e.g. `X_WAFFLEHAUS_LASTIPCHECK_ENABLED`.
    pub fn new(name: &'static str, enabled: bool, runtime_override: bool) -> Self {
        Self {
            name,
            header: format!("x_wafflehaus_{}_enabled", name.replace('_', "")),
            enabled,
            runtime_override,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Lowercase override header name.
    pub fn header(&self) -> &str {
        &self.header
    }

    /// Whether the filter should run for this request.
    pub fn is_enabled<B>(&self, req: &Request<B>) -> bool {
        if self.runtime_override
            && let Some(value) = req.headers().get(&self.header)
            && let Some(flag) = value.to_str().ok().and_then(parse_bool)
        {
            if flag != self.enabled {
                tracing::debug!(filter = self.name, enabled = flag, "Filter toggled by request header");
            }
            return flag;
        }
        self.enabled
    }
}

// =============================================================================
// Body Helpers
// =============================================================================

/// Buffer a body up to `limit` bytes.
pub(crate) async fn buffer_body(body: Body, limit: usize) -> Result<Bytes, AppError> {
    axum::body::to_bytes(body, limit)
        .await
        .map_err(|e| AppError::Body(e.to_string()))
}

/// Buffer an upstream response body up to `limit` bytes.
///
/// A response that cannot be read is an upstream failure, not a client one.
pub(crate) async fn buffer_response_body(body: Body, limit: usize) -> Result<Bytes, AppError> {
    axum::body::to_bytes(body, limit)
        .await
        .map_err(|e| AppError::Upstream(format!("reading response: {e}")))
}

/// Replace the `Content-Length` header after a body rewrite.
pub(crate) fn set_content_length(headers: &mut HeaderMap, len: usize) {
    headers.insert(CONTENT_LENGTH, HeaderValue::from(len));
}

/// JSON response with an explicit status.
pub(crate) fn json_response(status: StatusCode, body: &Value) -> Response<Body> {
    let bytes = body.to_string().into_bytes();
    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

/// Header value as `&str`, ignoring non-UTF-8 and empty values.
pub(crate) fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::response::IntoResponse;

    fn request(header: Option<(&str, &str)>) -> Request<Body> {
        let mut builder = Request::builder().uri("/v2.0/ports/1234");
        if let Some((name, value)) = header {
            builder = builder.header(name, value);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn test_toggle_header_name() {
        let toggle = FilterToggle::new("last_ip_check", true, true);
        assert_eq!(toggle.header(), "x_wafflehaus_lastipcheck_enabled");
    }

    #[test]
    fn test_toggle_without_override_ignores_header() {
        let toggle = FilterToggle::new("last_ip_check", true, false);
        let req = request(Some(("X_WAFFLEHAUS_LASTIPCHECK_ENABLED", "false")));
        assert!(toggle.is_enabled(&req));
    }

    #[test]
    fn test_toggle_override_in_both_directions() {
        let on = FilterToggle::new("last_ip_check", true, true);
        assert!(!on.is_enabled(&request(Some(("X_WAFFLEHAUS_LASTIPCHECK_ENABLED", "false")))));

        let off = FilterToggle::new("last_ip_check", false, true);
        assert!(off.is_enabled(&request(Some(("X_WAFFLEHAUS_LASTIPCHECK_ENABLED", "yes")))));
        assert!(!off.is_enabled(&request(None)));
    }

    #[test]
    fn test_toggle_unparseable_header_uses_config() {
        let toggle = FilterToggle::new("last_ip_check", true, true);
        let req = request(Some(("X_WAFFLEHAUS_LASTIPCHECK_ENABLED", "perhaps")));
        assert!(toggle.is_enabled(&req));
    }

    #[tokio::test]
    async fn test_buffer_body_limit() {
        let err = buffer_body(Body::from(vec![0u8; 64]), 16).await.unwrap_err();
        assert!(matches!(err, AppError::Body(_)));

        let bytes = buffer_body(Body::from("{}"), 16).await.unwrap();
        assert_eq!(&bytes[..], b"{}");
    }

    #[tokio::test]
    async fn test_unreadable_response_is_bad_gateway() {
        let err = buffer_response_body(Body::from(vec![0u8; 64]), 16).await.unwrap_err();
        assert!(matches!(err, AppError::Upstream(_)));
        assert_eq!(err.into_response().status(), StatusCode::BAD_GATEWAY);
    }
}
