//! Forwarding of every non-local request to Neutron.
//!
//! The request reaching this handler has already been through the filter
//! chain, so its body may have been rewritten. Method, path, query, headers
//! and body are sent to `UPSTREAM_URL` unchanged apart from hop-by-hop
//! headers, and the upstream answer is returned as-is.

use std::time::Instant;

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderName, Request, Response};
use tracing::{debug, error};

use crate::error::{AppError, AppResult};
use crate::metrics;
use crate::middleware::buffer_body;
use crate::state::AppState;

/// Connection-scoped headers (RFC 9110 §7.6.1) plus those the client
/// recomputes.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "host",
    "content-length",
];

pub fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(&name.as_str())
}

fn end_to_end(headers: &HeaderMap) -> HeaderMap {
    headers
        .iter()
        .filter(|(name, _)| !is_hop_by_hop(name))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

/// Fallback handler: send the request to Neutron and relay the reply.
pub async fn forward(State(state): State<AppState>, req: Request<Body>) -> AppResult<Response<Body>> {
    let start = Instant::now();
    let (parts, body) = req.into_parts();

    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let url = format!(
        "{}{}",
        state.config.upstream_url.trim_end_matches('/'),
        path_and_query
    );

    let bytes = buffer_body(body, state.config.max_request_body_size).await?;

    debug!(method = %parts.method, url = %url, body_bytes = bytes.len(), "Forwarding to upstream");

    let upstream = state
        .http
        .request(parts.method.clone(), &url)
        .headers(end_to_end(&parts.headers))
        .body(bytes)
        .send()
        .await
        .map_err(|e| {
            metrics::record_upstream_duration(parts.method.as_str(), 0, start.elapsed().as_secs_f64());
            error!(method = %parts.method, url = %url, error = %e, "Upstream request failed");
            if e.is_timeout() {
                AppError::UpstreamTimeout(url.clone())
            } else {
                AppError::Upstream(e.to_string())
            }
        })?;

    let status = upstream.status();
    let headers = end_to_end(upstream.headers());
    let body = upstream
        .bytes()
        .await
        .map_err(|e| AppError::Upstream(format!("reading response: {e}")))?;

    metrics::record_upstream_duration(
        parts.method.as_str(),
        status.as_u16(),
        start.elapsed().as_secs_f64(),
    );

    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    Ok(response)
}
