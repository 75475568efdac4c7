//! Trusted shared-network filter.
//!
//! Network listings that ask about sharing (`GET /v2.0/networks?shared=...`)
//! are post-processed so callers only see the shared networks they are
//! meant to. For each network in the upstream response, in order:
//!
//! 1. id in the `X_NETWORK_BLACKLIST` header → removed
//! 2. id in the configured trusted list → kept
//! 3. `shared: true` and id not in `X_NETWORK_WHITELIST` → removed
//! 4. otherwise kept
//!
//! Non-2xx and non-JSON responses are returned untouched.

use std::collections::HashSet;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::{HeaderMap, Request, Response};
use serde_json::Value;
use tower::{Layer, Service};
use tracing::{debug, warn};

use super::{FilterToggle, buffer_response_body, header_str, set_content_length};
use crate::config::SharedNetworksConfig;
use crate::metrics::{self, outcome};
use crate::resource::ResourceConfig;
use crate::utils::{query_has_key, split_list};

const FILTER: &str = "trusted_shared_network";

pub const WHITELIST_HEADER: &str = "x_network_whitelist";
pub const BLACKLIST_HEADER: &str = "x_network_blacklist";

/// Upper bound on a network listing read back from Neutron.
const MAX_LISTING_BYTES: usize = 64 * 1024 * 1024;

/// Per-request visibility lists taken from headers.
#[derive(Debug, Default)]
pub struct Visibility<'a> {
    pub whitelist: HashSet<&'a str>,
    pub blacklist: HashSet<&'a str>,
}

impl<'a> Visibility<'a> {
    pub fn from_headers(headers: &'a HeaderMap) -> Self {
        let list = |name| {
            header_str(headers, name)
                .map(|v| split_list(v).collect())
                .unwrap_or_default()
        };
        Self {
            whitelist: list(WHITELIST_HEADER),
            blacklist: list(BLACKLIST_HEADER),
        }
    }
}

/// Drop networks the caller may not see. Returns how many were removed.
pub fn filter_networks(networks: &mut Vec<Value>, trusted: &HashSet<String>, visibility: &Visibility<'_>) -> usize {
    let before = networks.len();
    networks.retain(|network| {
        let id = network.get("id").and_then(Value::as_str).unwrap_or_default();
        if visibility.blacklist.contains(id) {
            return false;
        }
        if trusted.contains(id) {
            return true;
        }
        let shared = network.get("shared").and_then(Value::as_bool) == Some(true);
        !shared || visibility.whitelist.contains(id)
    });
    before - networks.len()
}

#[derive(Debug)]
struct SharedNetworkSettings {
    toggle: FilterToggle,
    resources: ResourceConfig,
    trusted: HashSet<String>,
    testing: bool,
}

impl SharedNetworkSettings {
    fn applies_to<B>(&self, req: &Request<B>) -> bool {
        !self.testing
            && self.toggle.is_enabled(req)
            && self.resources.matches_request(req)
            && query_has_key(req.uri().query(), "shared")
    }
}

#[derive(Clone)]
pub struct TrustedSharedNetworkLayer {
    settings: Arc<SharedNetworkSettings>,
}

impl TrustedSharedNetworkLayer {
    pub fn new(config: &SharedNetworksConfig, runtime_override: bool) -> Self {
        Self {
            settings: Arc::new(SharedNetworkSettings {
                toggle: FilterToggle::new(FILTER, config.enabled, runtime_override),
                resources: config.resources.clone(),
                trusted: config.trusted.iter().cloned().collect(),
                testing: config.testing,
            }),
        }
    }
}

impl<S> Layer<S> for TrustedSharedNetworkLayer {
    type Service = TrustedSharedNetworkService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TrustedSharedNetworkService {
            inner,
            settings: self.settings.clone(),
        }
    }
}

#[derive(Clone)]
pub struct TrustedSharedNetworkService<S> {
    inner: S,
    settings: Arc<SharedNetworkSettings>,
}

impl<S> Service<Request<Body>> for TrustedSharedNetworkService<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let settings = self.settings.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            if !settings.applies_to(&req) {
                metrics::record_filter_decision(FILTER, outcome::SKIPPED);
                return inner.call(req).await;
            }

            let request_headers = req.headers().clone();
            let response = inner.call(req).await?;

            if !response.status().is_success() {
                metrics::record_filter_decision(FILTER, outcome::PASSED);
                return Ok(response);
            }

            let (mut parts, body) = response.into_parts();
            let bytes = match buffer_response_body(body, MAX_LISTING_BYTES).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(error = %e, "Network listing could not be read");
                    return Ok(axum::response::IntoResponse::into_response(e));
                }
            };

            let mut listing: Value = match serde_json::from_slice(&bytes) {
                Ok(value) => value,
                Err(_) => {
                    debug!("Network listing is not JSON, returning unchanged");
                    metrics::record_filter_decision(FILTER, outcome::PASSED);
                    return Ok(Response::from_parts(parts, Body::from(bytes)));
                }
            };

            let Some(networks) = listing.get_mut("networks").and_then(Value::as_array_mut) else {
                metrics::record_filter_decision(FILTER, outcome::PASSED);
                return Ok(Response::from_parts(parts, Body::from(bytes)));
            };

            let visibility = Visibility::from_headers(&request_headers);
            let removed = filter_networks(networks, &settings.trusted, &visibility);
            if removed == 0 {
                metrics::record_filter_decision(FILTER, outcome::PASSED);
                return Ok(Response::from_parts(parts, Body::from(bytes)));
            }

            debug!(removed, "Shared networks hidden from listing");
            metrics::record_filter_decision(FILTER, outcome::REWRITTEN);

            let rewritten = listing.to_string().into_bytes();
            set_content_length(&mut parts.headers, rewritten.len());
            Ok(Response::from_parts(parts, Body::from(rewritten)))
        })
    }
}
