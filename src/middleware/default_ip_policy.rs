//! Default IP policy for subnet creation.
//!
//! Rewrites the `allocation_pools` of every subnet in a matching request so
//! that the first few and the last address of the CIDR are never handed out.
//! Both body shapes Neutron accepts are handled:
//!
//! ```json
//! {"subnet":  {"cidr": "192.168.199.0/24", "ip_version": 4}}
//! {"subnets": [{"cidr": "10.0.0.0/24", "ip_version": 4, "allocation_pools": [...]}]}
//! ```
//!
//! A body with neither key is forwarded as-is so Neutron can report the
//! problem. Invalid JSON and invalid subnets are answered with 400 here.
//!
//! The address arithmetic lives in [`crate::allocation`]; this module only
//! owns the HTTP plumbing.

use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::{Body, Bytes};
use axum::http::{Request, Response};
use axum::response::IntoResponse;
use serde_json::{Map, Value};
use tower::{Layer, Service};
use tracing::{debug, info, warn};

use super::{FilterToggle, buffer_body, set_content_length};
use crate::allocation::{EmptyPoolPolicy, apply_default_policy};
use crate::config::IpPolicyConfig;
use crate::error::AppError;
use crate::metrics::{self, outcome};
use crate::resource::ResourceConfig;

const FILTER: &str = "default_ip_policy";

/// Apply the policy to every subnet in a request body.
///
/// Returns `Ok(None)` when the body carries neither `subnet` nor `subnets`.
pub fn rewrite_subnets(bytes: &[u8], policy: EmptyPoolPolicy) -> Result<Option<Vec<u8>>, AppError> {
    let mut body: Value = serde_json::from_slice(bytes)?;

    let Some(object) = body.as_object_mut() else {
        return Ok(None);
    };

    // A null key counts as absent
    if let Some(subnets) = object.get_mut("subnets").filter(|v| !v.is_null()) {
        let list = subnets
            .as_array_mut()
            .ok_or_else(|| AppError::BadRequest("'subnets' must be a list".to_string()))?;
        for subnet in list.iter_mut() {
            *subnet = rewrite_one(subnet, policy)?;
        }
    } else if let Some(subnet) = object.get_mut("subnet").filter(|v| !v.is_null()) {
        *subnet = rewrite_one(subnet, policy)?;
    } else {
        return Ok(None);
    }

    Ok(Some(serde_json::to_vec(&body)?))
}

fn rewrite_one(subnet: &Value, policy: EmptyPoolPolicy) -> Result<Value, AppError> {
    let object: Map<String, Value> = subnet
        .as_object()
        .cloned()
        .ok_or_else(|| AppError::BadRequest("subnet must be an object".to_string()))?;
    Ok(Value::Object(apply_default_policy(object, policy)?))
}

#[derive(Debug)]
struct DefaultIpPolicySettings {
    toggle: FilterToggle,
    resources: ResourceConfig,
    empty_pools: EmptyPoolPolicy,
    max_body_bytes: usize,
}

#[derive(Clone)]
pub struct DefaultIpPolicyLayer {
    settings: Arc<DefaultIpPolicySettings>,
}

impl DefaultIpPolicyLayer {
    pub fn new(config: &IpPolicyConfig, runtime_override: bool, max_body_bytes: usize) -> Self {
        info!(
            enabled = config.enabled,
            resources = %config.resources,
            empty_pools = ?config.empty_pools,
            "Default IP policy filter configured"
        );
        Self {
            settings: Arc::new(DefaultIpPolicySettings {
                toggle: FilterToggle::new(FILTER, config.enabled, runtime_override),
                resources: config.resources.clone(),
                empty_pools: config.empty_pools,
                max_body_bytes,
            }),
        }
    }
}

impl<S> Layer<S> for DefaultIpPolicyLayer {
    type Service = DefaultIpPolicyService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        DefaultIpPolicyService {
            inner,
            settings: self.settings.clone(),
        }
    }
}

#[derive(Clone)]
pub struct DefaultIpPolicyService<S> {
    inner: S,
    settings: Arc<DefaultIpPolicySettings>,
}

impl<S> Service<Request<Body>> for DefaultIpPolicyService<S>
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
            if !settings.toggle.is_enabled(&req) || !settings.resources.matches_request(&req) {
                metrics::record_filter_decision(FILTER, outcome::SKIPPED);
                return inner.call(req).await;
            }

            let (mut parts, body) = req.into_parts();
            let bytes = match buffer_body(body, settings.max_body_bytes).await {
                Ok(bytes) => bytes,
                Err(e) => return Ok(e.into_response()),
            };

            let body = match rewrite_subnets(&bytes, settings.empty_pools) {
                Ok(Some(rewritten)) => {
                    debug!(
                        path = %parts.uri.path(),
                        before = bytes.len(),
                        after = rewritten.len(),
                        "Allocation pools rewritten"
                    );
                    set_content_length(&mut parts.headers, rewritten.len());
                    metrics::record_filter_decision(FILTER, outcome::REWRITTEN);
                    Bytes::from(rewritten)
                }
                Ok(None) => {
                    debug!(path = %parts.uri.path(), "No subnet in body, forwarding unchanged");
                    metrics::record_filter_decision(FILTER, outcome::PASSED);
                    bytes
                }
                Err(e) => {
                    warn!(path = %parts.uri.path(), error = %e, "Subnet request refused");
                    metrics::record_filter_decision(FILTER, outcome::REJECTED);
                    return Ok(e.into_response());
                }
            };

            inner.call(Request::from_parts(parts, Body::from(body))).await
        })
    }
}
