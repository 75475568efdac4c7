//! Refuses port updates that would leave a port with no fixed IPs.
//!
//! Applies to `PUT` requests on a `ports` path with a non-empty body. A body
//! of the form `{"port": {"fixed_ips": []}}` is answered with 403 before it
//! reaches Neutron; every other body is forwarded untouched.

use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::{Body, Bytes};
use axum::http::header::CONTENT_LENGTH;
use axum::http::{Method, Request, Response};
use axum::response::IntoResponse;
use serde_json::Value;
use tower::{Layer, Service};
use tracing::{debug, warn};

use super::{FilterToggle, buffer_body, header_str};
use crate::config::LastIpCheckConfig;
use crate::error::AppError;
use crate::metrics::{self, outcome};
use crate::middleware::context::{TENANT_ID_HEADER, USER_ID_HEADER};

const FILTER: &str = "last_ip_check";

/// Whether a path names the `ports` collection or a member of it.
fn is_ports_path(path: &str) -> bool {
    path.split('/')
        .any(|segment| segment == "ports" || segment.starts_with("ports."))
}

/// Cheap request-line checks done before the body is read.
fn applies_to<B>(req: &Request<B>) -> bool {
    if req.method() != Method::PUT || !is_ports_path(req.uri().path()) {
        return false;
    }
    // An explicit zero length means there is nothing to inspect
    header_str(req.headers(), CONTENT_LENGTH.as_str()) != Some("0")
}

/// Inspect a buffered body. `Ok(())` means forward it.
fn check_body(bytes: &Bytes) -> Result<(), AppError> {
    if bytes.is_empty() {
        return Ok(());
    }

    let body: Value = serde_json::from_slice(bytes)?;
    let fixed_ips = body
        .get("port")
        .and_then(|port| port.get("fixed_ips"))
        .and_then(Value::as_array);

    match fixed_ips {
        Some(ips) if ips.is_empty() => Err(AppError::Forbidden(
            "fixed_ips cannot be empty".to_string(),
        )),
        _ => Ok(()),
    }
}

#[derive(Debug)]
struct LastIpCheckSettings {
    toggle: FilterToggle,
    max_body_bytes: usize,
}

#[derive(Clone)]
pub struct LastIpCheckLayer {
    settings: Arc<LastIpCheckSettings>,
}

impl LastIpCheckLayer {
    pub fn new(config: &LastIpCheckConfig, runtime_override: bool, max_body_bytes: usize) -> Self {
        Self {
            settings: Arc::new(LastIpCheckSettings {
                toggle: FilterToggle::new(FILTER, config.enabled, runtime_override),
                max_body_bytes,
            }),
        }
    }
}

impl<S> Layer<S> for LastIpCheckLayer {
    type Service = LastIpCheckService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        LastIpCheckService {
            inner,
            settings: self.settings.clone(),
        }
    }
}

#[derive(Clone)]
pub struct LastIpCheckService<S> {
    inner: S,
    settings: Arc<LastIpCheckSettings>,
}

impl<S> Service<Request<Body>> for LastIpCheckService<S>
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
            if !settings.toggle.is_enabled(&req) || !applies_to(&req) {
                metrics::record_filter_decision(FILTER, outcome::SKIPPED);
                return inner.call(req).await;
            }

            let tenant_id = header_str(req.headers(), TENANT_ID_HEADER).map(str::to_string);
            let user_id = header_str(req.headers(), USER_ID_HEADER).map(str::to_string);

            let (parts, body) = req.into_parts();
            let bytes = match buffer_body(body, settings.max_body_bytes).await {
                Ok(bytes) => bytes,
                Err(e) => return Ok(e.into_response()),
            };

            if let Err(e) = check_body(&bytes) {
                warn!(
                    path = %parts.uri.path(),
                    tenant_id = ?tenant_id,
                    user_id = ?user_id,
                    error = %e,
                    "Port update refused"
                );
                metrics::record_filter_decision(FILTER, outcome::REJECTED);
                return Ok(e.into_response());
            }

            debug!(path = %parts.uri.path(), "Port update keeps its fixed IPs");
            metrics::record_filter_decision(FILTER, outcome::PASSED);
            inner.call(Request::from_parts(parts, Body::from(bytes))).await
        })
    }
}
