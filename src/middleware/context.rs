//! Request context filter.
//!
//! Builds a [`RequestContext`] from the identity headers set by the auth
//! layer in front of Neutron and stores it in request extensions, where
//! later filters and the proxy can read it through [`RequestContextExt`].
//!
//! # Headers
//!
//! | Header          | Field         |
//! |-----------------|---------------|
//! | `X_USER_ID`     | `user_id`     |
//! | `X_TENANT_ID`   | `tenant_id`   |
//! | `X_TENANT_NAME` | `tenant_name` |
//! | `X_ROLES`       | `roles`       |
//! | `x-request-id`  | `request_id`  |
//!
//! A request without both user and tenant is either refused (when
//! `require_auth_info` is set) or given an elevated service context with no
//! user, mirroring how Neutron treats internal calls.

use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::{HeaderMap, Request, Response};
use axum::response::IntoResponse;
use serde::Serialize;
use tower::{Layer, Service};
use tracing::{debug, warn};

use super::{FilterToggle, header_str};
use crate::config::{ContextConfig, ContextStrategy};
use crate::error::AppError;
use crate::metrics::{self, outcome};
use crate::middleware::request_id::REQUEST_ID_HEADER;
use crate::utils::split_list;

const FILTER: &str = "context";

pub const USER_ID_HEADER: &str = "x_user_id";
pub const TENANT_ID_HEADER: &str = "x_tenant_id";
pub const TENANT_NAME_HEADER: &str = "x_tenant_name";
pub const ROLES_HEADER: &str = "x_roles";

/// Identity attached to a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestContext {
    pub request_id: Option<String>,
    pub user_id: Option<String>,
    pub tenant_id: Option<String>,
    pub tenant_name: Option<String>,
    /// In header order, de-duplicated.
    pub roles: Vec<String>,
    pub is_admin: bool,
    pub is_advsvc: bool,
}

impl RequestContext {
    /// Whether this is the elevated context given to callers without identity.
    pub fn is_service(&self) -> bool {
        self.user_id.is_none() && self.is_admin
    }
}

/// Roles from a comma-separated header: trimmed, empties dropped, first
/// occurrence wins.
pub fn parse_roles(value: &str) -> Vec<String> {
    let mut roles: Vec<String> = Vec::new();
    for role in split_list(value) {
        if !roles.iter().any(|r| r == role) {
            roles.push(role.to_string());
        }
    }
    roles
}

#[derive(Debug)]
struct ContextSettings {
    toggle: FilterToggle,
    strategy: ContextStrategy,
    require_auth_info: bool,
    admin_roles: Vec<String>,
    advsvc_role: String,
}

impl ContextSettings {
    /// `Ok(None)` when the strategy attaches nothing.
    fn build(&self, headers: &HeaderMap) -> Result<Option<RequestContext>, AppError> {
        match self.strategy {
            ContextStrategy::None => Ok(None),
            ContextStrategy::Neutron => self.neutron_context(headers).map(Some),
        }
    }

    fn neutron_context(&self, headers: &HeaderMap) -> Result<RequestContext, AppError> {
        let owned = |name: &str| header_str(headers, name).map(str::to_string);

        let roles = owned(ROLES_HEADER)
            .map(|r| parse_roles(&r))
            .unwrap_or_default();
        let request_id = owned(REQUEST_ID_HEADER);

        match (owned(USER_ID_HEADER), owned(TENANT_ID_HEADER)) {
            (Some(user_id), Some(tenant_id)) => {
                let is_admin = roles.iter().any(|r| self.admin_roles.contains(r));
                let is_advsvc = roles.iter().any(|r| *r == self.advsvc_role);
                Ok(RequestContext {
                    request_id,
                    user_id: Some(user_id),
                    tenant_id: Some(tenant_id),
                    tenant_name: owned(TENANT_NAME_HEADER),
                    roles,
                    is_admin,
                    is_advsvc,
                })
            }
            _ if self.require_auth_info => Err(AppError::Forbidden(
                "X_USER_ID and X_TENANT_ID are required".to_string(),
            )),
            _ => Ok(RequestContext {
                request_id,
                user_id: None,
                tenant_id: None,
                tenant_name: None,
                roles,
                is_admin: true,
                is_advsvc: false,
            }),
        }
    }
}

#[derive(Clone)]
pub struct ContextLayer {
    settings: Arc<ContextSettings>,
}

impl ContextLayer {
    pub fn new(config: &ContextConfig, runtime_override: bool) -> Self {
        Self {
            settings: Arc::new(ContextSettings {
                toggle: FilterToggle::new(FILTER, config.enabled, runtime_override),
                strategy: config.strategy,
                require_auth_info: config.require_auth_info,
                admin_roles: config.admin_roles.clone(),
                advsvc_role: config.advsvc_role.clone(),
            }),
        }
    }
}

impl<S> Layer<S> for ContextLayer {
    type Service = ContextService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ContextService {
            inner,
            settings: self.settings.clone(),
        }
    }
}

#[derive(Clone)]
pub struct ContextService<S> {
    inner: S,
    settings: Arc<ContextSettings>,
}

impl<S> Service<Request<Body>> for ContextService<S>
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

    fn call(&mut self, mut req: Request<Body>) -> Self::Future {
        let settings = self.settings.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            if !settings.toggle.is_enabled(&req) {
                metrics::record_filter_decision(FILTER, outcome::SKIPPED);
                return inner.call(req).await;
            }

            match settings.build(req.headers()) {
                Ok(Some(context)) => {
                    debug!(
                        request_id = ?context.request_id,
                        tenant_id = ?context.tenant_id,
                        user_id = ?context.user_id,
                        is_admin = context.is_admin,
                        roles = ?context.roles,
                        "Request context attached"
                    );
                    req.extensions_mut().insert(context);
                    metrics::record_filter_decision(FILTER, outcome::PASSED);
                }
                Ok(None) => metrics::record_filter_decision(FILTER, outcome::SKIPPED),
                Err(e) => {
                    warn!(path = %req.uri().path(), "Request without identity refused");
                    metrics::record_filter_decision(FILTER, outcome::REJECTED);
                    return Ok(e.into_response());
                }
            }

            inner.call(req).await
        })
    }
}

/// Extension trait to read the context attached by [`ContextLayer`].
pub trait RequestContextExt {
    fn request_context(&self) -> Option<&RequestContext>;
}

impl<B> RequestContextExt for Request<B> {
    fn request_context(&self) -> Option<&RequestContext> {
        self.extensions().get::<RequestContext>()
    }
}
