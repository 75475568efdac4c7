//! Nova interaction filter.
//!
//! Keeps Nova's view of a server's virtual interfaces in step with Neutron
//! ports. After Neutron accepts a port change, Nova's
//! `admin-virtual-interfaces` API is told about it and the outcome is
//! reported back to the caller inside the response body:
//!
//! ```text
//! POST/PUT ports ──► Neutron ──200/204──► Nova "create" ──► body + nova_callback
//! DELETE ports/{id} ──► Neutron GET port ──► Neutron DELETE ──► Nova "delete"
//!                          │ error                              ──► body + neutron_callback
//!                          ▼                                          + nova_callback
//!                   500 neutron_callback
//! ```
//!
//! A failed Nova call turns the response into a 500 while keeping the
//! Neutron body, since the port change itself has already happened.

use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::response::Parts;
use axum::http::{Method, Request, Response, StatusCode};
use axum::response::IntoResponse;
use serde_json::{Map, Value, json};
use tower::{Layer, Service};
use tracing::{debug, info, warn};

use super::{FilterToggle, buffer_response_body, json_response};
use crate::clients::{CallbackReply, ComputeApi, InterfaceAction, VirtualInterfaceRequest};
use crate::config::NovaInteractionConfig;
use crate::metrics::{self, outcome};
use crate::resource::ResourceConfig;

const FILTER: &str = "nova_interaction";

/// Upper bound on a port body read back from Neutron.
const MAX_PORT_RESPONSE_BYTES: usize = 16 * 1024 * 1024;

/// Which kind of networking object a matched request is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Ports,
    IpAddresses,
}

impl Target {
    fn of(path: &str) -> Option<Self> {
        let path = path.to_ascii_lowercase();
        if path.contains("/ports") {
            Some(Self::Ports)
        } else if path.contains("/ip_addresses") {
            Some(Self::IpAddresses)
        } else {
            None
        }
    }
}

/// Segment after `ports` in a request path.
pub fn port_id_from_path(path: &str) -> Option<&str> {
    let mut segments = path.split('/');
    segments.find(|s| *s == "ports")?;
    segments
        .next()
        .map(|id| id.split_once('.').map_or(id, |(id, _)| id))
        .filter(|id| !id.is_empty())
}

/// The port fields Nova needs, read from a Neutron `{"port": {...}}` body.
#[derive(Debug, Clone, PartialEq)]
pub struct PortDetails {
    pub id: Option<String>,
    pub tenant_id: Option<String>,
    pub instance_id: Option<String>,
    pub mac_address: Value,
    pub fixed_ips: Value,
    pub network_id: Value,
}

impl PortDetails {
    pub fn from_body(body: &Value) -> Option<Self> {
        let port = body.get("port")?.as_object()?;
        let text = |key: &str| {
            port.get(key)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        let raw = |key: &str| port.get(key).cloned().unwrap_or(Value::Null);

        Some(Self {
            id: text("id"),
            tenant_id: text("tenant_id"),
            instance_id: text("instance_id"),
            mac_address: raw("mac_address"),
            fixed_ips: raw("fixed_ips"),
            network_id: raw("network_id"),
        })
    }

    /// `None` when the port is not attached to an instance.
    fn interface_request(&self, action: InterfaceAction, port_id: &str) -> Option<VirtualInterfaceRequest> {
        Some(VirtualInterfaceRequest {
            action,
            tenant_id: self.tenant_id.clone()?,
            instance_id: self.instance_id.clone()?,
            port_id: port_id.to_string(),
            address: self.mac_address.clone(),
            fixed_ips: self.fixed_ips.clone(),
            network_id: self.network_id.clone(),
        })
    }
}

fn is_callback_success(status: StatusCode) -> bool {
    matches!(status, StatusCode::OK | StatusCode::NO_CONTENT)
}

/// Body of a failed reply, or the error text when there was no reply.
fn callback_error<E: std::fmt::Display>(result: &Result<CallbackReply, E>) -> Value {
    match result {
        Ok(reply) => reply.body.clone(),
        Err(e) => Value::String(e.to_string()),
    }
}

struct NovaInteractionSettings {
    toggle: FilterToggle,
    resources: ResourceConfig,
    api: Arc<dyn ComputeApi>,
}

impl NovaInteractionSettings {
    /// Tell Nova about the port and record the outcome in `body`.
    ///
    /// Returns the status the caller should see.
    async fn notify_nova(
        &self,
        status: StatusCode,
        body: &mut Map<String, Value>,
        request: Option<VirtualInterfaceRequest>,
    ) -> StatusCode {
        let Some(request) = request else {
            debug!("Port has no instance, skipping Nova callback");
            return status;
        };

        let result = self.api.admin_virtual_interface(&request).await;
        match &result {
            Ok(reply) if reply.is_success() => {
                metrics::record_callback("nova", "success");
                info!(
                    action = %request.action,
                    port_id = %request.port_id,
                    instance_id = %request.instance_id,
                    "Nova virtual interface updated"
                );
                body.insert(
                    "nova_callback".to_string(),
                    json!({"instance_id": request.instance_id, "status": "success"}),
                );
                status
            }
            _ => {
                metrics::record_callback("nova", "error");
                warn!(
                    action = %request.action,
                    port_id = %request.port_id,
                    instance_id = %request.instance_id,
                    error = %callback_error(&result),
                    "Nova virtual interface update failed"
                );
                body.insert(
                    "nova_callback".to_string(),
                    json!({
                        "instance_id": request.instance_id,
                        "status": "error",
                        "error": callback_error(&result),
                    }),
                );
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// Re-encode an annotated body onto the upstream response head.
fn annotated(mut parts: Parts, status: StatusCode, body: Map<String, Value>) -> Response<Body> {
    // A 204 cannot carry the annotations
    parts.status = if status == StatusCode::NO_CONTENT {
        StatusCode::OK
    } else {
        status
    };
    let mut response = json_response(parts.status, &Value::Object(body));
    let json_headers = std::mem::take(response.headers_mut());
    parts.headers.extend(json_headers);
    parts.headers.remove(axum::http::header::CONTENT_LENGTH);
    let (_, body) = response.into_parts();
    Response::from_parts(parts, body)
}

#[derive(Clone)]
pub struct NovaInteractionLayer {
    settings: Arc<NovaInteractionSettings>,
}

impl NovaInteractionLayer {
    pub fn new(config: &NovaInteractionConfig, runtime_override: bool, api: Arc<dyn ComputeApi>) -> Self {
        info!(
            enabled = config.enabled,
            resources = %config.resources,
            nova = %config.nova.base_url(),
            neutron = %config.neutron.base_url(),
            "Nova interaction filter configured"
        );
        Self {
            settings: Arc::new(NovaInteractionSettings {
                toggle: FilterToggle::new(FILTER, config.enabled, runtime_override),
                resources: config.resources.clone(),
                api,
            }),
        }
    }
}

impl<S> Layer<S> for NovaInteractionLayer {
    type Service = NovaInteractionService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        NovaInteractionService {
            inner,
            settings: self.settings.clone(),
        }
    }
}

#[derive(Clone)]
pub struct NovaInteractionService<S> {
    inner: S,
    settings: Arc<NovaInteractionSettings>,
}

impl<S> Service<Request<Body>> for NovaInteractionService<S>
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

            if Target::of(req.uri().path()) != Some(Target::Ports) {
                // ip_addresses changes carry no Nova callback yet
                metrics::record_filter_decision(FILTER, outcome::PASSED);
                return inner.call(req).await;
            }

            match *req.method() {
                Method::POST | Method::PUT => {
                    let response = inner.call(req).await?;
                    Ok(after_port_write(&settings, response).await)
                }
                Method::DELETE => {
                    let Some(port_id) = port_id_from_path(req.uri().path()).map(str::to_string) else {
                        metrics::record_filter_decision(FILTER, outcome::PASSED);
                        return inner.call(req).await;
                    };

                    let lookup = settings.api.get_port(&port_id).await;
                    let details = match &lookup {
                        Ok(reply) if reply.is_success() => {
                            metrics::record_callback("neutron", "success");
                            PortDetails::from_body(&reply.body)
                        }
                        _ => {
                            metrics::record_callback("neutron", "error");
                            metrics::record_filter_decision(FILTER, outcome::REJECTED);
                            warn!(port_id = %port_id, error = %callback_error(&lookup), "Port lookup before delete failed");
                            return Ok(json_response(
                                StatusCode::INTERNAL_SERVER_ERROR,
                                &json!({"neutron_callback": {
                                    "port_id": port_id,
                                    "status": "error",
                                    "error": callback_error(&lookup),
                                }}),
                            ));
                        }
                    };

                    let response = inner.call(req).await?;
                    Ok(after_port_delete(&settings, response, port_id, details).await)
                }
                _ => {
                    metrics::record_filter_decision(FILTER, outcome::PASSED);
                    inner.call(req).await
                }
            }
        })
    }
}

async fn after_port_write(settings: &NovaInteractionSettings, response: Response<Body>) -> Response<Body> {
    if !is_callback_success(response.status()) {
        metrics::record_filter_decision(FILTER, outcome::PASSED);
        return response;
    }

    let (parts, body) = response.into_parts();
    let bytes = match buffer_response_body(body, MAX_PORT_RESPONSE_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => return e.into_response(),
    };

    let parsed = serde_json::from_slice::<Value>(&bytes).ok();
    let details = parsed.as_ref().and_then(PortDetails::from_body);
    let (Some(Value::Object(mut body)), Some(details)) = (parsed, details) else {
        warn!("Port response has no port object, skipping Nova callback");
        metrics::record_filter_decision(FILTER, outcome::PASSED);
        return Response::from_parts(parts, Body::from(bytes));
    };

    let Some(port_id) = details.id.clone() else {
        warn!("Port response has no port id, skipping Nova callback");
        metrics::record_filter_decision(FILTER, outcome::PASSED);
        return Response::from_parts(parts, Body::from(bytes));
    };

    let request = details.interface_request(InterfaceAction::Create, &port_id);
    let status = settings.notify_nova(parts.status, &mut body, request).await;
    metrics::record_filter_decision(FILTER, outcome::REWRITTEN);
    annotated(parts, status, body)
}

async fn after_port_delete(
    settings: &NovaInteractionSettings,
    response: Response<Body>,
    port_id: String,
    details: Option<PortDetails>,
) -> Response<Body> {
    if !is_callback_success(response.status()) {
        metrics::record_filter_decision(FILTER, outcome::PASSED);
        return response;
    }

    let (parts, body) = response.into_parts();
    let bytes = match buffer_response_body(body, MAX_PORT_RESPONSE_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => return e.into_response(),
    };

    // Deletes normally answer 204 with no body
    let mut body = match serde_json::from_slice::<Value>(&bytes) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    };
    body.insert(
        "neutron_callback".to_string(),
        json!({"port_id": port_id, "status": "success"}),
    );

    let request = details.and_then(|d| d.interface_request(InterfaceAction::Delete, &port_id));
    let status = settings.notify_nova(parts.status, &mut body, request).await;
    metrics::record_filter_decision(FILTER, outcome::REWRITTEN);
    annotated(parts, status, body)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::clients::{CallbackError, CallbackFuture};
    use crate::config::Config;
    use crate::resource::parse_resources;
    use std::convert::Infallible;
    use std::sync::Mutex;
    use tower::ServiceExt;

    /// Records every Nova call and answers with canned replies.
    struct MockCompute {
        port: Result<CallbackReply, CallbackError>,
        nova: Result<CallbackReply, CallbackError>,
        nova_calls: Mutex<Vec<VirtualInterfaceRequest>>,
    }

    impl MockCompute {
        fn new(nova_status: u16) -> Self {
            Self {
                port: Ok(CallbackReply {
                    status: 200,
                    body: port_body("port-1"),
                }),
                nova: Ok(CallbackReply {
                    status: nova_status,
                    body: json!({"nova": "says hi"}),
                }),
                nova_calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<VirtualInterfaceRequest> {
            self.nova_calls.lock().unwrap().clone()
        }
    }

    impl ComputeApi for MockCompute {
        fn get_port<'a>(&'a self, _port_id: &'a str) -> CallbackFuture<'a> {
            let reply = self.port.clone();
            Box::pin(async move { reply })
        }

        fn admin_virtual_interface<'a>(&'a self, request: &'a VirtualInterfaceRequest) -> CallbackFuture<'a> {
            self.nova_calls.lock().unwrap().push(request.clone());
            let reply = self.nova.clone();
            Box::pin(async move { reply })
        }
    }

    fn port_body(id: &str) -> Value {
        json!({"port": {
            "id": id,
            "tenant_id": "tenant-1",
            "instance_id": "instance-1",
            "network_id": "net-1",
            "mac_address": "BC:76:4E:11:59:5C",
            "fixed_ips": [{"subnet_id": "sub-1", "ip_address": "10.0.0.2"}]
        }})
    }

    /// Neutron stand-in: writes echo a port, deletes answer 204.
    async fn neutron(req: Request<Body>) -> Result<Response<Body>, Infallible> {
        let response = match *req.method() {
            Method::DELETE => {
                let mut response = Response::new(Body::empty());
                *response.status_mut() = StatusCode::NO_CONTENT;
                response
            }
            _ if req.uri().path().ends_with("/missing") => {
                let mut response = Response::new(Body::from(r#"{"NeutronError":"not found"}"#));
                *response.status_mut() = StatusCode::NOT_FOUND;
                response
            }
            _ => Response::new(Body::from(port_body("port-1").to_string())),
        };
        Ok(response)
    }

    fn config() -> NovaInteractionConfig {
        NovaInteractionConfig {
            enabled: true,
            resources: parse_resources("POST /v2.0/ports,PUT DELETE /v2.0/ports/{port_id},POST /v2.0/ip_addresses")
                .unwrap(),
            ..Config::default().nova_interaction
        }
    }

    async fn send(api: Arc<MockCompute>, method: &str, path: &str) -> (StatusCode, Value) {
        let service = NovaInteractionLayer::new(&config(), false, api).layer(tower::service_fn(neutron));
        let req = Request::builder()
            .method(method)
            .uri(path)
            .body(Body::from(r#"{"port": {}}"#))
            .unwrap();
        let response = service.oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), 1 << 16).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    #[test]
    fn test_port_id_from_path() {
        assert_eq!(port_id_from_path("/v2.0/ports/abc"), Some("abc"));
        assert_eq!(port_id_from_path("/v2.0/ports/abc.json"), Some("abc"));
        assert_eq!(port_id_from_path("/v2.0/ports"), None);
        assert_eq!(port_id_from_path("/v2.0/ports/"), None);
        assert_eq!(port_id_from_path("/v2.0/networks/abc"), None);
    }

    #[test]
    fn test_port_details_requires_port_object() {
        assert!(PortDetails::from_body(&json!({"network": {}})).is_none());
        let details = PortDetails::from_body(&port_body("p")).unwrap();
        assert_eq!(details.instance_id.as_deref(), Some("instance-1"));
        assert_eq!(details.mac_address, "BC:76:4E:11:59:5C");
    }

    #[tokio::test]
    async fn test_create_notifies_nova() {
        let api = Arc::new(MockCompute::new(200));
        let (status, body) = send(api.clone(), "POST", "/v2.0/ports").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["port"]["id"], "port-1");
        assert_eq!(
            body["nova_callback"],
            json!({"instance_id": "instance-1", "status": "success"})
        );

        let calls = api.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].action, InterfaceAction::Create);
        assert_eq!(calls[0].port_id, "port-1");
        assert_eq!(calls[0].tenant_id, "tenant-1");
        assert_eq!(calls[0].network_id, "net-1");
    }

    #[tokio::test]
    async fn test_nova_failure_becomes_500() {
        let api = Arc::new(MockCompute::new(404));
        let (status, body) = send(api, "PUT", "/v2.0/ports/port-1").await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["port"]["id"], "port-1");
        assert_eq!(body["nova_callback"]["status"], "error");
        assert_eq!(body["nova_callback"]["error"], json!({"nova": "says hi"}));
    }

    #[tokio::test]
    async fn test_nova_transport_error_reported() {
        let api = Arc::new(MockCompute {
            nova: Err(CallbackError::Timeout { service: "nova" }),
            ..MockCompute::new(200)
        });
        let (status, body) = send(api, "PUT", "/v2.0/ports/port-1").await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["nova_callback"]["error"], "nova call timed out");
    }

    #[tokio::test]
    async fn test_failed_write_returned_untouched() {
        let api = Arc::new(MockCompute::new(200));
        let (status, body) = send(api.clone(), "PUT", "/v2.0/ports/missing").await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, json!({"NeutronError": "not found"}));
        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn test_delete_annotates_both_callbacks() {
        let api = Arc::new(MockCompute::new(204));
        let (status, body) = send(api.clone(), "DELETE", "/v2.0/ports/port-9").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body["neutron_callback"],
            json!({"port_id": "port-9", "status": "success"})
        );
        assert_eq!(body["nova_callback"]["status"], "success");

        let calls = api.calls();
        assert_eq!(calls[0].action, InterfaceAction::Delete);
        assert_eq!(calls[0].port_id, "port-9");
    }

    #[tokio::test]
    async fn test_delete_lookup_failure_short_circuits() {
        let api = Arc::new(MockCompute {
            port: Ok(CallbackReply {
                status: 404,
                body: json!({"NeutronError": "gone"}),
            }),
            ..MockCompute::new(200)
        });
        let (status, body) = send(api.clone(), "DELETE", "/v2.0/ports/port-9").await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body,
            json!({"neutron_callback": {
                "port_id": "port-9",
                "status": "error",
                "error": {"NeutronError": "gone"}
            }})
        );
        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn test_ip_addresses_forwarded_without_callbacks() {
        let api = Arc::new(MockCompute::new(200));
        let (status, body) = send(api.clone(), "POST", "/v2.0/ip_addresses").await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.get("nova_callback").is_none());
        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unmatched_request_skipped() {
        let api = Arc::new(MockCompute::new(200));
        let (_, body) = send(api.clone(), "GET", "/v2.0/ports/port-1").await;

        assert!(body.get("nova_callback").is_none());
        assert!(api.calls().is_empty());
    }
}
