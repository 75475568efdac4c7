//! Outbound calls to the compute (Nova) and networking (Neutron) APIs.
//!
//! The Nova interaction filter talks to both services through the
//! [`ComputeApi`] trait so tests can swap the transport. [`HttpComputeApi`]
//! is the reqwest-backed implementation used by the binary.
//!
//! ```text
//! GET {neutron}/v2.0/ports/{port_id}/
//! PUT {nova}/v2/{tenant_id}/servers/{instance_id}/admin-virtual-interfaces/{port_id}/
//! ```

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, error};

use crate::config::{NovaInteractionConfig, ServiceEndpoint};

/// Reply from Nova or Neutron: status code and decoded JSON body.
#[derive(Debug, Clone, PartialEq)]
pub struct CallbackReply {
    pub status: u16,
    pub body: Value,
}

impl CallbackReply {
    /// Neutron and Nova only ever answer these callbacks with 200 or 204.
    pub fn is_success(&self) -> bool {
        matches!(self.status, 200 | 204)
    }
}

/// A callback that never produced a reply.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallbackError {
    #[error("{service} call timed out")]
    Timeout { service: &'static str },

    #[error("{service} call failed: {reason}")]
    Transport {
        service: &'static str,
        reason: String,
    },

    #[error("{service} client could not be built: {reason}")]
    Client {
        service: &'static str,
        reason: String,
    },
}

pub type CallbackFuture<'a> =
    Pin<Box<dyn Future<Output = Result<CallbackReply, CallbackError>> + Send + 'a>>;

/// What Nova is told about a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceAction {
    Create,
    Delete,
}

impl fmt::Display for InterfaceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

/// An `admin-virtual-interfaces` call for one port.
#[derive(Debug, Clone, PartialEq)]
pub struct VirtualInterfaceRequest {
    pub action: InterfaceAction,
    pub tenant_id: String,
    pub instance_id: String,
    pub port_id: String,
    /// MAC address of the port.
    pub address: Value,
    pub fixed_ips: Value,
    pub network_id: Value,
}

impl VirtualInterfaceRequest {
    pub fn path(&self) -> String {
        format!(
            "/v2/{}/servers/{}/admin-virtual-interfaces/{}/",
            self.tenant_id, self.instance_id, self.port_id
        )
    }

    pub fn body(&self) -> Value {
        json!({
            "virtual_interface": {
                "action": self.action,
                "address": self.address,
                "fixed_ips": self.fixed_ips,
                "id": self.port_id,
                "network_id": self.network_id,
            }
        })
    }
}

/// Nova and Neutron, as seen by the Nova interaction filter.
pub trait ComputeApi: Send + Sync {
    /// `GET /v2.0/ports/{port_id}/` on Neutron.
    fn get_port<'a>(&'a self, port_id: &'a str) -> CallbackFuture<'a>;

    /// `PUT .../admin-virtual-interfaces/{port_id}/` on Nova.
    fn admin_virtual_interface<'a>(&'a self, request: &'a VirtualInterfaceRequest) -> CallbackFuture<'a>;
}

// =============================================================================
// HTTP Implementation
// =============================================================================

/// One configured service: base URL plus a client honouring its TLS setting.
#[derive(Debug, Clone)]
struct Connection {
    service: &'static str,
    base_url: String,
    client: reqwest::Client,
}

impl Connection {
    fn new(service: &'static str, endpoint: &ServiceEndpoint, timeout: Duration) -> Result<Self, CallbackError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .danger_accept_invalid_certs(!endpoint.verify_ssl)
            .timeout(timeout)
            .build()
            .map_err(|e| CallbackError::Client {
                service,
                reason: e.to_string(),
            })?;

        Ok(Self {
            service,
            base_url: endpoint.base_url(),
            client,
        })
    }

    fn classify(&self, e: reqwest::Error) -> CallbackError {
        if e.is_timeout() {
            CallbackError::Timeout {
                service: self.service,
            }
        } else {
            CallbackError::Transport {
                service: self.service,
                reason: e.to_string(),
            }
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<CallbackReply, CallbackError> {
        let response = request.send().await.map_err(|e| self.classify(e))?;
        let status = response.status().as_u16();
        let text = response.text().await.map_err(|e| self.classify(e))?;

        // Error pages are often plain text; keep them as a JSON string
        let body = if text.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };

        debug!(service = self.service, status, "Callback returned");
        Ok(CallbackReply { status, body })
    }
}

/// reqwest-backed [`ComputeApi`].
#[derive(Debug, Clone)]
pub struct HttpComputeApi {
    nova: Connection,
    neutron: Connection,
}

impl HttpComputeApi {
    pub fn new(config: &NovaInteractionConfig) -> Result<Self, CallbackError> {
        Ok(Self {
            nova: Connection::new("nova", &config.nova, config.callback_timeout)?,
            neutron: Connection::new("neutron", &config.neutron, config.callback_timeout)?,
        })
    }
}

impl ComputeApi for HttpComputeApi {
    fn get_port<'a>(&'a self, port_id: &'a str) -> CallbackFuture<'a> {
        Box::pin(async move {
            let url = format!("{}/v2.0/ports/{}/", self.neutron.base_url, port_id);
            self.neutron
                .send(self.neutron.client.get(&url))
                .await
                .inspect_err(|e| error!(url = %url, error = %e, "Neutron port lookup failed"))
        })
    }

    fn admin_virtual_interface<'a>(&'a self, request: &'a VirtualInterfaceRequest) -> CallbackFuture<'a> {
        Box::pin(async move {
            let url = format!("{}{}", self.nova.base_url, request.path());
            self.nova
                .send(self.nova.client.put(&url).json(&request.body()))
                .await
                .inspect_err(|e| error!(url = %url, error = %e, "Nova callback failed"))
        })
    }
}
