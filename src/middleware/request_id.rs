//! Request ID middleware.
//!
//! Incoming requests keep a caller-supplied `x-request-id`; otherwise one is
//! generated in the `req-<uuid>` form OpenStack services use, so the id that
//! reaches Neutron and the logs of the filter chain line up.
//!
//! The id is written back on the request (for downstream filters and the
//! upstream) and on the response.

use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::header::HeaderValue;
use axum::http::{Request, Response};
use tower::{Layer, Service};
use tracing::{Span, debug};
use uuid::Uuid;

/// Header name for request ID.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Longest caller-supplied id accepted verbatim.
const MAX_REQUEST_ID_LEN: usize = 128;

#[derive(Clone, Default)]
pub struct RequestIdLayer;

impl RequestIdLayer {
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for RequestIdLayer {
    type Service = RequestIdService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestIdService { inner }
    }
}

#[derive(Clone)]
pub struct RequestIdService<S> {
    inner: S,
}

impl<S> Service<Request<Body>> for RequestIdService<S>
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
        let value = incoming_request_id(&req).unwrap_or_else(generate_request_id);

        Span::current().record("request_id", value.to_str().unwrap_or_default());
        debug!(request_id = ?value, "Processing request");

        req.headers_mut().insert(REQUEST_ID_HEADER, value.clone());

        let mut inner = self.inner.clone();

        Box::pin(async move {
            let mut response = inner.call(req).await?;
            response.headers_mut().insert(REQUEST_ID_HEADER, value);
            Ok(response)
        })
    }
}

/// A usable caller-supplied id: visible ASCII, bounded length.
fn incoming_request_id<B>(req: &Request<B>) -> Option<HeaderValue> {
    req.headers()
        .get(REQUEST_ID_HEADER)
        .filter(|v| {
            let bytes = v.as_bytes();
            !bytes.is_empty()
                && bytes.len() <= MAX_REQUEST_ID_LEN
                && bytes.iter().all(|b| b.is_ascii_graphic())
        })
        .cloned()
}

fn generate_request_id() -> HeaderValue {
    // "req-" plus a hyphenated UUID is always a valid header value
    HeaderValue::from_str(&format!("req-{}", Uuid::new_v4()))
        .unwrap_or_else(|_| HeaderValue::from_static("req-unknown"))
}

/// Extension trait to extract request ID from requests.
pub trait RequestIdExt {
    fn request_id(&self) -> Option<String>;
}

impl<B> RequestIdExt for Request<B> {
    fn request_id(&self) -> Option<String> {
        self.headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::convert::Infallible;
    use tower::ServiceExt;

    async fn echo(req: Request<Body>) -> Result<Response<Body>, Infallible> {
        let seen = req.request_id().unwrap_or_default();
        Ok(Response::new(Body::from(seen)))
    }

    #[test]
    fn test_keeps_existing_request_id() {
        let req = Request::builder()
            .header("x-request-id", "req-existing-123")
            .body(Body::empty())
            .unwrap();

        assert_eq!(incoming_request_id(&req).unwrap(), "req-existing-123");
    }

    #[test]
    fn test_rejects_unusable_request_id() {
        let req = Request::builder()
            .header("x-request-id", "a".repeat(MAX_REQUEST_ID_LEN + 1))
            .body(Body::empty())
            .unwrap();
        assert!(incoming_request_id(&req).is_none());

        let req = Request::builder()
            .header("x-request-id", "has space")
            .body(Body::empty())
            .unwrap();
        assert!(incoming_request_id(&req).is_none());
    }

    #[test]
    fn test_generated_id_format() {
        let id = generate_request_id();
        let id = id.to_str().unwrap();
        let uuid = id.strip_prefix("req-").unwrap();
        assert!(Uuid::parse_str(uuid).is_ok());
    }

    #[tokio::test]
    async fn test_id_reaches_inner_service_and_response() {
        let service = RequestIdLayer::new().layer(tower::service_fn(echo));
        let req = Request::builder()
            .header("x-request-id", "req-abc")
            .body(Body::empty())
            .unwrap();

        let response = service.oneshot(req).await.unwrap();
        assert_eq!(response.headers()[REQUEST_ID_HEADER], "req-abc");

        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"req-abc");
    }

    #[tokio::test]
    async fn test_missing_id_is_generated() {
        let service = RequestIdLayer::new().layer(tower::service_fn(echo));
        let req = Request::builder().body(Body::empty()).unwrap();

        let response = service.oneshot(req).await.unwrap();
        let id = response.headers()[REQUEST_ID_HEADER].to_str().unwrap();
        assert!(id.starts_with("req-"));
    }
}
