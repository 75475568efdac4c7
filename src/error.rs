use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

/// Malformed filter configuration detected while the chain is being built.
///
/// These are fatal to startup; they are never produced while serving a
/// request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("resource specification is empty")]
    EmptyResources,

    #[error("resource clause {index} is empty")]
    EmptyClause { index: usize },

    #[error("resource clause '{clause}' has no path beginning with '/'")]
    MissingPath { clause: String },

    #[error("resource clause '{clause}' has no HTTP method")]
    MissingMethod { clause: String },

    #[error("resource clause '{clause}' has invalid method token '{method}'")]
    InvalidMethod { clause: String, method: String },

    #[error("resource clause '{clause}' has an invalid placeholder in its path")]
    InvalidPlaceholder { clause: String },

    #[error("unknown context strategy '{0}' (expected 'none' or 'neutron')")]
    UnknownContextStrategy(String),

    #[error("unknown empty pool policy '{0}' (expected 'keep', 'default' or 'reject')")]
    UnknownEmptyPoolPolicy(String),

    #[error("invalid {name}: {reason}")]
    InvalidValue { name: String, reason: String },
}

/// Malformed or inconsistent subnet/pool input found while handling a request.
///
/// Each variant names the offending input so callers can surface a precise
/// "bad request" to the client.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("subnet is missing required field '{0}'")]
    MissingSubnetField(&'static str),

    #[error("invalid CIDR '{0}'")]
    InvalidCidr(String),

    #[error("unsupported ip_version {0} (expected 4 or 6)")]
    UnsupportedIpVersion(String),

    #[error("ip_version {ip_version} does not match CIDR '{cidr}'")]
    CidrVersionMismatch { cidr: String, ip_version: u8 },

    #[error("CIDR '{0}' is too small to hold the reserved addresses")]
    CidrTooSmall(String),

    #[error("allocation_pools must be an array of {{start, end}} objects")]
    MalformedPools,

    #[error("allocation pool {index} must be an object")]
    MalformedPool { index: usize },

    #[error("allocation pool {index} is missing '{field}'")]
    MissingPoolField { index: usize, field: &'static str },

    #[error("allocation pool {index} has invalid {field} address '{value}'")]
    InvalidPoolAddress {
        index: usize,
        field: &'static str,
        value: String,
    },

    #[error("allocation pool {index} {field} address '{value}' is not IPv{ip_version}")]
    PoolVersionMismatch {
        index: usize,
        field: &'static str,
        value: String,
        ip_version: u8,
    },

    #[error("allocation pool {index} starts after it ends")]
    InvertedPool { index: usize },

    #[error("allocation pool {start}-{end} is inverted or mixes address families")]
    InvalidPoolRange { start: String, end: String },

    #[error("{count} allocation pools requested, at most {max} are accepted")]
    TooManyPools { count: usize, max: usize },

    #[error("requested allocation_pools do not overlap the usable range of '{0}'")]
    NoPoolOverlap(String),
}

/// Application-wide error types with appropriate HTTP status codes.
///
/// Filters return these at the request boundary; the upstream proxy uses the
/// `Upstream*` variants.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Request body too large or unreadable: {0}")]
    Body(String),

    #[error("Upstream request failed: {0}")]
    Upstream(String),

    #[error("Upstream request timed out: {0}")]
    UpstreamTimeout(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

/// Error response body for filtered requests.
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        tracing::warn!(error = %self, "Request rejected");

        let (status, error_type, message) = match &self {
            // Client errors are safe to echo back
            AppError::Validation(e) => (StatusCode::BAD_REQUEST, "validation_error", e.to_string()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone()),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, "forbidden", msg.clone()),
            AppError::Body(_) => (
                StatusCode::PAYLOAD_TOO_LARGE,
                "body_error",
                "Request body is too large or could not be read".to_string(),
            ),
            AppError::SerializationError(e) => (
                StatusCode::BAD_REQUEST,
                "serialization_error",
                sanitize_serde_error(e),
            ),

            // Upstream and internal errors never leak details
            AppError::Upstream(_) => (
                StatusCode::BAD_GATEWAY,
                "upstream_error",
                "The networking API is unavailable. Please try again later.".to_string(),
            ),
            AppError::UpstreamTimeout(_) => (
                StatusCode::GATEWAY_TIMEOUT,
                "timeout",
                "The networking API did not respond in time.".to_string(),
            ),
            AppError::Configuration(_) | AppError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "An internal error occurred.".to_string(),
            ),
        };

        let body = ErrorResponse {
            error: error_type.to_string(),
            message,
        };

        (status, axum::Json(body)).into_response()
    }
}

/// Reduce serde errors to something a client can act on without exposing
/// internal type names.
fn sanitize_serde_error(e: &serde_json::Error) -> String {
    use serde_json::error::Category;

    match e.classify() {
        Category::Syntax | Category::Eof => "Malformed JSON in request body".to_string(),
        Category::Data => "Invalid data type in request body".to_string(),
        Category::Io => "Request body could not be read".to_string(),
    }
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_is_bad_request() {
        let response = AppError::from(ValidationError::InvalidCidr("nope".into())).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_forbidden_maps_to_403() {
        let response = AppError::Forbidden("fixed_ips cannot be empty".into()).into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_upstream_errors_map_to_gateway_statuses() {
        assert_eq!(
            AppError::Upstream("refused".into()).into_response().status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            AppError::UpstreamTimeout("slow".into())
                .into_response()
                .status(),
            StatusCode::GATEWAY_TIMEOUT
        );
    }

    #[test]
    fn test_sanitize_syntax_error() {
        let err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        assert_eq!(sanitize_serde_error(&err), "Malformed JSON in request body");
    }

    #[test]
    fn test_pool_error_names_index_and_field() {
        let err = ValidationError::MissingPoolField {
            index: 2,
            field: "end",
        };
        assert_eq!(err.to_string(), "allocation pool 2 is missing 'end'");
    }
}
