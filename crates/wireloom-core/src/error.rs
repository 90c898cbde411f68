//! The closed error-kind set the orchestrator ever produces, and the JSON
//! envelope every error response carries: `{"type":"error","error":{"type":
//! <kind>,"message":<string>}}` plus an `x-wireloom-request-id` header.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    UpstreamTimeout,
    UpstreamError,
    Internal,
    ServiceUnavailable,
}

impl ErrorKind {
    fn status(self) -> StatusCode {
        match self {
            ErrorKind::InvalidRequest => StatusCode::BAD_REQUEST,
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorKind::UpstreamError => StatusCode::BAD_GATEWAY,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn wire_name(self) -> &'static str {
        match self {
            ErrorKind::InvalidRequest => "invalid_request_error",
            ErrorKind::Unauthorized => "authentication_error",
            ErrorKind::Forbidden => "permission_error",
            ErrorKind::NotFound => "not_found_error",
            ErrorKind::UpstreamTimeout => "upstream_timeout_error",
            ErrorKind::UpstreamError => "upstream_error",
            ErrorKind::Internal => "api_error",
            ErrorKind::ServiceUnavailable => "overloaded_error",
        }
    }
}

#[derive(Debug)]
pub struct ProxyError {
    pub kind: ErrorKind,
    pub message: String,
    pub trace_id: Option<String>,
}

impl ProxyError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            trace_id: None,
        }
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidRequest, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthorized, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Forbidden, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn upstream_timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UpstreamTimeout, message)
    }

    pub fn upstream_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UpstreamError, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ServiceUnavailable, message)
    }
}

#[derive(Serialize)]
struct ErrorEnvelope<'a> {
    #[serde(rename = "type")]
    envelope_type: &'static str,
    error: ErrorBody<'a>,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    #[serde(rename = "type")]
    error_type: &'static str,
    message: &'a str,
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.kind.status();
        let body = ErrorEnvelope {
            envelope_type: "error",
            error: ErrorBody {
                error_type: self.kind.wire_name(),
                message: &self.message,
            },
        };
        let json = serde_json::to_vec(&body).unwrap_or_else(|_| b"{}".to_vec());

        let mut response = Response::builder()
            .status(status)
            .header(axum::http::header::CONTENT_TYPE, "application/json")
            .body(axum::body::Body::from(json))
            .expect("status and headers are always valid");

        if let Some(trace_id) = &self.trace_id {
            if let Ok(value) = axum::http::HeaderValue::from_str(trace_id) {
                response.headers_mut().insert("x-wireloom-request-id", value);
            }
        }

        response
    }
}

/// Converts a provider-layer failure into the closed error-kind set. Applies
/// uniformly whether the failure came from credential acquisition, the HTTP
/// send, or translation.
pub fn from_provider_error(err: wireloom_provider_core::errors::ProviderError) -> ProxyError {
    use wireloom_provider_core::errors::ProviderError as PE;
    match err {
        PE::NotAuthenticated(msg) => ProxyError::unauthorized(msg),
        PE::MissingCredentialField(field) => {
            ProxyError::internal(format!("missing credential field: {field}"))
        }
        PE::InvalidConfig(msg) => ProxyError::internal(format!("invalid provider config: {msg}")),
        PE::Unsupported(what) => ProxyError::invalid_request(format!("unsupported: {what}")),
        PE::Other(msg) => ProxyError::upstream_error(msg),
    }
}
