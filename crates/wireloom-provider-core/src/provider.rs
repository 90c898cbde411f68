use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::errors::ProviderResult;
use crate::headers::Headers;

/// Which wire format a provider's upstream speaks. The orchestrator
/// consults this to decide whether the Translator runs at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiFormat {
    AnthropicPassthrough,
    OpenAiChat,
}

#[derive(Debug, Clone)]
pub struct ProviderDescriptor {
    pub name: String,
    pub api_format: ApiFormat,
    pub base_url: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub stream_read_timeout: Duration,
    pub retry_count: u32,
    /// Upper bound `transform_request` clamps an inbound `max_tokens` to.
    /// Absent means no cap is enforced.
    pub max_tokens_cap: Option<u32>,
    /// Constant headers this provider always sends (e.g. a vendor beta
    /// flag), applied after credential injection so they can't shadow it.
    pub extra_headers: Headers,
}

/// A credential handed to a provider for one call. Static-key providers
/// always return the same key (rotated by the Key Rotator across calls);
/// OAuth providers return whatever the Token Manager currently holds.
#[derive(Debug, Clone)]
pub enum Credential {
    ApiKey(String),
    OAuthToken(String),
}

impl Credential {
    pub fn bearer_value(&self) -> &str {
        match self {
            Credential::ApiKey(key) => key,
            Credential::OAuthToken(token) => token,
        }
    }
}

pub enum UpstreamBody {
    Bytes(Bytes),
    Stream(mpsc::Receiver<ProviderResult<Bytes>>),
}

pub struct UpstreamHttpResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: UpstreamBody,
}

/// An outbound request the orchestrator has already translated (or left
/// alone, for Anthropic passthrough) and is handing to a provider to send.
pub struct UpstreamHttpRequest {
    pub method: http::Method,
    pub path: &'static str,
    pub headers: Headers,
    pub body: Bytes,
    pub stream: bool,
}

/// Per-call context threaded through credential acquisition and the HTTP
/// send, used for tracing correlation.
#[derive(Debug, Clone, Default)]
pub struct UpstreamCtx {
    pub trace_id: String,
    pub model: String,
}

#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    fn descriptor(&self) -> &ProviderDescriptor;

    /// Acquires a credential for this call (static-key rotation or OAuth
    /// token refresh, depending on the concrete provider) and performs the
    /// HTTP exchange, injecting the `Authorization` header itself.
    async fn call(
        &self,
        ctx: &UpstreamCtx,
        request: UpstreamHttpRequest,
    ) -> ProviderResult<UpstreamHttpResponse>;
}
