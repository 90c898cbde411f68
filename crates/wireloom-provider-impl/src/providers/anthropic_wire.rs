//! Anthropic-wire passthrough provider: forwards the inbound Anthropic
//! request verbatim, injecting whichever credential this instance holds.

use async_trait::async_trait;
use wireloom_provider_core::errors::ProviderResult;
use wireloom_provider_core::headers::header_set;
use wireloom_provider_core::provider::{
    Credential, Provider, ProviderDescriptor, UpstreamCtx, UpstreamHttpRequest, UpstreamHttpResponse,
};

use crate::client;
use crate::credentials::CredentialSource;

const DEFAULT_ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicWireProvider {
    name: String,
    descriptor: ProviderDescriptor,
    credentials: CredentialSource,
    client: wreq::Client,
}

impl AnthropicWireProvider {
    pub fn new(
        name: impl Into<String>,
        descriptor: ProviderDescriptor,
        credentials: CredentialSource,
    ) -> ProviderResult<Self> {
        let client = client::build_client(&descriptor)?;
        Ok(Self {
            name: name.into(),
            descriptor,
            credentials,
            client,
        })
    }
}

#[async_trait]
impl Provider for AnthropicWireProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    async fn call(
        &self,
        ctx: &UpstreamCtx,
        mut request: UpstreamHttpRequest,
    ) -> ProviderResult<UpstreamHttpResponse> {
        let credential = self.credentials.acquire(&self.name).await?;
        match credential {
            Credential::ApiKey(key) => header_set(&mut request.headers, "x-api-key", key),
            Credential::OAuthToken(token) => {
                header_set(&mut request.headers, "authorization", format!("Bearer {token}"))
            }
        }
        if wireloom_provider_core::headers::header_get(&request.headers, "anthropic-version").is_none() {
            header_set(&mut request.headers, "anthropic-version", DEFAULT_ANTHROPIC_VERSION);
        }
        for (name, value) in &self.descriptor.extra_headers {
            header_set(&mut request.headers, name.clone(), value.clone());
        }

        let url = format!("{}{}", self.descriptor.base_url.trim_end_matches('/'), request.path);
        tracing::debug!(event = "upstream_call", provider = %self.name, trace_id = %ctx.trace_id, model = %ctx.model);
        client::send(
            &self.client,
            &self.descriptor,
            request.method,
            &url,
            &request.headers,
            request.body,
            request.stream,
        )
        .await
    }
}
