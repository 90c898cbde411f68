//! OpenAI-wire provider: posts a pre-translated Chat Completions request,
//! always authenticating with `Authorization: Bearer <key-or-token>`.

use async_trait::async_trait;
use wireloom_provider_core::errors::ProviderResult;
use wireloom_provider_core::headers::header_set;
use wireloom_provider_core::provider::{
    Provider, ProviderDescriptor, UpstreamCtx, UpstreamHttpRequest, UpstreamHttpResponse,
};

use crate::client;
use crate::credentials::CredentialSource;

pub struct OpenAiWireProvider {
    name: String,
    descriptor: ProviderDescriptor,
    credentials: CredentialSource,
    client: wreq::Client,
}

impl OpenAiWireProvider {
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
impl Provider for OpenAiWireProvider {
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
        header_set(
            &mut request.headers,
            "authorization",
            format!("Bearer {}", credential.bearer_value()),
        );
        if wireloom_provider_core::headers::header_get(&request.headers, "content-type").is_none() {
            header_set(&mut request.headers, "content-type", "application/json");
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
