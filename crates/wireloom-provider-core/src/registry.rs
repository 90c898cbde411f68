use std::collections::HashMap;
use std::sync::Arc;

use crate::errors::{ProviderError, ProviderResult};
use crate::provider::Provider;

/// Where the default provider came from, surfaced for diagnostics when a
/// request doesn't name one explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultSource {
    Configured,
    FirstRegistered,
}

#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn Provider>>,
    registration_order: Vec<String>,
    configured_default: Option<String>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        let name = provider.name().to_string();
        if !self.providers.contains_key(&name) {
            self.registration_order.push(name.clone());
        }
        self.providers.insert(name, provider);
    }

    pub fn set_configured_default(&mut self, name: impl Into<String>) {
        self.configured_default = Some(name.into());
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(name).cloned()
    }

    pub fn lookup(&self, name: &str) -> ProviderResult<Arc<dyn Provider>> {
        self.get(name)
            .ok_or_else(|| ProviderError::Other(format!("unknown provider `{name}`")))
    }

    pub fn list(&self) -> Vec<Arc<dyn Provider>> {
        self.registration_order
            .iter()
            .filter_map(|name| self.providers.get(name).cloned())
            .collect()
    }

    /// Resolves the default provider: the configured one if set and
    /// registered, otherwise the first-registered provider (P1).
    pub fn default(&self) -> ProviderResult<(Arc<dyn Provider>, DefaultSource)> {
        if let Some(name) = &self.configured_default {
            if let Some(provider) = self.providers.get(name) {
                return Ok((provider.clone(), DefaultSource::Configured));
            }
        }
        let name = self
            .registration_order
            .first()
            .ok_or_else(|| ProviderError::Other("no providers registered".to_string()))?;
        let provider = self.providers.get(name).expect("registration order is consistent");
        Ok((provider.clone(), DefaultSource::FirstRegistered))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ApiFormat, ProviderDescriptor, UpstreamCtx, UpstreamHttpRequest, UpstreamHttpResponse};
    use async_trait::async_trait;
    use std::time::Duration;

    struct Stub(ProviderDescriptor);

    #[async_trait]
    impl Provider for Stub {
        fn name(&self) -> &str {
            &self.0.name
        }

        fn descriptor(&self) -> &ProviderDescriptor {
            &self.0
        }

        async fn call(
            &self,
            _ctx: &UpstreamCtx,
            _request: UpstreamHttpRequest,
        ) -> ProviderResult<UpstreamHttpResponse> {
            unimplemented!()
        }
    }

    fn descriptor(name: &str) -> ProviderDescriptor {
        ProviderDescriptor {
            name: name.to_string(),
            api_format: ApiFormat::AnthropicPassthrough,
            base_url: "https://example.invalid".to_string(),
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
            stream_read_timeout: Duration::from_secs(30),
            retry_count: 0,
            max_tokens_cap: None,
            extra_headers: Vec::new(),
        }
    }

    #[test]
    fn default_falls_back_to_first_registered() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(Stub(descriptor("a"))));
        registry.register(Arc::new(Stub(descriptor("b"))));

        let (provider, source) = registry.default().unwrap();
        assert_eq!(provider.name(), "a");
        assert_eq!(source, DefaultSource::FirstRegistered);
    }

    #[test]
    fn configured_default_wins_when_registered() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(Stub(descriptor("a"))));
        registry.register(Arc::new(Stub(descriptor("b"))));
        registry.set_configured_default("b");

        let (provider, source) = registry.default().unwrap();
        assert_eq!(provider.name(), "b");
        assert_eq!(source, DefaultSource::Configured);
    }

    #[test]
    fn lookup_reports_unknown_provider() {
        let registry = ProviderRegistry::new();
        assert!(registry.lookup("missing").is_err());
    }
}
