//! How a provider obtains the credential it injects into each call:
//! round-robin over a static key list, or an OAuth token manager.

use std::sync::Arc;

use wireloom_provider_core::credential::manager::TokenManager;
use wireloom_provider_core::errors::ProviderResult;
use wireloom_provider_core::provider::Credential;
use wireloom_provider_core::rotator::KeyRotator;

pub enum CredentialSource {
    Keys(Arc<KeyRotator>),
    OAuth(Arc<TokenManager>),
}

impl CredentialSource {
    pub async fn acquire(&self, provider_name: &str) -> ProviderResult<Credential> {
        match self {
            CredentialSource::Keys(rotator) => rotator.next(provider_name),
            CredentialSource::OAuth(manager) => manager
                .access_token()
                .await
                .map(|(token, _account_id)| Credential::OAuthToken(token)),
        }
    }
}
