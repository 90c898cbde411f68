//! Concrete `OAuthRefresher`: POSTs the stored refresh token to a
//! provider's token endpoint and parses the resulting credential record.

use async_trait::async_trait;
use serde::Deserialize;
use wireloom_provider_core::credential::manager::OAuthRefresher;
use wireloom_provider_core::credential::store::OAuthToken;
use wireloom_provider_core::errors::{ProviderError, ProviderResult};

pub struct HttpOAuthRefresher {
    client: wreq::Client,
    token_url: String,
    client_id: String,
}

impl HttpOAuthRefresher {
    pub fn new(client: wreq::Client, token_url: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            client,
            token_url: token_url.into(),
            client_id: client_id.into(),
        }
    }
}

#[derive(Deserialize)]
struct RefreshResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    id_token: Option<String>,
}

#[async_trait]
impl OAuthRefresher for HttpOAuthRefresher {
    async fn refresh(&self, refresh_token: &str, account_id: Option<&str>) -> ProviderResult<OAuthToken> {
        let body = format!(
            "grant_type=refresh_token&client_id={}&refresh_token={}",
            urlencoding::encode(&self.client_id),
            urlencoding::encode(refresh_token),
        );

        let response = self
            .client
            .post(&self.token_url)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .header("Accept", "application/json")
            .body(body)
            .send()
            .await
            .map_err(|err| ProviderError::Other(format!("oauth refresh request failed: {err}")))?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|err| ProviderError::Other(format!("reading refresh response: {err}")))?;

        if !status.is_success() {
            let text = String::from_utf8_lossy(&bytes);
            return Err(ProviderError::Other(format!(
                "oauth refresh failed: {status} {text}"
            )));
        }

        let parsed: RefreshResponse = serde_json::from_slice(&bytes)
            .map_err(|err| ProviderError::Other(format!("malformed refresh response: {err}")))?;

        let account_id = super::login::account_id_from_id_token(parsed.id_token.as_deref())
            .or_else(|| account_id.map(str::to_string));

        Ok(OAuthToken {
            access_token: parsed.access_token,
            refresh_token: parsed.refresh_token.unwrap_or_else(|| refresh_token.to_string()),
            expires_at: now_secs() + parsed.expires_in.unwrap_or(3600),
            id_token: parsed.id_token,
            account_id,
            last_refresh: now_secs(),
        })
    }
}

fn now_secs() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
