//! Assembles `AppState` from a `GlobalConfig` and a provider config file:
//! builds the `ProviderRegistry`, wires each provider's credential source,
//! and registers the middleware chain (currently just the
//! Thought-Signature middleware, always present).

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value as JsonValue;

use wireloom_common::GlobalConfig;
use wireloom_provider_core::headers::Headers;
use wireloom_provider_core::provider::{ApiFormat, ProviderDescriptor};
use wireloom_provider_core::registry::ProviderRegistry;
use wireloom_provider_core::rotator::KeyRotator;
use wireloom_provider_core::thought_cache::ThoughtSignatureCache;
use wireloom_provider_impl::oauth::refresher::HttpOAuthRefresher;
use wireloom_provider_impl::{AnthropicWireProvider, CredentialSource, OpenAiWireProvider};
use wireloom_provider_core::credential::manager::TokenManager;
use wireloom_provider_core::credential::store::TokenStore;
use wireloom_transform::middleware::thought_signature::{ThoughtSignatureMiddleware, ThoughtSignatureStore};
use wireloom_transform::MiddlewareChain;

use crate::state::AppState;

const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;
const DEFAULT_STREAM_READ_TIMEOUT_SECS: u64 = 60;
const THOUGHT_CACHE_TTL: Duration = Duration::from_secs(60 * 60);
const THOUGHT_CACHE_MAX_ENTRIES: usize = 10_000;

#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("reading providers file {path}: {source}")]
    ReadFile { path: String, source: std::io::Error },
    #[error("parsing providers file {path}: {source}")]
    ParseFile { path: String, source: serde_json::Error },
    #[error("provider `{0}`: {1}")]
    Provider(String, wireloom_provider_core::errors::ProviderError),
    #[error("provider `{0}` is not configured for oauth login")]
    NotOauth(String),
    #[error("no provider named `{0}`")]
    UnknownProvider(String),
    #[error("no providers configured")]
    Empty,
}

#[derive(Debug, Deserialize)]
struct ProvidersFile {
    providers: Vec<ProviderEntry>,
    #[serde(default)]
    default_provider: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ProviderEntry {
    name: String,
    api_format: ApiFormatEntry,
    base_url: String,
    #[serde(default)]
    connect_timeout_secs: Option<u64>,
    #[serde(default)]
    request_timeout_secs: Option<u64>,
    #[serde(default)]
    stream_read_timeout_secs: Option<u64>,
    #[serde(default)]
    retry_count: Option<u32>,
    #[serde(default)]
    max_tokens_cap: Option<u32>,
    #[serde(default)]
    extra_headers: HashMap<String, String>,
    auth: AuthEntry,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
enum ApiFormatEntry {
    Anthropic,
    Openai,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AuthEntry {
    StaticKeys {
        keys: Vec<String>,
    },
    Oauth {
        client_id: String,
        token_url: String,
        authorize_url: String,
        #[serde(default)]
        scope: String,
    },
}

/// Loads the provider config file (or the built-in default set, if no
/// path is given) and builds a fully wired `AppState`.
pub async fn bootstrap(
    config: GlobalConfig,
    providers_path: Option<&Path>,
) -> Result<AppState, BootstrapError> {
    let parsed = load_providers_file(providers_path)?;

    let mut registry = ProviderRegistry::new();
    let mut registered = 0;
    for entry in parsed.providers {
        if let AuthEntry::StaticKeys { keys } = &entry.auth {
            if keys.is_empty() {
                continue;
            }
        }

        let descriptor = descriptor_from_entry(&entry);
        let credentials = credentials_from_entry(&config, &entry)?;

        let provider: Arc<dyn wireloom_provider_core::provider::Provider> = match descriptor.api_format {
            ApiFormat::AnthropicPassthrough => Arc::new(
                AnthropicWireProvider::new(entry.name.clone(), descriptor, credentials)
                    .map_err(|err| BootstrapError::Provider(entry.name.clone(), err))?,
            ),
            ApiFormat::OpenAiChat => Arc::new(
                OpenAiWireProvider::new(entry.name.clone(), descriptor, credentials)
                    .map_err(|err| BootstrapError::Provider(entry.name.clone(), err))?,
            ),
        };

        registry.register(provider);
        registered += 1;
    }

    if registered == 0 {
        return Err(BootstrapError::Empty);
    }

    if let Some(default_provider) = parsed.default_provider {
        registry.set_configured_default(default_provider);
    }

    let mut middleware = MiddlewareChain::new();
    let thought_cache = ThoughtSignatureCache::new(THOUGHT_CACHE_TTL, THOUGHT_CACHE_MAX_ENTRIES);
    thought_cache.spawn_sweeper();
    middleware.register(Box::new(ThoughtSignatureMiddleware::new(SharedThoughtCache(thought_cache))));

    Ok(AppState {
        config,
        registry,
        middleware: Arc::new(middleware),
    })
}

fn descriptor_from_entry(entry: &ProviderEntry) -> ProviderDescriptor {
    let extra_headers: Headers = entry
        .extra_headers
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    ProviderDescriptor {
        name: entry.name.clone(),
        api_format: match entry.api_format {
            ApiFormatEntry::Anthropic => ApiFormat::AnthropicPassthrough,
            ApiFormatEntry::Openai => ApiFormat::OpenAiChat,
        },
        base_url: entry.base_url.clone(),
        connect_timeout: Duration::from_secs(entry.connect_timeout_secs.unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS)),
        request_timeout: Duration::from_secs(entry.request_timeout_secs.unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS)),
        stream_read_timeout: Duration::from_secs(
            entry.stream_read_timeout_secs.unwrap_or(DEFAULT_STREAM_READ_TIMEOUT_SECS),
        ),
        retry_count: entry.retry_count.unwrap_or(0),
        max_tokens_cap: entry.max_tokens_cap,
        extra_headers,
    }
}

fn credentials_from_entry(
    config: &GlobalConfig,
    entry: &ProviderEntry,
) -> Result<CredentialSource, BootstrapError> {
    match &entry.auth {
        AuthEntry::StaticKeys { keys } => {
            let mut map = HashMap::new();
            map.insert(entry.name.clone(), keys.clone());
            Ok(CredentialSource::Keys(Arc::new(KeyRotator::new(map))))
        }
        AuthEntry::Oauth {
            client_id,
            token_url,
            ..
        } => {
            let store = TokenStore::new(&config.data_dir, &entry.name);
            let http_client = wreq::Client::builder().build().map_err(|err| {
                BootstrapError::Provider(
                    entry.name.clone(),
                    wireloom_provider_core::errors::ProviderError::Other(err.to_string()),
                )
            })?;
            let refresher = HttpOAuthRefresher::new(http_client, token_url.clone(), client_id.clone());
            let manager = TokenManager::new(store, Box::new(refresher))
                .map_err(|err| BootstrapError::Provider(entry.name.clone(), err))?;
            Ok(CredentialSource::OAuth(Arc::new(manager)))
        }
    }
}

/// Looks up a named provider's OAuth endpoints for the PKCE login flow.
/// Reads the same providers file `bootstrap` does, so the `login`
/// subcommand sees exactly the provider set the running proxy would.
pub fn load_provider_oauth_config(
    providers_path: Option<&Path>,
    provider_name: &str,
) -> Result<wireloom_provider_impl::oauth::login::AuthorizeEndpoint, BootstrapError> {
    let parsed = load_providers_file(providers_path)?;
    let entry = parsed
        .providers
        .into_iter()
        .find(|entry| entry.name == provider_name)
        .ok_or_else(|| BootstrapError::UnknownProvider(provider_name.to_string()))?;

    match entry.auth {
        AuthEntry::Oauth {
            client_id,
            token_url,
            authorize_url,
            scope,
        } => Ok(wireloom_provider_impl::oauth::login::AuthorizeEndpoint {
            authorize_url,
            token_url,
            client_id,
            scope,
        }),
        AuthEntry::StaticKeys { .. } => Err(BootstrapError::NotOauth(provider_name.to_string())),
    }
}

fn load_providers_file(providers_path: Option<&Path>) -> Result<ProvidersFile, BootstrapError> {
    match providers_path {
        Some(path) => {
            let raw = std::fs::read_to_string(path).map_err(|source| BootstrapError::ReadFile {
                path: path.display().to_string(),
                source,
            })?;
            serde_json::from_str(&raw).map_err(|source| BootstrapError::ParseFile {
                path: path.display().to_string(),
                source,
            })
        }
        None => Ok(default_providers_file()),
    }
}

/// The provider set used when no `--providers-file` is given: static-key
/// providers sourced from `ANTHROPIC_API_KEY`/`OPENAI_API_KEY`, present
/// only when the corresponding env var is actually set.
fn default_providers_file() -> ProvidersFile {
    let mut providers = Vec::new();

    if let Ok(key) = std::env::var("ANTHROPIC_API_KEY") {
        providers.push(ProviderEntry {
            name: "anthropic".to_string(),
            api_format: ApiFormatEntry::Anthropic,
            base_url: "https://api.anthropic.com".to_string(),
            connect_timeout_secs: None,
            request_timeout_secs: None,
            stream_read_timeout_secs: None,
            retry_count: None,
            max_tokens_cap: None,
            extra_headers: HashMap::new(),
            auth: AuthEntry::StaticKeys { keys: vec![key] },
        });
    }

    if let Ok(key) = std::env::var("OPENAI_API_KEY") {
        providers.push(ProviderEntry {
            name: "openai".to_string(),
            api_format: ApiFormatEntry::Openai,
            base_url: "https://api.openai.com/v1".to_string(),
            connect_timeout_secs: None,
            request_timeout_secs: None,
            stream_read_timeout_secs: None,
            retry_count: None,
            max_tokens_cap: None,
            extra_headers: HashMap::new(),
            auth: AuthEntry::StaticKeys { keys: vec![key] },
        });
    }

    ProvidersFile {
        providers,
        default_provider: None,
    }
}

/// `ThoughtSignatureCache::new` returns an `Arc`, but
/// `ThoughtSignatureStore` is implemented on the bare type; this wraps the
/// `Arc` so the middleware can hold a cheaply-cloneable handle to the same
/// cache the sweeper task owns.
struct SharedThoughtCache(Arc<ThoughtSignatureCache>);

impl ThoughtSignatureStore for SharedThoughtCache {
    fn retrieve(
        &self,
        tool_call_ids: &[String],
        conversation_id: Option<&str>,
    ) -> Option<HashMap<String, JsonValue>> {
        self.0.retrieve(tool_call_ids, conversation_id)
    }

    fn record(&self, signatures: HashMap<String, JsonValue>, conversation_id: Option<&str>) {
        self.0.record(signatures, conversation_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_providers_file(contents: &str) -> tempfile::NamedTempFile {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    fn base_config() -> GlobalConfig {
        GlobalConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            proxy_key: None,
            outbound_proxy: None,
            data_dir: std::env::temp_dir(),
            log_filter: "info".to_string(),
        }
    }

    #[tokio::test]
    async fn bootstrap_registers_static_key_providers() {
        let file = write_providers_file(
            r#"{
                "providers": [
                    {
                        "name": "anthropic",
                        "api_format": "anthropic",
                        "base_url": "https://api.anthropic.invalid",
                        "auth": { "type": "static_keys", "keys": ["sk-test"] }
                    },
                    {
                        "name": "openai",
                        "api_format": "openai",
                        "base_url": "https://api.openai.invalid",
                        "auth": { "type": "static_keys", "keys": ["sk-test-2"] }
                    }
                ],
                "default_provider": "openai"
            }"#,
        );

        let state = bootstrap(base_config(), Some(file.path())).await.unwrap();
        let names: Vec<String> = state.registry.list().iter().map(|p| p.name().to_string()).collect();
        assert_eq!(names, vec!["anthropic".to_string(), "openai".to_string()]);

        let (default, source) = state.registry.default().unwrap();
        assert_eq!(default.name(), "openai");
        assert_eq!(source, wireloom_provider_core::registry::DefaultSource::Configured);
    }

    #[tokio::test]
    async fn bootstrap_rejects_empty_provider_list() {
        let file = write_providers_file(r#"{ "providers": [] }"#);
        let err = bootstrap(base_config(), Some(file.path())).await.unwrap_err();
        assert!(matches!(err, BootstrapError::Empty));
    }

    #[tokio::test]
    async fn bootstrap_skips_providers_with_no_static_keys() {
        let file = write_providers_file(
            r#"{
                "providers": [
                    {
                        "name": "anthropic",
                        "api_format": "anthropic",
                        "base_url": "https://api.anthropic.invalid",
                        "auth": { "type": "static_keys", "keys": [] }
                    }
                ]
            }"#,
        );
        let err = bootstrap(base_config(), Some(file.path())).await.unwrap_err();
        assert!(matches!(err, BootstrapError::Empty));
    }

    #[tokio::test]
    async fn bootstrap_rejects_missing_file() {
        let err = bootstrap(base_config(), Some(Path::new("/nonexistent/providers.json")))
            .await
            .unwrap_err();
        assert!(matches!(err, BootstrapError::ReadFile { .. }));
    }

    #[tokio::test]
    async fn bootstrap_rejects_malformed_json() {
        let file = write_providers_file("not json");
        let err = bootstrap(base_config(), Some(file.path())).await.unwrap_err();
        assert!(matches!(err, BootstrapError::ParseFile { .. }));
    }

    #[tokio::test]
    async fn bootstrap_with_no_path_and_no_env_keys_is_empty() {
        // SAFETY: test runs single-threaded w.r.t. these two vars and restores them.
        let prior_anthropic = std::env::var("ANTHROPIC_API_KEY").ok();
        let prior_openai = std::env::var("OPENAI_API_KEY").ok();
        unsafe {
            std::env::remove_var("ANTHROPIC_API_KEY");
            std::env::remove_var("OPENAI_API_KEY");
        }

        let err = bootstrap(base_config(), None).await.unwrap_err();
        assert!(matches!(err, BootstrapError::Empty));

        unsafe {
            if let Some(value) = prior_anthropic {
                std::env::set_var("ANTHROPIC_API_KEY", value);
            }
            if let Some(value) = prior_openai {
                std::env::set_var("OPENAI_API_KEY", value);
            }
        }
    }

    #[test]
    fn load_provider_oauth_config_finds_named_provider() {
        let file = write_providers_file(
            r#"{
                "providers": [
                    {
                        "name": "gemini",
                        "api_format": "openai",
                        "base_url": "https://generativelanguage.googleapis.com",
                        "auth": {
                            "type": "oauth",
                            "client_id": "client-1",
                            "token_url": "https://oauth.invalid/token",
                            "authorize_url": "https://oauth.invalid/authorize",
                            "scope": "profile"
                        }
                    }
                ]
            }"#,
        );

        let endpoint = load_provider_oauth_config(Some(file.path()), "gemini").unwrap();
        assert_eq!(endpoint.client_id, "client-1");
        assert_eq!(endpoint.scope, "profile");
    }

    #[test]
    fn load_provider_oauth_config_rejects_static_key_provider() {
        let file = write_providers_file(
            r#"{
                "providers": [
                    {
                        "name": "anthropic",
                        "api_format": "anthropic",
                        "base_url": "https://api.anthropic.invalid",
                        "auth": { "type": "static_keys", "keys": ["sk-test"] }
                    }
                ]
            }"#,
        );

        let err = load_provider_oauth_config(Some(file.path()), "anthropic").unwrap_err();
        assert!(matches!(err, BootstrapError::NotOauth(_)));
    }
}
