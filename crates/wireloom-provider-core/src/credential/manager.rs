//! OAuth access-token lifecycle: serves cached tokens, and coalesces
//! concurrent refreshes behind a single in-flight request so N callers
//! racing a near-expiry token produce one upstream refresh call, not N.

use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};

use crate::errors::{ProviderError, ProviderResult};

use super::store::{OAuthToken, TokenStore};

/// Performs the actual refresh HTTP call. Implemented per-vendor in
/// `wireloom-provider-impl`; kept as a trait here so this crate doesn't need
/// an HTTP client dependency.
#[async_trait]
pub trait OAuthRefresher: Send + Sync {
    async fn refresh(&self, refresh_token: &str, account_id: Option<&str>) -> ProviderResult<OAuthToken>;
}

/// Tokens are treated as expired this many seconds before their stated
/// expiry, so a token doesn't go stale mid-flight to the upstream.
const EXPIRY_SKEW_SECS: u64 = 300;

pub struct TokenManager {
    store: TokenStore,
    refresher: Box<dyn OAuthRefresher>,
    cached: RwLock<Option<OAuthToken>>,
    refresh_lock: Mutex<()>,
}

impl TokenManager {
    pub fn new(store: TokenStore, refresher: Box<dyn OAuthRefresher>) -> ProviderResult<Self> {
        let cached = store.load()?;
        Ok(Self {
            store,
            refresher,
            cached: RwLock::new(cached),
            refresh_lock: Mutex::new(()),
        })
    }

    /// Returns a valid access token paired with the account id it belongs
    /// to, refreshing if the cached one is absent or expiring soon.
    /// Concurrent callers block on `refresh_lock`; all but the first find a
    /// fresh token already cached when they wake and skip the network call
    /// entirely.
    pub async fn access_token(&self) -> ProviderResult<(String, String)> {
        if let Some(token) = self.fresh_cached().await {
            return Ok((token.access_token, token.account_id.unwrap_or_default()));
        }

        let _guard = self.refresh_lock.lock().await;

        if let Some(token) = self.fresh_cached().await {
            return Ok((token.access_token, token.account_id.unwrap_or_default()));
        }

        let (refresh_token, account_id) = {
            let cached = self.cached.read().await;
            let token = cached.as_ref().ok_or_else(|| {
                ProviderError::NotAuthenticated(
                    "no oauth credential on file; run the login flow".to_string(),
                )
            })?;
            (token.refresh_token.clone(), token.account_id.clone())
        };

        let refreshed = self
            .refresher
            .refresh(&refresh_token, account_id.as_deref())
            .await?;
        self.store.save(&refreshed)?;
        let access_token = refreshed.access_token.clone();
        let account_id = refreshed.account_id.clone().unwrap_or_default();
        *self.cached.write().await = Some(refreshed);

        Ok((access_token, account_id))
    }

    async fn fresh_cached(&self) -> Option<OAuthToken> {
        let cached = self.cached.read().await;
        let token = cached.as_ref()?;
        if token.expires_at > now_secs() + EXPIRY_SKEW_SECS {
            Some(token.clone())
        } else {
            None
        }
    }

    /// Persists a freshly obtained token (from the PKCE login flow) and
    /// makes it the cached token, bypassing the refresh path entirely.
    pub async fn install(&self, token: OAuthToken) -> ProviderResult<()> {
        self.store.save(&token)?;
        *self.cached.write().await = Some(token);
        Ok(())
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    struct CountingRefresher {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl OAuthRefresher for CountingRefresher {
        async fn refresh(&self, _refresh_token: &str, account_id: Option<&str>) -> ProviderResult<OAuthToken> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(OAuthToken {
                access_token: "fresh".to_string(),
                refresh_token: "refresh".to_string(),
                expires_at: now_secs() + 3600,
                id_token: None,
                account_id: account_id.map(str::to_string),
                last_refresh: now_secs(),
            })
        }
    }

    #[tokio::test]
    async fn concurrent_callers_coalesce_into_one_refresh() {
        let dir = TempDir::new().unwrap();
        let store = TokenStore::new(dir.path(), "openai");
        store
            .save(&OAuthToken {
                access_token: "stale".to_string(),
                refresh_token: "refresh".to_string(),
                expires_at: 0,
                id_token: None,
                account_id: Some("acct_1".to_string()),
                last_refresh: 0,
            })
            .unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let manager = Arc::new(
            TokenManager::new(
                store,
                Box::new(CountingRefresher {
                    calls: calls.clone(),
                }),
            )
            .unwrap(),
        );

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let manager = manager.clone();
                tokio::spawn(async move { manager.access_token().await.unwrap() })
            })
            .collect();

        for handle in handles {
            let (token, account_id) = handle.await.unwrap();
            assert_eq!(token, "fresh");
            assert_eq!(account_id, "acct_1");
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fresh_token_skips_refresh_entirely() {
        let dir = TempDir::new().unwrap();
        let store = TokenStore::new(dir.path(), "openai");
        store
            .save(&OAuthToken {
                access_token: "still-good".to_string(),
                refresh_token: "refresh".to_string(),
                expires_at: now_secs() + 3600,
                id_token: None,
                account_id: Some("acct_1".to_string()),
                last_refresh: now_secs(),
            })
            .unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let manager = TokenManager::new(
            store,
            Box::new(CountingRefresher {
                calls: calls.clone(),
            }),
        )
        .unwrap();

        let (token, account_id) = manager.access_token().await.unwrap();
        assert_eq!(token, "still-good");
        assert_eq!(account_id, "acct_1");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
