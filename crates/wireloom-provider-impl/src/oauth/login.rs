//! PKCE Login Flow (C3): binds a one-shot loopback HTTP server, waits for
//! the provider's OAuth redirect, and exchanges the authorization code for
//! a token. None of this mutates any previously stored credential; a failed
//! login simply returns an error and leaves the Token Store untouched.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use axum::extract::{Query, State};
use axum::response::Html;
use axum::routing::get;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use wireloom_provider_core::credential::store::OAuthToken;

use super::pkce::{generate_pkce, generate_state};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug)]
pub enum LoginError {
    StateMismatch,
    TokenExchangeFailed { status: u16, body: String },
    Timeout,
    Transport(String),
}

impl fmt::Display for LoginError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoginError::StateMismatch => write!(f, "oauth state mismatch"),
            LoginError::TokenExchangeFailed { status, body } => {
                write!(f, "oauth token exchange failed: {status} {body}")
            }
            LoginError::Timeout => write!(f, "oauth login timed out"),
            LoginError::Transport(msg) => write!(f, "oauth login transport error: {msg}"),
        }
    }
}

impl std::error::Error for LoginError {}

/// Describes a provider's OAuth endpoints and client identity. Each
/// concrete provider (`providers::openai_oauth`, etc.) supplies its own.
pub struct AuthorizeEndpoint {
    pub authorize_url: String,
    pub token_url: String,
    pub client_id: String,
    pub scope: String,
}

/// What the caller needs to send the user to before the callback arrives.
pub struct PendingLogin {
    pub authorize_url: String,
    pub redirect_uri: String,
}

#[derive(Deserialize)]
struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

struct CallbackState {
    expected_state: String,
    sender: std::sync::Mutex<Option<oneshot::Sender<Result<String, LoginError>>>>,
}

async fn callback_handler(
    State(state): State<std::sync::Arc<CallbackState>>,
    Query(query): Query<CallbackQuery>,
) -> Html<&'static str> {
    let result = if let Some(error) = query.error {
        Err(LoginError::TokenExchangeFailed {
            status: 400,
            body: error,
        })
    } else {
        match (query.code, query.state) {
            (Some(code), Some(returned_state)) if returned_state == state.expected_state => {
                Ok(code)
            }
            (Some(_), _) => Err(LoginError::StateMismatch),
            (None, _) => Err(LoginError::Transport("callback missing code".to_string())),
        }
    };

    if let Some(sender) = state.sender.lock().expect("poisoned").take() {
        let _ = sender.send(result);
    }

    Html("<html><body>Login complete, you may close this tab.</body></html>")
}

/// Binds the loopback server and returns the URL the caller should open in
/// a browser, plus a future that resolves once the callback lands (or the
/// overall timeout elapses).
pub async fn start_login(
    endpoint: &AuthorizeEndpoint,
) -> Result<(PendingLogin, impl std::future::Future<Output = Result<(String, String), LoginError>>), LoginError>
{
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .map_err(|err| LoginError::Transport(err.to_string()))?;
    let addr: SocketAddr = listener
        .local_addr()
        .map_err(|err| LoginError::Transport(err.to_string()))?;
    let redirect_uri = format!("http://localhost:{}/callback", addr.port());

    let pkce = generate_pkce();
    let state_value = generate_state();

    let authorize_url = format!(
        "{}?response_type=code&client_id={}&redirect_uri={}&code_challenge={}&code_challenge_method=S256&state={}&scope={}",
        endpoint.authorize_url,
        urlencoding::encode(&endpoint.client_id),
        urlencoding::encode(&redirect_uri),
        urlencoding::encode(&pkce.code_challenge),
        urlencoding::encode(&state_value),
        urlencoding::encode(&endpoint.scope),
    );

    let (tx, rx) = oneshot::channel();
    let shared = std::sync::Arc::new(CallbackState {
        expected_state: state_value,
        sender: std::sync::Mutex::new(Some(tx)),
    });

    let router = Router::new()
        .route("/callback", get(callback_handler))
        .with_state(shared);

    let server_task = tokio::spawn(async move {
        let _ = axum::serve(listener, router.into_make_service()).await;
    });

    let code_verifier = pkce.code_verifier;
    let wait = async move {
        let result = tokio::time::timeout(DEFAULT_TIMEOUT, rx).await;
        server_task.abort();
        match result {
            Ok(Ok(Ok(code))) => Ok((code, code_verifier)),
            Ok(Ok(Err(err))) => Err(err),
            Ok(Err(_)) => Err(LoginError::Transport("callback channel closed".to_string())),
            Err(_) => Err(LoginError::Timeout),
        }
    };

    Ok((
        PendingLogin {
            authorize_url,
            redirect_uri,
        },
        wait,
    ))
}

/// Exchanges an authorization code for an access/refresh token pair.
pub async fn exchange_code(
    client: &wreq::Client,
    endpoint: &AuthorizeEndpoint,
    redirect_uri: &str,
    code: &str,
    code_verifier: &str,
) -> Result<OAuthToken, LoginError> {
    let body = format!(
        "grant_type=authorization_code&client_id={}&code={}&redirect_uri={}&code_verifier={}",
        urlencoding::encode(&endpoint.client_id),
        urlencoding::encode(code),
        urlencoding::encode(redirect_uri),
        urlencoding::encode(code_verifier),
    );

    let response = client
        .post(&endpoint.token_url)
        .header("Content-Type", "application/x-www-form-urlencoded")
        .header("Accept", "application/json")
        .body(body)
        .send()
        .await
        .map_err(|err| LoginError::Transport(err.to_string()))?;

    let status = response.status().as_u16();
    let bytes = response
        .bytes()
        .await
        .map_err(|err| LoginError::Transport(err.to_string()))?;

    if status >= 300 {
        return Err(LoginError::TokenExchangeFailed {
            status,
            body: String::from_utf8_lossy(&bytes).to_string(),
        });
    }

    #[derive(Deserialize)]
    struct TokenResponse {
        access_token: String,
        refresh_token: String,
        #[serde(default)]
        expires_in: Option<u64>,
        #[serde(default)]
        id_token: Option<String>,
    }

    let parsed: TokenResponse = serde_json::from_slice(&bytes).map_err(|err| {
        LoginError::TokenExchangeFailed {
            status,
            body: format!("malformed token response: {err}"),
        }
    })?;

    let expires_at = now_secs() + parsed.expires_in.unwrap_or(3600);
    let account_id = account_id_from_id_token(parsed.id_token.as_deref());
    Ok(OAuthToken {
        access_token: parsed.access_token,
        refresh_token: parsed.refresh_token,
        expires_at,
        id_token: parsed.id_token,
        account_id,
        last_refresh: now_secs(),
    })
}

fn now_secs() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Pulls the `sub` claim out of an unverified id token's payload segment.
/// The token's signature was already checked by the provider before it
/// reached us over TLS; this is just for labeling which account a
/// credential belongs to, not an authorization decision.
pub(crate) fn account_id_from_id_token(id_token: Option<&str>) -> Option<String> {
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;

    let id_token = id_token?;
    let payload = id_token.split('.').nth(1)?;
    let decoded = URL_SAFE_NO_PAD.decode(payload).ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&decoded).ok()?;
    claims.get("sub")?.as_str().map(str::to_string)
}
