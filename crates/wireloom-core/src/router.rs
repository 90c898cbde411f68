//! HTTP Surface (A3): the axum `Router` exposing the client-facing API.
//! Every handler authenticates, stamps a trace id, and logs entry/exit in
//! the `event = "..."` convention the rest of the crate uses.

use axum::extract::{Query, State};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use serde_json::json;

use wireloom_protocol::claude::messages::{
    CountTokensRequest, CountTokensResponse, CreateMessageRequest, ListModelsResponse, ModelInfo,
};

use crate::error::ProxyError;
use crate::orchestrator;
use crate::state::SharedState;

pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/v1/messages", post(create_message))
        .route("/v1/messages/count_tokens", post(count_tokens))
        .route("/v1/models", get(list_models))
        .route("/health", get(health))
        .route("/test-connection", get(test_connection))
        .with_state(state)
}

fn new_trace_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

async fn create_message(
    State(state): State<SharedState>,
    headers: axum::http::HeaderMap,
    body: axum::body::Bytes,
) -> Response {
    let trace_id = new_trace_id();

    if let Err(err) = crate::auth::authenticate(&headers, state.config.proxy_key.as_deref()) {
        return err.with_trace_id(trace_id).into_response();
    }

    let request: CreateMessageRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(err) => {
            return ProxyError::invalid_request(format!("malformed request body: {err}"))
                .with_trace_id(trace_id)
                .into_response();
        }
    };

    let is_stream = request.stream.unwrap_or(false);
    tracing::info!(
        event = "downstream_received",
        trace_id = %trace_id,
        model = %request.model,
        is_stream = is_stream,
    );

    let result = if is_stream {
        orchestrator::handle_stream(&state.registry, state.middleware.clone(), trace_id.clone(), request).await
    } else {
        match orchestrator::handle_unary(&state.registry, &state.middleware, &trace_id, request).await {
            Ok(message) => Ok(Json(message).into_response()),
            Err(err) => Err(err),
        }
    };

    match result {
        Ok(response) => {
            tracing::info!(event = "downstream_responded", trace_id = %trace_id, is_stream = is_stream);
            response
        }
        Err(err) => {
            tracing::warn!(event = "downstream_error", trace_id = %trace_id, kind = ?err.kind, message = %err.message);
            err.with_trace_id(trace_id).into_response()
        }
    }
}

async fn count_tokens(
    State(state): State<SharedState>,
    headers: axum::http::HeaderMap,
    body: axum::body::Bytes,
) -> Response {
    let trace_id = new_trace_id();

    if let Err(err) = crate::auth::authenticate(&headers, state.config.proxy_key.as_deref()) {
        return err.with_trace_id(trace_id).into_response();
    }

    let request: CountTokensRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(err) => {
            return ProxyError::invalid_request(format!("malformed request body: {err}"))
                .with_trace_id(trace_id)
                .into_response();
        }
    };

    let input_tokens = orchestrator::estimate_tokens(&request.system, &request.messages);
    Json(CountTokensResponse { input_tokens }).into_response()
}

#[derive(Debug, Deserialize)]
struct ListModelsQuery {
    provider: Option<String>,
    #[serde(default)]
    format: Option<String>,
}

async fn list_models(State(state): State<SharedState>, Query(query): Query<ListModelsQuery>) -> Response {
    let names: Vec<String> = state
        .registry
        .list()
        .into_iter()
        .filter(|provider| query.provider.as_deref().map_or(true, |name| name == provider.name()))
        .map(|provider| provider.name().to_string())
        .collect();

    match query.format.as_deref() {
        Some("openai") => Json(wireloom_protocol::openai::chat::ListModelsResponse {
            object: "list".to_string(),
            data: names
                .into_iter()
                .map(|id| wireloom_protocol::openai::chat::ModelInfo {
                    id,
                    object: "model".to_string(),
                })
                .collect(),
        })
        .into_response(),
        Some("raw") => Json(names).into_response(),
        Some("anthropic") | None => Json(ListModelsResponse {
            has_more: false,
            data: names
                .into_iter()
                .map(|id| ModelInfo {
                    id,
                    object_type: "model".to_string(),
                    display_name: None,
                })
                .collect(),
        })
        .into_response(),
        Some(other) => ProxyError::invalid_request(format!("unknown list_models format `{other}`")).into_response(),
    }
}

async fn health() -> Response {
    Json(json!({ "status": "ok" })).into_response()
}

async fn test_connection() -> Response {
    Json(json!({ "status": "ok" })).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::AppState;
    use std::sync::Arc;
    use wireloom_common::GlobalConfig;
    use wireloom_provider_core::registry::ProviderRegistry;
    use wireloom_transform::MiddlewareChain;

    fn empty_state(proxy_key: Option<&str>) -> SharedState {
        Arc::new(AppState {
            config: GlobalConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
                proxy_key: proxy_key.map(|k| k.to_string()),
                outbound_proxy: None,
                data_dir: std::env::temp_dir(),
                log_filter: "info".to_string(),
            },
            registry: ProviderRegistry::new(),
            middleware: Arc::new(MiddlewareChain::new()),
        })
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let response = health().await;
        assert_eq!(response.status(), axum::http::StatusCode::OK);
    }

    #[tokio::test]
    async fn create_message_rejects_missing_auth() {
        let state = empty_state(Some("expected-key"));
        let response = create_message(State(state), axum::http::HeaderMap::new(), axum::body::Bytes::new()).await;
        assert_eq!(response.status(), axum::http::StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn create_message_rejects_malformed_body() {
        let state = empty_state(None);
        let response = create_message(
            State(state),
            axum::http::HeaderMap::new(),
            axum::body::Bytes::from_static(b"not json"),
        )
        .await;
        assert_eq!(response.status(), axum::http::StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn count_tokens_estimates_from_flattened_text() {
        let state = empty_state(None);
        let body = axum::body::Bytes::from_static(br#"{"model":"m","messages":[{"role":"user","content":"aaaaaaaa"}]}"#);
        let response = count_tokens(State(state), axum::http::HeaderMap::new(), body).await;
        assert_eq!(response.status(), axum::http::StatusCode::OK);
    }

    #[tokio::test]
    async fn list_models_with_no_providers_is_empty() {
        let state = empty_state(None);
        let response = list_models(State(state), Query(ListModelsQuery { provider: None, format: None })).await;
        assert_eq!(response.status(), axum::http::StatusCode::OK);
    }

    #[tokio::test]
    async fn list_models_rejects_unknown_format() {
        let state = empty_state(None);
        let response = list_models(
            State(state),
            Query(ListModelsQuery {
                provider: None,
                format: Some("xml".to_string()),
            }),
        )
        .await;
        assert_eq!(response.status(), axum::http::StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn list_models_openai_format_is_accepted() {
        let state = empty_state(None);
        let response = list_models(
            State(state),
            Query(ListModelsQuery {
                provider: None,
                format: Some("openai".to_string()),
            }),
        )
        .await;
        assert_eq!(response.status(), axum::http::StatusCode::OK);
    }

    #[tokio::test]
    async fn list_models_raw_format_is_accepted() {
        let state = empty_state(None);
        let response = list_models(
            State(state),
            Query(ListModelsQuery {
                provider: None,
                format: Some("raw".to_string()),
            }),
        )
        .await;
        assert_eq!(response.status(), axum::http::StatusCode::OK);
    }
}
