//! Request Orchestrator (C9) + SSE Plumbing (C10): the per-request state
//! machine that parses an inbound Anthropic-wire request, resolves a
//! provider, runs it through the Translator and Middleware Chain, and
//! either collects a unary response or streams one back chunk by chunk.

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{HeaderValue, Method, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use wireloom_protocol::claude::messages::CreateMessageRequest;
use wireloom_protocol::claude::stream::StreamEvent;
use wireloom_protocol::claude::types::Message;
use wireloom_protocol::openai::chat::{ChatCompletionResponse, ChatCompletionStreamResponse};
use wireloom_protocol::sse::{self, SseParser};
use wireloom_provider_core::provider::{
    ApiFormat, Provider, UpstreamBody, UpstreamCtx, UpstreamHttpRequest,
};
use wireloom_provider_core::registry::ProviderRegistry;
use wireloom_transform::middleware::StreamAccumulator;
use wireloom_transform::{MiddlewareChain, RequestContext};

use crate::error::{from_provider_error, ProxyError};

const ANTHROPIC_PATH: &str = "/v1/messages";
const OPENAI_CHAT_PATH: &str = "/chat/completions";

/// Resolved `<provider>:<model>` or the registry's default provider for a
/// bare model string. Stripping the prefix is the only thing the routing
/// convention asks of the orchestrator; everything else is address lookup.
pub fn resolve_provider(
    registry: &ProviderRegistry,
    model: &str,
) -> Result<(Arc<dyn Provider>, String), ProxyError> {
    if let Some((provider_name, bare_model)) = model.split_once(':') {
        let provider = registry
            .lookup(provider_name)
            .map_err(from_provider_error)?;
        return Ok((provider, bare_model.to_string()));
    }

    let (provider, _source) = registry.default().map_err(from_provider_error)?;
    Ok((provider, model.to_string()))
}

/// Runs a full unary request: translate in, dispatch, translate out. The
/// caller is responsible for auth and for serializing `request` off the
/// wire beforehand.
pub async fn handle_unary(
    registry: &ProviderRegistry,
    middleware: &MiddlewareChain,
    trace_id: &str,
    mut request: CreateMessageRequest,
) -> Result<Message, ProxyError> {
    let (provider, bare_model) = resolve_provider(registry, &request.model)?;
    request.model = bare_model.clone();

    let ctx = RequestContext {
        provider: provider.name().to_string(),
        model: bare_model.clone(),
        conversation_id: None,
    };

    let request = middleware
        .before_request(&ctx, request)
        .await
        .map_err(ProxyError::invalid_request)?;

    let upstream_ctx = UpstreamCtx {
        trace_id: trace_id.to_string(),
        model: bare_model.clone(),
    };

    let response = match provider.descriptor().api_format {
        ApiFormat::AnthropicPassthrough => {
            let body = serde_json::to_vec(&request)
                .map_err(|err| ProxyError::internal(format!("encoding request: {err}")))?;
            let upstream_response = send_unary(provider.as_ref(), &upstream_ctx, ANTHROPIC_PATH, body).await?;
            serde_json::from_slice::<Message>(&upstream_response)
                .map_err(|err| ProxyError::upstream_error(format!("malformed upstream response: {err}")))?
        }
        ApiFormat::OpenAiChat => {
            let chat_request =
                wireloom_transform::transform_request(request, provider.descriptor().max_tokens_cap);
            let body = serde_json::to_vec(&chat_request)
                .map_err(|err| ProxyError::internal(format!("encoding request: {err}")))?;
            let upstream_response = send_unary(provider.as_ref(), &upstream_ctx, OPENAI_CHAT_PATH, body).await?;
            let chat_response: ChatCompletionResponse = serde_json::from_slice(&upstream_response)
                .map_err(|err| ProxyError::upstream_error(format!("malformed upstream response: {err}")))?;
            wireloom_transform::transform_response(chat_response)
        }
    };

    middleware
        .after_response(&ctx, response)
        .await
        .map_err(ProxyError::internal)
}

async fn send_unary(
    provider: &dyn Provider,
    ctx: &UpstreamCtx,
    path: &'static str,
    body: Vec<u8>,
) -> Result<Bytes, ProxyError> {
    let upstream_request = UpstreamHttpRequest {
        method: Method::POST,
        path,
        headers: Vec::new(),
        body: Bytes::from(body),
        stream: false,
    };
    let response = provider
        .call(ctx, upstream_request)
        .await
        .map_err(from_provider_error)?;
    if !(200..300).contains(&response.status) {
        return Err(status_to_proxy_error(response.status, provider.name()));
    }
    match response.body {
        UpstreamBody::Bytes(bytes) => Ok(bytes),
        UpstreamBody::Stream(_) => Err(ProxyError::internal(
            "provider returned a streaming body for a unary call",
        )),
    }
}

fn status_to_proxy_error(status: u16, provider: &str) -> ProxyError {
    match status {
        400..=499 => ProxyError::invalid_request(format!("upstream `{provider}` rejected the request ({status})")),
        _ => ProxyError::upstream_error(format!("upstream `{provider}` returned status {status}")),
    }
}

/// Runs a streaming request end to end and returns the axum response whose
/// body is the translated SSE stream. Provider errors that occur before any
/// bytes are sent become a normal JSON error response; errors discovered
/// mid-stream are folded into an `event: error` SSE frame instead, since the
/// headers have already gone out.
pub async fn handle_stream(
    registry: &ProviderRegistry,
    middleware: Arc<MiddlewareChain>,
    trace_id: String,
    mut request: CreateMessageRequest,
) -> Result<Response, ProxyError> {
    let (provider, bare_model) = resolve_provider(registry, &request.model)?;
    request.model = bare_model.clone();

    let ctx = RequestContext {
        provider: provider.name().to_string(),
        model: bare_model.clone(),
        conversation_id: None,
    };

    let request = middleware
        .before_request(&ctx, request)
        .await
        .map_err(ProxyError::invalid_request)?;

    let api_format = provider.descriptor().api_format;
    let upstream_ctx = UpstreamCtx {
        trace_id: trace_id.clone(),
        model: bare_model.clone(),
    };

    let (path, body) = match api_format {
        ApiFormat::AnthropicPassthrough => {
            let body = serde_json::to_vec(&request)
                .map_err(|err| ProxyError::internal(format!("encoding request: {err}")))?;
            (ANTHROPIC_PATH, body)
        }
        ApiFormat::OpenAiChat => {
            let mut chat_request =
                wireloom_transform::transform_request(request, provider.descriptor().max_tokens_cap);
            chat_request.stream = Some(true);
            let body = serde_json::to_vec(&chat_request)
                .map_err(|err| ProxyError::internal(format!("encoding request: {err}")))?;
            (OPENAI_CHAT_PATH, body)
        }
    };

    let upstream_request = UpstreamHttpRequest {
        method: Method::POST,
        path,
        headers: Vec::new(),
        body: Bytes::from(body),
        stream: true,
    };

    let upstream_response = provider
        .call(&upstream_ctx, upstream_request)
        .await
        .map_err(from_provider_error)?;

    if !(200..300).contains(&upstream_response.status) {
        return Err(status_to_proxy_error(upstream_response.status, provider.name()));
    }

    let upstream_rx = match upstream_response.body {
        UpstreamBody::Stream(rx) => rx,
        UpstreamBody::Bytes(bytes) => {
            let (tx, rx) = mpsc::channel(1);
            let _ = tx.try_send(Ok(bytes));
            rx
        }
    };

    let stream_read_timeout = provider.descriptor().stream_read_timeout;
    let (out_tx, out_rx) = mpsc::channel::<Bytes>(32);
    tokio::spawn(run_stream_pump(
        upstream_rx,
        out_tx,
        middleware,
        ctx,
        api_format,
        trace_id,
        stream_read_timeout,
    ));

    let stream = ReceiverStream::new(out_rx).map(Ok::<_, Infallible>);
    let mut response = Response::builder()
        .status(StatusCode::OK)
        .header(axum::http::header::CONTENT_TYPE, "text/event-stream")
        .header(axum::http::header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(stream))
        .expect("status and headers are always valid");
    response
        .headers_mut()
        .insert("x-accel-buffering", HeaderValue::from_static("no"));
    Ok(response)
}

/// Reads upstream SSE/byte frames, translates each into zero or more
/// Claude-wire `StreamEvent`s, runs each through the middleware chain, and
/// writes the re-encoded SSE record to `out_tx`. Runs until the upstream
/// channel closes or the client drops the response body (signalled by
/// `out_tx.send` failing).
async fn run_stream_pump(
    mut upstream_rx: mpsc::Receiver<wireloom_provider_core::errors::ProviderResult<Bytes>>,
    out_tx: mpsc::Sender<Bytes>,
    middleware: Arc<MiddlewareChain>,
    ctx: RequestContext,
    api_format: ApiFormat,
    trace_id: String,
    stream_read_timeout: std::time::Duration,
) {
    let mut parser = SseParser::new();
    let mut openai_state = wireloom_transform::OpenAiToClaudeStreamState::new();
    let mut accumulator = StreamAccumulator::default();

    'outer: loop {
        let item = match tokio::time::timeout(stream_read_timeout, upstream_rx.recv()).await {
            Ok(Some(item)) => item,
            Ok(None) => break 'outer,
            Err(_) => {
                tracing::warn!(event = "upstream_stream_timeout", trace_id = %trace_id);
                let frame = error_frame("stream read timed out", api_format);
                let _ = out_tx.send(Bytes::from(frame)).await;
                break 'outer;
            }
        };
        let chunk = match item {
            Ok(chunk) => chunk,
            Err(err) => {
                tracing::warn!(event = "upstream_stream_error", trace_id = %trace_id, error = %err);
                let frame = error_frame(&err.to_string(), api_format);
                let _ = out_tx.send(Bytes::from(frame)).await;
                break 'outer;
            }
        };

        for sse_event in parser.push_bytes(&chunk) {
            if sse_event.data == "[DONE]" {
                continue;
            }

            let events = match api_format {
                ApiFormat::AnthropicPassthrough => match serde_json::from_str::<StreamEvent>(&sse_event.data) {
                    Ok(event) => vec![event],
                    Err(err) => {
                        tracing::debug!(event = "stream_frame_unparseable", trace_id = %trace_id, error = %err);
                        let frame = match &sse_event.event {
                            Some(name) => sse::format_event(name, &sse_event.data),
                            None => sse::format_data(&sse_event.data),
                        };
                        if out_tx.send(Bytes::from(frame)).await.is_err() {
                            accumulator.cancelled = true;
                            break 'outer;
                        }
                        continue;
                    }
                },
                ApiFormat::OpenAiChat => match serde_json::from_str::<ChatCompletionStreamResponse>(&sse_event.data) {
                    Ok(chunk) => openai_state.transform_chunk(chunk),
                    Err(err) => {
                        tracing::debug!(event = "stream_frame_unparseable", trace_id = %trace_id, error = %err);
                        continue;
                    }
                },
            };

            for event in events {
                let event = middleware.on_stream_chunk(&ctx, event).await;
                let is_stop = matches!(event, StreamEvent::MessageStop);
                accumulator.events.push(event.clone());

                let payload = match serde_json::to_string(&event) {
                    Ok(json) => json,
                    Err(err) => {
                        tracing::warn!(event = "stream_encode_failed", trace_id = %trace_id, error = %err);
                        continue;
                    }
                };
                let frame = sse::format_event(event_name(&event), &payload);
                if out_tx.send(Bytes::from(frame)).await.is_err() {
                    accumulator.cancelled = true;
                    break 'outer;
                }

                if is_stop && api_format == ApiFormat::OpenAiChat {
                    let _ = out_tx.send(Bytes::from_static(sse::DONE_MARKER.as_bytes())).await;
                }
            }
        }
    }

    middleware.on_stream_complete(&ctx, &accumulator).await;
}

fn event_name(event: &StreamEvent) -> &'static str {
    match event {
        StreamEvent::MessageStart { .. } => "message_start",
        StreamEvent::ContentBlockStart { .. } => "content_block_start",
        StreamEvent::ContentBlockDelta { .. } => "content_block_delta",
        StreamEvent::ContentBlockStop { .. } => "content_block_stop",
        StreamEvent::MessageDelta { .. } => "message_delta",
        StreamEvent::MessageStop => "message_stop",
        StreamEvent::Ping => "ping",
        StreamEvent::Error { .. } => "error",
    }
}

fn error_frame(message: &str, api_format: ApiFormat) -> String {
    let payload = serde_json::json!({
        "type": "error",
        "error": { "type": "upstream_error", "message": message },
    });
    let mut frame = sse::format_event("error", &payload.to_string());
    if api_format == ApiFormat::OpenAiChat {
        frame.push_str(sse::DONE_MARKER);
    }
    frame
}

/// Approximately 4 characters per token, over the flattened text of every
/// message plus the system prompt. Matches the spec's explicit
/// character-based estimate; no tokenizer is vendored for this.
pub fn estimate_tokens(
    system: &Option<wireloom_protocol::claude::types::SystemParam>,
    messages: &[wireloom_protocol::claude::types::MessageParam],
) -> u32 {
    let mut chars = 0usize;
    if let Some(system) = system {
        chars += flatten_system(system).len();
    }
    for message in messages {
        chars += flatten_message_content(&message.content).len();
    }
    ((chars as f64) / 4.0).ceil() as u32
}

fn flatten_system(system: &wireloom_protocol::claude::types::SystemParam) -> String {
    use wireloom_protocol::claude::types::SystemParam;
    match system {
        SystemParam::Text(text) => text.clone(),
        SystemParam::Blocks(blocks) => blocks.iter().map(|b| b.text.as_str()).collect::<Vec<_>>().join(" "),
    }
}

fn flatten_message_content(content: &wireloom_protocol::claude::types::MessageContent) -> String {
    use wireloom_protocol::claude::types::{ContentBlockParam, MessageContent};
    match content {
        MessageContent::Text(text) => text.clone(),
        MessageContent::Blocks(blocks) => blocks
            .iter()
            .map(|block| match block {
                ContentBlockParam::Text(text_block) => text_block.text.clone(),
                ContentBlockParam::ToolUse(tool_use) => tool_use.input.to_string(),
                ContentBlockParam::ToolResult(tool_result) => tool_result
                    .content
                    .as_ref()
                    .map(flatten_tool_result)
                    .unwrap_or_default(),
                ContentBlockParam::Image(_) => String::new(),
            })
            .collect::<Vec<_>>()
            .join(" "),
    }
}

fn flatten_tool_result(content: &wireloom_protocol::claude::types::ToolResultContent) -> String {
    use wireloom_protocol::claude::types::{ToolResultContent, ToolResultContentBlock};
    match content {
        ToolResultContent::Text(text) => text.clone(),
        ToolResultContent::Blocks(blocks) => blocks
            .iter()
            .map(|b| match b {
                ToolResultContentBlock::Text(text_block) => text_block.text.as_str(),
            })
            .collect::<Vec<_>>()
            .join(" "),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use async_trait::async_trait;
    use wireloom_protocol::claude::types::{MessageContent, MessageParam, MessageRole};
    use wireloom_provider_core::provider::{ProviderDescriptor, UpstreamHttpResponse};

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
        ) -> wireloom_provider_core::errors::ProviderResult<UpstreamHttpResponse> {
            unimplemented!()
        }
    }

    /// Returns a fixed, valid Anthropic `Message` body regardless of the
    /// request it receives, so `handle_unary`'s passthrough path can be
    /// exercised end to end.
    struct CannedAnthropic(ProviderDescriptor);

    #[async_trait]
    impl Provider for CannedAnthropic {
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
        ) -> wireloom_provider_core::errors::ProviderResult<UpstreamHttpResponse> {
            let body = br#"{
                "id": "msg_1",
                "type": "message",
                "role": "assistant",
                "content": [{"type": "text", "text": "hi there"}],
                "model": "claude-opus",
                "stop_reason": "end_turn",
                "stop_sequence": null,
                "usage": {"input_tokens": 3, "output_tokens": 2}
            }"#;
            Ok(UpstreamHttpResponse {
                status: 200,
                headers: Vec::new(),
                body: UpstreamBody::Bytes(Bytes::from_static(body)),
            })
        }
    }

    fn descriptor(name: &str) -> ProviderDescriptor {
        ProviderDescriptor {
            name: name.to_string(),
            api_format: ApiFormat::AnthropicPassthrough,
            base_url: "https://example.invalid".to_string(),
            connect_timeout: Duration::from_secs(1),
            request_timeout: Duration::from_secs(1),
            stream_read_timeout: Duration::from_secs(1),
            retry_count: 0,
            max_tokens_cap: None,
            extra_headers: Vec::new(),
        }
    }

    #[test]
    fn resolve_provider_strips_known_prefix() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(Stub(descriptor("openai"))));
        registry.register(Arc::new(Stub(descriptor("anthropic"))));

        let (provider, model) = resolve_provider(&registry, "openai:gpt-5").unwrap();
        assert_eq!(provider.name(), "openai");
        assert_eq!(model, "gpt-5");
    }

    #[test]
    fn resolve_provider_falls_back_to_default_for_bare_model() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(Stub(descriptor("anthropic"))));

        let (provider, model) = resolve_provider(&registry, "claude-opus").unwrap();
        assert_eq!(provider.name(), "anthropic");
        assert_eq!(model, "claude-opus");
    }

    #[test]
    fn resolve_provider_unknown_prefix_is_an_upstream_error() {
        let registry = ProviderRegistry::new();
        let err = resolve_provider(&registry, "ghost:model").unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::UpstreamError);
    }

    #[test]
    fn estimate_tokens_counts_flattened_text() {
        let messages = vec![MessageParam {
            role: MessageRole::User,
            content: MessageContent::Text("a".repeat(8)),
        }];
        assert_eq!(estimate_tokens(&None, &messages), 2);
    }

    #[tokio::test]
    async fn handle_unary_round_trips_anthropic_passthrough() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(CannedAnthropic(descriptor("anthropic"))));
        let middleware = MiddlewareChain::new();

        let request = CreateMessageRequest {
            model: "anthropic:claude-opus".to_string(),
            system: None,
            messages: vec![MessageParam {
                role: MessageRole::User,
                content: MessageContent::Text("hello".to_string()),
            }],
            tools: None,
            tool_choice: None,
            max_tokens: 64,
            stream: None,
            temperature: None,
            top_p: None,
            stop_sequences: None,
        };

        let message = handle_unary(&registry, &middleware, "trace-1", request).await.unwrap();
        assert_eq!(message.id, "msg_1");
        assert_eq!(message.model, "claude-opus");
    }

    #[tokio::test]
    async fn stream_pump_forwards_unparseable_passthrough_frames_unchanged() {
        let (upstream_tx, upstream_rx) = mpsc::channel(4);
        let (out_tx, mut out_rx) = mpsc::channel(4);
        let middleware = Arc::new(MiddlewareChain::new());
        let ctx = RequestContext {
            provider: "anthropic".to_string(),
            model: "claude-opus".to_string(),
            conversation_id: None,
        };

        upstream_tx
            .send(Ok(Bytes::from_static(b"event: ping\ndata: not json\n\n")))
            .await
            .unwrap();
        drop(upstream_tx);

        run_stream_pump(
            upstream_rx,
            out_tx,
            middleware,
            ctx,
            ApiFormat::AnthropicPassthrough,
            "trace-1".to_string(),
            Duration::from_secs(5),
        )
        .await;

        let frame = out_rx.recv().await.expect("forwarded frame");
        let frame = String::from_utf8(frame.to_vec()).unwrap();
        assert!(frame.contains("event: ping"));
        assert!(frame.contains("not json"));
    }

    #[tokio::test]
    async fn stream_pump_emits_error_frame_on_read_timeout() {
        let (_upstream_tx, upstream_rx) = mpsc::channel::<wireloom_provider_core::errors::ProviderResult<Bytes>>(4);
        let (out_tx, mut out_rx) = mpsc::channel(4);
        let middleware = Arc::new(MiddlewareChain::new());
        let ctx = RequestContext {
            provider: "anthropic".to_string(),
            model: "claude-opus".to_string(),
            conversation_id: None,
        };

        run_stream_pump(
            upstream_rx,
            out_tx,
            middleware,
            ctx,
            ApiFormat::AnthropicPassthrough,
            "trace-1".to_string(),
            Duration::from_millis(20),
        )
        .await;

        let frame = out_rx.recv().await.expect("timeout error frame");
        let frame = String::from_utf8(frame.to_vec()).unwrap();
        assert!(frame.contains("timed out"));
    }
}
