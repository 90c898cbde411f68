//! Pluggable request/response/stream-chunk middleware chain.
//!
//! Hooks run in registration order. `before_request` failures are fatal;
//! `on_stream_chunk` failures are logged and the chunk is forwarded
//! unchanged, protecting stream integrity over middleware correctness.

pub mod thought_signature;

use async_trait::async_trait;

use wireloom_protocol::claude::messages::CreateMessageRequest;
use wireloom_protocol::claude::stream::StreamEvent;
use wireloom_protocol::claude::types::Message;

/// Per-request context threaded through every hook. `provider` and `model`
/// let a middleware decide via `applies_to` whether it has anything to do
/// for this request at all.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub provider: String,
    pub model: String,
    pub conversation_id: Option<String>,
}

#[derive(Debug, Default)]
pub struct StreamAccumulator {
    pub events: Vec<StreamEvent>,
    pub cancelled: bool,
}

pub type MiddlewareError = String;

#[async_trait]
pub trait Middleware: Send + Sync {
    fn name(&self) -> &str;

    /// Whether this middleware has anything to do for this provider/model
    /// pair. Cheap, synchronous, called before every hook.
    fn applies_to(&self, ctx: &RequestContext) -> bool;

    async fn before_request(
        &self,
        ctx: &RequestContext,
        request: CreateMessageRequest,
    ) -> Result<CreateMessageRequest, MiddlewareError> {
        let _ = ctx;
        Ok(request)
    }

    async fn after_response(
        &self,
        ctx: &RequestContext,
        response: Message,
    ) -> Result<Message, MiddlewareError> {
        let _ = ctx;
        Ok(response)
    }

    async fn on_stream_chunk(
        &self,
        ctx: &RequestContext,
        event: StreamEvent,
    ) -> Result<StreamEvent, MiddlewareError> {
        let _ = ctx;
        Ok(event)
    }

    async fn on_stream_complete(&self, ctx: &RequestContext, accumulated: &StreamAccumulator) {
        let _ = (ctx, accumulated);
    }
}

/// Ordered pipeline of middleware, run over a single request/response or
/// request/stream lifecycle.
#[derive(Default)]
pub struct MiddlewareChain {
    middlewares: Vec<Box<dyn Middleware>>,
}

impl MiddlewareChain {
    pub fn new() -> Self {
        Self {
            middlewares: Vec::new(),
        }
    }

    pub fn register(&mut self, middleware: Box<dyn Middleware>) {
        self.middlewares.push(middleware);
    }

    fn active(&self, ctx: &RequestContext) -> impl Iterator<Item = &Box<dyn Middleware>> {
        self.middlewares.iter().filter(|m| m.applies_to(ctx))
    }

    pub async fn before_request(
        &self,
        ctx: &RequestContext,
        mut request: CreateMessageRequest,
    ) -> Result<CreateMessageRequest, MiddlewareError> {
        for middleware in self.active(ctx) {
            request = middleware.before_request(ctx, request).await.map_err(|err| {
                format!("middleware `{}` before_request failed: {err}", middleware.name())
            })?;
        }
        Ok(request)
    }

    pub async fn after_response(
        &self,
        ctx: &RequestContext,
        mut response: Message,
    ) -> Result<Message, MiddlewareError> {
        for middleware in self.active(ctx) {
            response = middleware.after_response(ctx, response).await.map_err(|err| {
                format!("middleware `{}` after_response failed: {err}", middleware.name())
            })?;
        }
        Ok(response)
    }

    /// Runs `on_stream_chunk` for every active middleware. A middleware
    /// error is logged by the caller and the original event forwarded,
    /// per spec: stream chunk failures never abort the stream.
    pub async fn on_stream_chunk(
        &self,
        ctx: &RequestContext,
        mut event: StreamEvent,
    ) -> StreamEvent {
        for middleware in self.active(ctx) {
            match middleware.on_stream_chunk(ctx, event.clone()).await {
                Ok(next) => event = next,
                Err(err) => {
                    tracing::warn!(
                        event = "middleware_stream_chunk_error",
                        middleware = middleware.name(),
                        error = %err,
                    );
                }
            }
        }
        event
    }

    pub async fn on_stream_complete(&self, ctx: &RequestContext, accumulated: &StreamAccumulator) {
        for middleware in self.active(ctx) {
            middleware.on_stream_complete(ctx, accumulated).await;
        }
    }
}
