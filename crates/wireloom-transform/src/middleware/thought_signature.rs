//! Gemini thought-signature continuity, as a concrete `Middleware`.
//!
//! Active only when the target model name carries a Gemini marker. On the
//! way out it attaches cached signatures to `tool_use` blocks so a Gemini
//! upstream recognizes its own prior reasoning; on the way back it harvests
//! fresh signatures out of `extra_content.google.thought_signature` and
//! hands them to the store for caching.

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use wireloom_protocol::claude::messages::CreateMessageRequest;
use wireloom_protocol::claude::types::{ContentBlockParam, Message, MessageContent, MessageRole};

use super::{Middleware, MiddlewareError, RequestContext};

/// Where a middleware reads and writes signature artifacts. Implemented by
/// the Thought-Signature Cache; kept as a trait here so `wireloom-transform`
/// doesn't need to depend on `wireloom-provider-core` for its concrete
/// storage type.
pub trait ThoughtSignatureStore: Send + Sync {
    fn retrieve(
        &self,
        tool_call_ids: &[String],
        conversation_id: Option<&str>,
    ) -> Option<std::collections::HashMap<String, JsonValue>>;

    fn record(
        &self,
        signatures: std::collections::HashMap<String, JsonValue>,
        conversation_id: Option<&str>,
    );
}

pub struct ThoughtSignatureMiddleware<S: ThoughtSignatureStore> {
    store: S,
}

impl<S: ThoughtSignatureStore> ThoughtSignatureMiddleware<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

fn is_gemini_model(model: &str) -> bool {
    model.to_ascii_lowercase().contains("gemini")
}

#[async_trait]
impl<S: ThoughtSignatureStore> Middleware for ThoughtSignatureMiddleware<S> {
    fn name(&self) -> &str {
        "thought-signature"
    }

    fn applies_to(&self, ctx: &RequestContext) -> bool {
        is_gemini_model(&ctx.model)
    }

    async fn before_request(
        &self,
        ctx: &RequestContext,
        mut request: CreateMessageRequest,
    ) -> Result<CreateMessageRequest, MiddlewareError> {
        for message in &mut request.messages {
            if message.role != MessageRole::Assistant {
                continue;
            }
            let MessageContent::Blocks(blocks) = &mut message.content else {
                continue;
            };

            let ids: Vec<String> = blocks
                .iter()
                .filter_map(|block| match block {
                    ContentBlockParam::ToolUse(tool_use) => Some(tool_use.id.clone()),
                    _ => None,
                })
                .collect();
            if ids.is_empty() {
                continue;
            }

            if let Some(signatures) = self.store.retrieve(&ids, ctx.conversation_id.as_deref()) {
                for block in blocks.iter_mut() {
                    if let ContentBlockParam::ToolUse(tool_use) = block {
                        if let Some(signature) = signatures.get(&tool_use.id) {
                            attach_signature(&mut tool_use.input, signature.clone());
                        }
                    }
                }
            }
        }

        Ok(request)
    }

    async fn after_response(
        &self,
        ctx: &RequestContext,
        response: Message,
    ) -> Result<Message, MiddlewareError> {
        let mut signatures = std::collections::HashMap::new();
        for block in &response.content {
            if let wireloom_protocol::claude::types::ContentBlock::ToolUse(tool_use) = block {
                if let Some(signature) = extract_signature(&tool_use.input) {
                    signatures.insert(tool_use.id.clone(), signature);
                }
            }
        }
        if !signatures.is_empty() {
            self.store.record(signatures, ctx.conversation_id.as_deref());
        }
        Ok(response)
    }
}

/// Stashes a signature under the OpenAI-compatibility convention key so the
/// translator forwards it untouched as `extra_body.google.thought_signature`.
fn attach_signature(input: &mut JsonValue, signature: JsonValue) {
    if let JsonValue::Object(map) = input {
        map.insert("__thought_signature".to_string(), signature);
    }
}

fn extract_signature(input: &JsonValue) -> Option<JsonValue> {
    input.get("__thought_signature").cloned()
}
