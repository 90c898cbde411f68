//! OpenAI Chat Completions response -> Claude Messages response (unary path).

use uuid::Uuid;

use wireloom_protocol::claude::types::{
    ContentBlock, Message, MessageObjectType, MessageRole, StopReason, TextBlock, ToolUseBlock,
    Usage,
};
use wireloom_protocol::openai::chat::{ChatCompletionResponse, FinishReason, ToolCallResponse};

pub fn transform_response(response: ChatCompletionResponse) -> Message {
    let choice = response.choices.into_iter().next();

    let (content, stop_reason) = match choice {
        Some(choice) => (
            map_content(&choice.message),
            map_finish_reason(choice.finish_reason),
        ),
        None => (Vec::new(), StopReason::EndTurn),
    };

    Message {
        id: response.id,
        message_type: MessageObjectType::Message,
        role: MessageRole::Assistant,
        content,
        model: response.model,
        stop_reason: Some(stop_reason),
        stop_sequence: None,
        usage: response
            .usage
            .map(|usage| Usage {
                input_tokens: usage.prompt_tokens,
                output_tokens: usage.completion_tokens,
            })
            .unwrap_or_default(),
    }
}

fn map_content(
    message: &wireloom_protocol::openai::chat::ChatCompletionResponseMessage,
) -> Vec<ContentBlock> {
    let mut blocks = Vec::new();

    if let Some(text) = &message.content {
        if !text.is_empty() {
            blocks.push(ContentBlock::Text(TextBlock { text: text.clone() }));
        }
    }

    if let Some(refusal) = &message.refusal {
        blocks.push(ContentBlock::Text(TextBlock {
            text: refusal.clone(),
        }));
    }

    if let Some(tool_calls) = &message.tool_calls {
        for call in tool_calls {
            blocks.push(ContentBlock::ToolUse(map_tool_call(call)));
        }
    }

    blocks
}

fn map_tool_call(call: &ToolCallResponse) -> ToolUseBlock {
    let mut input: serde_json::Value = serde_json::from_str(&call.function.arguments)
        .unwrap_or_else(|_| serde_json::Value::Object(Default::default()));

    if let Some(signature) = thought_signature(&call.extra_content) {
        if let serde_json::Value::Object(map) = &mut input {
            map.insert("__thought_signature".to_string(), signature);
        }
    }

    ToolUseBlock {
        id: call.id.clone(),
        name: call.function.name.clone(),
        input,
    }
}

/// Pulls `extra_content.google.thought_signature` back out, the inverse of
/// the `extra_body` attachment `map_assistant_blocks` performs on the way in.
fn thought_signature(extra_content: &Option<serde_json::Value>) -> Option<serde_json::Value> {
    extra_content
        .as_ref()?
        .get("google")?
        .get("thought_signature")
        .cloned()
}

fn map_finish_reason(reason: FinishReason) -> StopReason {
    match reason {
        FinishReason::Stop => StopReason::EndTurn,
        FinishReason::Length => StopReason::MaxTokens,
        FinishReason::ToolCalls => StopReason::ToolUse,
        // We don't carry a dedicated refusal stop reason on the wire;
        // surface it as a stop-sequence-style halt instead.
        FinishReason::ContentFilter => StopReason::StopSequence,
    }
}

/// Synthesizes a response id when an upstream omits one.
pub fn fallback_message_id() -> String {
    format!("msg_{}", Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wireloom_protocol::openai::chat::{ChatCompletionChoice, ChatCompletionResponseMessage};

    #[test]
    fn maps_plain_text_choice() {
        let response = ChatCompletionResponse {
            id: "chatcmpl-1".to_string(),
            model: "gpt-x".to_string(),
            choices: vec![ChatCompletionChoice {
                index: 0,
                message: ChatCompletionResponseMessage {
                    content: Some("hello".to_string()),
                    tool_calls: None,
                    refusal: None,
                },
                finish_reason: FinishReason::Stop,
            }],
            usage: None,
        };

        let message = transform_response(response);
        assert_eq!(message.stop_reason, Some(StopReason::EndTurn));
        assert_eq!(message.usage.input_tokens, 0);
        match &message.content[0] {
            ContentBlock::Text(text) => assert_eq!(text.text, "hello"),
            _ => panic!("expected text block"),
        }
    }

    #[test]
    fn content_filter_maps_to_stop_sequence() {
        let response = ChatCompletionResponse {
            id: "chatcmpl-2".to_string(),
            model: "gpt-x".to_string(),
            choices: vec![ChatCompletionChoice {
                index: 0,
                message: ChatCompletionResponseMessage {
                    content: None,
                    tool_calls: None,
                    refusal: Some("blocked".to_string()),
                },
                finish_reason: FinishReason::ContentFilter,
            }],
            usage: None,
        };

        let message = transform_response(response);
        assert_eq!(message.stop_reason, Some(StopReason::StopSequence));
    }
}
