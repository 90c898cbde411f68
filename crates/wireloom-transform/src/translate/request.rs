//! Claude Messages request -> OpenAI Chat Completions request.
//!
//! A Claude turn can interleave tool results with text inside a single
//! user message's content blocks; OpenAI expects each tool result as its
//! own `tool`-role message. We split on that boundary and otherwise map
//! block-for-block.

use wireloom_protocol::claude::messages::CreateMessageRequest;
use wireloom_protocol::claude::types::{
    ContentBlockParam, ImageMediaType, ImageSource, MessageContent, MessageParam, MessageRole,
    SystemParam, Tool, ToolChoice, ToolResultContent, ToolResultContentBlock,
};
use wireloom_protocol::openai::chat::{
    ChatCompletionRequest, ChatCompletionRequestMessage, FunctionObject, ImageUrl,
    NamedToolChoice, NamedToolChoiceFunction, StopConfiguration, ToolCall, ToolCallFunction,
    ToolCallType, ToolChoiceMode, ToolChoiceOption, ToolDefinition, UserContent,
    UserContentPart,
};

pub fn transform_request(request: CreateMessageRequest, max_tokens_cap: Option<u32>) -> ChatCompletionRequest {
    let mut messages = Vec::new();

    if let Some(system) = request.system {
        messages.push(ChatCompletionRequestMessage::System {
            content: system_text(system),
        });
    }

    for message in request.messages {
        messages.extend(map_message(message));
    }

    let max_tokens = match max_tokens_cap {
        Some(cap) => request.max_tokens.min(cap),
        None => request.max_tokens,
    };

    ChatCompletionRequest {
        model: request.model,
        messages,
        tools: request.tools.map(|tools| tools.into_iter().map(map_tool).collect()),
        tool_choice: request.tool_choice.map(map_tool_choice),
        parallel_tool_calls: None,
        max_tokens: Some(max_tokens),
        temperature: request.temperature,
        top_p: request.top_p,
        stop: request.stop_sequences.map(StopConfiguration::Many),
        stream: request.stream,
    }
}

fn system_text(system: SystemParam) -> String {
    match system {
        SystemParam::Text(text) => text,
        SystemParam::Blocks(blocks) => blocks
            .into_iter()
            .map(|block| block.text)
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

fn map_message(message: MessageParam) -> Vec<ChatCompletionRequestMessage> {
    let blocks = match message.content {
        MessageContent::Text(text) => {
            return vec![single_role_message(message.role, UserContent::Text(text))];
        }
        MessageContent::Blocks(blocks) => blocks,
    };

    match message.role {
        MessageRole::User => map_user_blocks(blocks),
        MessageRole::Assistant => vec![map_assistant_blocks(blocks)],
    }
}

fn single_role_message(role: MessageRole, content: UserContent) -> ChatCompletionRequestMessage {
    match role {
        MessageRole::User => ChatCompletionRequestMessage::User { content },
        MessageRole::Assistant => {
            let text = match content {
                UserContent::Text(text) => Some(text),
                UserContent::Parts(_) => None,
            };
            ChatCompletionRequestMessage::Assistant {
                content: text,
                tool_calls: None,
            }
        }
    }
}

fn map_user_blocks(blocks: Vec<ContentBlockParam>) -> Vec<ChatCompletionRequestMessage> {
    let mut out = Vec::new();
    let mut parts = Vec::new();

    for block in blocks {
        match block {
            ContentBlockParam::Text(text) => {
                parts.push(UserContentPart::Text { text: text.text });
            }
            ContentBlockParam::Image(image) => {
                if let Some(url) = image_data_url(image.source) {
                    parts.push(UserContentPart::ImageUrl {
                        image_url: ImageUrl { url },
                    });
                }
            }
            ContentBlockParam::ToolResult(result) => {
                if !parts.is_empty() {
                    out.push(ChatCompletionRequestMessage::User {
                        content: UserContent::Parts(std::mem::take(&mut parts)),
                    });
                }
                out.push(ChatCompletionRequestMessage::Tool {
                    content: tool_result_text(result.content),
                    tool_call_id: result.tool_use_id,
                });
            }
            ContentBlockParam::ToolUse(_) => {
                // Not valid on a user turn; nothing sensible to emit.
            }
        }
    }

    if !parts.is_empty() {
        out.push(ChatCompletionRequestMessage::User {
            content: UserContent::Parts(parts),
        });
    }

    out
}

fn map_assistant_blocks(blocks: Vec<ContentBlockParam>) -> ChatCompletionRequestMessage {
    let mut texts = Vec::new();
    let mut tool_calls = Vec::new();

    for block in blocks {
        match block {
            ContentBlockParam::Text(text) => texts.push(text.text),
            ContentBlockParam::ToolUse(mut tool_use) => {
                let thought_signature = match &mut tool_use.input {
                    serde_json::Value::Object(map) => map.remove("__thought_signature"),
                    _ => None,
                };
                tool_calls.push(ToolCall {
                    id: tool_use.id,
                    call_type: ToolCallType::Function,
                    function: ToolCallFunction {
                        name: tool_use.name,
                        arguments: serde_json::to_string(&tool_use.input)
                            .unwrap_or_else(|_| "{}".to_string()),
                    },
                    extra_body: thought_signature
                        .map(|signature| serde_json::json!({"google": {"thought_signature": signature}})),
                });
            }
            ContentBlockParam::Image(_) | ContentBlockParam::ToolResult(_) => {
                // Assistant turns don't carry images or tool results.
            }
        }
    }

    ChatCompletionRequestMessage::Assistant {
        content: if texts.is_empty() {
            None
        } else {
            Some(texts.join("\n"))
        },
        tool_calls: if tool_calls.is_empty() {
            None
        } else {
            Some(tool_calls)
        },
    }
}

fn tool_result_text(content: Option<ToolResultContent>) -> String {
    match content {
        None => String::new(),
        Some(ToolResultContent::Text(text)) => text,
        Some(ToolResultContent::Blocks(blocks)) => blocks
            .into_iter()
            .map(|ToolResultContentBlock::Text(text)| text.text)
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

fn image_data_url(source: ImageSource) -> Option<String> {
    match source {
        ImageSource::Url { url } => Some(url),
        ImageSource::Base64 { media_type, data } => {
            Some(format!("data:{};base64,{}", media_type_str(media_type), data))
        }
    }
}

fn media_type_str(media_type: ImageMediaType) -> &'static str {
    match media_type {
        ImageMediaType::ImageJpeg => "image/jpeg",
        ImageMediaType::ImagePng => "image/png",
        ImageMediaType::ImageGif => "image/gif",
        ImageMediaType::ImageWebp => "image/webp",
    }
}

fn map_tool(tool: Tool) -> ToolDefinition {
    ToolDefinition {
        def_type: ToolCallType::Function,
        function: FunctionObject {
            name: tool.name,
            description: tool.description,
            parameters: Some(tool.input_schema),
        },
    }
}

fn map_tool_choice(choice: ToolChoice) -> ToolChoiceOption {
    match choice {
        ToolChoice::Auto { .. } => ToolChoiceOption::Mode(ToolChoiceMode::Auto),
        ToolChoice::Any { .. } => ToolChoiceOption::Mode(ToolChoiceMode::Required),
        ToolChoice::None => ToolChoiceOption::Mode(ToolChoiceMode::None),
        ToolChoice::Tool { name, .. } => ToolChoiceOption::Named(NamedToolChoice {
            choice_type: ToolCallType::Function,
            function: NamedToolChoiceFunction { name },
        }),
    }
}
