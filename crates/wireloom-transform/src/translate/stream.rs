//! OpenAI Chat Completions stream -> Claude Messages stream (SSE path).
//!
//! OpenAI emits one flat delta per choice per chunk; Claude wants an
//! explicit `content_block_start`/`delta`/`stop` sequence per block, and
//! Claude never has two blocks open at once: a `content_block_stop` for
//! the previous block always precedes the next `content_block_start`. We
//! track at most one open block and close it the moment a delta of a
//! different kind (or a different tool-call index) arrives.

use wireloom_protocol::claude::stream::{
    MessageDeltaPayload, MessageStartPayload, StreamContentBlock, StreamContentBlockDelta,
    StreamEvent, StreamUsage,
};
use wireloom_protocol::claude::types::{MessageObjectType, MessageRole, StopReason, Usage};
use wireloom_protocol::openai::chat::{
    ChatCompletionStreamResponse, CompletionUsage, FinishReason, ToolCallChunk,
};

#[derive(Debug, Clone, PartialEq, Eq)]
enum OpenBlock {
    Text { claude_index: u32 },
    Tool { openai_index: u32, claude_index: u32 },
}

#[derive(Debug)]
pub struct OpenAiToClaudeStreamState {
    id: String,
    model: String,
    message_started: bool,
    finish_emitted: bool,
    pending_finish: Option<StopReason>,
    next_block_index: u32,
    open: Option<OpenBlock>,
}

impl OpenAiToClaudeStreamState {
    pub fn new() -> Self {
        Self {
            id: String::new(),
            model: String::new(),
            message_started: false,
            finish_emitted: false,
            pending_finish: None,
            next_block_index: 0,
            open: None,
        }
    }

    pub fn transform_chunk(&mut self, chunk: ChatCompletionStreamResponse) -> Vec<StreamEvent> {
        let mut events = Vec::new();

        if !self.message_started {
            self.id = chunk.id.clone();
            self.model = chunk.model.clone();
            self.message_started = true;
            events.push(StreamEvent::MessageStart {
                message: MessageStartPayload {
                    id: self.id.clone(),
                    message_type: MessageObjectType::Message,
                    role: MessageRole::Assistant,
                    content: Vec::new(),
                    model: self.model.clone(),
                    usage: Usage::default(),
                },
            });
        }

        let choice = chunk.choices.into_iter().next();

        let mut finish_reason = None;
        if let Some(choice) = choice {
            if let Some(text) = &choice.delta.content {
                events.extend(self.emit_text(text));
            }
            if let Some(tool_calls) = &choice.delta.tool_calls {
                for call in tool_calls {
                    events.extend(self.emit_tool_call(call));
                }
            }
            finish_reason = choice.finish_reason.map(map_finish_reason);
        }

        if let Some(reason) = finish_reason {
            if !self.finish_emitted {
                events.extend(self.close_current());
                self.pending_finish = Some(reason);
            }
        }

        if let Some(usage) = map_usage(chunk.usage) {
            if let Some(reason) = self.pending_finish.take() {
                events.push(StreamEvent::MessageDelta {
                    delta: MessageDeltaPayload {
                        stop_reason: Some(reason),
                        stop_sequence: None,
                    },
                    usage,
                });
                events.push(StreamEvent::MessageStop);
                self.finish_emitted = true;
            } else {
                events.push(StreamEvent::MessageDelta {
                    delta: MessageDeltaPayload::default(),
                    usage,
                });
            }
        } else if let Some(reason) = self.pending_finish.take() {
            // Some upstreams never send a trailing usage chunk; don't let
            // the stream hang without a message_stop.
            events.push(StreamEvent::MessageDelta {
                delta: MessageDeltaPayload {
                    stop_reason: Some(reason),
                    stop_sequence: None,
                },
                usage: StreamUsage::default(),
            });
            events.push(StreamEvent::MessageStop);
            self.finish_emitted = true;
        }

        events
    }

    fn emit_text(&mut self, text: &str) -> Vec<StreamEvent> {
        if text.is_empty() {
            return Vec::new();
        }

        let mut events = Vec::new();

        let claude_index = match &self.open {
            Some(OpenBlock::Text { claude_index }) => *claude_index,
            _ => {
                events.extend(self.close_current());
                let claude_index = self.next_block_index;
                self.next_block_index += 1;
                self.open = Some(OpenBlock::Text { claude_index });
                events.push(StreamEvent::ContentBlockStart {
                    index: claude_index,
                    content_block: StreamContentBlock::Text {
                        text: String::new(),
                    },
                });
                claude_index
            }
        };

        events.push(StreamEvent::ContentBlockDelta {
            index: claude_index,
            delta: StreamContentBlockDelta::TextDelta {
                text: text.to_string(),
            },
        });

        events
    }

    fn emit_tool_call(&mut self, call: &ToolCallChunk) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        let openai_index = call.index;

        let claude_index = match &self.open {
            Some(OpenBlock::Tool {
                openai_index: open_index,
                claude_index,
            }) if *open_index == openai_index => *claude_index,
            _ => {
                events.extend(self.close_current());
                let claude_index = self.next_block_index;
                self.next_block_index += 1;
                self.open = Some(OpenBlock::Tool {
                    openai_index,
                    claude_index,
                });

                let id = call.id.clone().unwrap_or_else(|| format!("toolcall-{openai_index}"));
                let name = call
                    .function
                    .as_ref()
                    .and_then(|f| f.name.clone())
                    .unwrap_or_else(|| "tool".to_string());
                events.push(StreamEvent::ContentBlockStart {
                    index: claude_index,
                    content_block: StreamContentBlock::ToolUse { id, name },
                });
                claude_index
            }
        };

        if let Some(arguments) = call.function.as_ref().and_then(|f| f.arguments.clone()) {
            events.push(StreamEvent::ContentBlockDelta {
                index: claude_index,
                delta: StreamContentBlockDelta::InputJsonDelta {
                    partial_json: arguments,
                },
            });
        }

        events
    }

    fn close_current(&mut self) -> Vec<StreamEvent> {
        match self.open.take() {
            Some(OpenBlock::Text { claude_index }) | Some(OpenBlock::Tool { claude_index, .. }) => {
                vec![StreamEvent::ContentBlockStop { index: claude_index }]
            }
            None => Vec::new(),
        }
    }
}

impl Default for OpenAiToClaudeStreamState {
    fn default() -> Self {
        Self::new()
    }
}

fn map_finish_reason(reason: FinishReason) -> StopReason {
    match reason {
        FinishReason::Stop => StopReason::EndTurn,
        FinishReason::Length => StopReason::MaxTokens,
        FinishReason::ToolCalls => StopReason::ToolUse,
        FinishReason::ContentFilter => StopReason::StopSequence,
    }
}

fn map_usage(usage: Option<CompletionUsage>) -> Option<StreamUsage> {
    let usage = usage?;
    Some(StreamUsage {
        input_tokens: Some(usage.prompt_tokens),
        output_tokens: Some(usage.completion_tokens),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use wireloom_protocol::openai::chat::{ChatCompletionStreamChoice, ChatCompletionStreamDelta};

    fn chunk(
        content: Option<&str>,
        finish_reason: Option<FinishReason>,
        usage: Option<CompletionUsage>,
    ) -> ChatCompletionStreamResponse {
        ChatCompletionStreamResponse {
            id: "chatcmpl-1".to_string(),
            model: "gpt-x".to_string(),
            choices: vec![ChatCompletionStreamChoice {
                index: 0,
                delta: ChatCompletionStreamDelta {
                    role: None,
                    content: content.map(|s| s.to_string()),
                    tool_calls: None,
                },
                finish_reason,
            }],
            usage,
        }
    }

    #[test]
    fn first_chunk_emits_message_start_then_text_block_start() {
        let mut state = OpenAiToClaudeStreamState::new();
        let events = state.transform_chunk(chunk(Some("hi"), None, None));
        assert!(matches!(events[0], StreamEvent::MessageStart { .. }));
        assert!(matches!(events[1], StreamEvent::ContentBlockStart { .. }));
        assert!(matches!(events[2], StreamEvent::ContentBlockDelta { .. }));
    }

    #[test]
    fn finish_closes_block_and_emits_stop_once() {
        let mut state = OpenAiToClaudeStreamState::new();
        state.transform_chunk(chunk(Some("hi"), None, None));
        let events = state.transform_chunk(chunk(
            None,
            Some(FinishReason::Stop),
            Some(CompletionUsage {
                prompt_tokens: 3,
                completion_tokens: 5,
                total_tokens: 8,
            }),
        ));
        assert!(events.iter().any(|e| matches!(e, StreamEvent::ContentBlockStop { .. })));
        assert!(events.iter().any(|e| matches!(e, StreamEvent::MessageStop)));
        assert!(state.finish_emitted);
    }

    fn tool_call_chunk(index: u32, id: Option<&str>, name: Option<&str>, arguments: Option<&str>) -> ChatCompletionStreamResponse {
        ChatCompletionStreamResponse {
            id: "chatcmpl-1".to_string(),
            model: "gpt-x".to_string(),
            choices: vec![ChatCompletionStreamChoice {
                index: 0,
                delta: ChatCompletionStreamDelta {
                    role: None,
                    content: None,
                    tool_calls: Some(vec![ToolCallChunk {
                        index,
                        id: id.map(|s| s.to_string()),
                        function: Some(wireloom_protocol::openai::chat::ToolCallChunkFunction {
                            name: name.map(|s| s.to_string()),
                            arguments: arguments.map(|s| s.to_string()),
                        }),
                    }]),
                },
                finish_reason: None,
            }],
            usage: None,
        }
    }

    #[test]
    fn text_then_tool_call_closes_text_block_before_opening_tool_block() {
        let mut state = OpenAiToClaudeStreamState::new();
        state.transform_chunk(chunk(Some("thinking"), None, None));

        let events = state.transform_chunk(tool_call_chunk(0, Some("call_1"), Some("lookup"), Some("{}")));

        // The text block must be stopped before the tool block starts; no two
        // blocks are ever open on the Claude wire at once.
        assert!(matches!(events[0], StreamEvent::ContentBlockStop { index: 0 }));
        assert!(matches!(
            events[1],
            StreamEvent::ContentBlockStart {
                index: 1,
                content_block: StreamContentBlock::ToolUse { .. }
            }
        ));
    }

    #[test]
    fn two_distinct_tool_indices_close_the_first_before_opening_the_second() {
        let mut state = OpenAiToClaudeStreamState::new();
        state.transform_chunk(tool_call_chunk(0, Some("call_1"), Some("lookup"), Some("{}")));

        let events = state.transform_chunk(tool_call_chunk(1, Some("call_2"), Some("search"), Some("{}")));

        assert!(matches!(events[0], StreamEvent::ContentBlockStop { index: 1 }));
        assert!(matches!(events[1], StreamEvent::ContentBlockStart { index: 2, .. }));
    }
}
