//! OpenAI Chat Completions wire format: the shape upstream providers speak
//! when reached in "openai-chat" mode, including Gemini's OpenAI-compatible
//! endpoint and its thought-signature extension fields.

pub mod chat;

pub use chat::*;
