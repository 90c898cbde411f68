//! Wire types for the two protocols the proxy speaks: the Anthropic Messages
//! format on the client-facing side, and OpenAI Chat Completions on the
//! upstream side when a provider isn't spoken to natively. Also houses the
//! SSE line framing shared by both directions' streaming bodies.

pub mod claude;
pub mod openai;
pub mod sse;
