//! Claude Messages <-> OpenAI Chat Completions translation, plus the
//! middleware chain that observes and mutates requests, responses, and
//! stream chunks in between.

pub mod middleware;
pub mod translate;

pub use middleware::{Middleware, MiddlewareChain, RequestContext, StreamAccumulator};
pub use translate::request::transform_request;
pub use translate::response::transform_response;
pub use translate::stream::OpenAiToClaudeStreamState;
