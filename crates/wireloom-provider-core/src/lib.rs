//! Provider-facing abstractions shared by every upstream implementation:
//! the `Provider` trait, the registry that looks providers up by name,
//! credential management (static-key rotation and OAuth token lifecycle),
//! and the thought-signature cache that makes Gemini reasoning continuity
//! possible through the OpenAI-compatibility surface.

pub mod credential;
pub mod errors;
pub mod headers;
pub mod provider;
pub mod registry;
pub mod rotator;
pub mod thought_cache;

pub use errors::{ProviderError, ProviderResult};
pub use provider::{
    ApiFormat, Credential, Provider, ProviderDescriptor, UpstreamBody, UpstreamCtx,
    UpstreamHttpRequest, UpstreamHttpResponse,
};
pub use registry::{DefaultSource, ProviderRegistry};
pub use rotator::KeyRotator;
pub use thought_cache::ThoughtSignatureCache;
