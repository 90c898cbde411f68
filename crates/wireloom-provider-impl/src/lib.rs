//! Concrete upstream providers and their supporting HTTP/OAuth plumbing.
//! `wireloom-provider-core` defines the shapes; this crate fills them in
//! with real `wreq` clients and real token endpoints.

pub mod client;
pub mod credentials;
pub mod oauth;
pub mod providers;

pub use credentials::CredentialSource;
pub use providers::anthropic_wire::AnthropicWireProvider;
pub use providers::openai_wire::OpenAiWireProvider;
