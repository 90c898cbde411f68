//! The request fulfillment engine: resolves a provider for an inbound
//! Anthropic-wire request, runs it through the Translator and Middleware
//! Chain, and serves the result as a unary JSON response or an SSE stream.

pub mod auth;
pub mod bootstrap;
pub mod cli;
pub mod error;
pub mod orchestrator;
pub mod router;
pub mod state;

pub use bootstrap::{bootstrap, load_provider_oauth_config, BootstrapError};
pub use state::{AppState, SharedState};
