use std::sync::Arc;

use wireloom_common::GlobalConfig;
use wireloom_provider_core::registry::ProviderRegistry;
use wireloom_transform::MiddlewareChain;

pub struct AppState {
    pub config: GlobalConfig,
    pub registry: ProviderRegistry,
    pub middleware: Arc<MiddlewareChain>,
}

pub type SharedState = Arc<AppState>;
