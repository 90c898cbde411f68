use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use wireloom_common::GlobalConfig;
use wireloom_core::cli::Command;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = wireloom_core::cli::Cli::parse();
    let providers_file = cli.providers_file.clone();
    let login_provider = match &cli.command {
        Some(Command::Login { provider }) => Some(provider.clone()),
        None => None,
    };

    let config = cli
        .into_patch()
        .into_config()
        .context("assembling global config")?;

    if let Some(provider) = login_provider {
        return run_login(&config, providers_file.as_deref(), &provider).await;
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_filter.clone()))
        .init();

    let state = wireloom_core::bootstrap(config, providers_file.as_deref())
        .await
        .context("bootstrapping provider registry")?;

    let bind = format!("{}:{}", state.config.host, state.config.port);
    let app = wireloom_core::router::build_router(std::sync::Arc::new(state));

    let listener = tokio::net::TcpListener::bind(&bind).await?;
    tracing::info!(event = "listening", addr = %bind);
    axum::serve(listener, app).await?;
    Ok(())
}

/// Runs the PKCE login flow (C3) for a single provider: opens a loopback
/// callback server, prints the authorize URL for the operator to visit,
/// waits for the redirect, exchanges the code, and persists the result.
async fn run_login(config: &GlobalConfig, providers_path: Option<&Path>, provider_name: &str) -> Result<()> {
    let endpoint = wireloom_core::load_provider_oauth_config(providers_path, provider_name)
        .context("loading oauth config for provider")?;

    let (pending, wait) = wireloom_provider_impl::oauth::login::start_login(&endpoint)
        .await
        .map_err(|err| anyhow::anyhow!(err.to_string()))?;

    println!("Open this URL to log in to `{provider_name}`:\n\n{}\n", pending.authorize_url);

    let (code, code_verifier) = wait.await.map_err(|err| anyhow::anyhow!(err.to_string()))?;

    let http_client = wreq::Client::builder()
        .build()
        .context("building oauth http client")?;
    let token = wireloom_provider_impl::oauth::login::exchange_code(
        &http_client,
        &endpoint,
        &pending.redirect_uri,
        &code,
        &code_verifier,
    )
    .await
    .map_err(|err| anyhow::anyhow!(err.to_string()))?;

    let store = wireloom_provider_core::credential::store::TokenStore::new(&config.data_dir, provider_name);
    store.save(&token).context("saving oauth token")?;

    println!("Logged in to `{provider_name}`.");
    Ok(())
}
