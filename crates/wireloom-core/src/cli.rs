//! CLI & Config (A1): `clap`-derived arguments, CLI > ENV > built-in-default
//! merge via `wireloom_common::GlobalConfigPatch`, and the JSON file
//! describing which providers to register.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use wireloom_common::GlobalConfigPatch;

#[derive(Parser, Debug)]
#[command(name = "wireloom")]
pub struct Cli {
    #[arg(long, env = "WIRELOOM_HOST")]
    pub host: Option<String>,
    #[arg(long, env = "WIRELOOM_PORT")]
    pub port: Option<u16>,
    #[arg(long, env = "WIRELOOM_PROXY_KEY")]
    pub proxy_key: Option<String>,
    #[arg(long, env = "WIRELOOM_OUTBOUND_PROXY")]
    pub outbound_proxy: Option<String>,
    #[arg(long, env = "WIRELOOM_DATA_DIR")]
    pub data_dir: Option<PathBuf>,
    #[arg(long, env = "WIRELOOM_LOG_FILTER")]
    pub log_filter: Option<String>,
    /// Path to the JSON file describing the provider set to register.
    #[arg(long, env = "WIRELOOM_PROVIDERS_FILE")]
    pub providers_file: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Runs the PKCE login flow for an OAuth-configured provider and
    /// stores the resulting credential in the token store.
    Login {
        /// Name of the provider entry in the providers file to log into.
        provider: String,
    },
}

impl Cli {
    pub fn into_patch(self) -> GlobalConfigPatch {
        GlobalConfigPatch {
            host: self.host,
            port: self.port,
            proxy_key: self.proxy_key,
            outbound_proxy: self.outbound_proxy,
            data_dir: self.data_dir,
            log_filter: self.log_filter,
        }
    }
}

/// Pulls the same fields from the environment directly, for the CLI>ENV
/// tier. `clap`'s `env` attribute already does this when the flag is
/// absent, so this only matters for a caller that builds a `Cli` value
/// without going through `Cli::parse()` (tests, embedding).
pub fn env_patch() -> GlobalConfigPatch {
    GlobalConfigPatch {
        host: std::env::var("WIRELOOM_HOST").ok(),
        port: std::env::var("WIRELOOM_PORT").ok().and_then(|v| v.parse().ok()),
        proxy_key: std::env::var("WIRELOOM_PROXY_KEY").ok(),
        outbound_proxy: std::env::var("WIRELOOM_OUTBOUND_PROXY").ok(),
        data_dir: std::env::var("WIRELOOM_DATA_DIR").ok().map(PathBuf::from),
        log_filter: std::env::var("WIRELOOM_LOG_FILTER").ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn into_patch_maps_every_field() {
        let cli = Cli {
            host: Some("127.0.0.1".to_string()),
            port: Some(9000),
            proxy_key: Some("secret".to_string()),
            outbound_proxy: None,
            data_dir: Some(PathBuf::from("/tmp/wireloom")),
            log_filter: Some("debug".to_string()),
            providers_file: Some(PathBuf::from("/tmp/providers.json")),
            command: None,
        };
        let patch = cli.into_patch();
        assert_eq!(patch.host.as_deref(), Some("127.0.0.1"));
        assert_eq!(patch.port, Some(9000));
        assert_eq!(patch.proxy_key.as_deref(), Some("secret"));
        assert_eq!(patch.outbound_proxy, None);
        assert_eq!(patch.data_dir, Some(PathBuf::from("/tmp/wireloom")));
        assert_eq!(patch.log_filter.as_deref(), Some("debug"));
    }

    #[test]
    fn cli_parses_minimal_args() {
        let cli = Cli::parse_from(["wireloom", "--data-dir", "/tmp/wireloom"]);
        assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/wireloom")));
        assert_eq!(cli.host, None);
        assert_eq!(cli.port, None);
    }

    #[test]
    fn cli_parses_full_args() {
        let cli = Cli::parse_from([
            "wireloom",
            "--host",
            "0.0.0.0",
            "--port",
            "8080",
            "--proxy-key",
            "k",
            "--providers-file",
            "providers.json",
        ]);
        assert_eq!(cli.host.as_deref(), Some("0.0.0.0"));
        assert_eq!(cli.port, Some(8080));
        assert_eq!(cli.proxy_key.as_deref(), Some("k"));
        assert_eq!(cli.providers_file, Some(PathBuf::from("providers.json")));
    }

    #[test]
    fn cli_parses_login_subcommand() {
        let cli = Cli::parse_from(["wireloom", "login", "anthropic"]);
        match cli.command {
            Some(Command::Login { provider }) => assert_eq!(provider, "anthropic"),
            other => panic!("expected login subcommand, got {other:?}"),
        }
    }
}
