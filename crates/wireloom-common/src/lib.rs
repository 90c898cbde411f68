use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum GlobalConfigError {
    #[error("missing required global config field: {0}")]
    MissingField(&'static str),
}

/// Final, merged runtime configuration. No database tier: everything here
/// is loaded CLI > ENV > built-in default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalConfig {
    pub host: String,
    pub port: u16,
    /// Expected client-facing key, compared in constant time. Absent means
    /// the proxy accepts any caller.
    pub proxy_key: Option<String>,
    /// Optional outbound proxy for upstream egress.
    pub outbound_proxy: Option<String>,
    /// Root directory for `<root>/oauth/<provider>/auth.json`.
    pub data_dir: PathBuf,
    /// `tracing_subscriber::EnvFilter` directive string.
    pub log_filter: String,
}

/// Overlay used while merging CLI args and environment variables before a
/// `GlobalConfig` can be built.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GlobalConfigPatch {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub proxy_key: Option<String>,
    pub outbound_proxy: Option<String>,
    pub data_dir: Option<PathBuf>,
    pub log_filter: Option<String>,
}

impl GlobalConfigPatch {
    /// Fields present in `other` win; absent fields keep `self`'s value.
    pub fn overlay(&mut self, other: GlobalConfigPatch) {
        if other.host.is_some() {
            self.host = other.host;
        }
        if other.port.is_some() {
            self.port = other.port;
        }
        if other.proxy_key.is_some() {
            self.proxy_key = other.proxy_key;
        }
        if other.outbound_proxy.is_some() {
            self.outbound_proxy = other.outbound_proxy;
        }
        if other.data_dir.is_some() {
            self.data_dir = other.data_dir;
        }
        if other.log_filter.is_some() {
            self.log_filter = other.log_filter;
        }
    }

    pub fn into_config(self) -> Result<GlobalConfig, GlobalConfigError> {
        Ok(GlobalConfig {
            host: self.host.unwrap_or_else(|| "0.0.0.0".to_string()),
            port: self.port.unwrap_or(8787),
            proxy_key: self.proxy_key,
            outbound_proxy: self.outbound_proxy,
            data_dir: self
                .data_dir
                .ok_or(GlobalConfigError::MissingField("data_dir"))?,
            log_filter: self.log_filter.unwrap_or_else(|| "info".to_string()),
        })
    }
}

impl From<GlobalConfig> for GlobalConfigPatch {
    fn from(value: GlobalConfig) -> Self {
        Self {
            host: Some(value.host),
            port: Some(value.port),
            proxy_key: value.proxy_key,
            outbound_proxy: value.outbound_proxy,
            data_dir: Some(value.data_dir),
            log_filter: Some(value.log_filter),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlay_prefers_later_values() {
        let mut base = GlobalConfigPatch {
            host: Some("127.0.0.1".to_string()),
            port: Some(1),
            ..Default::default()
        };
        base.overlay(GlobalConfigPatch {
            port: Some(2),
            ..Default::default()
        });
        assert_eq!(base.host.as_deref(), Some("127.0.0.1"));
        assert_eq!(base.port, Some(2));
    }

    #[test]
    fn into_config_requires_data_dir() {
        let patch = GlobalConfigPatch::default();
        assert!(matches!(
            patch.into_config(),
            Err(GlobalConfigError::MissingField("data_dir"))
        ));
    }
}
