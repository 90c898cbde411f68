//! On-disk OAuth credential persistence: `<root>/oauth/<provider>/auth.json`,
//! written atomically (temp file + rename) so a crash mid-write never leaves
//! a torn file behind, with 0700/0600 permissions on the directory and file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::{ProviderError, ProviderResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthToken {
    pub access_token: String,
    pub refresh_token: String,
    /// Unix timestamp (seconds) the access token expires at.
    pub expires_at: u64,
    #[serde(default)]
    pub id_token: Option<String>,
    /// Identifies which upstream account this token belongs to, for
    /// providers that key refreshes and logging off of it rather than the
    /// access token itself.
    #[serde(default)]
    pub account_id: Option<String>,
    /// Unix timestamp (seconds) this token was last refreshed or installed.
    #[serde(default)]
    pub last_refresh: u64,
}

pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub fn new(data_dir: &Path, provider: &str) -> Self {
        Self {
            path: data_dir.join("oauth").join(provider).join("auth.json"),
        }
    }

    pub fn load(&self) -> ProviderResult<Option<OAuthToken>> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => serde_json::from_str(&contents)
                .map(Some)
                .map_err(|err| ProviderError::Other(format!("malformed oauth token file: {err}"))),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(ProviderError::Other(format!("reading oauth token file: {err}"))),
        }
    }

    pub fn save(&self, token: &OAuthToken) -> ProviderResult<()> {
        let parent = self
            .path
            .parent()
            .expect("token path always has a parent under data_dir/oauth/<provider>");
        std::fs::create_dir_all(parent)
            .map_err(|err| ProviderError::Other(format!("creating oauth dir: {err}")))?;
        set_permissions(parent, 0o700)?;

        let json = serde_json::to_string_pretty(token)
            .map_err(|err| ProviderError::Other(format!("encoding oauth token: {err}")))?;

        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, json)
            .map_err(|err| ProviderError::Other(format!("writing oauth token temp file: {err}")))?;
        set_permissions(&tmp_path, 0o600)?;
        std::fs::rename(&tmp_path, &self.path)
            .map_err(|err| ProviderError::Other(format!("renaming oauth token file: {err}")))?;

        Ok(())
    }
}

#[cfg(unix)]
fn set_permissions(path: &Path, mode: u32) -> ProviderResult<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .map_err(|err| ProviderError::Other(format!("setting permissions on {path:?}: {err}")))
}

#[cfg(not(unix))]
fn set_permissions(_path: &Path, _mode: u32) -> ProviderResult<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn token() -> OAuthToken {
        OAuthToken {
            access_token: "access".to_string(),
            refresh_token: "refresh".to_string(),
            expires_at: 9_999_999_999,
            id_token: None,
            account_id: Some("acct_1".to_string()),
            last_refresh: 0,
        }
    }

    #[test]
    fn save_then_load_roundtrips() {
        let dir = TempDir::new().unwrap();
        let store = TokenStore::new(dir.path(), "openai");
        store.save(&token()).unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.access_token, "access");
    }

    #[test]
    fn load_missing_file_is_none() {
        let dir = TempDir::new().unwrap();
        let store = TokenStore::new(dir.path(), "openai");
        assert!(store.load().unwrap().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn save_sets_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = TempDir::new().unwrap();
        let store = TokenStore::new(dir.path(), "openai");
        store.save(&token()).unwrap();

        let file_perms = std::fs::metadata(&store.path).unwrap().permissions();
        assert_eq!(file_perms.mode() & 0o777, 0o600);

        let dir_perms = std::fs::metadata(store.path.parent().unwrap())
            .unwrap()
            .permissions();
        assert_eq!(dir_perms.mode() & 0o777, 0o700);
    }

    #[test]
    fn no_temp_file_survives_a_successful_save() {
        let dir = TempDir::new().unwrap();
        let store = TokenStore::new(dir.path(), "openai");
        store.save(&token()).unwrap();
        assert!(!store.path.with_extension("json.tmp").exists());
    }
}
