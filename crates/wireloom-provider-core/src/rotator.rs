use std::collections::HashMap;
use std::sync::Mutex;

use crate::errors::{ProviderError, ProviderResult};
use crate::provider::Credential;

/// Round-robin static-key rotation, one cursor per provider under a mutex.
/// Contention is negligible: the critical section is a single increment.
pub struct KeyRotator {
    keys: HashMap<String, Vec<String>>,
    cursors: HashMap<String, Mutex<usize>>,
}

impl KeyRotator {
    pub fn new(keys: HashMap<String, Vec<String>>) -> Self {
        let cursors = keys.keys().map(|name| (name.clone(), Mutex::new(0))).collect();
        Self { keys, cursors }
    }

    /// Returns the next key for `provider` in round-robin order.
    pub fn next(&self, provider: &str) -> ProviderResult<Credential> {
        let keys = self
            .keys
            .get(provider)
            .filter(|keys| !keys.is_empty())
            .ok_or_else(|| {
                ProviderError::NotAuthenticated(format!("no static keys configured for `{provider}`"))
            })?;
        let cursor = self
            .cursors
            .get(provider)
            .expect("cursors mirror keys by construction");
        let mut index = cursor.lock().expect("rotator mutex poisoned");
        let key = keys[*index % keys.len()].clone();
        *index = (*index + 1) % keys.len();
        Ok(Credential::ApiKey(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotates_round_robin_and_wraps() {
        let mut keys = HashMap::new();
        keys.insert(
            "openai".to_string(),
            vec!["a".to_string(), "b".to_string(), "c".to_string()],
        );
        let rotator = KeyRotator::new(keys);

        let seen: Vec<_> = (0..4)
            .map(|_| match rotator.next("openai").unwrap() {
                Credential::ApiKey(key) => key,
                Credential::OAuthToken(_) => unreachable!(),
            })
            .collect();
        assert_eq!(seen, vec!["a", "b", "c", "a"]);
    }

    #[test]
    fn missing_provider_is_not_authenticated() {
        let rotator = KeyRotator::new(HashMap::new());
        assert!(rotator.next("openai").is_err());
    }
}
