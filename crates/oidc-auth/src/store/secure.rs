//! OS credential vault storage
//!
//! Uses the platform's native credential store through the `keyring` crate:
//! Keychain on macOS, Secret Service on Linux, Credential Manager on
//! Windows. Each token is its own entry under the configured service name.

use std::sync::Arc;

use tracing::{debug, warn};

use super::{BoxFuture, StoreKind, TOKEN_KEYS, TokenStore, token_entries, token_set_from};
use crate::error::{Error, Result};
use crate::token::TokenSet;

/// Blocking key-value vault.
///
/// `get` of a missing key is `Ok(None)` and `delete` of a missing key is
/// `Ok(())`.
pub trait SecretVault: Send + Sync + 'static {
    fn put(&self, key: &str, value: &str) -> Result<()>;
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn delete(&self, key: &str) -> Result<()>;
}

/// [`SecretVault`] backed by the system keyring.
#[derive(Debug, Clone)]
pub struct KeyringVault {
    service: String,
}

impl KeyringVault {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, key: &str) -> Result<keyring::Entry> {
        keyring::Entry::new(&self.service, key)
            .map_err(|e| Error::Storage(format!("keyring entry {key}: {e}")))
    }
}

impl SecretVault for KeyringVault {
    fn put(&self, key: &str, value: &str) -> Result<()> {
        self.entry(key)?
            .set_password(value)
            .map_err(|e| Error::Storage(format!("keyring write {key}: {e}")))
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        match self.entry(key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(Error::Storage(format!("keyring read {key}: {e}"))),
        }
    }

    fn delete(&self, key: &str) -> Result<()> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(Error::Storage(format!("keyring delete {key}: {e}"))),
        }
    }
}

/// Check once whether the system keyring is usable.
///
/// A missing entry still proves the backend works; storage-access and
/// platform failures mean it does not.
pub async fn probe_keyring(service: &str) -> bool {
    let service = service.to_string();
    let probe = tokio::task::spawn_blocking(move || {
        let entry = match keyring::Entry::new(&service, "availability-check") {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "keyring unavailable");
                return false;
            }
        };
        match entry.get_password() {
            Ok(_) | Err(keyring::Error::NoEntry) => true,
            Err(e @ (keyring::Error::NoStorageAccess(_) | keyring::Error::PlatformFailure(_))) => {
                warn!(error = %e, "keyring unavailable");
                false
            }
            Err(_) => true,
        }
    })
    .await;
    probe.unwrap_or(false)
}

/// Token store writing each token into a [`SecretVault`].
pub struct SecureTokenStore<V: SecretVault = KeyringVault> {
    vault: Arc<V>,
}

impl SecureTokenStore<KeyringVault> {
    /// Store tokens in the system keyring under `service`.
    pub fn keyring(service: impl Into<String>) -> Self {
        Self::with_vault(KeyringVault::new(service))
    }
}

impl<V: SecretVault> SecureTokenStore<V> {
    pub fn with_vault(vault: V) -> Self {
        Self {
            vault: Arc::new(vault),
        }
    }

    /// Run a blocking vault operation off the async executor.
    async fn blocking<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&V) -> Result<T> + Send + 'static,
    {
        let vault = self.vault.clone();
        tokio::task::spawn_blocking(move || op(&vault))
            .await
            .map_err(|e| Error::Storage(format!("vault task failed: {e}")))?
    }
}

impl<V: SecretVault> TokenStore for SecureTokenStore<V> {
    fn kind(&self) -> StoreKind {
        StoreKind::Secure
    }

    fn save<'a>(&'a self, tokens: &'a TokenSet) -> BoxFuture<'a, Result<()>> {
        let entries = token_entries(tokens);
        Box::pin(async move {
            self.blocking(move |vault| {
                let written = entries.into_iter().try_for_each(|(key, value)| match value {
                    Some(value) => vault.put(key, &value),
                    None => vault.delete(key),
                });
                if written.is_err() {
                    // Half-written sets would load as a mix of old and new tokens
                    for key in TOKEN_KEYS {
                        if let Err(e) = vault.delete(key) {
                            warn!(key, error = %e, "failed to discard partial token write");
                        }
                    }
                }
                written
            })
            .await?;
            debug!("tokens written to secure storage");
            Ok(())
        })
    }

    fn load(&self) -> BoxFuture<'_, Result<Option<TokenSet>>> {
        Box::pin(async move {
            self.blocking(|vault| {
                let mut first_error = None;
                let tokens = token_set_from(|key| match vault.get(key) {
                    Ok(value) => value,
                    Err(e) => {
                        first_error.get_or_insert(e);
                        None
                    }
                });
                match first_error {
                    Some(e) => Err(e),
                    None => Ok(tokens),
                }
            })
            .await
        })
    }

    fn clear(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.blocking(|vault| {
                for key in TOKEN_KEYS {
                    vault.delete(key)?;
                }
                Ok(())
            })
            .await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::ID_TOKEN_KEY;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryVault {
        entries: Mutex<HashMap<String, String>>,
    }

    impl SecretVault for MemoryVault {
        fn put(&self, key: &str, value: &str) -> Result<()> {
            self.entries
                .lock()
                .unwrap()
                .insert(key.to_string(), value.to_string());
            Ok(())
        }

        fn get(&self, key: &str) -> Result<Option<String>> {
            Ok(self.entries.lock().unwrap().get(key).cloned())
        }

        fn delete(&self, key: &str) -> Result<()> {
            self.entries.lock().unwrap().remove(key);
            Ok(())
        }
    }

    struct LockedVault;

    impl SecretVault for LockedVault {
        fn put(&self, _key: &str, _value: &str) -> Result<()> {
            Err(Error::Storage("vault locked".into()))
        }

        fn get(&self, _key: &str) -> Result<Option<String>> {
            Err(Error::Storage("vault locked".into()))
        }

        fn delete(&self, _key: &str) -> Result<()> {
            Err(Error::Storage("vault locked".into()))
        }
    }

    /// Vault that refuses to store one key.
    #[derive(Default)]
    struct RejectingVault {
        inner: MemoryVault,
        reject: &'static str,
    }

    impl SecretVault for RejectingVault {
        fn put(&self, key: &str, value: &str) -> Result<()> {
            if key == self.reject {
                return Err(Error::Storage(format!("vault rejected {key}")));
            }
            self.inner.put(key, value)
        }

        fn get(&self, key: &str) -> Result<Option<String>> {
            self.inner.get(key)
        }

        fn delete(&self, key: &str) -> Result<()> {
            self.inner.delete(key)
        }
    }

    #[tokio::test]
    async fn save_load_clear() {
        let store = SecureTokenStore::with_vault(MemoryVault::default());
        assert_eq!(store.kind(), StoreKind::Secure);
        assert!(store.load().await.unwrap().is_none());

        let tokens = TokenSet::new("AT1", "IT1").with_refresh_token("RT1");
        store.save(&tokens).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(tokens));

        store.clear().await.unwrap();
        assert!(store.load().await.unwrap().is_none());
        store.clear().await.unwrap();
    }

    #[tokio::test]
    async fn save_replaces_wholesale() {
        let store = SecureTokenStore::with_vault(MemoryVault::default());
        store
            .save(&TokenSet::new("AT1", "IT1").with_refresh_token("RT1"))
            .await
            .unwrap();
        store.save(&TokenSet::new("AT2", "IT2")).await.unwrap();

        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded.access_token.as_deref(), Some("AT2"));
        assert!(
            loaded.refresh_token.is_none(),
            "stale refresh token must not survive a wholesale replace"
        );
    }

    #[tokio::test]
    async fn failed_save_never_mixes_token_sets() {
        let vault = RejectingVault {
            reject: ID_TOKEN_KEY,
            ..RejectingVault::default()
        };
        for (key, value) in token_entries(&TokenSet::new("AT1", "IT1").with_refresh_token("RT1")) {
            if let Some(value) = value {
                vault.inner.put(key, &value).unwrap();
            }
        }
        let store = SecureTokenStore::with_vault(vault);

        let err = store.save(&TokenSet::new("AT2", "IT2")).await.unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
        assert!(
            store.load().await.unwrap().is_none(),
            "a failed save must not leave AT2 next to IT1"
        );
    }

    #[tokio::test]
    async fn vault_failures_surface_as_storage_errors() {
        let store = SecureTokenStore::with_vault(LockedVault);
        let tokens = TokenSet::new("AT", "IT");
        assert!(matches!(store.save(&tokens).await, Err(Error::Storage(_))));
        assert!(matches!(store.load().await, Err(Error::Storage(_))));
        assert!(matches!(store.clear().await, Err(Error::Storage(_))));
    }
}
