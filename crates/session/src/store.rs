//! Session Store: token persistence with a degraded fallback path
//!
//! Writes go to the secure store first. When it fails, the tokens go to the
//! fallback store instead of being lost, the store flips to degraded and a
//! warning plus a metric make the degraded path visible to operators.
//! Backends are selected once at startup, never re-probed per call.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use oidc_auth::store::probe_keyring;
use oidc_auth::{FallbackTokenStore, SecureTokenStore, StoreKind, TokenSet, TokenStore};
use tracing::{error, info, warn};

use crate::metrics;

pub struct SessionStore {
    primary: Arc<dyn TokenStore>,
    fallback: Option<Arc<dyn TokenStore>>,
    degraded: AtomicBool,
}

impl SessionStore {
    pub fn new(primary: Arc<dyn TokenStore>, fallback: Option<Arc<dyn TokenStore>>) -> Self {
        Self {
            primary,
            fallback,
            degraded: AtomicBool::new(false),
        }
    }

    /// Pick backends for this platform.
    ///
    /// Uses the system keyring when it answers, with the file at
    /// `fallback_path` behind it; otherwise the file alone, flagged degraded.
    pub async fn select(service: &str, fallback_path: PathBuf) -> oidc_auth::Result<Self> {
        let fallback: Arc<dyn TokenStore> = Arc::new(FallbackTokenStore::open(fallback_path).await?);

        if probe_keyring(service).await {
            info!(service, "using system keyring for tokens");
            let secure: Arc<dyn TokenStore> = Arc::new(SecureTokenStore::keyring(service));
            return Ok(Self::new(secure, Some(fallback)));
        }

        warn!("system keyring unavailable, storing tokens in fallback file");
        metrics::record_storage_degraded("select");
        let store = Self::new(fallback, None);
        store.degraded.store(true, Ordering::Relaxed);
        Ok(store)
    }

    /// Backend that receives writes first.
    pub fn kind(&self) -> StoreKind {
        self.primary.kind()
    }

    /// Whether any token has gone to the less-secure store.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    fn mark_degraded(&self, operation: &str, err: &oidc_auth::Error) {
        warn!(operation, error = %err, "secure token storage failed, using fallback store");
        metrics::record_storage_degraded(operation);
        self.degraded.store(true, Ordering::Relaxed);
    }

    /// Persist `tokens`, replacing whatever was stored.
    ///
    /// Returns the kind of store that holds them now.
    pub async fn save(&self, tokens: &TokenSet) -> oidc_auth::Result<StoreKind> {
        let err = match self.primary.save(tokens).await {
            Ok(()) => {
                // Tokens written while degraded must not outlive the recovery
                if let Some(fallback) = &self.fallback {
                    if let Err(e) = fallback.clear().await {
                        warn!(error = %e, "failed to clear stale fallback tokens");
                    }
                }
                return Ok(self.primary.kind());
            }
            Err(e) => e,
        };
        let Some(fallback) = &self.fallback else {
            error!(error = %err, "token storage failed with no fallback");
            return Err(err);
        };
        self.mark_degraded("save", &err);
        fallback.save(tokens).await?;
        Ok(fallback.kind())
    }

    /// Load the stored tokens from the primary store, then the fallback.
    pub async fn load(&self) -> oidc_auth::Result<Option<TokenSet>> {
        match self.primary.load().await {
            Ok(Some(tokens)) => return Ok(Some(tokens)),
            Ok(None) => {}
            Err(e) if self.fallback.is_some() => self.mark_degraded("load", &e),
            Err(e) => return Err(e),
        }
        match &self.fallback {
            Some(fallback) => fallback.load().await,
            None => Ok(None),
        }
    }

    /// Remove tokens from every backend. Safe to call when nothing is stored.
    ///
    /// Both backends are cleared even if the first fails; the first error
    /// is returned.
    pub async fn clear(&self) -> oidc_auth::Result<()> {
        let primary = self.primary.clear().await;
        let fallback = match &self.fallback {
            Some(fallback) => fallback.clear().await,
            None => Ok(()),
        };
        primary.and(fallback)
    }
}
