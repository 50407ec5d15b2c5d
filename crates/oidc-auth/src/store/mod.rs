//! Token persistence
//!
//! Two backends implement [`TokenStore`]: [`SecureTokenStore`] on top of the
//! OS credential vault and [`FallbackTokenStore`], a permission-restricted
//! JSON file for platforms without one. Both address tokens by the same
//! literal keys (`accessToken`, `idToken`, `refreshToken`).

mod file;
mod secure;

pub use file::FallbackTokenStore;
pub use secure::{KeyringVault, SecretVault, SecureTokenStore, probe_keyring};

use std::future::Future;
use std::pin::Pin;

use serde::Serialize;

use crate::constants::{ACCESS_TOKEN_KEY, EXPIRES_AT_KEY, ID_TOKEN_KEY, REFRESH_TOKEN_KEY};
use crate::error::Result;
use crate::token::TokenSet;

/// Boxed future returned by [`TokenStore`] methods, keeping the trait
/// usable as `Arc<dyn TokenStore>`.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Which kind of backend holds the tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    Secure,
    Fallback,
}

/// Key-value persistence for a [`TokenSet`].
///
/// `save` replaces the stored set wholesale, `clear` is a no-op when
/// nothing is stored.
pub trait TokenStore: Send + Sync {
    fn kind(&self) -> StoreKind;

    fn save<'a>(&'a self, tokens: &'a TokenSet) -> BoxFuture<'a, Result<()>>;

    fn load(&self) -> BoxFuture<'_, Result<Option<TokenSet>>>;

    fn clear(&self) -> BoxFuture<'_, Result<()>>;
}

/// All keys a token set occupies, paired with the value to store (`None`
/// means delete).
pub(crate) fn token_entries(tokens: &TokenSet) -> [(&'static str, Option<String>); 4] {
    [
        (ACCESS_TOKEN_KEY, tokens.access_token.clone()),
        (ID_TOKEN_KEY, tokens.id_token.clone()),
        (REFRESH_TOKEN_KEY, tokens.refresh_token.clone()),
        (EXPIRES_AT_KEY, tokens.expires_at.map(|t| t.to_string())),
    ]
}

pub(crate) const TOKEN_KEYS: [&str; 4] =
    [ACCESS_TOKEN_KEY, ID_TOKEN_KEY, REFRESH_TOKEN_KEY, EXPIRES_AT_KEY];

/// Rebuild a token set from stored entries; `None` when neither the access
/// nor the ID token is present.
pub(crate) fn token_set_from(mut lookup: impl FnMut(&str) -> Option<String>) -> Option<TokenSet> {
    let access_token = lookup(ACCESS_TOKEN_KEY);
    let id_token = lookup(ID_TOKEN_KEY);
    if access_token.is_none() && id_token.is_none() {
        return None;
    }
    Some(TokenSet {
        access_token,
        id_token,
        refresh_token: lookup(REFRESH_TOKEN_KEY),
        expires_at: lookup(EXPIRES_AT_KEY).and_then(|v| v.parse().ok()),
    })
}
