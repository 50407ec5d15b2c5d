//! OpenID provider metadata discovery
//!
//! Resolves the authorization, token and end-session endpoints from the
//! issuer's `.well-known/openid-configuration` document. Metadata is
//! immutable once fetched and cached for the lifetime of the resolver, so
//! repeated flow starts do not hit the network again.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{debug, info};
use url::Url;

use crate::constants::{LOGIN_PATH_SUFFIX, REGISTRATION_PATH_SUFFIX, WELL_KNOWN_PATH};
use crate::error::{Error, Result};

/// Endpoints advertised by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderMetadata {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    #[serde(default)]
    pub end_session_endpoint: Option<String>,
    #[serde(default)]
    pub userinfo_endpoint: Option<String>,
    /// User-facing sign-up page. Not part of the discovery document; set from
    /// host configuration when the provider does not follow Keycloak's layout.
    #[serde(skip)]
    pub registration_page: Option<String>,
}

impl ProviderMetadata {
    /// Endpoint that opens the provider's sign-up form.
    ///
    /// Uses the configured page when present, otherwise swaps the trailing
    /// `/auth` of the authorization endpoint for `/registrations`.
    pub fn registration_endpoint(&self) -> Option<String> {
        if let Some(page) = &self.registration_page {
            return Some(page.clone());
        }
        self.authorization_endpoint
            .strip_suffix(LOGIN_PATH_SUFFIX)
            .map(|base| format!("{base}{REGISTRATION_PATH_SUFFIX}"))
    }

    fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("issuer", &self.issuer),
            ("authorization_endpoint", &self.authorization_endpoint),
            ("token_endpoint", &self.token_endpoint),
        ] {
            if value.trim().is_empty() {
                return Err(Error::Discovery(format!("metadata field {name} is empty")));
            }
        }
        for (name, value) in [
            ("authorization_endpoint", &self.authorization_endpoint),
            ("token_endpoint", &self.token_endpoint),
        ] {
            Url::parse(value)
                .map_err(|e| Error::Discovery(format!("metadata field {name} is not a URL: {e}")))?;
        }
        Ok(())
    }
}

/// Build the discovery document URL for an issuer base URL.
pub fn well_known_url(issuer: &str) -> Result<Url> {
    let raw = format!("{}/{}", issuer.trim_end_matches('/'), WELL_KNOWN_PATH);
    Url::parse(&raw).map_err(|e| Error::Configuration(format!("invalid issuer URL {issuer}: {e}")))
}

/// Fetch and validate provider metadata for `issuer`. No caching.
pub async fn fetch_metadata(client: &reqwest::Client, issuer: &str) -> Result<ProviderMetadata> {
    let url = well_known_url(issuer)?;
    debug!(url = %url, "fetching provider metadata");

    let response = client
        .get(url.clone())
        .send()
        .await
        .map_err(|e| Error::Discovery(format!("issuer unreachable at {url}: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(Error::Discovery(format!(
            "discovery endpoint returned {status}"
        )));
    }

    let metadata = response
        .json::<ProviderMetadata>()
        .await
        .map_err(|e| Error::Discovery(format!("malformed discovery document: {e}")))?;
    metadata.validate()?;
    Ok(metadata)
}

/// Lazily resolves and caches provider metadata for a single issuer.
pub struct DiscoveryResolver {
    client: reqwest::Client,
    issuer: String,
    registration_page: Option<String>,
    cache: OnceCell<Arc<ProviderMetadata>>,
}

impl DiscoveryResolver {
    pub fn new(client: reqwest::Client, issuer: impl Into<String>) -> Self {
        Self {
            client,
            issuer: issuer.into(),
            registration_page: None,
            cache: OnceCell::new(),
        }
    }

    /// Override the sign-up page instead of deriving it.
    pub fn with_registration_page(mut self, page: Option<String>) -> Self {
        self.registration_page = page;
        self
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Resolve metadata, fetching it on first use.
    ///
    /// Failures are not cached; the next call retries the fetch.
    pub async fn resolve(&self) -> Result<Arc<ProviderMetadata>> {
        self.cache
            .get_or_try_init(|| async {
                let mut metadata = fetch_metadata(&self.client, &self.issuer).await?;
                metadata.registration_page = self.registration_page.clone();
                info!(
                    issuer = %metadata.issuer,
                    token_endpoint = %metadata.token_endpoint,
                    "resolved provider metadata"
                );
                Ok::<_, Error>(Arc::new(metadata))
            })
            .await
            .cloned()
    }

    /// Metadata if it has already been resolved.
    pub fn cached(&self) -> Option<Arc<ProviderMetadata>> {
        self.cache.get().cloned()
    }
}
