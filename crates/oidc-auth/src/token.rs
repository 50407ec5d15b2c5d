//! Token endpoint interactions
//!
//! 1. Authorization code exchange (completes a sign-in or sign-up attempt)
//! 2. Refresh token grant
//! 3. End-session (provider logout) notification
//!
//! None of these persist anything. Storage is the session store's job, which
//! lets sign-in and registration share the exchange while doing different
//! things with the result.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// Tokens issued by the provider.
///
/// Replaced wholesale on every successful exchange or refresh, never patched
/// field by field.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSet {
    pub access_token: Option<String>,
    pub id_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Access-token expiry as unix timestamp in milliseconds
    #[serde(default)]
    pub expires_at: Option<u64>,
}

impl TokenSet {
    pub fn new(access_token: impl Into<String>, id_token: impl Into<String>) -> Self {
        Self {
            access_token: Some(access_token.into()),
            id_token: Some(id_token.into()),
            refresh_token: None,
            expires_at: None,
        }
    }

    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    /// Whether the access token expires within `margin_millis` of `now_millis`.
    pub fn expires_within(&self, now_millis: u64, margin_millis: u64) -> bool {
        self.expires_at
            .is_some_and(|expires| expires <= now_millis.saturating_add(margin_millis))
    }
}

impl fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn mask(token: &Option<String>) -> &'static str {
            if token.is_some() { "[REDACTED]" } else { "None" }
        }
        f.debug_struct("TokenSet")
            .field("access_token", &mask(&self.access_token))
            .field("id_token", &mask(&self.id_token))
            .field("refresh_token", &mask(&self.refresh_token))
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Raw token endpoint response.
///
/// `expires_in` is a delta in seconds; it becomes an absolute expiry when
/// converted into a [`TokenSet`].
#[derive(Debug, Deserialize, Serialize)]
pub struct TokenResponse {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub token_type: Option<String>,
}

impl TokenResponse {
    /// Convert into a token set, rejecting responses with neither token.
    pub fn into_token_set(self, now_millis: u64) -> Result<TokenSet> {
        if self.access_token.is_none() && self.id_token.is_none() {
            return Err(Error::TokenExchange(
                "response carried neither access_token nor id_token".into(),
            ));
        }
        Ok(TokenSet {
            access_token: self.access_token,
            id_token: self.id_token,
            refresh_token: self.refresh_token,
            expires_at: self
                .expires_in
                .map(|secs| now_millis.saturating_add(secs.saturating_mul(1000))),
        })
    }
}

/// OAuth error body (`{"error": "...", "error_description": "..."}`).
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

pub(crate) fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Exchange an authorization code for tokens.
///
/// Sends the PKCE `code_verifier` so the provider can check it against the
/// challenge from the authorization request. A provider rejecting the
/// verifier answers non-2xx, which surfaces as `TokenExchange`.
pub async fn exchange_code(
    client: &reqwest::Client,
    token_endpoint: &str,
    client_id: &str,
    redirect_uri: &str,
    code: &str,
    code_verifier: &str,
) -> Result<TokenSet> {
    let response = client
        .post(token_endpoint)
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("client_id", client_id),
            ("code_verifier", code_verifier),
        ])
        .send()
        .await
        .map_err(|e| Error::TokenExchange(format!("token request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));
        return Err(Error::TokenExchange(format!(
            "token endpoint returned {status}: {body}"
        )));
    }

    let tokens = response
        .json::<TokenResponse>()
        .await
        .map_err(|e| Error::TokenExchange(format!("invalid token response: {e}")))?
        .into_token_set(now_millis())?;
    debug!(
        has_refresh = tokens.refresh_token.is_some(),
        "authorization code exchanged"
    );
    Ok(tokens)
}

/// Renew tokens with a refresh token.
///
/// A rejected refresh token (`invalid_grant`, 401, 403) is
/// `InvalidCredentials`; the caller must fall back to a full sign-in.
/// When the provider does not rotate the refresh token the old one is kept.
pub async fn refresh_token(
    client: &reqwest::Client,
    token_endpoint: &str,
    client_id: &str,
    refresh: &str,
) -> Result<TokenSet> {
    let response = client
        .post(token_endpoint)
        .form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh),
            ("client_id", client_id),
        ])
        .send()
        .await
        .map_err(|e| Error::TokenExchange(format!("token refresh request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));

        let invalid_grant = serde_json::from_str::<ErrorBody>(&body)
            .map(|b| b.error == "invalid_grant")
            .unwrap_or(false);
        if invalid_grant || status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(Error::InvalidCredentials(format!(
                "refresh token rejected ({status}): {body}"
            )));
        }

        return Err(Error::TokenExchange(format!(
            "token refresh returned {status}: {body}"
        )));
    }

    let mut tokens = response
        .json::<TokenResponse>()
        .await
        .map_err(|e| Error::TokenExchange(format!("invalid refresh response: {e}")))?
        .into_token_set(now_millis())?;
    if tokens.refresh_token.is_none() {
        tokens.refresh_token = Some(refresh.to_string());
    }
    Ok(tokens)
}

/// Tell the provider to end its own session for `id_token_hint`.
pub async fn end_session(
    client: &reqwest::Client,
    end_session_endpoint: &str,
    client_id: &str,
    id_token_hint: &str,
) -> Result<()> {
    let response = client
        .post(end_session_endpoint)
        .form(&[("id_token_hint", id_token_hint), ("client_id", client_id)])
        .send()
        .await
        .map_err(|e| Error::Logout(format!("logout request failed: {e}")))?;

    let status = response.status();
    // Keycloak answers logout with a redirect to its confirmation page
    if !(status.is_success() || status.is_redirection()) {
        let detail = response
            .text()
            .await
            .ok()
            .and_then(|body| serde_json::from_str::<ErrorBody>(&body).ok())
            .map(|b| b.error_description.unwrap_or(b.error))
            .unwrap_or_default();
        return Err(Error::Logout(format!(
            "logout endpoint returned {status} {detail}"
        )));
    }
    Ok(())
}
