//! PKCE (Proof Key for Code Exchange) authorization requests per RFC 7636
//!
//! Each sign-in or sign-up attempt gets a fresh [`AuthorizationRequest`]:
//! a random `state`, a random code verifier and its S256 challenge. The
//! request lives in memory for one attempt only; the verifier is wrapped in
//! [`Secret`] so it never shows up in logs.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use common::Secret;
use rand::RngExt;
use serde::Serialize;
use sha2::{Digest, Sha256};
use url::Url;

use crate::constants::{DEFAULT_SCOPES, STATE_BYTES, VERIFIER_BYTES};
use crate::discovery::ProviderMetadata;
use crate::error::{Error, Result};

/// Which provider page the attempt opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowKind {
    /// Standard login endpoint
    SignIn,
    /// Registration page, same redirect contract
    SignUp,
}

impl FlowKind {
    pub fn label(&self) -> &'static str {
        match self {
            FlowKind::SignIn => "sign_in",
            FlowKind::SignUp => "sign_up",
        }
    }
}

fn random_token(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::rng().fill(&mut bytes[..]);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Generate a cryptographically random PKCE code verifier.
///
/// 64 random bytes as URL-safe base64 without padding: 86 characters drawn
/// from the unreserved set `[A-Za-z0-9-_]`.
pub fn generate_verifier() -> String {
    random_token(VERIFIER_BYTES)
}

/// Generate an unguessable `state` value.
pub fn generate_state() -> String {
    random_token(STATE_BYTES)
}

/// Compute the S256 code challenge from a verifier.
///
/// `challenge = BASE64URL(SHA256(verifier))`, no padding.
pub fn compute_challenge(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash)
}

/// One outstanding authorization attempt.
#[derive(Debug)]
pub struct AuthorizationRequest {
    pub state: String,
    code_verifier: Secret<String>,
    pub code_challenge: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    pub client_id: String,
    authorization_endpoint: String,
    registration_endpoint: Option<String>,
}

impl AuthorizationRequest {
    /// Build a fresh request for the given client.
    ///
    /// Missing client id, redirect URI or provider metadata is a
    /// configuration error, reported before anything is opened.
    pub fn build(
        client_id: &str,
        redirect_uri: &str,
        scopes: &[String],
        metadata: Option<&ProviderMetadata>,
    ) -> Result<Self> {
        if client_id.trim().is_empty() {
            return Err(Error::Configuration("client_id is missing".into()));
        }
        if redirect_uri.trim().is_empty() {
            return Err(Error::Configuration("redirect_uri is missing".into()));
        }
        Url::parse(redirect_uri).map_err(|e| {
            Error::Configuration(format!("redirect_uri {redirect_uri} is not a URL: {e}"))
        })?;
        let metadata = metadata.ok_or_else(|| {
            Error::Configuration("provider metadata has not been resolved".into())
        })?;

        let scopes = if scopes.is_empty() {
            DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect()
        } else {
            scopes.to_vec()
        };

        let verifier = generate_verifier();
        let code_challenge = compute_challenge(&verifier);

        Ok(Self {
            state: generate_state(),
            code_verifier: Secret::new(verifier),
            code_challenge,
            redirect_uri: redirect_uri.to_string(),
            scopes,
            client_id: client_id.to_string(),
            authorization_endpoint: metadata.authorization_endpoint.clone(),
            registration_endpoint: metadata.registration_endpoint(),
        })
    }

    /// The verifier sent to the token endpoint.
    pub fn code_verifier(&self) -> &str {
        self.code_verifier.expose()
    }

    /// URL to hand to the external user agent.
    pub fn authorization_url(&self, flow: FlowKind) -> Result<Url> {
        let endpoint = match flow {
            FlowKind::SignIn => self.authorization_endpoint.as_str(),
            FlowKind::SignUp => self.registration_endpoint.as_deref().ok_or_else(|| {
                Error::Configuration("provider has no registration page".into())
            })?,
        };

        let mut url = Url::parse(endpoint)
            .map_err(|e| Error::Configuration(format!("invalid endpoint {endpoint}: {e}")))?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("scope", &self.scopes.join(" "))
            .append_pair("code_challenge", &self.code_challenge)
            .append_pair("code_challenge_method", "S256")
            .append_pair("state", &self.state);
        Ok(url)
    }
}
