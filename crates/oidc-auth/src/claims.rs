//! ID token claim decoding
//!
//! Reads the payload segment of the ID token without verifying its
//! signature. The result is only used for display and to mark which
//! identity fields came from the provider; the backend verifies the token
//! itself before trusting it.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Identity claims asserted by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdTokenClaims {
    pub sub: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub email_verified: Option<bool>,
    #[serde(default)]
    pub preferred_username: Option<String>,
    #[serde(default)]
    pub given_name: Option<String>,
    #[serde(default)]
    pub family_name: Option<String>,
    #[serde(default)]
    pub iss: Option<String>,
}

impl IdTokenClaims {
    /// Decode the claims of a compact JWS without checking the signature.
    pub fn decode_unverified(id_token: &str) -> Result<Self> {
        let mut segments = id_token.split('.');
        let (Some(_header), Some(payload), Some(_signature), None) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            return Err(Error::InvalidIdToken("expected three segments".into()));
        };

        let bytes = URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .map_err(|e| Error::InvalidIdToken(format!("payload is not base64url: {e}")))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| Error::InvalidIdToken(format!("payload is not a claim set: {e}")))
    }
}
