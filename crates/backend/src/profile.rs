//! Profile-creation payload
//!
//! Sign-up collects profile details in the app before the provider redirect,
//! and the provider asserts the identity afterwards. The payload keeps both,
//! tagging every field with where it came from so the backend can tell the
//! provider-asserted email apart from what the user typed.

use serde::{Deserialize, Serialize};

/// Origin of a profile field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldSource {
    /// Asserted by the identity provider's tokens (authoritative)
    Provider,
    /// Typed by the user, unverified (advisory)
    User,
}

/// A value tagged with its origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sourced<T> {
    pub value: T,
    pub source: FieldSource,
}

impl<T> Sourced<T> {
    pub fn provider(value: T) -> Self {
        Self {
            value,
            source: FieldSource::Provider,
        }
    }

    pub fn user(value: T) -> Self {
        Self {
            value,
            source: FieldSource::User,
        }
    }

    pub fn is_authoritative(&self) -> bool {
        self.source == FieldSource::Provider
    }
}

/// First sign-up step: personal details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityFields {
    pub first_name: String,
    pub last_name: String,
    /// Advisory only; the provider's email wins.
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub date_of_birth: Option<String>,
}

/// Second sign-up step: address and nationality.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressFields {
    pub street: String,
    pub city: String,
    pub postal_code: String,
    pub country: String,
    pub nationality: String,
}

/// Merged profile as sent to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileFields {
    /// Provider-asserted when the ID token carries an email, otherwise the
    /// typed email tagged as user-sourced.
    pub email: Sourced<String>,
    /// What the user typed, kept for display even when it differs.
    pub typed_email: Sourced<String>,
    pub subject: Option<Sourced<String>>,
    pub email_verified: Option<Sourced<bool>>,
    pub first_name: Sourced<String>,
    pub last_name: Sourced<String>,
    pub phone: Option<Sourced<String>>,
    pub date_of_birth: Option<Sourced<String>>,
    pub address: Sourced<AddressFields>,
}

/// Tokens the backend verifies to establish identity.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityTokens {
    pub id_token: Option<String>,
    pub access_token: Option<String>,
}

impl std::fmt::Debug for IdentityTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityTokens")
            .field("id_token", &self.id_token.as_ref().map(|_| "[REDACTED]"))
            .field("access_token", &self.access_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// `{ "profile": {...}, "identity": { "id_token": ..., "access_token": ... } }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfilePayload {
    pub profile: ProfileFields,
    pub identity: IdentityTokens,
}
