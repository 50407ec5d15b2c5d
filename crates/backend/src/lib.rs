//! Backend collaborators of the sign-in core
//!
//! Defines what the authentication flow hands to the marketplace backend
//! and how REST callers pick up the session's bearer token:
//! - [`ProfileBackend`] receives the profile-creation payload after sign-up
//! - [`TokenSource`] is implemented by whatever owns the current session;
//!   [`ApiClient`] attaches its token to outgoing requests

pub mod client;
pub mod http;
pub mod profile;

pub use client::{ApiClient, TokenSource};
pub use http::HttpProfileBackend;
pub use profile::{
    AddressFields, FieldSource, IdentityFields, IdentityTokens, ProfileFields, ProfilePayload,
    Sourced,
};

use std::future::Future;
use std::pin::Pin;

/// Errors from backend calls.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("backend request failed: {0}")]
    Http(String),

    #[error("backend rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("backend rejected the bearer token")]
    Unauthorized,

    #[error("invalid backend response: {0}")]
    Decode(String),
}

/// Result alias for backend operations.
pub type Result<T> = std::result::Result<T, BackendError>;

/// Receiver of the profile-creation payload.
///
/// The backend verifies the identity tokens itself; it must take the email
/// and subject from them, not from the user-typed fields.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility
/// (`Arc<dyn ProfileBackend>`).
pub trait ProfileBackend: Send + Sync {
    fn create_profile<'a>(
        &'a self,
        payload: &'a ProfilePayload,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
}
