//! OAuth2/OIDC Authorization Code + PKCE client core
//!
//! Provider discovery, PKCE request construction, redirect capture, token
//! exchange/refresh/logout, and token persistence for the marketplace app.
//! This crate knows nothing about session state; the `session` crate drives
//! these pieces.
//!
//! Flow:
//! 1. `discovery::DiscoveryResolver::resolve()` fetches provider metadata
//! 2. `pkce::AuthorizationRequest::build()` creates verifier, challenge, state
//! 3. `redirect::RedirectListener::start_wait()` registers the expected state
//! 4. A `user_agent::UserAgent` opens `authorization_url()`
//! 5. The host delivers the redirect; the wait resolves with the code
//! 6. `token::exchange_code()` swaps code + verifier for a `TokenSet`
//! 7. A `store::TokenStore` persists the set

pub mod claims;
pub mod constants;
pub mod discovery;
pub mod error;
pub mod pkce;
pub mod redirect;
pub mod store;
pub mod token;
pub mod user_agent;

pub use claims::IdTokenClaims;
pub use discovery::{DiscoveryResolver, ProviderMetadata, fetch_metadata};
pub use error::{Error, ErrorKind, Result};
pub use pkce::{AuthorizationRequest, FlowKind, compute_challenge, generate_verifier};
pub use redirect::{AuthorizationCode, Delivery, IgnoreReason, RedirectListener, RedirectWait};
pub use store::{FallbackTokenStore, SecureTokenStore, StoreKind, TokenStore};
pub use token::{TokenSet, end_session, exchange_code, refresh_token};
pub use user_agent::{SystemBrowser, UserAgent};
