//! Protocol constants
//!
//! Storage keys are part of the persisted format: hosts that already hold
//! tokens under these names keep working across upgrades.

use std::time::Duration;

/// Discovery document path relative to the issuer base URL
pub const WELL_KNOWN_PATH: &str = ".well-known/openid-configuration";

/// Secure/fallback storage key for the bearer access token
pub const ACCESS_TOKEN_KEY: &str = "accessToken";

/// Secure/fallback storage key for the ID token
pub const ID_TOKEN_KEY: &str = "idToken";

/// Secure/fallback storage key for the refresh token
pub const REFRESH_TOKEN_KEY: &str = "refreshToken";

/// Storage key for the absolute access-token expiry (unix millis)
pub const EXPIRES_AT_KEY: &str = "expiresAt";

/// Scopes requested when the host configures none.
pub const DEFAULT_SCOPES: &[&str] = &["openid", "profile", "email"];

/// Random bytes behind a PKCE verifier. 64 bytes encode to 86 base64url
/// characters, inside RFC 7636's 43..=128 window.
pub const VERIFIER_BYTES: usize = 64;

/// Random bytes behind the `state` parameter (43 base64url characters).
pub const STATE_BYTES: usize = 32;

/// How long a queued sign-in waits for provider metadata before failing.
pub const REQUEST_READY_TIMEOUT: Duration = Duration::from_secs(15);

/// Bound on the provider logout call during sign-out.
pub const LOGOUT_TIMEOUT: Duration = Duration::from_secs(5);

/// Keyring service name for the secure token store.
pub const KEYRING_SERVICE: &str = "marketplace-auth";

/// Keycloak's login and registration pages share a parent path:
/// `.../protocol/openid-connect/auth` and `.../protocol/openid-connect/registrations`.
pub const LOGIN_PATH_SUFFIX: &str = "/auth";
pub const REGISTRATION_PATH_SUFFIX: &str = "/registrations";
