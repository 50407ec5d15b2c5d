//! Session layer of the marketplace sign-in core
//!
//! Owns the process-wide session state and everything that writes it:
//! - [`Authenticator`]: sign-in, sign-out, complete-sign-in, restore, refresh
//! - [`RegistrationBridge`]: sign-up with a collected profile
//! - [`SessionStore`]: secure token storage with a degraded fallback
//!
//! Readers get a [`SessionHandle`]; the router derives its [`Stack`] from it
//! and API clients take their bearer token from it.

pub mod auth;
mod cell;
pub mod error;
pub mod metrics;
pub mod registration;
pub mod router;
pub mod state;
pub mod store;

#[cfg(test)]
mod testing;

pub use auth::{AuthConfig, Authenticator, FlowFailure, FlowOutcome, SignOutReport};
pub use cell::SessionHandle;
pub use error::{Error, Result};
pub use registration::{PendingRegistrationProfile, RegistrationBridge, build_payload};
pub use router::{Stack, follow};
pub use state::{SessionEvent, SessionState, UserInfo, transition};
pub use store::SessionStore;
