//! Registration Bridge
//!
//! Sign-up collects profile details in two steps before sending the user to
//! the provider's registration page. The details only become a backend
//! profile once the provider has issued tokens, because the email and
//! subject the backend trusts must come from the provider.
//!
//! Order: redirect flow → code exchange → backend profile creation →
//! persist tokens. If profile creation fails nothing is persisted and the
//! caller still holds the collected profile for a retry.

use std::sync::Arc;

use backend::{
    AddressFields, IdentityFields, IdentityTokens, ProfileBackend, ProfileFields, ProfilePayload,
    Sourced,
};
use oidc_auth::{FlowKind, IdTokenClaims, TokenSet};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::auth::{Authenticator, FlowOutcome};
use crate::error::{Error, Result};

/// Profile details collected before the provider redirect.
///
/// A plain value: each step returns an updated copy, nothing is held in
/// hidden state between steps.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRegistrationProfile {
    #[serde(default)]
    pub identity: Option<IdentityFields>,
    #[serde(default)]
    pub address: Option<AddressFields>,
}

impl PendingRegistrationProfile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Step 1: personal details.
    pub fn with_identity(self, identity: IdentityFields) -> Self {
        Self {
            identity: Some(identity),
            ..self
        }
    }

    /// Step 2: address and nationality.
    pub fn with_address(self, address: AddressFields) -> Self {
        Self {
            address: Some(address),
            ..self
        }
    }

    pub fn is_complete(&self) -> bool {
        self.identity.is_some() && self.address.is_some()
    }

    fn steps(&self) -> Result<(&IdentityFields, &AddressFields)> {
        let identity = self
            .identity
            .as_ref()
            .ok_or(Error::IncompleteProfile("identity"))?;
        let address = self
            .address
            .as_ref()
            .ok_or(Error::IncompleteProfile("address"))?;
        Ok((identity, address))
    }
}

/// Merge the collected profile with the provider-asserted identity.
///
/// The provider's email is authoritative when the ID token carries one; the
/// typed email is always kept as an advisory field and only becomes the
/// profile email (tagged user-sourced) when the provider asserts none.
pub fn build_payload(
    identity: &IdentityFields,
    address: &AddressFields,
    tokens: &TokenSet,
) -> ProfilePayload {
    let claims = tokens
        .id_token
        .as_deref()
        .and_then(|t| match IdTokenClaims::decode_unverified(t) {
            Ok(claims) => Some(claims),
            Err(e) => {
                warn!(error = %e, "id token claims unreadable, profile email stays advisory");
                None
            }
        });

    let provider_email = claims.as_ref().and_then(|c| c.email.clone());
    if provider_email
        .as_deref()
        .is_some_and(|email| !email.eq_ignore_ascii_case(&identity.email))
    {
        info!("typed email differs from provider email, keeping provider email");
    }
    let email = match provider_email {
        Some(email) => Sourced::provider(email),
        None => Sourced::user(identity.email.clone()),
    };

    ProfilePayload {
        profile: ProfileFields {
            email,
            typed_email: Sourced::user(identity.email.clone()),
            subject: claims.as_ref().map(|c| Sourced::provider(c.sub.clone())),
            email_verified: claims
                .as_ref()
                .and_then(|c| c.email_verified)
                .map(Sourced::provider),
            first_name: Sourced::user(identity.first_name.clone()),
            last_name: Sourced::user(identity.last_name.clone()),
            phone: identity.phone.clone().map(Sourced::user),
            date_of_birth: identity.date_of_birth.clone().map(Sourced::user),
            address: Sourced::user(address.clone()),
        },
        identity: IdentityTokens {
            id_token: tokens.id_token.clone(),
            access_token: tokens.access_token.clone(),
        },
    }
}

/// Sign-up variant of the sign-in flow.
pub struct RegistrationBridge {
    auth: Arc<Authenticator>,
    backend: Arc<dyn ProfileBackend>,
}

impl RegistrationBridge {
    pub fn new(auth: Arc<Authenticator>, backend: Arc<dyn ProfileBackend>) -> Self {
        Self { auth, backend }
    }

    /// Run the registration flow for a fully collected profile.
    ///
    /// Opens the provider's registration page through the same redirect and
    /// exchange pipeline as sign-in. The profile is borrowed, so a failed
    /// attempt can be retried with the same value.
    pub async fn register_with_provider(
        &self,
        profile: &PendingRegistrationProfile,
    ) -> Result<FlowOutcome> {
        let flow = FlowKind::SignUp;
        let (identity, address) = match profile.steps() {
            Ok(steps) => steps,
            Err(e) => return self.auth.finish(flow.label(), Err(e)),
        };

        let guard = match self.auth.begin_flow() {
            Ok(guard) => guard,
            Err(e) => return self.auth.finish(flow.label(), Err(e)),
        };
        let result = async {
            let tokens = self.auth.run_flow(&guard, flow).await?;
            self.auth.ensure_current(&guard)?;
            let payload = build_payload(identity, address, &tokens);
            self.backend.create_profile(&payload).await?;
            self.auth.complete_flow(&guard, tokens.clone()).await?;
            info!(attempt = %guard.attempt, "registration completed");
            Ok::<_, Error>(tokens)
        }
        .await;
        drop(guard);
        self.auth.finish(flow.label(), result)
    }
}
