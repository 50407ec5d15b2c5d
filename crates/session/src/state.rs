//! Session state machine
//!
//! Pure reducer: receives the current state and an event, returns the next
//! state. No I/O. The [`Authenticator`](crate::Authenticator) performs the
//! side effects and dispatches the events that describe their results.
//!
//! Transitions:
//! - SignedOut → Pending (flow started before its request was ready)
//! - SignedOut/Pending → SignedIn (tokens issued)
//! - Pending → SignedOut (flow failed)
//! - any → SignedOut (sign-out, rejected refresh token)

use std::fmt;

use oidc_auth::{FlowKind, IdTokenClaims, TokenSet};
use serde::Serialize;

/// Identity details decoded from the ID token for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserInfo {
    pub subject: String,
    pub email: Option<String>,
}

impl UserInfo {
    fn from_id_token(id_token: &str) -> Option<Self> {
        IdTokenClaims::decode_unverified(id_token)
            .ok()
            .map(|claims| Self {
                subject: claims.sub,
                email: claims.email,
            })
    }
}

/// Process-wide session state. Replaced as a whole on every transition.
#[derive(Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    SignedOut,
    /// A flow was requested before its authorization request was ready
    Pending { flow: FlowKind },
    SignedIn {
        access_token: Option<String>,
        id_token: Option<String>,
        user: Option<UserInfo>,
    },
}

impl SessionState {
    pub fn is_signed_in(&self) -> bool {
        matches!(self, SessionState::SignedIn { .. })
    }

    pub fn access_token(&self) -> Option<&str> {
        match self {
            SessionState::SignedIn { access_token, .. } => access_token.as_deref(),
            _ => None,
        }
    }

    pub fn id_token(&self) -> Option<&str> {
        match self {
            SessionState::SignedIn { id_token, .. } => id_token.as_deref(),
            _ => None,
        }
    }

    pub fn user(&self) -> Option<&UserInfo> {
        match self {
            SessionState::SignedIn { user, .. } => user.as_ref(),
            _ => None,
        }
    }

    /// State label for health/logging.
    pub fn label(&self) -> &'static str {
        match self {
            SessionState::SignedOut => "signed_out",
            SessionState::Pending { .. } => "pending",
            SessionState::SignedIn { .. } => "signed_in",
        }
    }
}

impl fmt::Debug for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::SignedOut => f.write_str("SignedOut"),
            SessionState::Pending { flow } => {
                f.debug_struct("Pending").field("flow", flow).finish()
            }
            SessionState::SignedIn { user, .. } => f
                .debug_struct("SignedIn")
                .field("tokens", &"[REDACTED]")
                .field("user", user)
                .finish(),
        }
    }
}

/// Events that drive state transitions.
#[derive(Debug)]
pub enum SessionEvent {
    /// Flow requested while the authorization request is not yet ready
    FlowQueued { flow: FlowKind },
    /// Exchange, refresh or restore produced a token set
    TokensIssued(TokenSet),
    /// Local tokens were cleared
    SignedOut,
    /// The attempt ended without tokens
    FlowFailed,
}

/// Compute the next state. Pure function: no I/O.
pub fn transition(state: SessionState, event: SessionEvent) -> SessionState {
    match (state, event) {
        (SessionState::SignedOut, SessionEvent::FlowQueued { flow }) => {
            SessionState::Pending { flow }
        }

        (_, SessionEvent::TokensIssued(tokens)) => {
            let user = tokens.id_token.as_deref().and_then(UserInfo::from_id_token);
            SessionState::SignedIn {
                access_token: tokens.access_token,
                id_token: tokens.id_token,
                user,
            }
        }

        (_, SessionEvent::SignedOut) => SessionState::SignedOut,

        (SessionState::Pending { .. }, SessionEvent::FlowFailed) => SessionState::SignedOut,

        // A failed attempt never signs out an existing session, and a queued
        // flow while signed in or already pending changes nothing
        (state, _event) => state,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;

    fn jwt(claims: serde_json::Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none"}"#);
        let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
        format!("{header}.{payload}.sig")
    }

    fn signed_in() -> SessionState {
        transition(
            SessionState::SignedOut,
            SessionEvent::TokensIssued(TokenSet::new("AT1", "IT1")),
        )
    }

    #[test]
    fn signed_out_to_pending_on_queued_flow() {
        let state = transition(
            SessionState::SignedOut,
            SessionEvent::FlowQueued {
                flow: FlowKind::SignIn,
            },
        );
        assert_eq!(
            state,
            SessionState::Pending {
                flow: FlowKind::SignIn
            }
        );
    }

    #[test]
    fn pending_to_signed_in_on_tokens() {
        let state = transition(
            SessionState::Pending {
                flow: FlowKind::SignUp,
            },
            SessionEvent::TokensIssued(TokenSet::new("AT1", "IT1")),
        );
        assert!(state.is_signed_in());
        assert_eq!(state.access_token(), Some("AT1"));
        assert_eq!(state.id_token(), Some("IT1"));
    }

    #[test]
    fn tokens_issued_decodes_user_info() {
        let id_token = jwt(serde_json::json!({ "sub": "user-1", "email": "a@x.com" }));
        let state = transition(
            SessionState::SignedOut,
            SessionEvent::TokensIssued(TokenSet::new("AT", id_token)),
        );
        assert_eq!(
            state.user(),
            Some(&UserInfo {
                subject: "user-1".into(),
                email: Some("a@x.com".into()),
            })
        );
    }

    #[test]
    fn opaque_id_token_leaves_user_empty() {
        let state = signed_in();
        assert!(state.is_signed_in());
        assert!(state.user().is_none());
    }

    #[test]
    fn any_state_to_signed_out_on_sign_out() {
        for state in [
            SessionState::SignedOut,
            SessionState::Pending {
                flow: FlowKind::SignIn,
            },
            signed_in(),
        ] {
            assert_eq!(
                transition(state, SessionEvent::SignedOut),
                SessionState::SignedOut
            );
        }
    }

    #[test]
    fn failed_flow_clears_pending_only() {
        let state = transition(
            SessionState::Pending {
                flow: FlowKind::SignIn,
            },
            SessionEvent::FlowFailed,
        );
        assert_eq!(state, SessionState::SignedOut);

        let state = transition(signed_in(), SessionEvent::FlowFailed);
        assert!(state.is_signed_in(), "failed attempt must keep the session");
    }

    #[test]
    fn queued_flow_does_not_touch_signed_in() {
        let state = transition(
            signed_in(),
            SessionEvent::FlowQueued {
                flow: FlowKind::SignIn,
            },
        );
        assert!(state.is_signed_in());
    }

    #[test]
    fn debug_hides_tokens() {
        let debug = format!("{:?}", signed_in());
        assert!(!debug.contains("AT1"));
        assert!(!debug.contains("IT1"));
    }
}
