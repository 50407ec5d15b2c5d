//! Single-writer session cell
//!
//! Backed by a `tokio::sync::watch` channel: every dispatch swaps in a whole
//! new [`SessionState`], and readers only ever see complete snapshots. Only
//! this crate can dispatch; everything else gets a read-only
//! [`SessionHandle`].

use backend::TokenSource;
use tokio::sync::watch;
use tracing::debug;

use crate::state::{SessionEvent, SessionState, transition};

pub(crate) struct SessionCell {
    tx: watch::Sender<SessionState>,
}

impl SessionCell {
    pub(crate) fn new() -> Self {
        let (tx, _rx) = watch::channel(SessionState::SignedOut);
        Self { tx }
    }

    /// Apply `event` through the reducer and publish the result.
    pub(crate) fn dispatch(&self, event: SessionEvent) -> SessionState {
        let mut next = SessionState::SignedOut;
        self.tx.send_modify(|state| {
            let from = state.label();
            *state = transition(std::mem::take(state), event);
            debug!(from, to = state.label(), "session transition");
            next = state.clone();
        });
        next
    }

    pub(crate) fn get(&self) -> SessionState {
        self.tx.borrow().clone()
    }

    pub(crate) fn handle(&self) -> SessionHandle {
        SessionHandle {
            rx: self.tx.subscribe(),
        }
    }
}

/// Read-only view of the session, handed to the router and API clients.
#[derive(Clone)]
pub struct SessionHandle {
    rx: watch::Receiver<SessionState>,
}

impl SessionHandle {
    /// Snapshot of the current state.
    pub fn get(&self) -> SessionState {
        self.rx.borrow().clone()
    }

    pub fn is_signed_in(&self) -> bool {
        self.rx.borrow().is_signed_in()
    }

    /// Receiver notified on every transition.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.rx.clone()
    }
}

impl TokenSource for SessionHandle {
    fn bearer_token(&self) -> Option<String> {
        self.rx.borrow().access_token().map(String::from)
    }
}
