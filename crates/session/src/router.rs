//! Navigation stack derivation
//!
//! The app shows one of two screen stacks depending on whether the session
//! is signed in. [`follow`] keeps a consumer in step with the session.

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::cell::SessionHandle;
use crate::state::SessionState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stack {
    Authenticated,
    Unauthenticated,
}

impl Stack {
    /// A pending flow still shows the unauthenticated stack.
    pub fn for_state(state: &SessionState) -> Self {
        if state.is_signed_in() {
            Stack::Authenticated
        } else {
            Stack::Unauthenticated
        }
    }
}

/// Call `render` with the current state, then again after every transition.
///
/// Transitions that happen faster than `render` runs are coalesced; `render`
/// always sees the latest state. The task ends when the session is dropped.
pub fn follow<F>(handle: &SessionHandle, mut render: F) -> JoinHandle<()>
where
    F: FnMut(Stack, &SessionState) + Send + 'static,
{
    let mut rx = handle.subscribe();
    tokio::spawn(async move {
        loop {
            let state = rx.borrow_and_update().clone();
            render(Stack::for_state(&state), &state);
            if rx.changed().await.is_err() {
                debug!("session closed, router follower exiting");
                break;
            }
        }
    })
}
