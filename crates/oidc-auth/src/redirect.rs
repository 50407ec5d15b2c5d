//! Redirect capture for the authorization response
//!
//! The external user agent hands the redirect URI back to the host (an OS
//! deep link, or the loopback callback server). The host feeds it to
//! [`RedirectListener::deliver`]; the listener resolves the single pending
//! wait when the `state` matches and ignores everything else.
//!
//! A wait is an explicit future. Dropping it, cancelling it, resolving it or
//! timing it out all release the pending slot, so no listener is left behind.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{Error, Result};

/// Authorization code captured from a matching redirect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationCode {
    pub code: String,
    pub state: String,
}

/// Result of handing a redirect to the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Resolved the pending wait (with a code or a provider error)
    Matched,
    /// Left the pending wait untouched
    Ignored(IgnoreReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    NoPendingRequest,
    StateMismatch,
    MissingState,
    Unparseable,
}

impl IgnoreReason {
    pub fn label(&self) -> &'static str {
        match self {
            IgnoreReason::NoPendingRequest => "no_pending_request",
            IgnoreReason::StateMismatch => "state_mismatch",
            IgnoreReason::MissingState => "missing_state",
            IgnoreReason::Unparseable => "unparseable",
        }
    }
}

/// Identifies one wait so a caller can cancel exactly that wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitHandle(u64);

struct PendingWait {
    id: u64,
    state: String,
    tx: oneshot::Sender<Result<AuthorizationCode>>,
}

#[derive(Default)]
struct Inner {
    pending: Mutex<Option<PendingWait>>,
    next_id: AtomicU64,
}

impl Inner {
    fn slot(&self) -> MutexGuard<'_, Option<PendingWait>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release(&self, id: u64) {
        let mut slot = self.slot();
        if slot.as_ref().is_some_and(|p| p.id == id) {
            slot.take();
            debug!(wait_id = id, "released redirect wait");
        }
    }
}

/// Holds at most one outstanding redirect wait.
#[derive(Clone, Default)]
pub struct RedirectListener {
    inner: Arc<Inner>,
}

impl RedirectListener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register interest in the redirect carrying `expected_state`.
    ///
    /// Fails with `FlowInProgress` if another wait is outstanding; a second
    /// attempt never shares the first attempt's verifier.
    pub fn start_wait(&self, expected_state: &str) -> Result<(WaitHandle, RedirectWait)> {
        let mut slot = self.inner.slot();
        if slot.is_some() {
            return Err(Error::FlowInProgress);
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        *slot = Some(PendingWait {
            id,
            state: expected_state.to_string(),
            tx,
        });
        debug!(wait_id = id, "waiting for authorization redirect");

        let wait = RedirectWait {
            rx,
            guard: WaitGuard {
                inner: self.inner.clone(),
                id,
            },
        };
        Ok((WaitHandle(id), wait))
    }

    /// Start a wait and drive it to completion in one call.
    ///
    /// `timeout` of `None` waits until a redirect arrives or the wait is
    /// cancelled (the user may take arbitrarily long in the browser).
    pub async fn await_redirect(
        &self,
        expected_state: &str,
        timeout: Option<Duration>,
    ) -> Result<AuthorizationCode> {
        let (_, wait) = self.start_wait(expected_state)?;
        wait.wait(timeout).await
    }

    /// Cancel the wait identified by `handle`. No-op if it already finished.
    pub fn cancel(&self, handle: WaitHandle) {
        let mut slot = self.inner.slot();
        if slot.as_ref().is_some_and(|p| p.id == handle.0) {
            if let Some(pending) = slot.take() {
                let _ = pending.tx.send(Err(Error::RedirectCancelled));
                info!(wait_id = handle.0, "redirect wait cancelled");
            }
        }
    }

    /// Cancel whatever wait is outstanding.
    pub fn cancel_all(&self) {
        if let Some(pending) = self.inner.slot().take() {
            let _ = pending.tx.send(Err(Error::RedirectCancelled));
            info!(wait_id = pending.id, "redirect wait cancelled");
        }
    }

    pub fn is_pending(&self) -> bool {
        self.inner.slot().is_some()
    }

    /// Deliver a full redirect URL (custom scheme or http loopback).
    pub fn deliver(&self, redirect: &str) -> Delivery {
        let Ok(url) = Url::parse(redirect) else {
            warn!("ignoring unparseable redirect");
            return Delivery::Ignored(IgnoreReason::Unparseable);
        };
        // Some providers answer in the fragment (response_mode=fragment)
        let params = match (url.query(), url.fragment()) {
            (Some(q), _) if !q.is_empty() => q.to_string(),
            (_, Some(f)) => f.to_string(),
            _ => String::new(),
        };
        self.deliver_query(&params)
    }

    /// Deliver the raw query string of a redirect.
    pub fn deliver_query(&self, query: &str) -> Delivery {
        let mut state = None;
        let mut code = None;
        let mut error = None;
        let mut description = None;
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            match key.as_ref() {
                "state" => state = Some(value.into_owned()),
                "code" => code = Some(value.into_owned()),
                "error" => error = Some(value.into_owned()),
                "error_description" => description = Some(value.into_owned()),
                _ => {}
            }
        }

        let Some(state) = state else {
            warn!("ignoring redirect without state parameter");
            return Delivery::Ignored(IgnoreReason::MissingState);
        };

        let pending = {
            let mut slot = self.inner.slot();
            match slot.as_ref() {
                None => {
                    warn!("ignoring redirect with no pending request");
                    return Delivery::Ignored(IgnoreReason::NoPendingRequest);
                }
                Some(p) if p.state != state => {
                    warn!(wait_id = p.id, "ignoring redirect with mismatched state");
                    return Delivery::Ignored(IgnoreReason::StateMismatch);
                }
                Some(_) => slot.take(),
            }
        };
        let Some(pending) = pending else {
            return Delivery::Ignored(IgnoreReason::NoPendingRequest);
        };

        let outcome = match (code, error) {
            (_, Some(error)) => {
                warn!(wait_id = pending.id, error = %error, "provider returned an error");
                Err(Error::Authorization { error, description })
            }
            (Some(code), None) => {
                info!(wait_id = pending.id, "authorization code received");
                Ok(AuthorizationCode { code, state })
            }
            (None, None) => Err(Error::Authorization {
                error: "invalid_response".into(),
                description: Some("redirect carried neither code nor error".into()),
            }),
        };
        let _ = pending.tx.send(outcome);
        Delivery::Matched
    }
}

struct WaitGuard {
    inner: Arc<Inner>,
    id: u64,
}

impl Drop for WaitGuard {
    fn drop(&mut self) {
        self.inner.release(self.id);
    }
}

/// Future resolving to the authorization code (or the provider's error).
pub struct RedirectWait {
    rx: oneshot::Receiver<Result<AuthorizationCode>>,
    guard: WaitGuard,
}

impl RedirectWait {
    pub fn handle(&self) -> WaitHandle {
        WaitHandle(self.guard.id)
    }

    /// Await the redirect, failing with `RedirectTimeout` after `timeout`.
    pub async fn wait(self, timeout: Option<Duration>) -> Result<AuthorizationCode> {
        match timeout {
            Some(limit) => match tokio::time::timeout(limit, self).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(timeout_secs = limit.as_secs(), "no redirect within bound");
                    Err(Error::RedirectTimeout)
                }
            },
            None => self.await,
        }
    }
}

impl Future for RedirectWait {
    type Output = Result<AuthorizationCode>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(Error::RedirectCancelled)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn matching_state_resolves_with_code() {
        let listener = RedirectListener::new();
        let (_, wait) = listener.start_wait("state-1").unwrap();

        let delivery = listener.deliver("marketplace://auth/callback?code=ABC123&state=state-1");
        assert_eq!(delivery, Delivery::Matched);

        let code = wait.await.unwrap();
        assert_eq!(code.code, "ABC123");
        assert_eq!(code.state, "state-1");
        assert!(!listener.is_pending());
    }

    #[tokio::test]
    async fn mismatched_state_is_ignored_and_wait_stays_pending() {
        let listener = RedirectListener::new();
        let (_, wait) = listener.start_wait("expected").unwrap();

        let delivery = listener.deliver("marketplace://auth/callback?code=EVIL&state=other");
        assert_eq!(delivery, Delivery::Ignored(IgnoreReason::StateMismatch));
        assert!(listener.is_pending(), "pending request must survive");

        listener.deliver_query("code=GOOD&state=expected");
        assert_eq!(wait.await.unwrap().code, "GOOD");
    }

    #[tokio::test]
    async fn provider_error_rejects_wait() {
        let listener = RedirectListener::new();
        let (_, wait) = listener.start_wait("s").unwrap();

        listener.deliver_query("error=access_denied&error_description=User+denied&state=s");

        match wait.await {
            Err(Error::Authorization { error, description }) => {
                assert_eq!(error, "access_denied");
                assert_eq!(description.as_deref(), Some("User denied"));
            }
            other => panic!("expected authorization error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn redirect_without_state_or_pending_is_ignored() {
        let listener = RedirectListener::new();
        assert_eq!(
            listener.deliver_query("code=X&state=s"),
            Delivery::Ignored(IgnoreReason::NoPendingRequest)
        );

        let (_, _wait) = listener.start_wait("s").unwrap();
        assert_eq!(
            listener.deliver_query("code=X"),
            Delivery::Ignored(IgnoreReason::MissingState)
        );
        assert_eq!(
            listener.deliver("::not a url::"),
            Delivery::Ignored(IgnoreReason::Unparseable)
        );
        assert!(listener.is_pending());
    }

    #[tokio::test]
    async fn fragment_response_mode_is_understood() {
        let listener = RedirectListener::new();
        let (_, wait) = listener.start_wait("frag").unwrap();
        listener.deliver("http://127.0.0.1:7878/callback#state=frag&code=F1");
        assert_eq!(wait.await.unwrap().code, "F1");
    }

    #[tokio::test]
    async fn second_wait_is_rejected_while_one_is_pending() {
        let listener = RedirectListener::new();
        let (_, _first) = listener.start_wait("a").unwrap();
        let err = listener.start_wait("b").err().unwrap();
        assert!(matches!(err, Error::FlowInProgress));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_fails_and_releases_listener() {
        let listener = RedirectListener::new();
        let err = listener
            .await_redirect("late", Some(Duration::from_secs(15)))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RedirectTimeout));
        assert!(!listener.is_pending(), "timed out wait must be released");

        // A redirect arriving afterwards resolves nothing
        assert_eq!(
            listener.deliver_query("code=X&state=late"),
            Delivery::Ignored(IgnoreReason::NoPendingRequest)
        );
    }

    #[tokio::test]
    async fn cancel_rejects_and_releases() {
        let listener = RedirectListener::new();
        let (handle, wait) = listener.start_wait("c").unwrap();
        assert_eq!(handle, wait.handle());

        listener.cancel(handle);
        assert!(matches!(wait.await, Err(Error::RedirectCancelled)));
        assert!(!listener.is_pending());

        // A fresh attempt can start afterwards
        assert!(listener.start_wait("d").is_ok());
    }

    #[tokio::test]
    async fn stale_handle_does_not_cancel_newer_wait() {
        let listener = RedirectListener::new();
        let (old, wait) = listener.start_wait("one").unwrap();
        drop(wait);

        let (_, current) = listener.start_wait("two").unwrap();
        listener.cancel(old);
        assert!(listener.is_pending());

        listener.deliver_query("code=C2&state=two");
        assert_eq!(current.await.unwrap().code, "C2");
    }

    #[tokio::test]
    async fn dropping_wait_releases_slot() {
        let listener = RedirectListener::new();
        {
            let (_, _wait) = listener.start_wait("x").unwrap();
            assert!(listener.is_pending());
        }
        assert!(!listener.is_pending());
    }
}
