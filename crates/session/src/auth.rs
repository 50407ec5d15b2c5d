//! Authentication façade
//!
//! Drives discovery, PKCE, redirect capture and token exchange from
//! `oidc-auth`, persists through the [`SessionStore`] and is the only writer
//! of the session cell. At most one flow runs at a time: a second attempt
//! while one is outstanding is rejected with `FlowInProgress`, never forked.
//!
//! Failures surface as [`FlowOutcome::Failed`]; only configuration errors
//! are returned as `Err`, since no attempt can succeed until they are fixed.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use oidc_auth::constants::{LOGOUT_TIMEOUT, REQUEST_READY_TIMEOUT};
use oidc_auth::{
    AuthorizationRequest, DiscoveryResolver, FlowKind, ProviderMetadata, RedirectListener,
    TokenSet, UserAgent, end_session, exchange_code, refresh_token,
};
use serde::Serialize;
use serde::ser::SerializeStruct;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::cell::{SessionCell, SessionHandle};
use crate::error::{Error, Result};
use crate::metrics;
use crate::state::SessionEvent;
use crate::store::SessionStore;

const REFRESH_FLOW: &str = "refresh";

/// Client registration and flow bounds.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub client_id: String,
    pub redirect_uri: String,
    /// Empty means the default `openid profile email`
    pub scopes: Vec<String>,
    /// Bound on waiting for the authorization request to become ready
    pub request_ready_timeout: Duration,
    /// Bound on the browser step; `None` waits for the user indefinitely
    pub redirect_timeout: Option<Duration>,
    /// Bound on the provider logout call; local tokens are cleared after it
    pub logout_timeout: Duration,
}

impl AuthConfig {
    pub fn new(client_id: impl Into<String>, redirect_uri: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            redirect_uri: redirect_uri.into(),
            scopes: Vec::new(),
            request_ready_timeout: REQUEST_READY_TIMEOUT,
            redirect_timeout: None,
            logout_timeout: LOGOUT_TIMEOUT,
        }
    }
}

/// Why an attempt failed, in the shape the UI consumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlowFailure {
    pub kind: &'static str,
    pub message: String,
    pub retryable: bool,
}

impl From<&Error> for FlowFailure {
    fn from(err: &Error) -> Self {
        Self {
            kind: err.kind_label(),
            message: err.to_string(),
            retryable: err.is_retryable(),
        }
    }
}

/// Result of a sign-in, sign-up or refresh attempt.
///
/// Serializes as `{"ok": true}` or `{"ok": false, "error": {...}}`; tokens
/// are never serialized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowOutcome {
    SignedIn(TokenSet),
    Failed(FlowFailure),
}

impl FlowOutcome {
    pub fn is_signed_in(&self) -> bool {
        matches!(self, FlowOutcome::SignedIn(_))
    }

    pub fn failure(&self) -> Option<&FlowFailure> {
        match self {
            FlowOutcome::Failed(failure) => Some(failure),
            FlowOutcome::SignedIn(_) => None,
        }
    }
}

impl Serialize for FlowOutcome {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("FlowOutcome", 2)?;
        match self {
            FlowOutcome::SignedIn(_) => {
                s.serialize_field("ok", &true)?;
                s.skip_field("error")?;
            }
            FlowOutcome::Failed(failure) => {
                s.serialize_field("ok", &false)?;
                s.serialize_field("error", failure)?;
            }
        }
        s.end()
    }
}

/// What sign-out managed to do beyond clearing local tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SignOutReport {
    pub provider_notified: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RemoteLogout {
    Ok,
    Failed,
    Skipped,
}

impl RemoteLogout {
    fn label(&self) -> &'static str {
        match self {
            RemoteLogout::Ok => "ok",
            RemoteLogout::Failed => "failed",
            RemoteLogout::Skipped => "skipped",
        }
    }
}

/// Exclusive right to run one flow. Released on drop.
pub(crate) struct FlowGuard<'a> {
    _lock: MutexGuard<'a, ()>,
    pub(crate) attempt: Uuid,
    epoch: u64,
}

pub struct Authenticator {
    config: AuthConfig,
    http: reqwest::Client,
    discovery: Arc<DiscoveryResolver>,
    redirects: RedirectListener,
    user_agent: Arc<dyn UserAgent>,
    store: SessionStore,
    cell: SessionCell,
    flow_lock: Mutex<()>,
    /// Bumped by sign-out; a flow started under an older epoch may not persist
    epoch: AtomicU64,
    /// Serializes token writes against sign-out's clear
    persist_lock: Mutex<()>,
}

impl Authenticator {
    pub fn new(
        config: AuthConfig,
        http: reqwest::Client,
        discovery: Arc<DiscoveryResolver>,
        redirects: RedirectListener,
        user_agent: Arc<dyn UserAgent>,
        store: SessionStore,
    ) -> Self {
        Self {
            config,
            http,
            discovery,
            redirects,
            user_agent,
            store,
            cell: SessionCell::new(),
            flow_lock: Mutex::new(()),
            epoch: AtomicU64::new(0),
            persist_lock: Mutex::new(()),
        }
    }

    /// Read-only session view for routers and API clients.
    pub fn session(&self) -> SessionHandle {
        self.cell.handle()
    }

    /// Listener the host feeds deep links into.
    pub fn redirects(&self) -> &RedirectListener {
        &self.redirects
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn discovery(&self) -> &DiscoveryResolver {
        &self.discovery
    }

    pub fn is_flow_active(&self) -> bool {
        self.flow_lock.try_lock().is_err()
    }

    /// Sign in through the provider's login page.
    ///
    /// Already signed in: returns the current tokens without a new flow.
    pub async fn sign_in(&self) -> Result<FlowOutcome> {
        let flow = FlowKind::SignIn;
        if let Some(tokens) = self.current_tokens() {
            debug!("already signed in, reusing session");
            return Ok(FlowOutcome::SignedIn(tokens));
        }

        let guard = match self.begin_flow() {
            Ok(guard) => guard,
            Err(e) => return self.finish(flow.label(), Err(e)),
        };
        let result = async {
            let tokens = self.run_flow(&guard, flow).await?;
            self.complete_flow(&guard, tokens.clone()).await?;
            Ok::<_, Error>(tokens)
        }
        .await;
        drop(guard);
        self.finish(flow.label(), result)
    }

    /// Persist `tokens` and transition to SignedIn.
    ///
    /// Saving replaces the stored set wholesale, so calling this twice with
    /// the same tokens leaves the same final state as calling it once.
    pub async fn complete_sign_in(&self, tokens: TokenSet) -> Result<()> {
        let _persist = self.persist_lock.lock().await;
        self.persist(tokens).await
    }

    /// Persist the tokens a flow obtained, unless a sign-out overtook it.
    pub(crate) async fn complete_flow(&self, guard: &FlowGuard<'_>, tokens: TokenSet) -> Result<()> {
        let _persist = self.persist_lock.lock().await;
        self.ensure_current(guard)?;
        self.persist(tokens).await
    }

    /// Fails with `RedirectCancelled` once a sign-out has happened since
    /// `guard` was taken.
    pub(crate) fn ensure_current(&self, guard: &FlowGuard<'_>) -> Result<()> {
        if self.epoch.load(Ordering::Acquire) != guard.epoch {
            info!(attempt = %guard.attempt, "flow overtaken by sign-out, discarding");
            return Err(oidc_auth::Error::RedirectCancelled.into());
        }
        Ok(())
    }

    async fn persist(&self, tokens: TokenSet) -> Result<()> {
        if tokens.access_token.is_none() && tokens.id_token.is_none() {
            return Err(oidc_auth::Error::TokenExchange(
                "token set carries neither access nor id token".into(),
            )
            .into());
        }
        let kind = self.store.save(&tokens).await?;
        self.cell.dispatch(SessionEvent::TokensIssued(tokens));
        info!(store = ?kind, degraded = self.store.is_degraded(), "session signed in");
        Ok(())
    }

    /// Sign out: notify the provider (best effort), clear local tokens,
    /// transition to SignedOut.
    ///
    /// A failed provider logout is logged and reported, never returned as an
    /// error; local tokens are cleared regardless, and the logout call is
    /// bounded by `logout_timeout`. Any outstanding redirect wait is
    /// cancelled first, and a flow still in progress is discarded without
    /// persisting its tokens.
    pub async fn sign_out(&self) -> Result<SignOutReport> {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        self.redirects.cancel_all();

        let remote = match tokio::time::timeout(self.config.logout_timeout, self.notify_provider())
            .await
        {
            Ok(remote) => remote,
            Err(_) => {
                warn!(
                    timeout_ms = self.config.logout_timeout.as_millis() as u64,
                    "provider logout timed out, clearing local tokens anyway"
                );
                RemoteLogout::Failed
            }
        };
        let cleared = {
            let _persist = self.persist_lock.lock().await;
            let cleared = self.store.clear().await;
            self.cell.dispatch(SessionEvent::SignedOut);
            cleared
        };
        metrics::record_sign_out(remote.label());

        match cleared {
            Ok(()) => {
                info!(remote = remote.label(), "signed out");
                Ok(SignOutReport {
                    provider_notified: remote == RemoteLogout::Ok,
                })
            }
            Err(e) => {
                error!(error = %e, "failed to clear local tokens");
                Err(e.into())
            }
        }
    }

    /// Load persisted tokens at startup. Returns whether a session was found.
    pub async fn restore(&self) -> Result<bool> {
        match self.store.load().await? {
            Some(tokens) => {
                self.cell.dispatch(SessionEvent::TokensIssued(tokens));
                info!(store = ?self.store.kind(), "restored persisted session");
                Ok(true)
            }
            None => {
                debug!("no persisted session");
                Ok(false)
            }
        }
    }

    /// Renew the tokens with the stored refresh token.
    ///
    /// A rejected refresh token clears the local session (full sign-in
    /// required). Transient failures leave the session untouched.
    pub async fn refresh(&self) -> Result<FlowOutcome> {
        let guard = match self.begin_flow() {
            Ok(guard) => guard,
            Err(e) => return self.finish(REFRESH_FLOW, Err(e)),
        };

        let stored = match self.store.load().await {
            Ok(stored) => stored,
            Err(e) => return self.finish(REFRESH_FLOW, Err(e.into())),
        };
        let Some(refresh) = stored.and_then(|t| t.refresh_token) else {
            let err = oidc_auth::Error::InvalidCredentials("no refresh token stored".into());
            return self.finish(REFRESH_FLOW, Err(err.into()));
        };

        let result = self.exchange_refresh(&guard, &refresh).await;
        if let Err(Error::Auth(oidc_auth::Error::InvalidCredentials(_))) = &result {
            warn!("refresh token rejected, clearing local session");
            if let Err(e) = self.store.clear().await {
                error!(error = %e, "failed to clear local tokens");
            }
            self.cell.dispatch(SessionEvent::SignedOut);
        }
        self.finish(REFRESH_FLOW, result)
    }

    async fn exchange_refresh(&self, guard: &FlowGuard<'_>, refresh: &str) -> Result<TokenSet> {
        let metadata = self.discovery.resolve().await?;
        let tokens = refresh_token(
            &self.http,
            &metadata.token_endpoint,
            &self.config.client_id,
            refresh,
        )
        .await?;
        self.complete_flow(guard, tokens.clone()).await?;
        Ok(tokens)
    }

    fn current_tokens(&self) -> Option<TokenSet> {
        let state = self.cell.get();
        state.is_signed_in().then(|| TokenSet {
            access_token: state.access_token().map(String::from),
            id_token: state.id_token().map(String::from),
            refresh_token: None,
            expires_at: None,
        })
    }

    pub(crate) fn begin_flow(&self) -> Result<FlowGuard<'_>> {
        let lock = self.flow_lock.try_lock().map_err(|_| {
            warn!("rejecting flow while another is outstanding");
            oidc_auth::Error::FlowInProgress
        })?;
        Ok(FlowGuard {
            _lock: lock,
            attempt: Uuid::new_v4(),
            epoch: self.epoch.load(Ordering::Acquire),
        })
    }

    /// Run one authorization attempt up to and including the code exchange.
    /// Persists nothing.
    pub(crate) async fn run_flow(&self, guard: &FlowGuard<'_>, flow: FlowKind) -> Result<TokenSet> {
        let attempt = guard.attempt;
        info!(%attempt, flow = flow.label(), "starting authorization flow");

        let metadata = self.ready_metadata(flow).await?;
        // A sign-out while queued drops the intent before the browser opens
        self.ensure_current(guard)?;
        let request = AuthorizationRequest::build(
            &self.config.client_id,
            &self.config.redirect_uri,
            &self.config.scopes,
            Some(&metadata),
        )?;
        let url = request.authorization_url(flow)?;

        let (_handle, wait) = self.redirects.start_wait(&request.state)?;
        self.user_agent.open(&url)?;
        let code = wait.wait(self.config.redirect_timeout).await?;

        debug!(%attempt, "exchanging authorization code");
        let tokens = exchange_code(
            &self.http,
            &metadata.token_endpoint,
            &request.client_id,
            &request.redirect_uri,
            &code.code,
            request.code_verifier(),
        )
        .await?;
        info!(%attempt, flow = flow.label(), "authorization code exchanged");
        Ok(tokens)
    }

    /// Provider metadata, queuing the flow (Pending) while it is resolved.
    async fn ready_metadata(&self, flow: FlowKind) -> oidc_auth::Result<Arc<ProviderMetadata>> {
        if let Some(metadata) = self.discovery.cached() {
            return Ok(metadata);
        }

        self.cell.dispatch(SessionEvent::FlowQueued { flow });
        info!(
            flow = flow.label(),
            timeout_secs = self.config.request_ready_timeout.as_secs(),
            "authorization request not ready, queued"
        );
        match tokio::time::timeout(self.config.request_ready_timeout, self.discovery.resolve()).await
        {
            Ok(result) => result,
            Err(_) => {
                warn!(flow = flow.label(), "authorization request never became ready");
                Err(oidc_auth::Error::RedirectTimeout)
            }
        }
    }

    async fn notify_provider(&self) -> RemoteLogout {
        let state = self.cell.get();
        let id_token = match state.id_token() {
            Some(token) => Some(token.to_string()),
            None => self.store.load().await.ok().flatten().and_then(|t| t.id_token),
        };
        let Some(id_token) = id_token else {
            return RemoteLogout::Skipped;
        };

        let metadata = match self.discovery.resolve().await {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!(error = %e, "provider logout skipped, metadata unavailable");
                return RemoteLogout::Failed;
            }
        };
        let Some(endpoint) = metadata.end_session_endpoint.as_deref() else {
            debug!("provider has no end-session endpoint");
            return RemoteLogout::Skipped;
        };

        match end_session(&self.http, endpoint, &self.config.client_id, &id_token).await {
            Ok(()) => RemoteLogout::Ok,
            Err(e) => {
                warn!(error = %e, "provider logout failed, clearing local tokens anyway");
                RemoteLogout::Failed
            }
        }
    }

    /// Record the attempt and turn its result into an outcome.
    pub(crate) fn finish(&self, flow: &'static str, result: Result<TokenSet>) -> Result<FlowOutcome> {
        let err = match result {
            Ok(tokens) => {
                metrics::record_flow(flow, "success");
                return Ok(FlowOutcome::SignedIn(tokens));
            }
            Err(err) => err,
        };

        metrics::record_flow(flow, err.kind_label());
        // A rejected concurrent attempt must not disturb the one that owns the session
        if !matches!(err, Error::Auth(oidc_auth::Error::FlowInProgress)) {
            self.cell.dispatch(SessionEvent::FlowFailed);
        }
        if err.is_fatal() {
            error!(flow, error = %err, "flow aborted by configuration error");
            return Err(err);
        }
        warn!(flow, error = %err, retryable = err.is_retryable(), "flow failed");
        Ok(FlowOutcome::Failed(FlowFailure::from(&err)))
    }
}
