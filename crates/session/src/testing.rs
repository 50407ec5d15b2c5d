//! Test doubles shared by the session tests

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::extract::Form;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use oidc_auth::store::BoxFuture;
use oidc_auth::{
    DiscoveryResolver, RedirectListener, StoreKind, TokenSet, TokenStore, UserAgent,
};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use url::Url;

use crate::auth::{AuthConfig, Authenticator};
use crate::store::SessionStore;

pub(crate) const REDIRECT_URI: &str = "marketplace://auth/callback";

/// In-memory token store that can be told to fail.
#[derive(Default)]
pub(crate) struct MemoryStore {
    tokens: Mutex<Option<TokenSet>>,
    broken: AtomicBool,
}

impl MemoryStore {
    pub(crate) fn broken() -> Self {
        Self {
            tokens: Mutex::new(None),
            broken: AtomicBool::new(true),
        }
    }

    pub(crate) fn set_broken(&self, broken: bool) {
        self.broken.store(broken, Ordering::Relaxed);
    }

    fn check(&self) -> oidc_auth::Result<()> {
        if self.broken.load(Ordering::Relaxed) {
            Err(oidc_auth::Error::Storage("vault locked".into()))
        } else {
            Ok(())
        }
    }
}

impl TokenStore for MemoryStore {
    fn kind(&self) -> StoreKind {
        StoreKind::Secure
    }

    fn save<'a>(&'a self, tokens: &'a TokenSet) -> BoxFuture<'a, oidc_auth::Result<()>> {
        Box::pin(async move {
            self.check()?;
            *self.tokens.lock().unwrap() = Some(tokens.clone());
            Ok(())
        })
    }

    fn load(&self) -> BoxFuture<'_, oidc_auth::Result<Option<TokenSet>>> {
        Box::pin(async move {
            self.check()?;
            Ok(self.tokens.lock().unwrap().clone())
        })
    }

    fn clear(&self) -> BoxFuture<'_, oidc_auth::Result<()>> {
        Box::pin(async move {
            self.check()?;
            self.tokens.lock().unwrap().take();
            Ok(())
        })
    }
}

/// How the mock identity provider answers.
#[derive(Clone)]
pub(crate) struct Behavior {
    pub token_status: StatusCode,
    pub token_body: serde_json::Value,
    pub logout_status: StatusCode,
    pub discovery_delay: Duration,
    pub token_delay: Duration,
    pub logout_delay: Duration,
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            token_status: StatusCode::OK,
            token_body: serde_json::json!({
                "access_token": "AT1",
                "id_token": "IT1",
                "token_type": "Bearer",
            }),
            logout_status: StatusCode::OK,
            discovery_delay: Duration::ZERO,
            token_delay: Duration::ZERO,
            logout_delay: Duration::ZERO,
        }
    }
}

type Forms = Arc<Mutex<Vec<HashMap<String, String>>>>;

/// Keycloak-shaped identity provider on a loopback port.
pub(crate) struct MockProvider {
    pub issuer: String,
    behavior: Arc<Mutex<Behavior>>,
    token_forms: Forms,
    logout_forms: Forms,
}

impl MockProvider {
    pub(crate) async fn start(behavior: Behavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let issuer = format!("{base}/realms/market");
        let oidc = format!("{issuer}/protocol/openid-connect");
        let document = serde_json::json!({
            "issuer": issuer,
            "authorization_endpoint": format!("{oidc}/auth"),
            "token_endpoint": format!("{oidc}/token"),
            "end_session_endpoint": format!("{oidc}/logout"),
        });

        let behavior = Arc::new(Mutex::new(behavior));
        let token_forms: Forms = Arc::default();
        let logout_forms: Forms = Arc::default();

        let discovery_behavior = behavior.clone();
        let token_behavior = behavior.clone();
        let logout_behavior = behavior.clone();
        let token_sink = token_forms.clone();
        let logout_sink = logout_forms.clone();

        let app = Router::new()
            .route(
                "/realms/market/.well-known/openid-configuration",
                get(move || {
                    let document = document.clone();
                    let behavior = discovery_behavior.clone();
                    async move {
                        let delay = behavior.lock().unwrap().discovery_delay;
                        if !delay.is_zero() {
                            tokio::time::sleep(delay).await;
                        }
                        axum::Json(document)
                    }
                }),
            )
            .route(
                "/realms/market/protocol/openid-connect/token",
                post(move |Form(form): Form<HashMap<String, String>>| {
                    let behavior = token_behavior.clone();
                    let sink = token_sink.clone();
                    async move {
                        sink.lock().unwrap().push(form);
                        let (status, body, delay) = {
                            let b = behavior.lock().unwrap();
                            (b.token_status, b.token_body.clone(), b.token_delay)
                        };
                        if !delay.is_zero() {
                            tokio::time::sleep(delay).await;
                        }
                        (status, axum::Json(body)).into_response()
                    }
                }),
            )
            .route(
                "/realms/market/protocol/openid-connect/logout",
                post(move |Form(form): Form<HashMap<String, String>>| {
                    let behavior = logout_behavior.clone();
                    let sink = logout_sink.clone();
                    async move {
                        sink.lock().unwrap().push(form);
                        let (status, delay) = {
                            let b = behavior.lock().unwrap();
                            (b.logout_status, b.logout_delay)
                        };
                        if !delay.is_zero() {
                            tokio::time::sleep(delay).await;
                        }
                        (status, "").into_response()
                    }
                }),
            );
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            issuer,
            behavior,
            token_forms,
            logout_forms,
        }
    }

    pub(crate) fn respond_to_token_requests(&self, status: StatusCode, body: serde_json::Value) {
        let mut behavior = self.behavior.lock().unwrap();
        behavior.token_status = status;
        behavior.token_body = body;
    }

    pub(crate) fn token_requests(&self) -> Vec<HashMap<String, String>> {
        self.token_forms.lock().unwrap().clone()
    }

    pub(crate) fn logout_requests(&self) -> Vec<HashMap<String, String>> {
        self.logout_forms.lock().unwrap().clone()
    }
}

/// What the scripted browser does with the authorization URL.
#[derive(Clone)]
pub(crate) enum Reply {
    /// Redirect back with this code and the request's state
    Code(&'static str),
    /// Redirect back with a provider error code
    ProviderError(&'static str),
    /// Leave the redirect to the test
    Silent,
    /// Fail to open at all
    Fail,
}

/// User agent that completes the provider step immediately.
pub(crate) struct ScriptedAgent {
    listener: RedirectListener,
    reply: Reply,
    opened: mpsc::UnboundedSender<Url>,
}

impl ScriptedAgent {
    pub(crate) fn new(
        listener: RedirectListener,
        reply: Reply,
    ) -> (Self, mpsc::UnboundedReceiver<Url>) {
        let (opened, rx) = mpsc::unbounded_channel();
        (
            Self {
                listener,
                reply,
                opened,
            },
            rx,
        )
    }
}

impl UserAgent for ScriptedAgent {
    fn open(&self, url: &Url) -> oidc_auth::Result<()> {
        if let Reply::Fail = self.reply {
            return Err(oidc_auth::Error::UserAgent("no browser".into()));
        }
        let _ = self.opened.send(url.clone());
        let state = state_of(url);
        match self.reply {
            Reply::Code(code) => {
                self.listener
                    .deliver(&format!("{REDIRECT_URI}?code={code}&state={state}"));
            }
            Reply::ProviderError(error) => {
                self.listener
                    .deliver(&format!("{REDIRECT_URI}?error={error}&state={state}"));
            }
            Reply::Silent | Reply::Fail => {}
        }
        Ok(())
    }
}

pub(crate) fn state_of(url: &Url) -> String {
    query_param(url, "state")
}

pub(crate) fn query_param(url: &Url, name: &str) -> String {
    url.query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
        .unwrap_or_default()
}

/// An authenticator wired to a mock provider and a scripted browser.
pub(crate) struct Harness {
    pub auth: Arc<Authenticator>,
    pub provider: MockProvider,
    pub opened: mpsc::UnboundedReceiver<Url>,
    pub listener: RedirectListener,
    _dir: tempfile::TempDir,
}

pub(crate) struct HarnessOptions {
    pub reply: Reply,
    pub behavior: Behavior,
    /// Resolve provider metadata before handing out the authenticator
    pub warm: bool,
    pub request_ready_timeout: Duration,
    pub logout_timeout: Duration,
    pub client_id: &'static str,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            reply: Reply::Code("ABC123"),
            behavior: Behavior::default(),
            warm: true,
            request_ready_timeout: Duration::from_secs(15),
            logout_timeout: Duration::from_secs(5),
            client_id: "market-app",
        }
    }
}

impl Harness {
    pub(crate) async fn start(reply: Reply) -> Self {
        Self::with(HarnessOptions {
            reply,
            ..HarnessOptions::default()
        })
        .await
    }

    pub(crate) async fn with(options: HarnessOptions) -> Self {
        let provider = MockProvider::start(options.behavior).await;
        let http = reqwest::Client::new();
        let discovery = Arc::new(DiscoveryResolver::new(http.clone(), provider.issuer.clone()));
        if options.warm {
            discovery.resolve().await.unwrap();
        }

        let dir = tempfile::tempdir().unwrap();
        let fallback = oidc_auth::FallbackTokenStore::open(dir.path().join("tokens.json"))
            .await
            .unwrap();
        let store = SessionStore::new(Arc::new(MemoryStore::default()), Some(Arc::new(fallback)));

        let listener = RedirectListener::new();
        let (agent, opened) = ScriptedAgent::new(listener.clone(), options.reply);

        let mut config = AuthConfig::new(options.client_id, REDIRECT_URI);
        config.request_ready_timeout = options.request_ready_timeout;
        config.logout_timeout = options.logout_timeout;

        let auth = Arc::new(Authenticator::new(
            config,
            http,
            discovery,
            listener.clone(),
            Arc::new(agent),
            store,
        ));

        Self {
            auth,
            provider,
            opened,
            listener,
            _dir: dir,
        }
    }
}
