//! Marketplace Auth Agent
//!
//! Loopback service that owns the app's sign-in session:
//! 1. Resolves the identity provider's metadata in the background
//! 2. Restores any persisted session from the keyring (or the fallback file)
//! 3. Runs sign-in, sign-up, refresh and sign-out on request from the UI
//! 4. Accepts the authorization redirect on the callback path and hands it to
//!    the waiting flow

mod config;
mod metrics;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::{Json, RawQuery, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use backend::HttpProfileBackend;
use metrics_exporter_prometheus::PrometheusHandle;
use oidc_auth::{Delivery, DiscoveryResolver, RedirectListener, SystemBrowser};
use session::{
    Authenticator, FlowFailure, FlowOutcome, PendingRegistrationProfile, RegistrationBridge,
    SessionStore, Stack,
};

use crate::config::Config;

/// How long in-flight requests get to finish after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared application state accessible from all handlers
#[derive(Clone)]
struct AppState {
    auth: Arc<Authenticator>,
    registration: Arc<RegistrationBridge>,
    prometheus: PrometheusHandle,
    started_at: Instant,
}

/// Build the axum router with all routes and shared state.
///
/// Flow routes hold their connection open until the browser step finishes,
/// so `max_connections` must leave room for the callback request.
fn build_router(state: AppState, callback_path: &str, max_connections: usize) -> Router {
    Router::new()
        .route(callback_path, get(callback_handler))
        .route("/sign-in", post(sign_in_handler))
        .route("/register", post(register_handler))
        .route("/sign-out", post(sign_out_handler))
        .route("/refresh", post(refresh_handler))
        .route("/session", get(session_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting marketplace-auth-agent");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus_handle = metrics::install_recorder();

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    let redirect_uri = config.redirect_uri();
    info!(
        listen_addr = %config.listener.listen_addr,
        issuer = %config.provider.issuer,
        redirect_uri = %redirect_uri,
        backend = %config.backend.base_url,
        "configuration loaded"
    );

    let http = reqwest::Client::builder()
        .timeout(config.http_timeout())
        .build()
        .context("failed to build HTTP client")?;

    let discovery = Arc::new(
        DiscoveryResolver::new(http.clone(), config.provider.issuer.clone())
            .with_registration_page(config.provider.registration_page.clone()),
    );

    // Warm the metadata cache; a failure here is retried by the first flow
    {
        let discovery = discovery.clone();
        tokio::spawn(async move {
            if let Err(e) = discovery.resolve().await {
                warn!(error = %e, "provider discovery failed, retrying on first sign-in");
            }
        });
    }

    let store = SessionStore::select(&config.storage.service, config.storage.fallback_path.clone())
        .await
        .context("failed to open token storage")?;

    let auth = Arc::new(Authenticator::new(
        config.auth_config(),
        http.clone(),
        discovery,
        RedirectListener::new(),
        Arc::new(SystemBrowser),
        store,
    ));

    match auth.restore().await {
        Ok(found) => info!(found, "session restore complete"),
        Err(e) => warn!(error = %e, "could not read persisted session, starting signed out"),
    }

    let _follower = session::follow(&auth.session(), |stack, state| {
        info!(?stack, state = state.label(), "session changed");
    });

    let profile_backend = Arc::new(HttpProfileBackend::new(http, config.profile_url()));
    let registration = Arc::new(RegistrationBridge::new(auth.clone(), profile_backend));

    let app_state = AppState {
        auth: auth.clone(),
        registration,
        prometheus: prometheus_handle,
        started_at: Instant::now(),
    };

    let app = build_router(
        app_state,
        &config.listener.callback_path,
        config.listener.max_connections,
    );

    let listen_addr = config.listener.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;

    info!(addr = %listen_addr, "accepting requests");

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;

    // Flows waiting on the browser would otherwise hold the drain open
    auth.redirects().cancel_all();
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => {
            info!("all in-flight requests drained");
        }
        Ok(Ok(Err(e))) => {
            error!(error = %e, "server error during shutdown");
        }
        Ok(Err(e)) => {
            error!(error = %e, "server task panicked");
        }
        Err(_) => {
            warn!(
                drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "drain timeout exceeded, forcing shutdown"
            );
        }
    }

    info!("shutdown complete");
    Ok(())
}

fn json_response(status: StatusCode, body: serde_json::Value) -> Response {
    (
        status,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

/// Map a flow result onto the wire.
///
/// Failed attempts are ordinary answers (200) except for a concurrent
/// attempt (409) and an incomplete sign-up profile (422). Only fatal
/// configuration errors become 500.
fn flow_response(
    flow: &'static str,
    request_id: &str,
    started: Instant,
    result: session::Result<FlowOutcome>,
) -> Response {
    metrics::record_flow_duration(flow, started.elapsed().as_secs_f64());
    match result {
        Ok(outcome) => {
            let status = match outcome.failure().map(|f| f.kind) {
                Some("flow_in_progress") => StatusCode::CONFLICT,
                Some("incomplete_profile") => StatusCode::UNPROCESSABLE_ENTITY,
                _ => StatusCode::OK,
            };
            if let Some(failure) = outcome.failure() {
                info!(request_id, flow, kind = failure.kind, "flow did not complete");
            }
            json_response(status, serde_json::json!(outcome))
        }
        Err(e) => {
            error!(request_id, flow, error = %e, "flow aborted");
            json_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                serde_json::json!({ "ok": false, "error": FlowFailure::from(&e) }),
            )
        }
    }
}

fn request_id() -> String {
    format!("req_{}", uuid::Uuid::new_v4().as_simple())
}

/// Authorization redirect target. The host forwards custom-scheme deep links
/// here as well.
async fn callback_handler(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
) -> impl IntoResponse {
    match state
        .auth
        .redirects()
        .deliver_query(query.as_deref().unwrap_or_default())
    {
        Delivery::Matched => json_response(
            StatusCode::OK,
            serde_json::json!({
                "status": "delivered",
                "message": "You can close this window and return to the app.",
            }),
        ),
        Delivery::Ignored(reason) => json_response(
            StatusCode::CONFLICT,
            serde_json::json!({ "status": "ignored", "reason": reason.label() }),
        ),
    }
}

async fn sign_in_handler(State(state): State<AppState>) -> Response {
    let request_id = request_id();
    let started = Instant::now();
    info!(%request_id, "sign-in requested");
    let result = state.auth.sign_in().await;
    flow_response("sign_in", &request_id, started, result)
}

async fn register_handler(
    State(state): State<AppState>,
    Json(profile): Json<PendingRegistrationProfile>,
) -> Response {
    let request_id = request_id();
    let started = Instant::now();
    info!(%request_id, complete = profile.is_complete(), "registration requested");
    let result = state.registration.register_with_provider(&profile).await;
    flow_response("sign_up", &request_id, started, result)
}

async fn refresh_handler(State(state): State<AppState>) -> Response {
    let request_id = request_id();
    let started = Instant::now();
    let result = state.auth.refresh().await;
    flow_response("refresh", &request_id, started, result)
}

async fn sign_out_handler(State(state): State<AppState>) -> Response {
    match state.auth.sign_out().await {
        Ok(report) => json_response(
            StatusCode::OK,
            serde_json::json!({ "ok": true, "provider_notified": report.provider_notified }),
        ),
        Err(e) => json_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            serde_json::json!({ "ok": false, "error": FlowFailure::from(&e) }),
        ),
    }
}

/// Session view for the UI: which stack to show and who is signed in.
/// Tokens are never exposed here.
async fn session_handler(State(state): State<AppState>) -> impl IntoResponse {
    let session = state.auth.session().get();
    let store = state.auth.store();
    json_response(
        StatusCode::OK,
        serde_json::json!({
            "state": session.label(),
            "stack": Stack::for_state(&session),
            "user": session.user(),
            "store": store.kind(),
            "storage_degraded": store.is_degraded(),
            "flow_active": state.auth.is_flow_active(),
        }),
    )
}

/// Returns 200 once provider metadata is resolved, 503 until then.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let uptime = state.started_at.elapsed().as_secs();
    let session = state.auth.session().get();
    let resolved = state.auth.discovery().cached().is_some();

    let (status_code, status, provider) = if resolved {
        (StatusCode::OK, "healthy", "resolved")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded", "unresolved")
    };

    json_response(
        status_code,
        serde_json::json!({
            "status": status,
            "provider": provider,
            "issuer": state.auth.discovery().issuer(),
            "session": session.label(),
            "storage_degraded": state.auth.store().is_degraded(),
            "uptime_seconds": uptime,
        }),
    )
}

/// Prometheus metrics endpoint in text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
