//! Bearer-token REST client
//!
//! Catalog, cart and notification calls all look the same from the auth
//! core's point of view: attach the current access token, nothing else.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use tracing::debug;

use crate::{BackendError, Result};

/// Source of the current access token.
pub trait TokenSource: Send + Sync {
    /// `None` while signed out.
    fn bearer_token(&self) -> Option<String>;
}

/// REST client that authenticates every request with the session's token.
#[derive(Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
    tokens: Arc<dyn TokenSource>,
}

impl ApiClient {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        tokens: Arc<dyn TokenSource>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            tokens,
        }
    }

    /// Start a request to `path`, with the bearer token when signed in.
    pub fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let builder = self.client.request(method, url);
        match self.tokens.bearer_token() {
            Some(token) => builder.bearer_auth(token),
            None => {
                debug!(path, "no session, sending request without bearer");
                builder
            }
        }
    }

    /// GET `path` and decode the JSON body.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self
            .request(reqwest::Method::GET, path)
            .send()
            .await
            .map_err(|e| BackendError::Http(format!("GET {path}: {e}")))?;

        let status = response.status();
        if status.as_u16() == 401 {
            return Err(BackendError::Unauthorized);
        }
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("<no body>"));
            return Err(BackendError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        response
            .json::<T>()
            .await
            .map_err(|e| BackendError::Decode(format!("GET {path}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use axum::Router;
    use axum::http::{HeaderMap, StatusCode};
    use axum::response::IntoResponse;
    use axum::routing::get;
    use tokio::net::TcpListener;

    struct FixedToken(Mutex<Option<String>>);

    impl TokenSource for FixedToken {
        fn bearer_token(&self) -> Option<String> {
            self.0.lock().unwrap().clone()
        }
    }

    /// Echo the Authorization header; 401 when it is missing.
    async fn start_api() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let app = Router::new().route(
            "/products",
            get(|headers: HeaderMap| async move {
                match headers.get("authorization").and_then(|v| v.to_str().ok()) {
                    Some(auth) => {
                        axum::Json(serde_json::json!({ "auth": auth })).into_response()
                    }
                    None => StatusCode::UNAUTHORIZED.into_response(),
                }
            }),
        );
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        base
    }

    #[tokio::test]
    async fn attaches_current_token() {
        let base = start_api().await;
        let tokens = Arc::new(FixedToken(Mutex::new(Some("AT1".into()))));
        let api = ApiClient::new(reqwest::Client::new(), format!("{base}/"), tokens.clone());

        let body: serde_json::Value = api.get_json("/products").await.unwrap();
        assert_eq!(body["auth"], "Bearer AT1");

        *tokens.0.lock().unwrap() = Some("AT2".into());
        let body: serde_json::Value = api.get_json("products").await.unwrap();
        assert_eq!(body["auth"], "Bearer AT2");
    }

    #[tokio::test]
    async fn signed_out_requests_are_unauthorized() {
        let base = start_api().await;
        let api = ApiClient::new(
            reqwest::Client::new(),
            base,
            Arc::new(FixedToken(Mutex::new(None))),
        );
        let result: Result<serde_json::Value> = api.get_json("products").await;
        assert!(matches!(result, Err(BackendError::Unauthorized)));
    }
}
