//! HTTP implementation of the profile backend

use std::future::Future;
use std::pin::Pin;

use tracing::{info, warn};

use crate::{BackendError, ProfileBackend, ProfilePayload, Result};

/// Posts the profile payload as JSON to a fixed URL.
///
/// The new access token goes in the `Authorization` header as well as in the
/// body's `identity` object.
pub struct HttpProfileBackend {
    client: reqwest::Client,
    url: String,
}

impl HttpProfileBackend {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

impl ProfileBackend for HttpProfileBackend {
    fn create_profile<'a>(
        &'a self,
        payload: &'a ProfilePayload,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let mut request = self.client.post(&self.url).json(payload);
            if let Some(token) = &payload.identity.access_token {
                request = request.bearer_auth(token);
            }

            let response = request
                .send()
                .await
                .map_err(|e| BackendError::Http(format!("profile request failed: {e}")))?;

            let status = response.status();
            if status.as_u16() == 401 {
                warn!("backend rejected identity tokens");
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

            info!("backend profile created");
            Ok(())
        })
    }
}
