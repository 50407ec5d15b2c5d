//! External user agent that shows the provider's pages
//!
//! The flow never renders provider UI itself; it hands the authorization
//! (or registration) URL to a user agent and waits for the redirect.

use tracing::info;
use url::Url;

use crate::error::{Error, Result};

/// Something that can show a URL to the user.
pub trait UserAgent: Send + Sync {
    fn open(&self, url: &Url) -> Result<()>;
}

/// The platform's default browser.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemBrowser;

impl UserAgent for SystemBrowser {
    fn open(&self, url: &Url) -> Result<()> {
        info!(host = url.host_str().unwrap_or_default(), "opening system browser");
        open::that_detached(url.as_str())
            .map_err(|e| Error::UserAgent(format!("failed to launch browser: {e}")))
    }
}
