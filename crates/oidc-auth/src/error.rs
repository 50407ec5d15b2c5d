//! Error taxonomy for the sign-in protocol

use serde::Serialize;

/// Errors from discovery, PKCE, redirect capture, token exchange and storage.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("discovery failed: {0}")]
    Discovery(String),

    #[error("authorization failed: {error}")]
    Authorization {
        error: String,
        description: Option<String>,
    },

    #[error("timed out waiting for the authorization redirect")]
    RedirectTimeout,

    #[error("authorization redirect wait was cancelled")]
    RedirectCancelled,

    #[error("another sign-in attempt is already in progress")]
    FlowInProgress,

    #[error("token exchange failed: {0}")]
    TokenExchange(String),

    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("invalid id token: {0}")]
    InvalidIdToken(String),

    #[error("logout request failed: {0}")]
    Logout(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("could not open user agent: {0}")]
    UserAgent(String),
}

/// Coarse error class reported to the UI layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    Discovery,
    Authorization,
    RedirectTimeout,
    Cancelled,
    FlowInProgress,
    TokenExchange,
    InvalidCredentials,
    Storage,
    UserAgent,
}

impl ErrorKind {
    /// Stable label for metrics and UI error codes.
    pub fn label(&self) -> &'static str {
        match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::Discovery => "discovery",
            ErrorKind::Authorization => "authorization",
            ErrorKind::RedirectTimeout => "redirect_timeout",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::FlowInProgress => "flow_in_progress",
            ErrorKind::TokenExchange => "token_exchange",
            ErrorKind::InvalidCredentials => "invalid_credentials",
            ErrorKind::Storage => "storage",
            ErrorKind::UserAgent => "user_agent",
        }
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Configuration(_) => ErrorKind::Configuration,
            Error::Discovery(_) => ErrorKind::Discovery,
            Error::Authorization { .. } => ErrorKind::Authorization,
            Error::RedirectTimeout => ErrorKind::RedirectTimeout,
            Error::RedirectCancelled => ErrorKind::Cancelled,
            Error::FlowInProgress => ErrorKind::FlowInProgress,
            Error::TokenExchange(_) | Error::InvalidIdToken(_) => ErrorKind::TokenExchange,
            Error::InvalidCredentials(_) => ErrorKind::InvalidCredentials,
            Error::Storage(_) | Error::Logout(_) => ErrorKind::Storage,
            Error::UserAgent(_) => ErrorKind::UserAgent,
        }
    }

    /// Configuration errors abort the caller; no attempt can succeed.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Configuration(_))
    }

    /// Whether the user can simply try again.
    ///
    /// Authorization errors (consent denied, provider error code) end the
    /// attempt; the user re-initiates rather than retrying the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Discovery(_)
                | Error::RedirectTimeout
                | Error::RedirectCancelled
                | Error::FlowInProgress
                | Error::TokenExchange(_)
                | Error::Storage(_)
                | Error::UserAgent(_)
        )
    }
}

/// Result alias for auth operations.
pub type Result<T> = std::result::Result<T, Error>;
