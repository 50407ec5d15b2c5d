//! Error types for session operations

/// Errors from the session façade and the registration bridge.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Auth(#[from] oidc_auth::Error),

    #[error("registration profile incomplete: {0} step missing")]
    IncompleteProfile(&'static str),

    #[error("profile creation failed: {0}")]
    Backend(#[from] backend::BackendError),
}

impl Error {
    /// Label reported to the UI and used as a metric label.
    pub fn kind_label(&self) -> &'static str {
        match self {
            Error::Auth(e) => e.kind().label(),
            Error::IncompleteProfile(_) => "incomplete_profile",
            Error::Backend(_) => "backend",
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Auth(e) if e.is_fatal())
    }

    /// A failed profile creation keeps the collected profile, so the user can
    /// retry without re-entering anything.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Auth(e) => e.is_retryable(),
            Error::IncompleteProfile(_) => false,
            Error::Backend(_) => true,
        }
    }
}

/// Result alias for session operations.
pub type Result<T> = std::result::Result<T, Error>;
