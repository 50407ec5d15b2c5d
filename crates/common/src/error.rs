//! Configuration errors shared by every crate that loads settings

use thiserror::Error;

/// Startup/configuration error.
///
/// `Config` is the fatal, non-retryable class: a missing client id, issuer or
/// redirect URI means no sign-in flow can ever succeed, so callers abort
/// instead of surfacing it as a per-attempt failure.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Result alias using common Error
pub type Result<T> = std::result::Result<T, Error>;
