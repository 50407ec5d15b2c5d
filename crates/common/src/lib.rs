//! Shared types for the marketplace sign-in workspace

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
