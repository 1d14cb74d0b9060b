//! Crate-wide error type
//!
//! Module errors convert into [`Error`] so that server startup and the
//! binary can propagate any of them with `?`.

use std::net::AddrParseError;

use crate::directory::DirectoryError;
use crate::hub::HubError;
use crate::scan::ClaimError;

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O failure (listener bind, scanner feed, member file)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The broadcast hub is no longer running
    #[error(transparent)]
    Hub(#[from] HubError),

    /// A scan claim failed
    #[error(transparent)]
    Claim(#[from] ClaimError),

    /// Member lookup or visit recording failed
    #[error(transparent)]
    Directory(#[from] DirectoryError),

    /// Invalid configuration value
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl From<AddrParseError> for Error {
    fn from(err: AddrParseError) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Config(format!("malformed JSON: {}", err))
    }
}
