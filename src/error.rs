//! Error types for the harvesting engine.

use thiserror::Error;

/// Errors raised by the library components.
///
/// Most of these never leave the engine: transport and geo failures are
/// folded into source metrics or treated as "no data". Only artifact I/O is
/// expected to reach the caller.
#[derive(Error, Debug)]
pub enum Error {
    /// Source URL could not be turned into a source identity.
    #[error("invalid source {url:?}: {reason}")]
    InvalidSource { url: String, reason: String },

    /// Network-level failure while fetching a source.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Source answered with a non-success HTTP status.
    #[error("unexpected HTTP status: {0}")]
    Status(u16),

    /// Fetch exceeded the source's timeout.
    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Fetch was abandoned because the run was cancelled.
    #[error("fetch cancelled")]
    Cancelled,

    /// Geo database could not be opened or queried.
    #[error("geo lookup error: {0}")]
    Geo(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn invalid_source(url: &str, reason: impl Into<String>) -> Self {
        Self::InvalidSource {
            url: url.to_string(),
            reason: reason.into(),
        }
    }
}
