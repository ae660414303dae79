use std::time::Duration;

use thiserror::Error;

/// Failure of a single round trip to the status server.
///
/// None of these are fatal: the scheduler logs them and lets the next tick
/// retry.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Connection refused, DNS failure, reset mid-body, etc.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The server answered with a non-success status.
    #[error("server responded with HTTP {status}: {body}")]
    Server { status: u16, body: String },

    /// The body of a successful response was not JSON at all.
    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// Durable read/write failure. Callers outside `store` never see this; the
/// persistence adapter logs and swallows it.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}
