//! Error types for the Google Calendar backend.

use thiserror::Error;

/// Errors surfaced by calendar backend calls.
///
/// A 403 response is the rate-limit signal: the client retries it with
/// exponential backoff and only returns `RateLimited` once retries are
/// exhausted. Every other failure aborts the current feed source.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("rate limited by backend (HTTP 403), retries exhausted")]
    RateLimited,

    #[error("backend returned HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected response: {0}")]
    Decode(String),
}

pub type BackendResult<T> = Result<T, BackendError>;
