//! Error taxonomy shared by the auth and api modules

use thiserror::Error;

/// Errors surfaced by the credential lifecycle and the intranet API client.
#[derive(Debug, Error)]
pub enum Error {
    /// A required OAuth client setting is missing or empty.
    #[error("missing {0}; set it in config.toml or the environment")]
    MisconfiguredCredentials(&'static str),

    /// Transport-level failure (connect, TLS, timeout, body read).
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Non-2xx response that has no dedicated variant.
    #[error("HTTP error: {0}")]
    Http(u16),

    /// The requested login does not exist.
    #[error("login not found")]
    NotFound,

    /// Response body did not match the expected shape.
    #[error("unexpected API response: {0}")]
    Decoding(String),

    /// The authorization callback was malformed or carried a foreign state.
    #[error("authorization callback did not match the request")]
    CallbackMismatch,

    /// The user dismissed or abandoned the login.
    #[error("login cancelled")]
    UserCancelled,

    /// There is no surface to present the login on.
    #[error("cannot present login: {0}")]
    PresentationUnavailable(String),

    /// The secret store backend failed.
    #[error("credential store error: {0}")]
    Store(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Decoding(err.to_string())
    }
}
