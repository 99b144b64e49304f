//! Unified error type for forecast-sync.
//!
//! Every variant carries owned strings so the error can be cloned into a
//! `Resource::Error` and fanned out to any number of subscribers.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Transport(String),

    /// Non-2xx response whose body parsed as `{ "cod", "message" }`.
    #[error("{message}")]
    RemoteApi {
        status: u16,
        code: String,
        message: String,
    },

    #[error("Store error: {0}")]
    Store(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("JSON parse error: {0}")]
    Json(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// True for failures that came from the remote side (transport or API).
    pub fn is_remote(&self) -> bool {
        matches!(self, Error::Transport(_) | Error::RemoteApi { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}
