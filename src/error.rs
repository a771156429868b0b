//! Unified error model for the session core.
//! Every failure path ends in either "show login" or "show an error message";
//! nothing here is fatal to the host.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConsoleError {
    /// Login rejected by the backend. No session state was touched.
    #[error("invalid credentials: {message}")]
    Credentials { message: String },
    /// A 401 from an authenticated endpoint; the session has been torn down.
    #[error("session expired or not authorized")]
    Unauthorized,
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("malformed response: {0}")]
    Decode(String),
    #[error("storage failure: {0}")]
    Storage(String),
    /// The fetch resolved after its session was torn down; the result was dropped.
    #[error("stale response discarded")]
    Stale,
}

impl ConsoleError {
    pub fn credentials<S: Into<String>>(msg: S) -> Self { ConsoleError::Credentials { message: msg.into() } }
    pub fn http<S: Into<String>>(status: u16, msg: S) -> Self { ConsoleError::Http { status, message: msg.into() } }
    pub fn transport<S: Into<String>>(msg: S) -> Self { ConsoleError::Transport(msg.into()) }
    pub fn decode<S: Into<String>>(msg: S) -> Self { ConsoleError::Decode(msg.into()) }
    pub fn storage<S: Into<String>>(msg: S) -> Self { ConsoleError::Storage(msg.into()) }

    pub fn code_str(&self) -> &'static str {
        match self {
            ConsoleError::Credentials { .. } => "invalid_credentials",
            ConsoleError::Unauthorized => "unauthorized",
            ConsoleError::Http { .. } => "http_error",
            ConsoleError::Transport(_) => "transport_error",
            ConsoleError::Decode(_) => "decode_error",
            ConsoleError::Storage(_) => "storage_error",
            ConsoleError::Stale => "stale_response",
        }
    }

    /// Closest HTTP status for display purposes.
    pub fn http_status(&self) -> u16 {
        match self {
            ConsoleError::Credentials { .. } | ConsoleError::Unauthorized => 401,
            ConsoleError::Http { status, .. } => *status,
            ConsoleError::Transport(_) => 503,
            ConsoleError::Decode(_) => 502,
            ConsoleError::Storage(_) | ConsoleError::Stale => 500,
        }
    }

    /// Only network failures and server-side errors are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            ConsoleError::Transport(_) => true,
            ConsoleError::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }

    pub fn is_unauthorized(&self) -> bool { matches!(self, ConsoleError::Unauthorized) }
}

impl From<reqwest::Error> for ConsoleError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ConsoleError::Decode(err.to_string())
        } else {
            ConsoleError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ConsoleError {
    fn from(err: serde_json::Error) -> Self { ConsoleError::Decode(err.to_string()) }
}

pub type ConsoleResult<T> = Result<T, ConsoleError>;
