//! Unified error model for the session engine.
//! One clonable enum shared by the token manager, the request interceptor and
//! the query cache, along with the retry/forced-logout classification helpers
//! those layers key off.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthError {
    /// Refresh rejected or token invalid. Fatal to the session; forces logout.
    Authorization { code: String, message: String },
    /// Request could not complete at all (DNS, connect, timeout). Recoverable;
    /// retried by the cache layer only, never inside the interceptor.
    Network { code: String, message: String },
    /// Non-401 remote status surfaced to the caller unmodified.
    Http { status: u16, message: String },
    /// Corrupted or unparsable persisted state. Read sites treat this as
    /// "no value present"; it must never abort initialization.
    MalformedState { code: String, message: String },
    Internal { code: String, message: String },
}

impl AuthError {
    pub fn authorization<C: Into<String>, M: Into<String>>(code: C, msg: M) -> Self {
        AuthError::Authorization { code: code.into(), message: msg.into() }
    }
    pub fn network<C: Into<String>, M: Into<String>>(code: C, msg: M) -> Self {
        AuthError::Network { code: code.into(), message: msg.into() }
    }
    pub fn http<S: Into<String>>(status: u16, msg: S) -> Self {
        AuthError::Http { status, message: msg.into() }
    }
    pub fn malformed<C: Into<String>, M: Into<String>>(code: C, msg: M) -> Self {
        AuthError::MalformedState { code: code.into(), message: msg.into() }
    }
    pub fn internal<C: Into<String>, M: Into<String>>(code: C, msg: M) -> Self {
        AuthError::Internal { code: code.into(), message: msg.into() }
    }

    pub fn message(&self) -> &str {
        match self {
            AuthError::Authorization { message, .. }
            | AuthError::Network { message, .. }
            | AuthError::Http { message, .. }
            | AuthError::MalformedState { message, .. }
            | AuthError::Internal { message, .. } => message.as_str(),
        }
    }

    /// Whether this failure ends the session. Only authorization failures do;
    /// a refresh that merely failed to reach the server leaves the session
    /// intact so a later call can try again.
    pub fn forces_logout(&self) -> bool {
        matches!(self, AuthError::Authorization { .. })
    }

    /// Retry classification used by the cache layer. Client errors (4xx) are
    /// non-transient by definition and are never retried; network and server
    /// failures are.
    pub fn is_retriable(&self) -> bool {
        match self {
            AuthError::Network { .. } => true,
            AuthError::Http { status, .. } => *status >= 500,
            AuthError::Authorization { .. }
            | AuthError::MalformedState { .. }
            | AuthError::Internal { .. } => false,
        }
    }
}

impl Display for AuthError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::Http { status, message } => write!(f, "http_{}: {}", status, message),
            AuthError::Authorization { code, message }
            | AuthError::Network { code, message }
            | AuthError::MalformedState { code, message }
            | AuthError::Internal { code, message } => write!(f, "{}: {}", code, message),
        }
    }
}

impl std::error::Error for AuthError {}

pub type AuthResult<T> = Result<T, AuthError>;

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        // Transport-level failures only; HTTP statuses are classified at the
        // call site where the original request is still known.
        AuthError::Network { code: "transport".into(), message: err.to_string() }
    }
}

impl From<anyhow::Error> for AuthError {
    fn from(err: anyhow::Error) -> Self {
        AuthError::Internal { code: "internal".into(), message: err.to_string() }
    }
}
