use crate::redact::redact_secrets;
use thiserror::Error;

/// Failure to get any usable HTTP response out of the backend.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("network error: {0}")]
    Network(String),
    #[error("unexpected response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            return Self::Timeout;
        }
        let msg = redact_secrets(&e.to_string()).into_owned();
        if e.is_decode() {
            Self::Decode(msg)
        } else {
            Self::Network(msg)
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("secure storage unavailable: {0}")]
    Unavailable(String),
    #[error("storage io error: {0}")]
    Io(String),
    #[error("corrupt storage file: {0}")]
    Corrupt(String),
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

impl From<keyring::Error> for StoreError {
    fn from(e: keyring::Error) -> Self {
        Self::Unavailable(e.to_string())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    /// The backend rejected the credential. Always ends the session.
    #[error("not authenticated: {0}")]
    AuthorizationRejected(String),
    /// Timeout, network error or malformed response. Never ends the session
    /// by itself.
    #[error("connectivity failure: {0}")]
    Connectivity(#[from] TransportError),
    /// The one-shot refresh failed; shared by every request queued behind it.
    #[error("token refresh failed: {0}")]
    RefreshExhausted(String),
    #[error("request failed with status {status}: {message}")]
    Api { status: u16, message: String },
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The auto refresh loop is gone; says nothing about the credential.
    #[error("refresh loop is not running")]
    RefreshLoopStopped,
}

impl SessionError {
    /// Errors the UI layer treats as "not authenticated".
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            Self::AuthorizationRejected(_) | Self::RefreshExhausted(_)
        )
    }

    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Connectivity(_))
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::AuthorizationRejected(_) => Some(401),
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

pub type SessionResult<T> = Result<T, SessionError>;
