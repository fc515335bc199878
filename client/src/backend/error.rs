//! Backend Error Types

use thiserror::Error;

/// Errors surfaced by the hosted auth and query services.
///
/// A missing row is never an error: lookups report absence through
/// `Ok(None)` / `Ok(false)`.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The request never produced an HTTP response.
    #[error("Connection failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// Row-level security or the auth service refused the request.
    #[error("Permission denied ({status})")]
    PermissionDenied { status: u16 },

    /// Wrong email or password.
    #[error("Invalid email or password")]
    InvalidCredentials,

    /// Any other non-success status.
    #[error("Backend returned {status}: {body}")]
    Status { status: u16, body: String },

    /// The response body did not match the expected shape.
    #[error("Invalid response from backend: {0}")]
    Decode(String),

    /// The configured backend URL could not be joined with an endpoint path.
    #[error("Invalid backend URL: {0}")]
    Url(#[from] url::ParseError),

    /// The query task died before producing an answer.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BackendError {
    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => Self::PermissionDenied { status },
            _ => Self::Status { status, body },
        }
    }

    /// Whether retrying the same request later could succeed.
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Status { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}
