//! Connectivity error types.

use thiserror::Error;

/// A result type using `ClientError`.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors that can occur while talking to the Manager cluster.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The endpoint could not be reached.
    #[error("connection failed: {0}")]
    Connection(String),

    /// The request did not complete in time.
    #[error("request timed out: {0}")]
    Timeout(String),

    /// The Manager answered with a non-success status.
    #[error("manager returned HTTP {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Error text extracted from the response body.
        message: String,
    },

    /// Username/password login was rejected.
    #[error("login failed: {0}")]
    LoginFailed(String),

    /// Every attempt of a logical call failed with a retriable error.
    #[error("all endpoints failed after {attempts} attempts: {last}")]
    AllEndpointsFailed {
        /// Number of attempts made.
        attempts: usize,
        /// The error of the final attempt.
        last: Box<ClientError>,
    },

    /// The pool has no endpoints configured.
    #[error("no manager endpoints configured")]
    NoEndpoints,

    /// No endpoint is currently up.
    #[error("no healthy manager endpoint")]
    NoHealthyEndpoint,

    /// The response body could not be decoded.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The client configuration is invalid.
    #[error("configuration error: {0}")]
    Config(String),
}

impl ClientError {
    /// Returns `true` if the call may succeed on another endpoint or later.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        match self {
            Self::Connection(_)
            | Self::Timeout(_)
            | Self::AllEndpointsFailed { .. }
            | Self::NoHealthyEndpoint => true,
            Self::Status { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// Returns `true` if the Manager reported the object as absent.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::Status { status: 404, .. })
    }

    /// Returns `true` for authentication or authorization failures.
    #[must_use]
    pub const fn is_auth(&self) -> bool {
        matches!(
            self,
            Self::LoginFailed(_) | Self::Status { status: 401 | 403, .. }
        )
    }

    /// Returns `true` if the Manager signalled throttling.
    #[must_use]
    pub const fn is_throttled(&self) -> bool {
        matches!(self, Self::Status { status: 429 | 503, .. })
    }

    /// The HTTP status code, if the Manager answered.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout(e.to_string())
        } else if e.is_decode() {
            Self::InvalidResponse(e.to_string())
        } else if let Some(status) = e.status() {
            Self::Status {
                status: status.as_u16(),
                message: e.to_string(),
            }
        } else {
            Self::Connection(e.to_string())
        }
    }
}
