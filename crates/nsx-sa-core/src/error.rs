//! Common error types for the NSX service account crates.

use thiserror::Error;

/// A result type using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core errors shared across the workspace.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A Manager object is missing one of the ownership tags.
    #[error("missing tag with scope {0}")]
    MissingTag(&'static str),

    /// An internal error occurred.
    #[error("internal error: {0}")]
    Internal(String),
}
