//! Error types for the operator crate.

use kube::runtime::finalizer;
use nsx_sa_control::ControlError;
use thiserror::Error;

/// Errors that can occur while reconciling `NSXServiceAccount` resources.
#[derive(Error, Debug)]
pub enum OperatorError {
    /// Provisioning failed.
    #[error(transparent)]
    Control(#[from] ControlError),

    /// Adding or removing the finalizer, or the wrapped reconcile, failed.
    #[error("finalizer error: {0}")]
    Finalizer(#[source] Box<finalizer::Error<ControlError>>),

    /// Kubernetes API error.
    #[error("Kubernetes API error: {0}")]
    KubeApi(#[from] kube::Error),

    /// NSX Manager connection setup failed.
    #[error("NSX Manager error: {0}")]
    Client(#[from] nsx_sa_client::ClientError),

    /// The resource has no namespace.
    #[error("resource has no namespace")]
    MissingNamespace,
}

impl From<finalizer::Error<ControlError>> for OperatorError {
    fn from(err: finalizer::Error<ControlError>) -> Self {
        Self::Finalizer(Box::new(err))
    }
}

impl OperatorError {
    /// Check if this error is retriable.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Control(e) => e.is_retriable(),
            Self::Finalizer(e) => match e.as_ref() {
                finalizer::Error::ApplyFailed(e) | finalizer::Error::CleanupFailed(e) => {
                    e.is_retriable()
                }
                finalizer::Error::AddFinalizer(_) | finalizer::Error::RemoveFinalizer(_) => true,
                _ => false,
            },
            Self::KubeApi(_) | Self::Client(_) => true,
            Self::MissingNamespace => false,
        }
    }
}

/// A result type using `OperatorError`.
pub type Result<T> = std::result::Result<T, OperatorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retriable_follows_wrapped_error() {
        let apply = OperatorError::from(finalizer::Error::ApplyFailed(ControlError::Internal(
            "boom".into(),
        )));
        assert!(apply.is_retriable());

        let ownership = OperatorError::from(finalizer::Error::CleanupFailed(
            ControlError::OwnershipMismatch {
                name: "n".into(),
                expected: "a".into(),
                found: "b".into(),
            },
        ));
        assert!(!ownership.is_retriable());
        assert!(!OperatorError::MissingNamespace.is_retriable());
    }
}
