//! Error types for trust provisioning.
//!
//! [`ControlError`] wraps failures from the Manager client, the local
//! stores, the Kubernetes API and certificate handling, and adds the
//! engine's own ownership and state errors.

use nsx_sa_client::{ClientError, Feature};
use nsx_sa_store::StoreError;
use thiserror::Error;

use crate::lifecycle::RealizationState;
use crate::pki::PkiError;

/// A result type using `ControlError`.
pub type Result<T> = std::result::Result<T, ControlError>;

/// Errors that can occur while provisioning service accounts.
#[derive(Debug, Error)]
pub enum ControlError {
    /// A Manager object is tagged with another CR's UID.
    #[error("{name} is owned by CR {found}, expected {expected}")]
    OwnershipMismatch {
        /// Normalized Manager-side name.
        name: String,
        /// UID of the CR being processed.
        expected: String,
        /// UID found on the Manager object, empty when untagged.
        found: String,
    },

    /// The Manager version does not support a required feature.
    #[error("NSX Manager does not support {0}")]
    FeatureNotSupported(Feature),

    /// The requested realization state transition is not valid.
    #[error("invalid state transition for {uid}: cannot transition from {from:?} to {to:?}")]
    InvalidState {
        /// UID of the CR.
        uid: String,
        /// The current state.
        from: RealizationState,
        /// The requested target state.
        to: RealizationState,
    },

    /// The CR lacks a field the engine needs.
    #[error("NSXServiceAccount is missing {0}")]
    MissingField(&'static str),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Manager call failed.
    #[error("NSX Manager error: {0}")]
    Client(#[from] ClientError),

    /// Local store error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Kubernetes API error.
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Certificate generation or parsing failed.
    #[error("certificate error: {0}")]
    Pki(#[from] PkiError),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ControlError {
    /// Returns true if this error might be resolved by retrying.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Client(e) => e.is_retriable(),
            Self::Kube(kube::Error::Api(e)) => e.code >= 500 || e.code == 409 || e.code == 429,
            Self::Kube(_) | Self::Internal(_) => true,
            Self::OwnershipMismatch { .. }
            | Self::FeatureNotSupported(_)
            | Self::InvalidState { .. }
            | Self::MissingField(_)
            | Self::Config(_)
            | Self::Store(_)
            | Self::Pki(_) => false,
        }
    }

    /// Short CamelCase token for condition reasons.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::OwnershipMismatch { .. } => "OwnershipMismatch",
            Self::FeatureNotSupported(_) => "FeatureNotSupported",
            Self::InvalidState { .. } => "InvalidState",
            Self::MissingField(_) => "InvalidSpec",
            Self::Config(_) => "InvalidConfig",
            Self::Client(_) => "ManagerError",
            Self::Store(_) => "StoreError",
            Self::Kube(_) => "KubernetesError",
            Self::Pki(_) => "CertificateError",
            Self::Internal(_) => "InternalError",
        }
    }
}
