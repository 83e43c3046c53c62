//! Realization state machine.
//!
//! Every CR the engine touches moves through these states. The state is
//! kept in memory by the provisioning service and seeded from the CR status
//! the first time a CR is seen.
//!
//! # State Machine
//!
//! ```text
//!     ┌──────────────┐
//!     │  Unrealized  │
//!     └──────┬───────┘
//!            │
//!            ▼
//!     ┌──────────────┐  (error)   ┌──────────┐
//!     │  Realizing   │───────────▶│  Failed  │
//!     └──────┬───────┘◄───────────└────┬─────┘
//!            │    ▲      (retry)       │
//!            ▼    │ (drift)            │
//!     ┌──────────────┐                 │
//!     │   Realized   │                 │
//!     └──────┬───────┘                 │
//!            │                         │
//!            ▼                         │
//!     ┌──────────────┐                 │
//!     │   Deleting   │◄───────────────▶┘
//!     └──────────────┘   (delete failed)
//! ```
//!
//! A CR deleted before it was ever realized goes straight to `Deleting`.
//! A successful delete forgets the CR.

use serde::{Deserialize, Serialize};

use crate::crd::NsxServiceAccount;
use crate::error::{ControlError, Result};

/// Realization state of one CR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RealizationState {
    /// Nothing has been attempted yet.
    Unrealized,
    /// Manager objects and the secret are being written.
    Realizing,
    /// Manager objects, secret and status agree.
    Realized,
    /// The last attempt failed.
    Failed,
    /// Manager objects are being removed.
    Deleting,
}

impl RealizationState {
    /// The state implied by a CR's status.
    #[must_use]
    pub fn of(cr: &NsxServiceAccount) -> Self {
        if cr.is_realized() {
            Self::Realized
        } else if cr.is_failed() {
            Self::Failed
        } else {
            Self::Unrealized
        }
    }
}

/// Validates a state transition and returns the target state if valid.
///
/// # Errors
///
/// Returns `ControlError::InvalidState` if the transition is not allowed.
pub fn validate_transition(
    uid: &str,
    from: RealizationState,
    to: RealizationState,
) -> Result<RealizationState> {
    if is_valid_transition(from, to) {
        Ok(to)
    } else {
        Err(ControlError::InvalidState {
            uid: uid.to_string(),
            from,
            to,
        })
    }
}

/// Check if a state transition is valid according to the state machine.
#[must_use]
pub const fn is_valid_transition(from: RealizationState, to: RealizationState) -> bool {
    use RealizationState::{Deleting, Failed, Realized, Realizing, Unrealized};

    matches!(
        (from, to),
        // Realized goes back to Realizing on drift, Failed on retry
        (Unrealized | Realized | Failed, Realizing)
            | (Realizing, Realized)
            // a failed delete is retried from Failed
            | (Realizing | Deleting, Failed)
            | (Unrealized | Realizing | Realized | Failed, Deleting)
    )
}

/// Returns the list of valid target states from the given state.
#[must_use]
pub fn valid_transitions_from(state: RealizationState) -> Vec<RealizationState> {
    use RealizationState::{Deleting, Failed, Realized, Realizing, Unrealized};

    match state {
        Unrealized | Realized | Failed => vec![Realizing, Deleting],
        Realizing => vec![Realized, Failed, Deleting],
        Deleting => vec![Failed],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use RealizationState::{Deleting, Failed, Realized, Realizing, Unrealized};

    const ALL: [RealizationState; 5] = [Unrealized, Realizing, Realized, Failed, Deleting];

    #[test]
    fn valid_transitions() {
        assert!(is_valid_transition(Unrealized, Realizing));
        assert!(is_valid_transition(Realizing, Realized));
        assert!(is_valid_transition(Realizing, Failed));
        assert!(is_valid_transition(Realized, Realizing));
        assert!(is_valid_transition(Failed, Realizing));
        assert!(is_valid_transition(Realized, Deleting));
        assert!(is_valid_transition(Failed, Deleting));
        assert!(is_valid_transition(Deleting, Failed));
    }

    #[test]
    fn invalid_transitions() {
        assert!(!is_valid_transition(Unrealized, Realized));
        assert!(!is_valid_transition(Failed, Realized));
        assert!(!is_valid_transition(Realized, Failed));
        assert!(!is_valid_transition(Deleting, Realizing));
        assert!(!is_valid_transition(Realizing, Realizing));
    }

    #[test]
    fn validate_transition_err() {
        let err = validate_transition("uid-1", Unrealized, Realized).unwrap_err();
        assert!(matches!(
            err,
            ControlError::InvalidState {
                from: Unrealized,
                to: Realized,
                ..
            }
        ));
    }

    #[test]
    fn transitions_from_agrees_with_predicate() {
        for from in ALL {
            let targets = valid_transitions_from(from);
            for to in ALL {
                assert_eq!(targets.contains(&to), is_valid_transition(from, to));
            }
        }
    }
}
