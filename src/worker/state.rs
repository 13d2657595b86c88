//! Generation attempt state machine.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle of one generation attempt.
///
/// ```text
/// Requested -> AdmissionGranted -> InFlight -> Completed -> Released
///     |                                    \-> Failed ----/
///     \-> Rejected
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AttemptState {
    Requested,
    AdmissionGranted,
    InFlight,
    Completed,
    Failed,
    Released,
    /// No capacity this cycle; routine backpressure
    Rejected,
}

impl AttemptState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptState::Requested => "requested",
            AttemptState::AdmissionGranted => "admission_granted",
            AttemptState::InFlight => "in_flight",
            AttemptState::Completed => "completed",
            AttemptState::Failed => "failed",
            AttemptState::Released => "released",
            AttemptState::Rejected => "rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AttemptState::Released | AttemptState::Rejected)
    }

    pub fn can_transition_to(&self, next: AttemptState) -> bool {
        use AttemptState::*;
        matches!(
            (self, next),
            (Requested, AdmissionGranted)
                | (Requested, Rejected)
                | (AdmissionGranted, InFlight)
                | (InFlight, Completed)
                | (InFlight, Failed)
                | (Completed, Released)
                | (Failed, Released)
        )
    }
}

impl std::fmt::Display for AttemptState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("invalid attempt transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: AttemptState,
    pub to: AttemptState,
}

/// Tracks one attempt through its states, refusing illegal moves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptLifecycle {
    state: AttemptState,
    history: Vec<AttemptState>,
}

impl Default for AttemptLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl AttemptLifecycle {
    pub fn new() -> Self {
        Self {
            state: AttemptState::Requested,
            history: vec![AttemptState::Requested],
        }
    }

    pub fn state(&self) -> AttemptState {
        self.state
    }

    /// Every state visited, in order.
    pub fn history(&self) -> &[AttemptState] {
        &self.history
    }

    pub fn advance(&mut self, next: AttemptState) -> Result<(), InvalidTransition> {
        if !self.state.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        self.history.push(next);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let mut attempt = AttemptLifecycle::new();
        attempt.advance(AttemptState::AdmissionGranted).unwrap();
        attempt.advance(AttemptState::InFlight).unwrap();
        attempt.advance(AttemptState::Completed).unwrap();
        attempt.advance(AttemptState::Released).unwrap();
        assert!(attempt.state().is_terminal());
        assert_eq!(attempt.history().len(), 5);
    }

    #[test]
    fn test_rejected_is_terminal() {
        let mut attempt = AttemptLifecycle::new();
        attempt.advance(AttemptState::Rejected).unwrap();
        assert!(attempt.state().is_terminal());
        assert!(attempt.advance(AttemptState::AdmissionGranted).is_err());
    }

    #[test]
    fn test_invalid_transitions_refused() {
        let mut attempt = AttemptLifecycle::new();
        let err = attempt.advance(AttemptState::InFlight).unwrap_err();
        assert_eq!(err.from, AttemptState::Requested);
        assert_eq!(err.to, AttemptState::InFlight);
        assert_eq!(attempt.state(), AttemptState::Requested);

        attempt.advance(AttemptState::AdmissionGranted).unwrap();
        assert!(attempt.advance(AttemptState::Released).is_err());
        assert!(attempt.advance(AttemptState::Rejected).is_err());
    }

    #[test]
    fn test_failed_then_released() {
        let mut attempt = AttemptLifecycle::new();
        for next in [
            AttemptState::AdmissionGranted,
            AttemptState::InFlight,
            AttemptState::Failed,
            AttemptState::Released,
        ] {
            attempt.advance(next).unwrap();
        }
        assert!(!AttemptState::Failed.can_transition_to(AttemptState::Completed));
    }
}
