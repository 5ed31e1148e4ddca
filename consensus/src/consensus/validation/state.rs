//! Per-block validation state machine.
//!
//! `Received → HeaderValidated → IntegrityValidated → PartiallyValidated →
//! FullyValidated`, with every non-terminal state able to fall to `Invalid`.
//! `Invalid` has no next stage, so nothing runs after a failure.

use consensus_core::errors::{ErrorCode, RuleError};

/// Validation stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    Header,
    Integrity,
    Partial,
    Full,
}

impl Stage {
    pub const ALL: [Stage; 4] = [Stage::Header, Stage::Integrity, Stage::Partial, Stage::Full];

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Header => "header",
            Stage::Integrity => "integrity",
            Stage::Partial => "partial",
            Stage::Full => "full",
        }
    }
}

/// Ternary outcome of a validation attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Valid,
    Invalid,
    InvalidBanPeer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationState {
    Received,
    HeaderValidated,
    IntegrityValidated,
    PartiallyValidated,
    FullyValidated,
    Invalid { stage: Stage, error: RuleError },
}

impl ValidationState {
    /// The stage that runs next, `None` in terminal states
    pub fn next_stage(&self) -> Option<Stage> {
        match self {
            ValidationState::Received => Some(Stage::Header),
            ValidationState::HeaderValidated => Some(Stage::Integrity),
            ValidationState::IntegrityValidated => Some(Stage::Partial),
            ValidationState::PartiallyValidated => Some(Stage::Full),
            ValidationState::FullyValidated | ValidationState::Invalid { .. } => None,
        }
    }

    /// State after `stage` passed. Only the pending stage may complete.
    pub(crate) fn complete(&self, stage: Stage) -> Option<ValidationState> {
        if self.next_stage() != Some(stage) {
            return None;
        }
        Some(match stage {
            Stage::Header => ValidationState::HeaderValidated,
            Stage::Integrity => ValidationState::IntegrityValidated,
            Stage::Partial => ValidationState::PartiallyValidated,
            Stage::Full => ValidationState::FullyValidated,
        })
    }

    /// Whether `stage` has already passed
    pub fn passed(&self, stage: Stage) -> bool {
        match self.next_stage() {
            Some(next) => stage < next,
            None => matches!(self, ValidationState::FullyValidated),
        }
    }

    pub fn is_invalid(&self) -> bool {
        matches!(self, ValidationState::Invalid { .. })
    }

    pub fn error(&self) -> Option<&RuleError> {
        match self {
            ValidationState::Invalid { error, .. } => Some(error),
            _ => None,
        }
    }

    pub fn code(&self) -> Option<ErrorCode> {
        self.error().map(RuleError::code)
    }

    pub fn outcome(&self) -> Outcome {
        match self.error() {
            None => Outcome::Valid,
            Some(error) if error.ban_peer() => Outcome::InvalidBanPeer,
            Some(_) => Outcome::Invalid,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_advance_in_order() {
        let mut state = ValidationState::Received;
        for stage in Stage::ALL {
            assert_eq!(state.next_stage(), Some(stage));
            state = state.complete(stage).unwrap();
            assert!(state.passed(stage));
        }
        assert_eq!(state, ValidationState::FullyValidated);
        assert_eq!(state.next_stage(), None);
        assert_eq!(state.outcome(), Outcome::Valid);
    }

    #[test]
    fn invalid_is_terminal() {
        let state = ValidationState::Invalid { stage: Stage::Integrity, error: RuleError::structural("merkle-root", "mismatch") };
        assert_eq!(state.next_stage(), None);
        assert!(!state.passed(Stage::Header));
        assert!(state.complete(Stage::Partial).is_none());
        assert_eq!(state.outcome(), Outcome::InvalidBanPeer);
        assert_eq!(state.code(), Some(ErrorCode::StructurallyInvalid));
    }
}
