use thiserror::Error;

use crate::tx::{TransactionId, TransactionOutpoint};
use crate::Hash;

/// Stable error codes reported alongside rejected blocks and transactions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    StructurallyInvalid,
    ConsensusRuleViolation,
    MissingOrSpentInputs,
    AlreadyKnown,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::StructurallyInvalid => "structurally-invalid",
            ErrorCode::ConsensusRuleViolation => "consensus-rule-violation",
            ErrorCode::MissingOrSpentInputs => "missing-or-spent-inputs",
            ErrorCode::AlreadyKnown => "already-known",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of a single validation rule. Every variant names the rule that raised it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuleError {
    #[error("[{rule}] structurally invalid: {reason}")]
    StructurallyInvalid { rule: &'static str, reason: String },

    /// `context_dependent` violations may become valid once more chain data
    /// arrives (e.g. a timestamp too far in the future) and never ban the peer.
    #[error("[{rule}] consensus rule violation: {reason}")]
    ConsensusRuleViolation { rule: &'static str, reason: String, context_dependent: bool },

    #[error("[{rule}] missing or spent input {outpoint}")]
    MissingOrSpentInputs { rule: &'static str, outpoint: TransactionOutpoint },

    #[error("transaction {0} is already known")]
    AlreadyKnown(TransactionId),
}

impl RuleError {
    pub fn structural(rule: &'static str, reason: impl Into<String>) -> Self {
        RuleError::StructurallyInvalid { rule, reason: reason.into() }
    }

    pub fn violation(rule: &'static str, reason: impl Into<String>) -> Self {
        RuleError::ConsensusRuleViolation { rule, reason: reason.into(), context_dependent: false }
    }

    pub fn context_dependent(rule: &'static str, reason: impl Into<String>) -> Self {
        RuleError::ConsensusRuleViolation { rule, reason: reason.into(), context_dependent: true }
    }

    pub fn missing_input(rule: &'static str, outpoint: TransactionOutpoint) -> Self {
        RuleError::MissingOrSpentInputs { rule, outpoint }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            RuleError::StructurallyInvalid { .. } => ErrorCode::StructurallyInvalid,
            RuleError::ConsensusRuleViolation { .. } => ErrorCode::ConsensusRuleViolation,
            RuleError::MissingOrSpentInputs { .. } => ErrorCode::MissingOrSpentInputs,
            RuleError::AlreadyKnown(_) => ErrorCode::AlreadyKnown,
        }
    }

    /// Name of the rule that failed
    pub fn rule(&self) -> &'static str {
        match self {
            RuleError::StructurallyInvalid { rule, .. }
            | RuleError::ConsensusRuleViolation { rule, .. }
            | RuleError::MissingOrSpentInputs { rule, .. } => rule,
            RuleError::AlreadyKnown(_) => "mempool",
        }
    }

    /// Whether the peer that relayed the offending data acted byzantine
    pub fn ban_peer(&self) -> bool {
        match self {
            RuleError::StructurallyInvalid { .. } => true,
            RuleError::ConsensusRuleViolation { context_dependent, .. } => !context_dependent,
            RuleError::MissingOrSpentInputs { .. } | RuleError::AlreadyKnown(_) => false,
        }
    }

    /// Failures that say nothing permanent about the block itself
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RuleError::MissingOrSpentInputs { .. }
                | RuleError::AlreadyKnown(_)
                | RuleError::ConsensusRuleViolation { context_dependent: true, .. }
        )
    }
}

pub type RuleResult<T> = std::result::Result<T, RuleError>;

/// Outcome errors of submitting headers and blocks to the consensus manager
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsensusError {
    #[error("parent {parent} of {hash} is unknown")]
    OrphanHeader { hash: Hash, parent: Hash },

    #[error("{0} is already known")]
    Duplicate(Hash),

    #[error("parent of {hash} is invalid or inconsistent: {reason}")]
    InvalidParent { hash: Hash, reason: String },

    #[error("{0} was previously marked invalid")]
    KnownInvalid(Hash),

    #[error("block {hash} rejected: {error}")]
    Rejected { hash: Hash, error: RuleError },

    #[error("coin view tip moved: expected {expected}, found {actual}")]
    ConcurrentModification { expected: Hash, actual: Hash },

    #[error("rewind beyond the undo log depth")]
    RewindLimitExceeded,

    #[error("storage failure: {0}")]
    Storage(String),

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
}

impl ConsensusError {
    /// Faults that leave the coin view unrecoverable locally
    pub fn is_fatal(&self) -> bool {
        matches!(self, ConsensusError::RewindLimitExceeded | ConsensusError::Storage(_))
    }

    /// The rule failure behind a rejection, if any
    pub fn rule_error(&self) -> Option<&RuleError> {
        match self {
            ConsensusError::Rejected { error, .. } => Some(error),
            _ => None,
        }
    }

    pub fn ban_peer(&self) -> bool {
        self.rule_error().is_some_and(RuleError::ban_peer)
    }
}

pub type ConsensusResult<T> = std::result::Result<T, ConsensusError>;
