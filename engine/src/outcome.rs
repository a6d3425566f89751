//! Terminal outcomes of one reconciliation.

use registry::Subject;
use std::fmt;

/// Why a reconciliation failed. Drives both the operator log and the
/// response the form system sees (its only retry signal).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureReason {
    /// Unlinked or misconfigured project; not retryable without operator
    /// action.
    Configuration,
    /// The form system points at a different registry identity than the one
    /// stored for this record. Never auto-healed.
    IdentityMismatch,
    /// More than one registry subject matches the record, or a create race
    /// was lost.
    Conflict,
    /// Network or upstream failure; safe to retry via re-delivery.
    Transient,
}

impl FailureReason {
    pub const fn as_str(&self) -> &'static str {
        match self {
            FailureReason::Configuration => "configuration",
            FailureReason::IdentityMismatch => "identity_mismatch",
            FailureReason::Conflict => "conflict",
            FailureReason::Transient => "transient",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of reconciling one trigger. Produced once, consumed immediately;
/// never persisted.
#[derive(Clone, Debug, PartialEq)]
pub enum SubjectOutcome {
    Created(Subject),
    Updated(Subject),
    Noop(Subject),
    Failed {
        reason: FailureReason,
        message: String,
    },
}

impl SubjectOutcome {
    pub fn subject(&self) -> Option<&Subject> {
        match self {
            SubjectOutcome::Created(s) | SubjectOutcome::Updated(s) | SubjectOutcome::Noop(s) => {
                Some(s)
            }
            SubjectOutcome::Failed { .. } => None,
        }
    }

    pub const fn label(&self) -> &'static str {
        match self {
            SubjectOutcome::Created(_) => "created",
            SubjectOutcome::Updated(_) => "updated",
            SubjectOutcome::Noop(_) => "noop",
            SubjectOutcome::Failed { .. } => "failed",
        }
    }

    pub const fn is_success(&self) -> bool {
        !matches!(self, SubjectOutcome::Failed { .. })
    }
}
