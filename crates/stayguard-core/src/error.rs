//! # Error Hierarchy
//!
//! Structured error types built with `thiserror`. No `Box<dyn Error>`, no
//! `.unwrap()` outside tests.
//!
//! [`LifecycleError`] is returned by every invitation, stay and Shield Mode
//! transition. Each variant maps onto exactly one [`ErrorKind`], which the
//! API layer turns into an HTTP status and the audit ledger records as the
//! reason for a failed attempt.

use thiserror::Error;

use crate::temporal::Timestamp;

/// The five ways a lifecycle operation can be refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The transition is not legal from the entity's current state.
    InvalidTransition,
    /// The entity reached a terminal state before this call could commit.
    AlreadyResolved,
    /// The invitation acceptance window has passed.
    Expired,
    /// The referenced entity does not exist or is not visible to the caller.
    NotFound,
    /// An input precondition does not hold.
    PreconditionFailed,
}

impl ErrorKind {
    /// Stable machine-readable code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidTransition => "INVALID_TRANSITION",
            Self::AlreadyResolved => "ALREADY_RESOLVED",
            Self::Expired => "EXPIRED",
            Self::NotFound => "NOT_FOUND",
            Self::PreconditionFailed => "PRECONDITION_FAILED",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A refused lifecycle transition.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    /// The requested transition is not legal from the current state.
    #[error("invalid {entity} transition: {from} -> {to}: {reason}")]
    InvalidTransition {
        /// Entity kind ("stay", "invitation", "shield_mode").
        entity: &'static str,
        /// Current state name.
        from: String,
        /// Attempted target state name.
        to: String,
        /// Human-readable reason.
        reason: String,
    },

    /// The entity is already in a terminal state.
    #[error("{entity} {id} is already resolved ({state})")]
    AlreadyResolved {
        /// Entity kind.
        entity: &'static str,
        /// Entity identifier.
        id: String,
        /// The terminal state it is in.
        state: String,
    },

    /// The invitation can no longer be accepted.
    #[error("invitation {code} expired at {expired_at}")]
    Expired {
        /// Invitation code.
        code: String,
        /// End of the acceptance window.
        expired_at: Timestamp,
    },

    /// The referenced entity does not exist.
    #[error("{entity} {id} not found")]
    NotFound {
        /// Entity kind.
        entity: &'static str,
        /// Identifier that was looked up.
        id: String,
    },

    /// An input precondition does not hold.
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),
}

impl LifecycleError {
    /// Shorthand for [`LifecycleError::NotFound`].
    pub fn not_found(entity: &'static str, id: impl std::fmt::Display) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Shorthand for [`LifecycleError::PreconditionFailed`].
    pub fn precondition(msg: impl Into<String>) -> Self {
        Self::PreconditionFailed(msg.into())
    }

    /// The taxonomy bucket this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            Self::AlreadyResolved { .. } => ErrorKind::AlreadyResolved,
            Self::Expired { .. } => ErrorKind::Expired,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::PreconditionFailed(_) => ErrorKind::PreconditionFailed,
        }
    }
}

/// Validation errors for identifier newtypes and parsed inputs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Invitation code is not `INV-` followed by eight hex digits.
    #[error("invalid invitation code: \"{0}\" (expected INV-XXXXXXXX)")]
    InvalidInvitationCode(String),

    /// Region code is empty or contains characters other than A-Z and 0-9.
    #[error("invalid region code: \"{0}\" (expected 2-8 uppercase letters or digits)")]
    InvalidRegionCode(String),

    /// Timestamp could not be parsed.
    #[error("{0}")]
    InvalidTimestamp(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_codes_are_stable() {
        let err = LifecycleError::not_found("stay", "abc");
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.kind().as_str(), "NOT_FOUND");
        assert_eq!(err.to_string(), "stay abc not found");
    }

    #[test]
    fn already_resolved_names_the_state() {
        let err = LifecycleError::AlreadyResolved {
            entity: "stay",
            id: "s-1".into(),
            state: "REVOKED".into(),
        };
        assert_eq!(err.kind().to_string(), "ALREADY_RESOLVED");
        assert!(err.to_string().contains("REVOKED"));
    }

    #[test]
    fn precondition_helper() {
        let err = LifecycleError::precondition("checkout must be after checkin");
        assert_eq!(err.kind(), ErrorKind::PreconditionFailed);
    }
}
