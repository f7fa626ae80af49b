//! Error types for the post-back engine.
//!
//! Three kinds of failure exist:
//!
//! - **User validation errors** never show up here. They are accumulated by a
//!   [`Validator`](crate::Validator), forwarded to an
//!   [`ErrorSink`](crate::ErrorSink) and turn an execution into
//!   [`ExecuteOutcome::Blocked`](crate::ExecuteOutcome::Blocked).
//! - **Protocol violations** are framework-usage defects. They are returned
//!   immediately and are not meant to be recovered from inside a request.
//! - **Commit failures** are whatever the commit path returned. The engine rolls
//!   back, resets the cache and hands the original error back untouched.

use thiserror::Error;

use crate::unit::UnitId;
use crate::validation::ValidationId;

/// A framework-usage defect. Never a user error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolViolation {
    /// A validation reported that errors occurred but produced no messages.
    #[error("validation {validation} noted an error without adding any message")]
    ErrorWithoutMessages { validation: ValidationId },

    /// A second commit action was added to one unit.
    #[error("modification unit {unit} already has a commit action")]
    DuplicateCommitAction { unit: UnitId },

    /// Two page regions both registered validations into the same unit.
    #[error("modification unit {unit} already receives validations from another page region")]
    UnitClaimedByOtherRegion { unit: UnitId },

    /// A direct registration targeted a unit that already receives scoped validations.
    #[error("modification unit {unit} mixes scoped and direct validation registration")]
    MixedRegistration { unit: UnitId },

    /// `with_modification_units` was entered with an empty unit set.
    #[error("a validation scope needs at least one modification unit")]
    EmptyUnitSet,

    /// A validation or predicate was created outside any unit scope.
    #[error("no modification unit scope is active")]
    NoActiveScope,

    /// A handle that does not belong to this page's registry.
    #[error("unknown modification unit {unit}")]
    UnknownUnit { unit: UnitId },

    /// Two post-backs registered under the same id.
    #[error("post-back id '{0}' is already registered")]
    DuplicatePostBackId(String),

    /// A request named a post-back this page never registered.
    #[error("post-back id '{0}' is not registered on this page")]
    UnknownPostBack(String),

    /// The request carried fields no control asked for and the page rejects that.
    #[error("request contained {count} unexpected submitted field(s)")]
    UnexpectedSubmittedData { count: usize },
}

/// Error returned by [`ModificationUnits::execute`](crate::ModificationUnits::execute).
#[derive(Error, Debug)]
pub enum ExecuteError {
    #[error(transparent)]
    Protocol(#[from] ProtocolViolation),

    /// The commit path failed. This is the error the failing callback returned,
    /// unchanged; open transactions were rolled back before it was returned.
    #[error(transparent)]
    Commit(anyhow::Error),
}

impl ExecuteError {
    /// The original commit error, if this is a commit failure.
    pub fn commit_error(&self) -> Option<&anyhow::Error> {
        match self {
            ExecuteError::Commit(err) => Some(err),
            ExecuteError::Protocol(_) => None,
        }
    }

    /// The protocol violation, if this is one.
    pub fn protocol_violation(&self) -> Option<&ProtocolViolation> {
        match self {
            ExecuteError::Protocol(violation) => Some(violation),
            ExecuteError::Commit(_) => None,
        }
    }
}

/// Result type for registration and scoping operations.
pub type ProtocolResult<T> = Result<T, ProtocolViolation>;
