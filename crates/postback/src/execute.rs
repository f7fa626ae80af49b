//! The validate-then-commit protocol of a modification unit.
//!
//! ```text
//! execute()
//!     │
//!     ▼
//! validation needed? ──no──────────────────────────┐
//!     │ yes                                        │
//!     ▼                                            │
//! run every validation (fresh Validator each)      │
//!     │ report messages to ErrorSink               │
//!     ▼                                            │
//! any errors? ──yes──► Blocked                     │
//!     │ no                                         │
//!     ▼ ◄──────────────────────────────────────────┘
//! validation only / nothing to run? ──yes──► Validated
//!     │ no
//!     ▼
//! disable cache ─► commit action ─► extra.first ─► reset cache
//!     ─► pre-commit hooks ─► extra.second ─► Committed
//!     │
//!     └─ any error ─► rollback ─► reset cache ─► RolledBack (error returned as-is)
//! ```
//!
//! A panic on the commit path takes the same rollback route and then resumes
//! unwinding; the unit keeps its commit action.

use std::panic::{self, AssertUnwindSafe};

use tracing::{error, trace};

use crate::error::{ExecuteError, ProtocolViolation};
use crate::unit::{CommitAction, ModificationUnits, UnitId, UnitState};
use crate::validator::{ErrorSink, Validator};

/// The request-scoped transactional surface the commit path runs against.
///
/// The engine calls these in a fixed order and never persists or caches
/// anything itself.
pub trait TransactionalResource {
    /// Stop serving reads from the request cache.
    fn disable_cache(&mut self);

    /// Drop everything cached so far and serve reads again.
    fn reset_cache(&mut self);

    /// Roll back every transaction opened during this request.
    fn rollback_all_open_transactions(&mut self) -> anyhow::Result<()>;

    /// Run checks that open resources deferred until just before commit,
    /// such as uniqueness checks that need fresh reads.
    fn run_pending_pre_commit_validation_hooks(&mut self) -> anyhow::Result<()>;
}

type ExtraAction = Box<dyn FnOnce() -> anyhow::Result<()>>;

/// Callbacks run around the cache reset during commit.
pub struct ActionPair {
    first: ExtraAction,
    second: ExtraAction,
}

impl ActionPair {
    /// `first` runs right after the commit action, `second` after the
    /// pre-commit hooks.
    pub fn new<A, B>(first: A, second: B) -> Self
    where
        A: FnOnce() -> anyhow::Result<()> + 'static,
        B: FnOnce() -> anyhow::Result<()> + 'static,
    {
        Self {
            first: Box::new(first),
            second: Box::new(second),
        }
    }
}

impl std::fmt::Debug for ActionPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ActionPair")
    }
}

/// Flags controlling one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecuteOptions {
    pub skip_if_no_changes: bool,
    pub changes_exist: bool,
    pub validation_only: bool,
}

impl ExecuteOptions {
    /// Validate and commit unconditionally.
    pub fn new() -> Self {
        Self {
            skip_if_no_changes: false,
            changes_exist: true,
            validation_only: false,
        }
    }

    pub fn skip_if_no_changes(mut self, skip: bool) -> Self {
        self.skip_if_no_changes = skip;
        self
    }

    pub fn changes_exist(mut self, changes_exist: bool) -> Self {
        self.changes_exist = changes_exist;
        self
    }

    pub fn validation_only(mut self, validation_only: bool) -> Self {
        self.validation_only = validation_only;
        self
    }

    fn skips_unchanged(&self) -> bool {
        self.skip_if_no_changes && !self.changes_exist
    }
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// What an execution did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecuteOutcome {
    /// At least one validation failed; nothing was committed.
    Blocked,
    /// Stopped after validation.
    Validated { validation_performed: bool },
    /// The commit path finished.
    Committed {
        validation_performed: bool,
        action_ran: bool,
    },
}

impl ExecuteOutcome {
    pub fn is_blocked(&self) -> bool {
        matches!(self, ExecuteOutcome::Blocked)
    }

    pub fn is_committed(&self) -> bool {
        matches!(self, ExecuteOutcome::Committed { .. })
    }

    pub fn validation_performed(&self) -> bool {
        match self {
            ExecuteOutcome::Blocked => true,
            ExecuteOutcome::Validated {
                validation_performed,
            }
            | ExecuteOutcome::Committed {
                validation_performed,
                ..
            } => *validation_performed,
        }
    }
}

enum ValidationPass {
    Skipped,
    Passed,
    Failed,
}

impl ModificationUnits {
    /// Validate `unit` and, if that succeeds, run its commit path.
    ///
    /// Every validation runs, in registration order, against a fresh
    /// [`Validator`]; each one's messages go to `errors` even when empty. A
    /// failing commit path rolls back all open transactions and returns the
    /// failing callback's error unchanged in [`ExecuteError::Commit`].
    pub fn execute<R, S>(
        &self,
        unit: UnitId,
        options: ExecuteOptions,
        extra: Option<ActionPair>,
        resource: &mut R,
        errors: &mut S,
    ) -> Result<ExecuteOutcome, ExecuteError>
    where
        R: TransactionalResource + ?Sized,
        S: ErrorSink + ?Sized,
    {
        let validations = self.validations(unit)?;
        let validation_needed = !validations.is_empty() && !options.skips_unchanged();

        let pass = if validation_needed {
            self.transition(unit, UnitState::Validating);
            let mut failed = false;
            for validation in &validations {
                let mut validator = Validator::new();
                validation.run(&mut validator);
                let error_occurred = validator.error_occurred();
                let messages = validator.into_messages();
                trace!(unit = %unit, validation = %validation.id(), error_occurred, "validation ran");

                if error_occurred && messages.is_empty() {
                    self.transition(unit, UnitState::Idle);
                    return Err(ProtocolViolation::ErrorWithoutMessages {
                        validation: validation.id(),
                    }
                    .into());
                }
                errors.report(validation.id(), &messages);
                failed |= error_occurred;
            }
            if failed {
                ValidationPass::Failed
            } else {
                ValidationPass::Passed
            }
        } else {
            ValidationPass::Skipped
        };

        let validation_performed = match pass {
            ValidationPass::Failed => {
                self.transition(unit, UnitState::Blocked);
                return Ok(ExecuteOutcome::Blocked);
            }
            ValidationPass::Passed => true,
            ValidationPass::Skipped => false,
        };

        let has_action = self.has_commit_action(unit)?;
        if options.validation_only || (!has_action && extra.is_none()) {
            self.transition(unit, UnitState::Validated);
            return Ok(ExecuteOutcome::Validated {
                validation_performed,
            });
        }

        self.transition(unit, UnitState::Committing);
        let mut action = self.take_action(unit)?;
        let run_action = !options.skips_unchanged();
        let committed = panic::catch_unwind(AssertUnwindSafe(|| {
            commit(&mut *resource, action.as_mut().filter(|_| run_action), extra)
        }));
        self.restore_action(unit, action);

        match committed {
            Ok(Ok(action_ran)) => {
                self.transition(unit, UnitState::Committed);
                Ok(ExecuteOutcome::Committed {
                    validation_performed,
                    action_ran,
                })
            }
            Ok(Err(err)) => {
                error!(unit = %unit, error = %err, "commit failed; rolling back");
                self.roll_back(unit, resource);
                Err(ExecuteError::Commit(err))
            }
            Err(payload) => {
                error!(unit = %unit, "commit path panicked; rolling back");
                self.roll_back(unit, resource);
                panic::resume_unwind(payload)
            }
        }
    }

    fn roll_back<R>(&self, unit: UnitId, resource: &mut R)
    where
        R: TransactionalResource + ?Sized,
    {
        if let Err(rollback_err) = resource.rollback_all_open_transactions() {
            error!(unit = %unit, error = %rollback_err, "rollback failed");
        }
        resource.reset_cache();
        self.transition(unit, UnitState::RolledBack);
    }
}

fn commit<R>(
    resource: &mut R,
    action: Option<&mut CommitAction>,
    extra: Option<ActionPair>,
) -> anyhow::Result<bool>
where
    R: TransactionalResource + ?Sized,
{
    let (first, second) = match extra {
        Some(pair) => (Some(pair.first), Some(pair.second)),
        None => (None, None),
    };

    resource.disable_cache();
    let action_ran = match action {
        Some(action) => {
            action()?;
            true
        }
        None => false,
    };
    if let Some(first) = first {
        first()?;
    }
    resource.reset_cache();
    resource.run_pending_pre_commit_validation_hooks()?;
    if let Some(second) = second {
        second()?;
    }
    Ok(action_ran)
}
