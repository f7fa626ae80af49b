//! Validations: immutable closures registered into modification units.

use std::fmt;
use std::rc::Rc;

use crate::error::ProtocolResult;
use crate::scope::ValidationScope;
use crate::unit::{ModificationUnits, UnitId};
use crate::validator::Validator;

/// Identifies one validation within a page; messages are reported against it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ValidationId(u64);

impl ValidationId {
    pub fn new(raw: u64) -> Self {
        ValidationId(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ValidationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

type ValidationMethod = Box<dyn Fn(&mut Validator)>;

/// A validation method bound to its gating predicate.
///
/// Created once while the page is being built and never changed afterwards.
/// One validation may be shared by several units.
pub struct Validation {
    id: ValidationId,
    method: ValidationMethod,
}

impl Validation {
    /// Register `method` into every unit of the scope's current frame.
    ///
    /// The frame's predicates are captured now and evaluated each time the
    /// validation runs; when they do not all hold, `method` is skipped and the
    /// validation passes.
    pub fn register<F>(scope: &ValidationScope<'_>, method: F) -> ProtocolResult<ValidationId>
    where
        F: Fn(&mut Validator) + 'static,
    {
        let predicate = scope.effective_predicate()?;
        let targets = scope.current_units()?;
        let registry = scope.registry();

        let id = registry.next_validation_id();
        let validation = Rc::new(Validation {
            id,
            method: Box::new(move |validator| {
                if predicate.evaluate() {
                    method(validator);
                }
            }),
        });

        registry.attach_scoped(&targets, scope.region(), validation)?;
        Ok(id)
    }

    /// Append `method` straight to `unit`, without any scope or predicate.
    ///
    /// A unit registered this way can no longer receive scoped validations,
    /// and a unit that already has scoped validations rejects this call.
    pub fn register_direct<F>(
        registry: &ModificationUnits,
        unit: UnitId,
        method: F,
    ) -> ProtocolResult<ValidationId>
    where
        F: Fn(&mut Validator) + 'static,
    {
        let id = registry.next_validation_id();
        let validation = Rc::new(Validation {
            id,
            method: Box::new(method),
        });
        registry.attach_direct(unit, validation)?;
        Ok(id)
    }

    pub fn id(&self) -> ValidationId {
        self.id
    }

    pub(crate) fn run(&self, validator: &mut Validator) {
        (self.method)(validator)
    }
}

impl fmt::Debug for Validation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Validation").field("id", &self.id).finish()
    }
}
