//! Validation scopes: which units a new validation lands in, and under which
//! conditions it runs.
//!
//! A [`ValidationScope`] is an explicit handle passed to everything that
//! constructs validations. It holds a stack of frames; each frame names the
//! target units and carries its own predicate stack. Frames and predicates are
//! popped by guards, so a body that returns early or unwinds still leaves the
//! stack balanced.
//!
//! Each scope is one page region. Once a unit holds validations from one
//! region, no other region may add to it: validation order would otherwise
//! depend on the order in which unrelated regions happened to be built.
//! Entering a unit without registering anything claims nothing.
//!
//! The scope is `!Send` and `!Sync`. Data-parallel helpers cannot reach it and
//! therefore cannot construct validations.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use smallvec::SmallVec;

use crate::error::{ProtocolResult, ProtocolViolation};
use crate::unit::{ModificationUnits, UnitId};

/// A gate on whether a validation runs.
pub type Predicate = Rc<dyn Fn() -> bool>;

/// Identifies the page region a scope stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegionId(u32);

impl RegionId {
    pub(crate) fn new(raw: u32) -> Self {
        RegionId(raw)
    }
}

/// Conjunction of a frame's predicates, evaluated lazily and short-circuiting.
#[derive(Clone, Default)]
pub struct EffectivePredicate {
    predicates: SmallVec<[Predicate; 2]>,
}

impl EffectivePredicate {
    pub fn evaluate(&self) -> bool {
        self.predicates.iter().all(|predicate| predicate())
    }

    pub fn len(&self) -> usize {
        self.predicates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }
}

impl fmt::Debug for EffectivePredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectivePredicate")
            .field("predicates", &self.predicates.len())
            .finish()
    }
}

struct Frame {
    predicates: SmallVec<[Predicate; 2]>,
    units: SmallVec<[UnitId; 2]>,
}

type UnitAssertion = Box<dyn Fn(&[UnitId]) -> ProtocolResult<()>>;

/// Scope stack for one page region.
pub struct ValidationScope<'u> {
    registry: &'u ModificationUnits,
    region: RegionId,
    frames: RefCell<Vec<Frame>>,
    unit_assertion: Option<UnitAssertion>,
}

impl<'u> ValidationScope<'u> {
    pub fn new(registry: &'u ModificationUnits) -> Self {
        Self {
            registry,
            region: registry.next_region(),
            frames: RefCell::new(Vec::new()),
            unit_assertion: None,
        }
    }

    /// Install a hook that may reject a unit set before a frame is pushed.
    pub fn with_unit_assertion<F>(mut self, assertion: F) -> Self
    where
        F: Fn(&[UnitId]) -> ProtocolResult<()> + 'static,
    {
        self.unit_assertion = Some(Box::new(assertion));
        self
    }

    /// Run `body` with `units` as the target of every validation it creates.
    ///
    /// Fails before `body` runs if a unit already holds validations from
    /// another region. Entering claims nothing; the first validation
    /// registered into a unit claims it. The new frame starts with an empty
    /// predicate stack.
    pub fn with_modification_units<R>(
        &self,
        units: &[UnitId],
        body: impl FnOnce(&Self) -> R,
    ) -> ProtocolResult<R> {
        if units.is_empty() {
            return Err(ProtocolViolation::EmptyUnitSet);
        }
        for unit in units {
            self.registry.ensure_known(*unit)?;
        }
        if let Some(assertion) = &self.unit_assertion {
            assertion(units)?;
        }
        for unit in units {
            self.registry.check_claim(*unit, self.region)?;
        }

        self.frames.borrow_mut().push(Frame {
            predicates: SmallVec::new(),
            units: units.iter().copied().collect(),
        });
        let _guard = FrameGuard { scope: self };
        Ok(body(self))
    }

    /// Run `body` with `predicate` added to the current frame.
    pub fn with_predicate<R>(
        &self,
        predicate: impl Fn() -> bool + 'static,
        body: impl FnOnce(&Self) -> R,
    ) -> ProtocolResult<R> {
        {
            let mut frames = self.frames.borrow_mut();
            let frame = frames.last_mut().ok_or(ProtocolViolation::NoActiveScope)?;
            frame.predicates.push(Rc::new(predicate));
        }
        let _guard = PredicateGuard { scope: self };
        Ok(body(self))
    }

    /// The current frame's predicates as one lazily evaluated gate.
    pub fn effective_predicate(&self) -> ProtocolResult<EffectivePredicate> {
        let frames = self.frames.borrow();
        let frame = frames.last().ok_or(ProtocolViolation::NoActiveScope)?;
        Ok(EffectivePredicate {
            predicates: frame.predicates.clone(),
        })
    }

    /// Units targeted by validations created now.
    pub fn current_units(&self) -> ProtocolResult<SmallVec<[UnitId; 2]>> {
        let frames = self.frames.borrow();
        let frame = frames.last().ok_or(ProtocolViolation::NoActiveScope)?;
        Ok(frame.units.clone())
    }

    pub fn depth(&self) -> usize {
        self.frames.borrow().len()
    }

    pub fn registry(&self) -> &'u ModificationUnits {
        self.registry
    }

    pub(crate) fn region(&self) -> RegionId {
        self.region
    }
}

impl fmt::Debug for ValidationScope<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidationScope")
            .field("region", &self.region)
            .field("depth", &self.depth())
            .finish()
    }
}

struct FrameGuard<'s, 'u> {
    scope: &'s ValidationScope<'u>,
}

impl Drop for FrameGuard<'_, '_> {
    fn drop(&mut self) {
        self.scope.frames.borrow_mut().pop();
    }
}

struct PredicateGuard<'s, 'u> {
    scope: &'s ValidationScope<'u>,
}

impl Drop for PredicateGuard<'_, '_> {
    fn drop(&mut self) {
        if let Some(frame) = self.scope.frames.borrow_mut().last_mut() {
            frame.predicates.pop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::{Validation, ValidationId};
    use std::cell::Cell;
    use std::panic::{catch_unwind, AssertUnwindSafe};

    #[test]
    fn test_empty_unit_set_fails_before_body() {
        let registry = ModificationUnits::new();
        let scope = ValidationScope::new(&registry);
        let ran = Cell::new(false);

        let result = scope.with_modification_units(&[], |_| ran.set(true));

        assert_eq!(result, Err(ProtocolViolation::EmptyUnitSet));
        assert!(!ran.get());
    }

    #[test]
    fn test_frames_and_predicates_pop() {
        let registry = ModificationUnits::new();
        let save = registry.add_unit("save");
        let scope = ValidationScope::new(&registry);

        scope
            .with_modification_units(&[save], |scope| {
                assert_eq!(scope.depth(), 1);
                scope
                    .with_predicate(|| true, |scope| {
                        assert_eq!(scope.effective_predicate().unwrap().len(), 1);
                    })
                    .unwrap();
                assert!(scope.effective_predicate().unwrap().is_empty());
            })
            .unwrap();

        assert_eq!(scope.depth(), 0);
        assert_eq!(scope.current_units().unwrap_err(), ProtocolViolation::NoActiveScope);
    }

    #[test]
    fn test_nested_frame_starts_with_fresh_predicates() {
        let registry = ModificationUnits::new();
        let save = registry.add_unit("save");
        let delete = registry.add_unit("delete");
        let scope = ValidationScope::new(&registry);

        scope
            .with_modification_units(&[save], |scope| {
                scope
                    .with_predicate(|| false, |scope| {
                        scope
                            .with_modification_units(&[delete], |scope| {
                                assert!(scope.effective_predicate().unwrap().evaluate());
                                assert_eq!(scope.current_units().unwrap().as_slice(), &[delete]);
                            })
                            .unwrap();
                        assert!(!scope.effective_predicate().unwrap().evaluate());
                    })
                    .unwrap();
            })
            .unwrap();
    }

    #[test]
    fn test_frame_pops_on_unwind() {
        let registry = ModificationUnits::new();
        let save = registry.add_unit("save");
        let scope = ValidationScope::new(&registry);

        let result = catch_unwind(AssertUnwindSafe(|| {
            scope
                .with_modification_units(&[save], |_| panic!("body failed"))
                .unwrap();
        }));

        assert!(result.is_err());
        assert_eq!(scope.depth(), 0);
    }

    fn register_noop(scope: &ValidationScope<'_>, units: &[UnitId]) -> ProtocolResult<ValidationId> {
        scope.with_modification_units(units, |scope| Validation::register(scope, |_| {}))?
    }

    #[test]
    fn test_second_region_cannot_add_to_claimed_unit() {
        let registry = ModificationUnits::new();
        let save = registry.add_unit("save");
        let header = ValidationScope::new(&registry);
        let footer = ValidationScope::new(&registry);

        register_noop(&header, &[save]).unwrap();
        register_noop(&header, &[save]).unwrap();

        let result = register_noop(&footer, &[save]);
        assert_eq!(result, Err(ProtocolViolation::UnitClaimedByOtherRegion { unit: save }));
        assert_eq!(registry.validation_count(save), Ok(2));
    }

    #[test]
    fn test_entering_without_registering_claims_nothing() {
        let registry = ModificationUnits::new();
        let save = registry.add_unit("save");
        let header = ValidationScope::new(&registry);
        let body = ValidationScope::new(&registry);

        header.with_modification_units(&[save], |_| ()).unwrap();

        assert!(register_noop(&body, &[save]).is_ok());
        assert_eq!(registry.validation_count(save), Ok(1));
    }

    #[test]
    fn test_rejected_registration_leaves_other_units_unclaimed() {
        let registry = ModificationUnits::new();
        let save = registry.add_unit("save");
        let other = registry.add_unit("other");
        let header = ValidationScope::new(&registry);
        let body = ValidationScope::new(&registry);
        register_noop(&header, &[save]).unwrap();

        let result = register_noop(&body, &[other, save]);

        assert_eq!(result, Err(ProtocolViolation::UnitClaimedByOtherRegion { unit: save }));
        assert_eq!(registry.validation_count(other), Ok(0));
        assert!(register_noop(&header, &[other]).is_ok());
    }

    #[test]
    fn test_failed_attach_changes_no_unit() {
        let registry = ModificationUnits::new();
        let save = registry.add_unit("save");
        let other = registry.add_unit("other");
        let header = ValidationScope::new(&registry);
        let body = ValidationScope::new(&registry);

        let result = body
            .with_modification_units(&[other, save], |scope| {
                register_noop(&header, &[save]).unwrap();
                Validation::register(scope, |_| {})
            })
            .unwrap();

        assert_eq!(result, Err(ProtocolViolation::UnitClaimedByOtherRegion { unit: save }));
        assert_eq!(registry.validation_count(other), Ok(0));
        assert!(register_noop(&header, &[other]).is_ok());
    }

    #[test]
    fn test_unit_assertion_hook() {
        let registry = ModificationUnits::new();
        let save = registry.add_unit("save");
        let scope = ValidationScope::new(&registry).with_unit_assertion(move |units| {
            if units.contains(&save) {
                Err(ProtocolViolation::UnitClaimedByOtherRegion { unit: save })
            } else {
                Ok(())
            }
        });

        assert!(scope.with_modification_units(&[save], |_| ()).is_err());
        assert_eq!(scope.depth(), 0);
    }
}
