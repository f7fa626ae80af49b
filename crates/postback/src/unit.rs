//! Modification units and the per-page registry that owns them.
//!
//! A unit is an ordered list of validations plus at most one commit action.
//! Units are referenced through [`UnitId`] handles handed out by
//! [`ModificationUnits::add_unit`]; validations and commit actions are attached
//! by handle.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use tracing::debug;

use crate::error::{ProtocolResult, ProtocolViolation};
use crate::scope::RegionId;
use crate::validation::{Validation, ValidationId};

/// Opaque handle to a modification unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UnitId(u32);

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Where a unit is in the commit state machine.
///
/// ```text
/// Idle ─► Validating ─┬─► Blocked
///                     ├─► Validated
///                     └─► Committing ─┬─► Committed
///                                     └─► RolledBack
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnitState {
    #[default]
    Idle,
    Validating,
    /// Validation produced errors; the commit action did not run.
    Blocked,
    /// Validation finished and nothing was committed.
    Validated,
    Committing,
    Committed,
    /// The commit path failed and open transactions were rolled back.
    RolledBack,
}

impl UnitState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            UnitState::Blocked | UnitState::Validated | UnitState::Committed | UnitState::RolledBack
        )
    }
}

pub(crate) type CommitAction = Box<dyn FnMut() -> anyhow::Result<()>>;

pub(crate) struct ModificationUnit {
    name: String,
    validations: Vec<Rc<Validation>>,
    action: Option<CommitAction>,
    state: UnitState,
}

/// Which region feeds validations into a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Claim {
    Scoped(RegionId),
    Direct,
}

/// Every modification unit of one page.
///
/// Lives for a single request and is confined to the thread handling it.
#[derive(Default)]
pub struct ModificationUnits {
    units: RefCell<Vec<ModificationUnit>>,
    claims: RefCell<HashMap<UnitId, Claim>>,
    next_validation: Cell<u64>,
    next_region: Cell<u32>,
}

impl ModificationUnits {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a unit and return its handle.
    pub fn add_unit(&self, name: impl Into<String>) -> UnitId {
        let mut units = self.units.borrow_mut();
        let id = UnitId(units.len() as u32);
        units.push(ModificationUnit {
            name: name.into(),
            validations: Vec::new(),
            action: None,
            state: UnitState::Idle,
        });
        id
    }

    /// Set the unit's single commit action.
    pub fn add_modification_method<F>(&self, unit: UnitId, action: F) -> ProtocolResult<()>
    where
        F: FnMut() -> anyhow::Result<()> + 'static,
    {
        self.with_unit(unit, |entry| {
            if entry.action.is_some() {
                return Err(ProtocolViolation::DuplicateCommitAction { unit });
            }
            entry.action = Some(Box::new(action));
            Ok(())
        })?
    }

    pub fn name(&self, unit: UnitId) -> ProtocolResult<String> {
        self.with_unit(unit, |entry| entry.name.clone())
    }

    pub fn state(&self, unit: UnitId) -> ProtocolResult<UnitState> {
        self.with_unit(unit, |entry| entry.state)
    }

    pub fn validation_count(&self, unit: UnitId) -> ProtocolResult<usize> {
        self.with_unit(unit, |entry| entry.validations.len())
    }

    pub fn has_commit_action(&self, unit: UnitId) -> ProtocolResult<bool> {
        self.with_unit(unit, |entry| entry.action.is_some())
    }

    pub fn len(&self) -> usize {
        self.units.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.borrow().is_empty()
    }

    pub(crate) fn ensure_known(&self, unit: UnitId) -> ProtocolResult<()> {
        self.with_unit(unit, |_| ())
    }

    pub(crate) fn next_validation_id(&self) -> ValidationId {
        let raw = self.next_validation.get();
        self.next_validation.set(raw + 1);
        ValidationId::new(raw)
    }

    pub(crate) fn next_region(&self) -> RegionId {
        let raw = self.next_region.get();
        self.next_region.set(raw + 1);
        RegionId::new(raw)
    }

    /// Whether `region` may feed validations into `unit`. Claims nothing.
    pub(crate) fn check_claim(&self, unit: UnitId, region: RegionId) -> ProtocolResult<()> {
        self.ensure_known(unit)?;
        match self.claims.borrow().get(&unit) {
            None => Ok(()),
            Some(Claim::Scoped(owner)) if *owner == region => Ok(()),
            Some(Claim::Scoped(_)) => Err(ProtocolViolation::UnitClaimedByOtherRegion { unit }),
            Some(Claim::Direct) => Err(ProtocolViolation::MixedRegistration { unit }),
        }
    }

    /// Append `validation` to every unit in `targets` and claim them for
    /// `region`. Either every unit accepts or nothing changes.
    pub(crate) fn attach_scoped(
        &self,
        targets: &[UnitId],
        region: RegionId,
        validation: Rc<Validation>,
    ) -> ProtocolResult<()> {
        for unit in targets {
            self.check_claim(*unit, region)?;
        }
        let mut claims = self.claims.borrow_mut();
        let mut units = self.units.borrow_mut();
        for unit in targets {
            if let Some(entry) = units.get_mut(unit.0 as usize) {
                claims.insert(*unit, Claim::Scoped(region));
                entry.validations.push(Rc::clone(&validation));
            }
        }
        Ok(())
    }

    pub(crate) fn attach_direct(&self, unit: UnitId, validation: Rc<Validation>) -> ProtocolResult<()> {
        self.ensure_known(unit)?;
        {
            let mut claims = self.claims.borrow_mut();
            match claims.get(&unit) {
                Some(Claim::Scoped(_)) => {
                    return Err(ProtocolViolation::MixedRegistration { unit });
                }
                Some(Claim::Direct) => {}
                None => {
                    claims.insert(unit, Claim::Direct);
                }
            }
        }
        self.with_unit(unit, |entry| entry.validations.push(validation))
    }

    pub(crate) fn validations(&self, unit: UnitId) -> ProtocolResult<Vec<Rc<Validation>>> {
        self.with_unit(unit, |entry| entry.validations.clone())
    }

    pub(crate) fn take_action(&self, unit: UnitId) -> ProtocolResult<Option<CommitAction>> {
        self.with_unit(unit, |entry| entry.action.take())
    }

    pub(crate) fn restore_action(&self, unit: UnitId, action: Option<CommitAction>) {
        if let Some(action) = action {
            // Only reachable for a handle that was already resolved once.
            let _ = self.with_unit(unit, |entry| entry.action = Some(action));
        }
    }

    pub(crate) fn transition(&self, unit: UnitId, to: UnitState) {
        let _ = self.with_unit(unit, |entry| {
            debug!(unit = %unit, name = %entry.name, from = ?entry.state, to = ?to, "unit state");
            entry.state = to;
        });
    }

    fn with_unit<R>(&self, unit: UnitId, f: impl FnOnce(&mut ModificationUnit) -> R) -> ProtocolResult<R> {
        let mut units = self.units.borrow_mut();
        let entry = units
            .get_mut(unit.0 as usize)
            .ok_or(ProtocolViolation::UnknownUnit { unit })?;
        Ok(f(entry))
    }
}

impl fmt::Debug for ModificationUnits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let units = self.units.borrow();
        f.debug_list()
            .entries(units.iter().map(|unit| (&unit.name, unit.validations.len(), unit.state)))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_commit_action_is_rejected() {
        let units = ModificationUnits::new();
        let save = units.add_unit("save");

        units.add_modification_method(save, || Ok(())).unwrap();
        let result = units.add_modification_method(save, || Ok(()));

        assert_eq!(result, Err(ProtocolViolation::DuplicateCommitAction { unit: save }));
        assert_eq!(units.has_commit_action(save), Ok(true));
    }

    #[test]
    fn test_unknown_handle() {
        let units = ModificationUnits::new();
        let other = ModificationUnits::new();
        let foreign = other.add_unit("foreign");
        other.add_unit("second");
        let foreign_second = UnitId(1);

        assert!(units.state(foreign).is_err());
        assert_eq!(
            units.validation_count(foreign_second),
            Err(ProtocolViolation::UnknownUnit { unit: foreign_second })
        );
    }

    #[test]
    fn test_region_check_claims_nothing() {
        let units = ModificationUnits::new();
        let save = units.add_unit("save");
        let first = units.next_region();
        let second = units.next_region();

        assert!(units.check_claim(save, first).is_ok());
        assert!(units.check_claim(save, second).is_ok());
        assert!(units.claims.borrow().is_empty());
    }

    #[test]
    fn test_new_unit_is_idle() {
        let units = ModificationUnits::new();
        let save = units.add_unit("save");

        assert_eq!(units.state(save), Ok(UnitState::Idle));
        assert_eq!(units.name(save).as_deref(), Ok("save"));
        assert!(!UnitState::Idle.is_terminal());
        assert!(UnitState::Blocked.is_terminal());
    }
}
