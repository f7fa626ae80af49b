//! Diff-based selection controls.
//!
//! These lists report what changed relative to the selection the page was
//! built with, not the new selection itself. A handler fires once per item in
//! the symmetric difference of the two selections, and only from inside a
//! commit action, so a blocked post-back fires nothing.
//!
//! A submission naming an unknown item is invalid. Register the list's own
//! validation with `create_validation` so such a post-back blocks with the
//! invalid-value message instead of silently committing the old selection.

use std::collections::BTreeSet;
use std::fmt::Display;
use std::rc::Rc;
use std::str::FromStr;

use crate::bound_value::{mappers, BoundValue};
use crate::error::ProtocolResult;
use crate::scope::ValidationScope;
use crate::store::SubmittedValueStore;
use crate::validation::ValidationId;

/// Direction of one item's change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionChange {
    Selected,
    Deselected,
}

/// Items added to and removed from a selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionDelta<Id: Ord> {
    pub added: BTreeSet<Id>,
    pub removed: BTreeSet<Id>,
}

impl<Id: Ord + Clone> SelectionDelta<Id> {
    pub fn between(before: &BTreeSet<Id>, after: &BTreeSet<Id>) -> Self {
        Self {
            added: after.difference(before).cloned().collect(),
            removed: before.difference(after).cloned().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    pub fn len(&self) -> usize {
        self.added.len() + self.removed.len()
    }

    /// Every changed item once, deselections first.
    pub fn changes(&self) -> impl Iterator<Item = (&Id, SelectionChange)> {
        self.removed
            .iter()
            .map(|id| (id, SelectionChange::Deselected))
            .chain(self.added.iter().map(|id| (id, SelectionChange::Selected)))
    }
}

/// Checkbox list whose effect is the change set against the prior selection.
#[derive(Debug, Clone)]
pub struct DiffCheckBoxList<Id> {
    items: Vec<Id>,
    value: BoundValue<Vec<Id>>,
}

impl<Id> DiffCheckBoxList<Id>
where
    Id: Ord + Clone + FromStr + Display + 'static,
{
    /// `selected` is the selection the page was built with. Submitted ids that
    /// are not among `items` make the submission invalid.
    pub fn new(key: impl Into<String>, items: Vec<Id>, selected: Vec<Id>) -> Self {
        let key = key.into();
        let known: BTreeSet<Id> = items.iter().cloned().collect();
        let value = BoundValue::new(
            move || selected.clone(),
            move || key.clone(),
            move |raw| {
                mappers::selection::<Id>(raw).filter(|ids| ids.iter().all(|id| known.contains(id)))
            },
        );
        Self { items, value }
    }

    pub fn items(&self) -> &[Id] {
        &self.items
    }

    /// The underlying bound value, for validations and change tracking.
    pub fn value(&self) -> &BoundValue<Vec<Id>> {
        &self.value
    }

    pub fn with_invalid_message(self, message: impl Into<String>) -> Self {
        Self {
            value: self.value.with_invalid_message(message),
            ..self
        }
    }

    /// Block the post-back when the submission names an unknown item.
    pub fn create_validation(
        &self,
        scope: &ValidationScope<'_>,
        store: &Rc<SubmittedValueStore>,
    ) -> ProtocolResult<ValidationId> {
        self.value.create_validation(scope, store, |_, _, _| {})
    }

    pub fn selection_delta(&self, store: &SubmittedValueStore) -> SelectionDelta<Id> {
        let before: BTreeSet<Id> = self.value.durable_value().into_iter().collect();
        let after: BTreeSet<Id> = self.value.established_value(store).into_iter().collect();
        SelectionDelta::between(&before, &after)
    }

    /// Call `handler` once per changed item.
    pub fn apply_changes<F>(&self, store: &SubmittedValueStore, mut handler: F) -> anyhow::Result<()>
    where
        F: FnMut(&Id, SelectionChange) -> anyhow::Result<()>,
    {
        for (id, change) in self.selection_delta(store).changes() {
            handler(id, change)?;
        }
        Ok(())
    }
}

/// Radio list with the same change semantics.
///
/// `Id::default()` stands for "nothing selected", so an item whose id equals
/// the default can never be reported as selected or deselected.
#[derive(Debug, Clone)]
pub struct DiffRadioList<Id> {
    items: Vec<Id>,
    value: BoundValue<Id>,
}

impl<Id> DiffRadioList<Id>
where
    Id: Ord + Clone + Default + FromStr + Display + 'static,
{
    pub fn new(key: impl Into<String>, items: Vec<Id>, selected: Option<Id>) -> Self {
        let key = key.into();
        let known: BTreeSet<Id> = items.iter().cloned().collect();
        let durable = selected.unwrap_or_default();
        let value = BoundValue::new(
            move || durable.clone(),
            move || key.clone(),
            move |raw| {
                mappers::single_selection::<Id>(raw)
                    .filter(|id| *id == Id::default() || known.contains(id))
            },
        );
        Self { items, value }
    }

    pub fn items(&self) -> &[Id] {
        &self.items
    }

    pub fn value(&self) -> &BoundValue<Id> {
        &self.value
    }

    pub fn with_invalid_message(self, message: impl Into<String>) -> Self {
        Self {
            value: self.value.with_invalid_message(message),
            ..self
        }
    }

    pub fn create_validation(
        &self,
        scope: &ValidationScope<'_>,
        store: &Rc<SubmittedValueStore>,
    ) -> ProtocolResult<ValidationId> {
        self.value.create_validation(scope, store, |_, _, _| {})
    }

    /// The established selection, `None` for the sentinel.
    pub fn selected(&self, store: &SubmittedValueStore) -> Option<Id> {
        Some(self.value.established_value(store)).filter(|id| *id != Id::default())
    }

    pub fn selection_delta(&self, store: &SubmittedValueStore) -> SelectionDelta<Id> {
        let before: BTreeSet<Id> = Some(self.value.durable_value())
            .filter(|id| *id != Id::default())
            .into_iter()
            .collect();
        let after: BTreeSet<Id> = self.selected(store).into_iter().collect();
        SelectionDelta::between(&before, &after)
    }

    pub fn apply_changes<F>(&self, store: &SubmittedValueStore, mut handler: F) -> anyhow::Result<()>
    where
        F: FnMut(&Id, SelectionChange) -> anyhow::Result<()>,
    {
        for (id, change) in self.selection_delta(store).changes() {
            handler(id, change)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bound_value::DEFAULT_INVALID_MESSAGE;
    use crate::execute::{ExecuteOptions, TransactionalResource};
    use crate::store::RawValue;
    use crate::unit::ModificationUnits;
    use crate::validator::ValidationErrors;

    struct NoResource;

    impl TransactionalResource for NoResource {
        fn disable_cache(&mut self) {}
        fn reset_cache(&mut self) {}
        fn rollback_all_open_transactions(&mut self) -> anyhow::Result<()> {
            Ok(())
        }
        fn run_pending_pre_commit_validation_hooks(&mut self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn submit(key: &str, value: RawValue) -> SubmittedValueStore {
        let mut store = SubmittedValueStore::new();
        store.add_from_request([key], |_| true, |_| value.clone());
        store
    }

    #[test]
    fn test_checkbox_list_fires_for_symmetric_difference() {
        let list = DiffCheckBoxList::new(
            "tags",
            vec!["A".to_string(), "B".to_string(), "C".to_string()],
            vec!["A".to_string(), "C".to_string()],
        );
        let store = submit("tags", RawValue::many(["B", "C"]));

        let mut fired = Vec::new();
        list.apply_changes(&store, |id, change| {
            fired.push((id.clone(), change));
            Ok(())
        })
        .unwrap();

        assert_eq!(
            fired,
            vec![
                ("A".to_string(), SelectionChange::Deselected),
                ("B".to_string(), SelectionChange::Selected),
            ]
        );
    }

    #[test]
    fn test_checkbox_list_ignores_order_and_duplicates() {
        let list = DiffCheckBoxList::new("ids", vec![1_u32, 2, 3], vec![1, 2]);
        let store = submit("ids", RawValue::many(["2", "1", "2"]));

        assert!(list.selection_delta(&store).is_empty());
        assert!(list.value().value_changed_on_post_back(&store));
    }

    #[test]
    fn test_checkbox_list_rejects_unknown_items() {
        let list = DiffCheckBoxList::new("ids", vec![1_u32, 2], vec![1]);
        let store = submit("ids", RawValue::many(["1", "7"]));

        assert!(!list.value().get_value(&store).is_valid());
        assert!(list.selection_delta(&store).is_empty());
    }

    #[test]
    fn test_radio_list_delta() {
        let list = DiffRadioList::new("plan", vec![1_u32, 2, 3], Some(1));
        let store = submit("plan", RawValue::text("3"));

        let delta = list.selection_delta(&store);
        assert_eq!(delta.removed.into_iter().collect::<Vec<_>>(), vec![1]);
        assert_eq!(delta.added.into_iter().collect::<Vec<_>>(), vec![3]);
    }

    #[test]
    fn test_radio_list_without_prior_selection() {
        let list: DiffRadioList<u32> = DiffRadioList::new("plan", vec![1, 2], None);

        assert_eq!(list.selected(&SubmittedValueStore::new()), None);
        assert_eq!(list.selection_delta(&submit("plan", RawValue::text("2"))).len(), 1);
    }

    #[test]
    fn test_handler_error_stops_iteration() {
        let list = DiffCheckBoxList::new("ids", vec![1_u32, 2, 3], vec![]);
        let store = submit("ids", RawValue::many(["1", "2", "3"]));
        let mut calls = 0;

        let result = list.apply_changes(&store, |_, _| {
            calls += 1;
            anyhow::bail!("write failed")
        });

        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_unknown_items_block_through_list_validation() {
        let registry = ModificationUnits::new();
        let save = registry.add_unit("save");
        let scope = ValidationScope::new(&registry);
        let mut store = submit("ids", RawValue::many(["1", "7"]));
        store.add_from_request(["plan"], |_| true, |_| RawValue::text("42"));
        let store = Rc::new(store);
        let ids = DiffCheckBoxList::new("ids", vec![1_u32, 2], vec![1]);
        let plan = DiffRadioList::new("plan", vec![1_u32, 2], Some(1))
            .with_invalid_message("Pick a listed plan.");

        scope
            .with_modification_units(&[save], |scope| -> ProtocolResult<()> {
                ids.create_validation(scope, &store)?;
                plan.create_validation(scope, &store)?;
                Ok(())
            })
            .unwrap()
            .unwrap();
        registry.add_modification_method(save, || Ok(())).unwrap();
        let mut errors = ValidationErrors::new();

        let outcome = registry
            .execute(save, ExecuteOptions::new(), None, &mut NoResource, &mut errors)
            .unwrap();

        assert!(outcome.is_blocked());
        assert_eq!(
            errors.all().collect::<Vec<_>>(),
            vec![DEFAULT_INVALID_MESSAGE, "Pick a listed plan."]
        );
    }
}
