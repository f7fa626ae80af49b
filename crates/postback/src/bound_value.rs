//! Bound values: a control's durable value reconciled against the post-back.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::error::ProtocolResult;
use crate::scope::ValidationScope;
use crate::store::{RawValue, Submitted, SubmittedValueStore};
use crate::validation::{Validation, ValidationId};
use crate::validator::Validator;

/// Message noted when a submitted raw value cannot be mapped.
pub const DEFAULT_INVALID_MESSAGE: &str = "Please enter a valid value.";

/// A bound value's reading for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostBackValue<T> {
    /// No usable submission; the durable value stands.
    Durable(T),
    /// A submission mapped successfully.
    Submitted(T),
    /// A submission was present but could not be mapped.
    Invalid,
}

impl<T> PostBackValue<T> {
    pub fn value(&self) -> Option<&T> {
        match self {
            PostBackValue::Durable(value) | PostBackValue::Submitted(value) => Some(value),
            PostBackValue::Invalid => None,
        }
    }

    pub fn is_valid(&self) -> bool {
        !matches!(self, PostBackValue::Invalid)
    }
}

/// Anything whose post-back can be compared against its durable state.
pub trait ChangeSource {
    fn changed_on_post_back(&self, store: &SubmittedValueStore) -> bool;
}

/// Anything that pushes its established value to observers once per request.
pub trait Publish {
    fn publish(&self, store: &SubmittedValueStore);
}

type DurableGetter<T> = Box<dyn Fn() -> T>;
type KeyGetter = Box<dyn Fn() -> String>;
type RawMapper<T> = Box<dyn Fn(Option<&RawValue>) -> Option<T>>;
type Observer<T> = Box<dyn Fn(&T)>;

struct Inner<T> {
    durable: DurableGetter<T>,
    key: KeyGetter,
    mapper: RawMapper<T>,
    invalid_message: RefCell<String>,
    observers: RefCell<Vec<Observer<T>>>,
}

/// A control value reconciled against submitted data.
///
/// Reading is a pure function of the durable value and the store; nothing is
/// cached between calls. Clones share the same value and observers.
pub struct BoundValue<T> {
    inner: Rc<Inner<T>>,
}

impl<T> Clone for BoundValue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: PartialEq + 'static> BoundValue<T> {
    /// `key` may return an empty string, in which case the post-back is
    /// ignored. `mapper` receives `None` when the key was cleared by
    /// narrowing and returns `None` for input it rejects.
    pub fn new<D, K, M>(durable: D, key: K, mapper: M) -> Self
    where
        D: Fn() -> T + 'static,
        K: Fn() -> String + 'static,
        M: Fn(Option<&RawValue>) -> Option<T> + 'static,
    {
        Self {
            inner: Rc::new(Inner {
                durable: Box::new(durable),
                key: Box::new(key),
                mapper: Box::new(mapper),
                invalid_message: RefCell::new(DEFAULT_INVALID_MESSAGE.to_string()),
                observers: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Replace the message noted for unmappable submissions.
    ///
    /// Clones share the message, so this applies to every handle of the value
    /// and to validations already created from it.
    pub fn with_invalid_message(self, message: impl Into<String>) -> Self {
        *self.inner.invalid_message.borrow_mut() = message.into();
        self
    }

    pub fn invalid_message(&self) -> String {
        self.inner.invalid_message.borrow().clone()
    }

    pub fn durable_value(&self) -> T {
        (self.inner.durable)()
    }

    pub fn submission_key(&self) -> String {
        (self.inner.key)()
    }

    pub fn get_value(&self, store: &SubmittedValueStore) -> PostBackValue<T> {
        self.inner.get_value(store)
    }

    /// The submitted value if valid, otherwise the durable value.
    pub fn established_value(&self, store: &SubmittedValueStore) -> T {
        match self.get_value(store) {
            PostBackValue::Durable(value) | PostBackValue::Submitted(value) => value,
            PostBackValue::Invalid => self.durable_value(),
        }
    }

    /// Whether the post-back differs from the durable value. Invalid input
    /// counts as a change.
    pub fn value_changed_on_post_back(&self, store: &SubmittedValueStore) -> bool {
        self.inner.changed(&self.get_value(store))
    }

    /// Mirror the established value into another channel once it is final.
    pub fn add_observer<P, F, S>(&self, projector: F, sink: S)
    where
        F: Fn(&T) -> P + 'static,
        S: Fn(P) + 'static,
    {
        self.inner
            .observers
            .borrow_mut()
            .push(Box::new(move |value| sink(projector(value))));
    }

    pub fn observer_count(&self) -> usize {
        self.inner.observers.borrow().len()
    }

    /// Register a validation that reads this value.
    ///
    /// At run time the value is read from `store`; an invalid submission notes
    /// the invalid-value message and skips `method`. Otherwise `method` gets
    /// the value and whether it changed on this post-back.
    pub fn create_validation<F>(
        &self,
        scope: &ValidationScope<'_>,
        store: &Rc<SubmittedValueStore>,
        method: F,
    ) -> ProtocolResult<ValidationId>
    where
        F: Fn(&T, bool, &mut Validator) + 'static,
    {
        let inner = Rc::clone(&self.inner);
        let store = Rc::clone(store);
        Validation::register(scope, move |validator| {
            let value = inner.get_value(&store);
            let changed = inner.changed(&value);
            match value.value() {
                Some(value) => method(value, changed, validator),
                None => validator.note_error_and_add_message(inner.invalid_message.borrow().clone()),
            }
        })
    }
}

impl<T: PartialEq> Inner<T> {
    fn get_value(&self, store: &SubmittedValueStore) -> PostBackValue<T> {
        let key = (self.key)();
        if key.is_empty() {
            return PostBackValue::Durable((self.durable)());
        }
        let mapped = match store.get(&key) {
            Submitted::Present(raw) => (self.mapper)(Some(raw)),
            Submitted::Cleared => (self.mapper)(None),
            Submitted::Unset => return PostBackValue::Durable((self.durable)()),
        };
        match mapped {
            Some(value) => PostBackValue::Submitted(value),
            None => PostBackValue::Invalid,
        }
    }

    fn changed(&self, value: &PostBackValue<T>) -> bool {
        match value.value() {
            Some(value) => *value != (self.durable)(),
            None => true,
        }
    }
}

impl<T: PartialEq + 'static> ChangeSource for BoundValue<T> {
    fn changed_on_post_back(&self, store: &SubmittedValueStore) -> bool {
        self.value_changed_on_post_back(store)
    }
}

impl<T: PartialEq + 'static> Publish for BoundValue<T> {
    fn publish(&self, store: &SubmittedValueStore) {
        let value = self.established_value(store);
        for observer in self.inner.observers.borrow().iter() {
            observer(&value);
        }
    }
}

impl<T> fmt::Debug for BoundValue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundValue")
            .field("key", &(self.inner.key)())
            .finish_non_exhaustive()
    }
}

/// Standard raw mappers.
pub mod mappers {
    use std::str::FromStr;

    use crate::store::RawValue;

    /// Text field. A cleared key reads as the empty string.
    pub fn text(raw: Option<&RawValue>) -> Option<String> {
        Some(raw.and_then(RawValue::as_text).unwrap_or_default().to_string())
    }

    /// Checkbox. A cleared key reads as unchecked.
    pub fn checkbox(raw: Option<&RawValue>) -> Option<bool> {
        Some(match raw.and_then(RawValue::as_text) {
            None => false,
            Some(value) => !matches!(value.trim(), "" | "false" | "off" | "0"),
        })
    }

    /// Optional integer. Empty or cleared reads as `None`; garbage is invalid.
    pub fn int(raw: Option<&RawValue>) -> Option<Option<i64>> {
        match raw.and_then(RawValue::as_text).map(str::trim) {
            None | Some("") => Some(None),
            Some(value) => value.parse().ok().map(Some),
        }
    }

    /// Multi-valued selection. A cleared key reads as no selection; any id
    /// that fails to parse makes the whole submission invalid.
    pub fn selection<Id: FromStr>(raw: Option<&RawValue>) -> Option<Vec<Id>> {
        match raw {
            None => Some(Vec::new()),
            Some(raw) => raw
                .values()
                .filter(|value| !value.is_empty())
                .map(|value| value.parse().ok())
                .collect(),
        }
    }

    /// Single selection. A cleared or empty key reads as `Id::default()`.
    pub fn single_selection<Id: FromStr + Default>(raw: Option<&RawValue>) -> Option<Id> {
        match raw.and_then(RawValue::as_text) {
            None | Some("") => Some(Id::default()),
            Some(value) => value.parse().ok(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProtocolViolation;
    use crate::unit::ModificationUnits;
    use std::cell::Cell;

    fn name_value(durable: &'static str) -> BoundValue<String> {
        BoundValue::new(move || durable.to_string(), || "name".to_string(), mappers::text)
    }

    fn store_with(key: &str, value: RawValue) -> SubmittedValueStore {
        let mut store = SubmittedValueStore::new();
        store.add_from_request([key], |_| true, |_| value.clone());
        store
    }

    #[test]
    fn test_untouched_control_keeps_durable_value() {
        let value = name_value("Ada");
        let store = SubmittedValueStore::new();

        assert_eq!(value.get_value(&store), PostBackValue::Durable("Ada".to_string()));
        assert!(!value.value_changed_on_post_back(&store));
    }

    #[test]
    fn test_empty_key_ignores_post_back() {
        let value = BoundValue::new(|| 5_i64, String::new, |_| Some(9));
        let store = store_with("", RawValue::text("9"));

        assert_eq!(value.get_value(&store), PostBackValue::Durable(5));
    }

    #[test]
    fn test_submitted_value_and_change() {
        let value = name_value("Ada");
        let store = store_with("name", RawValue::text("Grace"));

        assert_eq!(value.get_value(&store), PostBackValue::Submitted("Grace".to_string()));
        assert!(value.value_changed_on_post_back(&store));

        let same = store_with("name", RawValue::text("Ada"));
        assert!(!value.value_changed_on_post_back(&same));
    }

    #[test]
    fn test_cleared_key_invokes_mapper_with_none() {
        let value = BoundValue::new(|| true, || "agree".to_string(), mappers::checkbox);
        let mut store = store_with("agree", RawValue::text("on"));
        store.remove_except(["other"]);

        assert_eq!(value.get_value(&store), PostBackValue::Submitted(false));
        assert!(value.value_changed_on_post_back(&store));
    }

    #[test]
    fn test_invalid_input_counts_as_changed() {
        let value = BoundValue::new(|| Some(3_i64), || "qty".to_string(), mappers::int);
        let store = store_with("qty", RawValue::text("three"));

        assert_eq!(value.get_value(&store), PostBackValue::Invalid);
        assert!(value.value_changed_on_post_back(&store));
        assert_eq!(value.established_value(&store), Some(3));
    }

    #[test]
    fn test_invalid_message_reaches_shared_handles() {
        let value = BoundValue::new(|| Some(3_i64), || "qty".to_string(), mappers::int);
        let registered = value.clone();

        let value = value.with_invalid_message("Whole numbers only.");

        assert_eq!(registered.invalid_message(), "Whole numbers only.");
        assert_eq!(value.invalid_message(), "Whole numbers only.");
    }

    #[test]
    fn test_sequence_change_is_order_sensitive() {
        let value: BoundValue<Vec<u32>> =
            BoundValue::new(|| vec![1, 2], || "ids".to_string(), mappers::selection);
        let reordered = store_with("ids", RawValue::many(["2", "1"]));
        let same = store_with("ids", RawValue::many(["1", "2"]));

        assert!(value.value_changed_on_post_back(&reordered));
        assert!(!value.value_changed_on_post_back(&same));
    }

    #[test]
    fn test_observers_receive_projection() {
        let value = name_value("Ada");
        let seen = Rc::new(RefCell::new(Vec::new()));
        let first = Rc::clone(&seen);
        let second = Rc::clone(&seen);
        value.add_observer(|v: &String| v.len(), move |len| first.borrow_mut().push(len));
        value.add_observer(|v: &String| v.to_uppercase().len(), move |len| second.borrow_mut().push(len));

        value.publish(&store_with("name", RawValue::text("Grace")));

        assert_eq!(*seen.borrow(), vec![5, 5]);
    }

    #[test]
    fn test_create_validation_passes_change_flag() {
        let registry = ModificationUnits::new();
        let save = registry.add_unit("save");
        let scope = ValidationScope::new(&registry);
        let store = Rc::new(store_with("name", RawValue::text("Grace")));
        let value = name_value("Ada");
        let changed_seen = Rc::new(Cell::new(false));

        let flag = Rc::clone(&changed_seen);
        scope
            .with_modification_units(&[save], |scope| {
                value.create_validation(scope, &store, move |v, changed, validator| {
                    flag.set(changed);
                    validator.get_string(v, false, 3, "name");
                })
            })
            .unwrap()
            .unwrap();

        let mut errors = crate::validator::ValidationErrors::new();
        let outcome = registry
            .execute(
                save,
                crate::execute::ExecuteOptions::new().validation_only(true),
                None,
                &mut NoResource,
                &mut errors,
            )
            .unwrap();

        assert!(changed_seen.get());
        assert!(outcome.is_blocked());
        assert_eq!(errors.all().count(), 1);
    }

    #[test]
    fn test_create_validation_outside_scope() {
        let registry = ModificationUnits::new();
        let scope = ValidationScope::new(&registry);
        let store = Rc::new(SubmittedValueStore::new());

        let result = name_value("Ada").create_validation(&scope, &store, |_, _, _| {});
        assert_eq!(result, Err(ProtocolViolation::NoActiveScope));
    }

    struct NoResource;

    impl crate::execute::TransactionalResource for NoResource {
        fn disable_cache(&mut self) {}
        fn reset_cache(&mut self) {}
        fn rollback_all_open_transactions(&mut self) -> anyhow::Result<()> {
            Ok(())
        }
        fn run_pending_pre_commit_validation_hooks(&mut self) -> anyhow::Result<()> {
            Ok(())
        }
    }
}
