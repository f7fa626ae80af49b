//! The per-request driver tying the store, the units and the controls together.
//!
//! ```text
//! request fields ──► PageBuilder::receive ──► SubmittedValueStore
//!                                                 │
//!            controls, validations, post-backs ◄──┤ (page construction)
//!                                                 │
//! dispatch(post_back_id) ──► changes? ──► ModificationUnits::execute
//!                                                 │
//! finalize() ──► observers ──► ClientState        │
//!            └─► visibility links ──► DisplayState
//! ```

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt::{self, Display};
use std::rc::Rc;
use std::str::FromStr;

use serde::{Serialize, Serializer};
use tracing::{debug, debug_span, info, warn};
use uuid::Uuid;

use crate::bound_value::{BoundValue, ChangeSource, Publish};
use crate::client_state::ClientState;
use crate::config::{PageConfig, UnexpectedDataPolicy};
use crate::error::{ExecuteError, ProtocolResult, ProtocolViolation};
use crate::execute::{ActionPair, ExecuteOptions, ExecuteOutcome, TransactionalResource};
use crate::scope::ValidationScope;
use crate::selection::{DiffCheckBoxList, DiffRadioList};
use crate::store::{RawValue, SubmittedValueStore};
use crate::unit::{ModificationUnits, UnitId};
use crate::validator::ValidationErrors;
use crate::visibility::{DisplayRule, DisplayState, ReactiveBinding};

/// Correlates every log event of one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        RequestId(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        RequestId(uuid)
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl Serialize for RequestId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

/// A named way of submitting the page, bound to one modification unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostBack {
    id: String,
    unit: UnitId,
    skip_if_no_changes: Option<bool>,
    validation_only: bool,
}

impl PostBack {
    pub fn new(id: impl Into<String>, unit: UnitId) -> Self {
        Self {
            id: id.into(),
            unit,
            skip_if_no_changes: None,
            validation_only: false,
        }
    }

    /// Override the page default.
    pub fn skip_if_no_changes(mut self, skip: bool) -> Self {
        self.skip_if_no_changes = Some(skip);
        self
    }

    pub fn validation_only(mut self, validation_only: bool) -> Self {
        self.validation_only = validation_only;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn unit(&self) -> UnitId {
        self.unit
    }
}

/// Result of dispatching one post-back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub post_back: String,
    pub changes_exist: bool,
    pub outcome: ExecuteOutcome,
    /// Messages by validation, for re-rendering a blocked page.
    pub errors: ValidationErrors,
}

/// What the rendering layer needs after the request was processed.
#[derive(Debug, Clone, PartialEq)]
pub struct PageOutput {
    pub client_state: ClientState,
    pub display: Vec<DisplayState>,
}

/// Builds a [`PostBackPage`] from request data.
#[derive(Debug)]
pub struct PageBuilder {
    config: PageConfig,
    request_id: RequestId,
    store: SubmittedValueStore,
}

impl PageBuilder {
    pub fn new(config: PageConfig) -> Self {
        Self {
            config,
            request_id: RequestId::new(),
            store: SubmittedValueStore::new(),
        }
    }

    pub fn with_request_id(mut self, request_id: RequestId) -> Self {
        self.request_id = request_id;
        self
    }

    pub fn with_store(mut self, store: SubmittedValueStore) -> Self {
        self.store = store;
        self
    }

    /// Take submitted fields into the store. Fields rejected by `is_expected`
    /// are handled according to the page's [`UnexpectedDataPolicy`]. When a
    /// key repeats, its first value wins.
    pub fn receive<I, K, P>(mut self, fields: I, is_expected: P) -> ProtocolResult<Self>
    where
        I: IntoIterator<Item = (K, RawValue)>,
        K: Into<String>,
        P: Fn(&str) -> bool,
    {
        let mut order = Vec::new();
        let mut values: HashMap<String, RawValue> = HashMap::new();
        for (key, value) in fields {
            let key = key.into();
            if !values.contains_key(&key) {
                order.push(key.clone());
                values.insert(key, value);
            }
        }

        let rejected = self.store.intake(&order, is_expected, |key| {
            values
                .remove(key)
                .unwrap_or_else(|| RawValue::Text(String::new()))
        });

        if !rejected.is_empty() {
            match self.config.unexpected_data {
                UnexpectedDataPolicy::Warn => warn!(
                    request_id = %self.request_id,
                    count = rejected.len(),
                    keys = ?rejected,
                    "request contained unexpected submitted data"
                ),
                UnexpectedDataPolicy::Reject => {
                    return Err(ProtocolViolation::UnexpectedSubmittedData {
                        count: rejected.len(),
                    })
                }
                UnexpectedDataPolicy::Ignore => {}
            }
        }
        Ok(self)
    }

    /// Narrow the store for a partial post-back.
    pub fn retain_only<I, K>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        self.store.remove_except(keys);
        self
    }

    pub fn build(self) -> PostBackPage {
        debug!(request_id = %self.request_id, fields = self.store.len(), "page built");
        PostBackPage {
            request_id: self.request_id,
            config: self.config,
            store: Rc::new(self.store),
            units: ModificationUnits::new(),
            post_backs: RefCell::new(Vec::new()),
            change_sources: RefCell::new(Vec::new()),
            published: RefCell::new(Vec::new()),
            display_rules: RefCell::new(Vec::new()),
            client_state: Rc::new(RefCell::new(ClientState::new())),
        }
    }
}

/// One request's post-back processing.
pub struct PostBackPage {
    request_id: RequestId,
    config: PageConfig,
    store: Rc<SubmittedValueStore>,
    units: ModificationUnits,
    post_backs: RefCell<Vec<PostBack>>,
    change_sources: RefCell<Vec<(UnitId, Rc<dyn ChangeSource>)>>,
    published: RefCell<Vec<Rc<dyn Publish>>>,
    display_rules: RefCell<Vec<Rc<dyn DisplayRule>>>,
    client_state: Rc<RefCell<ClientState>>,
}

impl PostBackPage {
    pub fn builder(config: PageConfig) -> PageBuilder {
        PageBuilder::new(config)
    }

    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    pub fn config(&self) -> &PageConfig {
        &self.config
    }

    pub fn store(&self) -> &Rc<SubmittedValueStore> {
        &self.store
    }

    pub fn units(&self) -> &ModificationUnits {
        &self.units
    }

    pub fn add_unit(&self, name: impl Into<String>) -> UnitId {
        self.units.add_unit(name)
    }

    /// A new scope handle; each one is a separate page region.
    pub fn scope(&self) -> ValidationScope<'_> {
        ValidationScope::new(&self.units)
    }

    /// Create a bound value with the page's invalid-value message. Its
    /// observers are published by [`finalize`](Self::finalize).
    pub fn bound_value<T, D, K, M>(&self, durable: D, key: K, mapper: M) -> BoundValue<T>
    where
        T: PartialEq + 'static,
        D: Fn() -> T + 'static,
        K: Fn() -> String + 'static,
        M: Fn(Option<&RawValue>) -> Option<T> + 'static,
    {
        let value = BoundValue::new(durable, key, mapper)
            .with_invalid_message(self.config.invalid_value_message.clone());
        self.published.borrow_mut().push(Rc::new(value.clone()));
        value
    }

    /// A checkbox list with the page's invalid-value message whose observers
    /// are published by [`finalize`](Self::finalize).
    pub fn check_box_list<Id>(
        &self,
        key: impl Into<String>,
        items: Vec<Id>,
        selected: Vec<Id>,
    ) -> DiffCheckBoxList<Id>
    where
        Id: Ord + Clone + FromStr + Display + 'static,
    {
        let list = DiffCheckBoxList::new(key, items, selected)
            .with_invalid_message(self.config.invalid_value_message.clone());
        self.published.borrow_mut().push(Rc::new(list.value().clone()));
        list
    }

    /// Radio-list counterpart of [`check_box_list`](Self::check_box_list).
    pub fn radio_list<Id>(
        &self,
        key: impl Into<String>,
        items: Vec<Id>,
        selected: Option<Id>,
    ) -> DiffRadioList<Id>
    where
        Id: Ord + Clone + Default + FromStr + Display + 'static,
    {
        let list = DiffRadioList::new(key, items, selected)
            .with_invalid_message(self.config.invalid_value_message.clone());
        self.published.borrow_mut().push(Rc::new(list.value().clone()));
        list
    }

    /// Count `source` towards `changesExist` of `unit`.
    pub fn track_changes<C>(&self, unit: UnitId, source: C)
    where
        C: ChangeSource + 'static,
    {
        self.change_sources.borrow_mut().push((unit, Rc::new(source)));
    }

    /// Publish `source`'s observers on finalize.
    pub fn publish_on_finalize<P>(&self, source: P)
    where
        P: Publish + 'static,
    {
        self.published.borrow_mut().push(Rc::new(source));
    }

    pub fn add_display_rule<R>(&self, rule: R)
    where
        R: DisplayRule + 'static,
    {
        self.display_rules.borrow_mut().push(Rc::new(rule));
    }

    /// A client-state sink for [`BoundValue::add_observer`].
    pub fn client_state_sink<P>(&self, key: impl Into<String>) -> impl Fn(P) + 'static
    where
        P: Serialize + 'static,
    {
        ClientState::sink(&self.client_state, key)
    }

    pub fn add_post_back(&self, post_back: PostBack) -> ProtocolResult<()> {
        self.units.ensure_known(post_back.unit)?;
        let mut post_backs = self.post_backs.borrow_mut();
        if post_backs.iter().any(|existing| existing.id == post_back.id) {
            return Err(ProtocolViolation::DuplicatePostBackId(post_back.id));
        }
        post_backs.push(post_back);
        Ok(())
    }

    /// Whether any control tracked for `unit` changed on this post-back.
    pub fn changes_exist(&self, unit: UnitId) -> bool {
        self.change_sources
            .borrow()
            .iter()
            .filter(|(target, _)| *target == unit)
            .any(|(_, source)| source.changed_on_post_back(&self.store))
    }

    /// Execute the unit behind the post-back the request named.
    pub fn dispatch<R>(
        &self,
        post_back_id: &str,
        extra: Option<ActionPair>,
        resource: &mut R,
    ) -> Result<DispatchReport, ExecuteError>
    where
        R: TransactionalResource + ?Sized,
    {
        let _span = debug_span!("dispatch", request_id = %self.request_id, post_back = post_back_id)
            .entered();

        let post_back = self
            .post_backs
            .borrow()
            .iter()
            .find(|candidate| candidate.id == post_back_id)
            .cloned()
            .ok_or_else(|| ProtocolViolation::UnknownPostBack(post_back_id.to_string()))?;

        let changes_exist = self.changes_exist(post_back.unit);
        let options = ExecuteOptions::new()
            .skip_if_no_changes(
                post_back
                    .skip_if_no_changes
                    .unwrap_or(self.config.skip_if_no_changes),
            )
            .changes_exist(changes_exist)
            .validation_only(post_back.validation_only);

        let mut errors = ValidationErrors::new();
        let outcome = self
            .units
            .execute(post_back.unit, options, extra, resource, &mut errors)?;
        info!(
            request_id = %self.request_id,
            post_back = post_back_id,
            changes_exist,
            outcome = ?outcome,
            "post-back dispatched"
        );

        Ok(DispatchReport {
            post_back: post_back.id,
            changes_exist,
            outcome,
            errors,
        })
    }

    /// Publish every observed value and compute initial visibility.
    pub fn finalize(&self) -> PageOutput {
        for source in self.published.borrow().iter() {
            source.publish(&self.store);
        }
        let display = self
            .display_rules
            .borrow()
            .iter()
            .flat_map(|rule| rule.initial_display(&self.store))
            .collect();
        PageOutput {
            client_state: self.client_state.borrow().clone(),
            display,
        }
    }

    pub fn reactive_bindings(&self) -> serde_json::Result<Vec<ReactiveBinding>> {
        self.display_rules
            .borrow()
            .iter()
            .map(|rule| rule.reactive_binding())
            .collect()
    }
}

impl fmt::Debug for PostBackPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostBackPage")
            .field("request_id", &self.request_id)
            .field("units", &self.units)
            .field("post_backs", &self.post_backs.borrow().len())
            .finish_non_exhaustive()
    }
}
