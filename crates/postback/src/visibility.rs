//! Visibility links: dependent elements shown or hidden by a trigger value.
//!
//! A link is evaluated twice. [`VisibilityLink::set_initial_display`] gives the
//! server-rendered default once every bound value is resolved, and
//! [`VisibilityLink::emit_reactive_binding`] describes the same rule for the
//! client to keep applying afterwards.

use serde::{Deserialize, Serialize};

use crate::bound_value::BoundValue;
use crate::store::SubmittedValueStore;

/// Whether a match shows or hides the dependents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Polarity {
    ShowWhenMatched,
    HideWhenMatched,
}

impl Polarity {
    fn visible(self, matched: bool) -> bool {
        match self {
            Polarity::ShowWhenMatched => matched,
            Polarity::HideWhenMatched => !matched,
        }
    }
}

/// Initial visibility of one dependent element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisplayState {
    pub element: String,
    pub visible: bool,
}

/// Client-side form of a link, keyed to the trigger's submission key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReactiveBinding {
    pub trigger_key: String,
    pub matches: Vec<serde_json::Value>,
    pub dependents: Vec<String>,
    pub polarity: Polarity,
}

/// Anything that contributes initial display states and reactive bindings.
pub trait DisplayRule {
    fn initial_display(&self, store: &SubmittedValueStore) -> Vec<DisplayState>;

    fn reactive_binding(&self) -> serde_json::Result<ReactiveBinding>;
}

/// Binds a trigger value to the visibility of dependent elements.
#[derive(Debug, Clone)]
pub struct VisibilityLink<T> {
    trigger: BoundValue<T>,
    matches: Vec<T>,
    dependents: Vec<String>,
    polarity: Polarity,
}

impl<T> VisibilityLink<T>
where
    T: PartialEq + Serialize + 'static,
{
    /// The trigger matches when its established value equals any of `matches`.
    pub fn new<I, S>(trigger: BoundValue<T>, matches: Vec<T>, dependents: I, polarity: Polarity) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            trigger,
            matches,
            dependents: dependents.into_iter().map(Into::into).collect(),
            polarity,
        }
    }

    pub fn matched(&self, store: &SubmittedValueStore) -> bool {
        let value = self.trigger.established_value(store);
        self.matches.contains(&value)
    }

    pub fn set_initial_display(&self, store: &SubmittedValueStore) -> Vec<DisplayState> {
        let visible = self.polarity.visible(self.matched(store));
        self.dependents
            .iter()
            .map(|element| DisplayState {
                element: element.clone(),
                visible,
            })
            .collect()
    }

    pub fn emit_reactive_binding(&self) -> serde_json::Result<ReactiveBinding> {
        let matches = self
            .matches
            .iter()
            .map(serde_json::to_value)
            .collect::<serde_json::Result<Vec<_>>>()?;
        Ok(ReactiveBinding {
            trigger_key: self.trigger.submission_key(),
            matches,
            dependents: self.dependents.clone(),
            polarity: self.polarity,
        })
    }
}

impl<T> DisplayRule for VisibilityLink<T>
where
    T: PartialEq + Serialize + 'static,
{
    fn initial_display(&self, store: &SubmittedValueStore) -> Vec<DisplayState> {
        self.set_initial_display(store)
    }

    fn reactive_binding(&self) -> serde_json::Result<ReactiveBinding> {
        self.emit_reactive_binding()
    }
}
