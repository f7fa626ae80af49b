//! Client-visible state written by bound-value observers.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use serde::Serialize;
use tracing::warn;

/// Ordered JSON map sent to the client with the rendered page.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ClientState {
    entries: BTreeMap<String, serde_json::Value>,
}

impl ClientState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.entries.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.entries
                .iter()
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
        )
    }

    /// A sink for [`BoundValue::add_observer`](crate::BoundValue::add_observer)
    /// that writes whatever it receives under `key`.
    ///
    /// A value that fails to serialize is logged and leaves the entry as it was.
    pub fn sink<P>(state: &Rc<RefCell<ClientState>>, key: impl Into<String>) -> impl Fn(P) + 'static
    where
        P: Serialize + 'static,
    {
        let state = Rc::clone(state);
        let key = key.into();
        move |value: P| match serde_json::to_value(value) {
            Ok(json) => state.borrow_mut().set(key.clone(), json),
            Err(err) => warn!(key = %key, error = %err, "client state value not serializable"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sink_writes_serialized_value() {
        let state = Rc::new(RefCell::new(ClientState::new()));
        let sink = ClientState::sink(&state, "count");

        sink(3_u32);
        sink(4_u32);

        assert_eq!(state.borrow().get("count"), Some(&serde_json::json!(4)));
        assert_eq!(state.borrow().to_json(), serde_json::json!({ "count": 4 }));
    }

    #[test]
    fn test_sink_keeps_previous_value_when_serialization_fails() {
        let state = Rc::new(RefCell::new(ClientState::new()));
        let sink = ClientState::sink(&state, "lookup");

        sink(BTreeMap::<Vec<u8>, u8>::new());
        sink(BTreeMap::from([(vec![1_u8], 1_u8)]));

        assert_eq!(state.borrow().get("lookup"), Some(&serde_json::json!({})));
    }
}
