//! Raw submitted values for one request.
//!
//! The store is filled once from the incoming request and may then be narrowed
//! for a partial post-back. Narrowing is remembered: a key outside the retained
//! set reads as [`Submitted::Cleared`], never as [`Submitted::Unset`].

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

/// A raw field value as it arrived with the request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    /// A single-valued field.
    Text(String),
    /// A field submitted several times under one key (checkbox groups).
    Many(Vec<String>),
}

impl RawValue {
    pub fn text(value: impl Into<String>) -> Self {
        RawValue::Text(value.into())
    }

    pub fn many<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        RawValue::Many(values.into_iter().map(Into::into).collect())
    }

    /// The single value, or the first of many.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            RawValue::Text(value) => Some(value),
            RawValue::Many(values) => values.first().map(String::as_str),
        }
    }

    /// Every submitted value, in submission order.
    pub fn values(&self) -> impl Iterator<Item = &str> {
        let slice: &[String] = match self {
            RawValue::Text(value) => std::slice::from_ref(value),
            RawValue::Many(values) => values,
        };
        slice.iter().map(String::as_str)
    }
}

/// Three-state read of one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submitted<'a> {
    /// The key was submitted with this value.
    Present(&'a RawValue),
    /// The key is absent because the store was narrowed and the key was not retained.
    Cleared,
    /// The key was never submitted.
    Unset,
}

#[derive(Debug, Clone, Default)]
enum Narrowing {
    #[default]
    Full,
    RetainOnly(HashSet<String>),
}

impl Narrowing {
    fn excludes(&self, key: &str) -> bool {
        match self {
            Narrowing::Full => false,
            Narrowing::RetainOnly(retained) => !retained.contains(key),
        }
    }
}

/// Submitted values keyed by opaque control ids.
#[derive(Debug, Clone, Default)]
pub struct SubmittedValueStore {
    values: HashMap<String, RawValue>,
    narrowing: Narrowing,
}

impl SubmittedValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from a JSON object whose values are strings or arrays of strings.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let values: HashMap<String, RawValue> = serde_json::from_str(json)?;
        Ok(Self {
            values,
            narrowing: Narrowing::Full,
        })
    }

    /// Insert every key that passes `key_predicate` and is not present yet.
    ///
    /// Returns `true` if any key was rejected by the predicate, which signals
    /// unexpected extra data in the request.
    pub fn add_from_request<I, K, P, V>(&mut self, keys: I, key_predicate: P, value_selector: V) -> bool
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
        P: Fn(&str) -> bool,
        V: FnMut(&str) -> RawValue,
    {
        !self.intake(keys, key_predicate, value_selector).is_empty()
    }

    /// Like [`add_from_request`](Self::add_from_request) but returns the rejected keys.
    pub fn intake<I, K, P, V>(&mut self, keys: I, key_predicate: P, mut value_selector: V) -> Vec<String>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
        P: Fn(&str) -> bool,
        V: FnMut(&str) -> RawValue,
    {
        let mut rejected = Vec::new();
        for key in keys {
            let key = key.as_ref();
            if !key_predicate(key) {
                rejected.push(key.to_string());
                continue;
            }
            // A narrowed store is never widened again.
            if self.values.contains_key(key) || self.narrowing.excludes(key) {
                continue;
            }
            let value = value_selector(key);
            self.values.insert(key.to_string(), value);
        }
        rejected
    }

    /// Three-state read of `key`.
    pub fn get(&self, key: &str) -> Submitted<'_> {
        match self.values.get(key) {
            Some(value) => Submitted::Present(value),
            None if self.narrowing.excludes(key) => Submitted::Cleared,
            None => Submitted::Unset,
        }
    }

    /// The raw value for `key`, if it was submitted and retained.
    pub fn get_value(&self, key: &str) -> Option<&RawValue> {
        self.values.get(key)
    }

    /// Whether `key` falls outside the set retained by the last narrowing.
    pub fn key_removed(&self, key: &str) -> bool {
        self.narrowing.excludes(key)
    }

    /// Narrow the store to `keys` and remember exactly this retained set.
    ///
    /// Narrowing twice intersects the two sets.
    pub fn remove_except<I, K>(&mut self, keys: I)
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        let mut retained: HashSet<String> = keys.into_iter().map(Into::into).collect();
        if let Narrowing::RetainOnly(previous) = &self.narrowing {
            retained.retain(|key| previous.contains(key));
        }
        self.values.retain(|key, _| retained.contains(key));
        self.narrowing = Narrowing::RetainOnly(retained);
    }

    pub fn is_narrowed(&self) -> bool {
        matches!(self.narrowing, Narrowing::RetainOnly(_))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}
