//! Testing utilities for the postback engine.
//!
//! - [`RecordingResource`] records every transactional call in order and can be
//!   told to fail pre-commit hooks or rollback.
//! - [`CallLog`] is shared between a resource and commit actions so a test can
//!   assert the full interleaving.
//! - [`RecordingSink`] keeps every error-sink report.
//! - [`store_from`] builds a store from literal pairs.

use std::cell::RefCell;
use std::rc::Rc;

use postback_core::{ErrorSink, RawValue, SubmittedValueStore, TransactionalResource, ValidationId};

/// An ordered log of named calls, cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    calls: Rc<RefCell<Vec<String>>>,
}

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, call: impl Into<String>) {
        self.calls.borrow_mut().push(call.into());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls.borrow().iter().filter(|c| c.as_str() == call).count()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.borrow().is_empty()
    }
}

/// Call names recorded by [`RecordingResource`].
pub mod calls {
    pub const DISABLE_CACHE: &str = "disable_cache";
    pub const RESET_CACHE: &str = "reset_cache";
    pub const ROLLBACK: &str = "rollback";
    pub const PRE_COMMIT_HOOKS: &str = "pre_commit_hooks";
}

/// A [`TransactionalResource`] that records calls instead of touching storage.
#[derive(Debug, Clone, Default)]
pub struct RecordingResource {
    log: CallLog,
    hook_failure: Option<String>,
    rollback_failure: Option<String>,
}

impl RecordingResource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record into an existing log.
    pub fn with_log(log: CallLog) -> Self {
        Self {
            log,
            ..Self::default()
        }
    }

    /// Make pre-commit hooks fail with `message`.
    pub fn failing_hooks(mut self, message: impl Into<String>) -> Self {
        self.hook_failure = Some(message.into());
        self
    }

    /// Make rollback fail with `message`.
    pub fn failing_rollback(mut self, message: impl Into<String>) -> Self {
        self.rollback_failure = Some(message.into());
        self
    }

    pub fn log(&self) -> &CallLog {
        &self.log
    }
}

impl TransactionalResource for RecordingResource {
    fn disable_cache(&mut self) {
        self.log.record(calls::DISABLE_CACHE);
    }

    fn reset_cache(&mut self) {
        self.log.record(calls::RESET_CACHE);
    }

    fn rollback_all_open_transactions(&mut self) -> anyhow::Result<()> {
        self.log.record(calls::ROLLBACK);
        match &self.rollback_failure {
            Some(message) => Err(anyhow::anyhow!(message.clone())),
            None => Ok(()),
        }
    }

    fn run_pending_pre_commit_validation_hooks(&mut self) -> anyhow::Result<()> {
        self.log.record(calls::PRE_COMMIT_HOOKS);
        match &self.hook_failure {
            Some(message) => Err(anyhow::anyhow!(message.clone())),
            None => Ok(()),
        }
    }
}

/// An [`ErrorSink`] that keeps every report, empty ones included.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    reports: Vec<(ValidationId, Vec<String>)>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> &[(ValidationId, Vec<String>)] {
        &self.reports
    }

    pub fn len(&self) -> usize {
        self.reports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }

    /// Reports that carried at least one message.
    pub fn failures(&self) -> impl Iterator<Item = &(ValidationId, Vec<String>)> {
        self.reports.iter().filter(|(_, messages)| !messages.is_empty())
    }
}

impl ErrorSink for RecordingSink {
    fn report(&mut self, validation: ValidationId, messages: &[String]) {
        self.reports.push((validation, messages.to_vec()));
    }
}

/// A store holding exactly `pairs`.
pub fn store_from<I, K>(pairs: I) -> SubmittedValueStore
where
    I: IntoIterator<Item = (K, RawValue)>,
    K: Into<String>,
{
    let pairs: Vec<(String, RawValue)> = pairs.into_iter().map(|(k, v)| (k.into(), v)).collect();
    let mut store = SubmittedValueStore::new();
    store.add_from_request(
        pairs.iter().map(|(key, _)| key.as_str()),
        |_| true,
        |key| {
            pairs
                .iter()
                .find(|(candidate, _)| candidate == key)
                .map(|(_, value)| value.clone())
                .unwrap_or_else(|| RawValue::Text(String::new()))
        },
    );
    store
}

