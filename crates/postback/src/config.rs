//! Per-page configuration.

use serde::{Deserialize, Serialize};

use crate::bound_value::DEFAULT_INVALID_MESSAGE;

/// What to do when a request carries fields no control asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnexpectedDataPolicy {
    /// Log a warning and continue.
    #[default]
    Warn,
    /// Fail the request with a protocol violation.
    Reject,
    /// Continue silently.
    Ignore,
}

/// Settings for one page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageConfig {
    pub unexpected_data: UnexpectedDataPolicy,
    pub invalid_value_message: String,
    /// Default for post-backs that do not set their own.
    pub skip_if_no_changes: bool,
}

impl Default for PageConfig {
    fn default() -> Self {
        Self {
            unexpected_data: UnexpectedDataPolicy::Warn,
            invalid_value_message: DEFAULT_INVALID_MESSAGE.to_string(),
            skip_if_no_changes: false,
        }
    }
}

impl PageConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn with_unexpected_data(mut self, policy: UnexpectedDataPolicy) -> Self {
        self.unexpected_data = policy;
        self
    }

    pub fn with_invalid_value_message(mut self, message: impl Into<String>) -> Self {
        self.invalid_value_message = message.into();
        self
    }

    pub fn with_skip_if_no_changes(mut self, skip: bool) -> Self {
        self.skip_if_no_changes = skip;
        self
    }
}
