//! Error accumulation for validations.
//!
//! Every validation run gets a fresh [`Validator`]. After the run its message
//! list goes to an [`ErrorSink`], empty or not.

use std::collections::BTreeMap;

use crate::validation::ValidationId;

/// Accumulates user-facing validation messages.
#[derive(Debug, Default, Clone)]
pub struct Validator {
    error_occurred: bool,
    messages: Vec<String>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Note an error without a message.
    ///
    /// A validation that does only this is a protocol violation; the engine
    /// rejects it when the validation finishes.
    pub fn note_error(&mut self) {
        self.error_occurred = true;
    }

    pub fn note_error_and_add_message(&mut self, message: impl Into<String>) {
        self.error_occurred = true;
        self.messages.push(message.into());
    }

    pub fn note_error_and_add_messages<I, S>(&mut self, messages: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.error_occurred = true;
        self.messages.extend(messages.into_iter().map(Into::into));
    }

    pub fn error_occurred(&self) -> bool {
        self.error_occurred
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    pub(crate) fn into_messages(self) -> Vec<String> {
        self.messages
    }

    /// Trimmed string value.
    pub fn get_string(
        &mut self,
        raw: &str,
        allow_empty: bool,
        max_len: usize,
        subject: &str,
    ) -> String {
        let value = raw.trim();
        if value.is_empty() && !allow_empty {
            self.note_error_and_add_message(format!("Please enter the {subject}."));
        } else if value.chars().count() > max_len {
            self.note_error_and_add_message(format!(
                "The {subject} must be {max_len} characters or fewer."
            ));
        }
        value.to_string()
    }

    /// Integer within `min..=max`.
    pub fn get_int(&mut self, raw: &str, min: i64, max: i64, subject: &str) -> Option<i64> {
        match raw.trim().parse::<i64>() {
            Ok(value) if (min..=max).contains(&value) => Some(value),
            Ok(_) => {
                self.note_error_and_add_message(format!(
                    "The {subject} must be between {min} and {max}."
                ));
                None
            }
            Err(_) => {
                self.note_error_and_add_message(format!("The {subject} must be a whole number."));
                None
            }
        }
    }

    /// Decimal number within `min..=max`.
    pub fn get_decimal(&mut self, raw: &str, min: f64, max: f64, subject: &str) -> Option<f64> {
        match raw.trim().parse::<f64>() {
            Ok(value) if value.is_finite() && value >= min && value <= max => Some(value),
            Ok(value) if value.is_finite() => {
                self.note_error_and_add_message(format!(
                    "The {subject} must be between {min} and {max}."
                ));
                None
            }
            _ => {
                self.note_error_and_add_message(format!("The {subject} must be a number."));
                None
            }
        }
    }

    /// Checkbox-style boolean. Anything but an explicit "off" value is true.
    pub fn get_bool(&mut self, raw: Option<&str>) -> bool {
        match raw.map(str::trim) {
            None => false,
            Some(value) => !matches!(
                value.to_ascii_lowercase().as_str(),
                "" | "false" | "off" | "0"
            ),
        }
    }

    /// Email address with one `@` and a dotted domain.
    pub fn get_email(&mut self, raw: &str, allow_empty: bool, subject: &str) -> String {
        let value = raw.trim();
        if value.is_empty() {
            if !allow_empty {
                self.note_error_and_add_message(format!("Please enter the {subject}."));
            }
            return String::new();
        }
        let valid = match value.split_once('@') {
            Some((local, domain)) => {
                !local.is_empty()
                    && !domain.contains('@')
                    && domain.contains('.')
                    && !domain.starts_with('.')
                    && !domain.ends_with('.')
                    && !value.contains(char::is_whitespace)
            }
            None => false,
        };
        if !valid {
            self.note_error_and_add_message(format!("The {subject} must be a valid email address."));
        }
        value.to_string()
    }
}

/// Receives the message list of every validation that ran.
pub trait ErrorSink {
    fn report(&mut self, validation: ValidationId, messages: &[String]);
}

impl<F> ErrorSink for F
where
    F: FnMut(ValidationId, &[String]),
{
    fn report(&mut self, validation: ValidationId, messages: &[String]) {
        self(validation, messages)
    }
}

/// Messages attached to the validation that produced them, for re-rendering.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ValidationErrors {
    by_validation: BTreeMap<ValidationId, Vec<String>>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages for one validation; empty if it passed or never ran.
    pub fn for_validation(&self, validation: ValidationId) -> &[String] {
        self.by_validation
            .get(&validation)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Whether any validation reported a message.
    pub fn any(&self) -> bool {
        self.by_validation.values().any(|messages| !messages.is_empty())
    }

    /// All messages in validation order.
    pub fn all(&self) -> impl Iterator<Item = &str> {
        self.by_validation
            .values()
            .flat_map(|messages| messages.iter().map(String::as_str))
    }

    pub fn clear(&mut self) {
        self.by_validation.clear();
    }
}

impl ErrorSink for ValidationErrors {
    fn report(&mut self, validation: ValidationId, messages: &[String]) {
        if messages.is_empty() {
            self.by_validation.remove(&validation);
        } else {
            self.by_validation.insert(validation, messages.to_vec());
        }
    }
}
