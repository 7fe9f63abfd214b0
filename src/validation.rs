//! Client-side object validation.
//!
//! Only the envelope is checked: identity fields and the naming rules the
//! API server enforces on every kind. Field-level schema validation stays
//! with the server.

use crate::error::{InputError, Result};
use crate::object::Object;

const MAX_NAME_LENGTH: usize = 253;
const MAX_LABEL_LENGTH: usize = 63;

/// Checks objects before they are sent.
pub trait Validator: Send + Sync {
    /// Validates `object`.
    ///
    /// # Errors
    ///
    /// Returns [`InputError::Invalid`] describing the first violation.
    fn validate(&self, object: &Object) -> Result<()>;
}

/// Accepts everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullValidator;

impl Validator for NullValidator {
    fn validate(&self, _object: &Object) -> Result<()> {
        Ok(())
    }
}

/// Checks identity fields, names and labels.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvelopeValidator;

impl Validator for EnvelopeValidator {
    fn validate(&self, object: &Object) -> Result<()> {
        if object.api_version().is_none_or(str::is_empty) {
            return invalid("apiVersion must be set");
        }
        if object.kind().is_none_or(str::is_empty) {
            return invalid("kind must be set");
        }

        match (object.name(), object.generate_name()) {
            (Some(name), _) => check_subdomain("metadata.name", name)?,
            (None, Some(prefix)) => {
                if prefix.len() > MAX_NAME_LENGTH - 5 {
                    return invalid("metadata.generateName is too long");
                }
            }
            (None, None) => return invalid("metadata.name or metadata.generateName must be set"),
        }

        if let Some(namespace) = object.namespace() {
            check_label("metadata.namespace", namespace)?;
        }

        for (key, value) in object.labels().unwrap_or_default() {
            if !value.is_empty() && !is_label_value(&value) {
                return invalid(&format!("label {key} has invalid value {value:?}"));
            }
        }
        Ok(())
    }
}

/// Returns the validator selected by the `validate` switch.
#[must_use]
pub fn validator_for(validate: bool) -> Box<dyn Validator> {
    if validate {
        Box::new(EnvelopeValidator)
    } else {
        Box::new(NullValidator)
    }
}

fn invalid(message: &str) -> Result<()> {
    Err(InputError::Invalid {
        message: message.to_string(),
    }
    .into())
}

/// DNS-1123 subdomain: lower-case alphanumerics, `-` and `.`.
fn check_subdomain(field: &str, value: &str) -> Result<()> {
    let valid = value.len() <= MAX_NAME_LENGTH
        && value.split('.').all(is_dns_label);
    if valid {
        Ok(())
    } else {
        invalid(&format!("{field} {value:?} is not a valid DNS subdomain"))
    }
}

fn check_label(field: &str, value: &str) -> Result<()> {
    if is_dns_label(value) {
        Ok(())
    } else {
        invalid(&format!("{field} {value:?} is not a valid DNS label"))
    }
}

fn is_dns_label(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= MAX_LABEL_LENGTH
        && value
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !value.starts_with('-')
        && !value.ends_with('-')
}

fn is_label_value(value: &str) -> bool {
    value.len() <= MAX_LABEL_LENGTH
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && value.starts_with(|c: char| c.is_ascii_alphanumeric())
        && value.ends_with(|c: char| c.is_ascii_alphanumeric())
}
