//!
//! Application-defined message properties.
//!
use serde::Serialize;
use std::fmt;

use crate::error::ConsumerError;

/// Scalar value stored under a property key.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Bool(value) => write!(f, "{}", value),
            PropertyValue::Int(value) => write!(f, "{}", value),
            PropertyValue::Float(value) => write!(f, "{}", value),
            PropertyValue::String(value) => write!(f, "{:?}", value),
        }
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        PropertyValue::Bool(value)
    }
}

impl From<i32> for PropertyValue {
    fn from(value: i32) -> Self {
        PropertyValue::Int(value.into())
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        PropertyValue::Int(value)
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        PropertyValue::Float(value)
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::String(value.to_owned())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValue::String(value)
    }
}

/// Checks a property pair before it is written to the transport.
///
/// Names follow identifier rules. Provider-defined names such as `JMSXGroupID` are ordinary
/// properties here; the transport rejects any it will not let clients write.
/// Floats must be finite.
pub(crate) fn validate(key: &str, value: &PropertyValue) -> Result<(), ConsumerError> {
    let mut chars = key.chars();
    match chars.next() {
        None => return Err(ConsumerError::invalid("property name is empty")),
        Some(c) if !(c.is_ascii_alphabetic() || c == '_' || c == '$') => {
            return Err(ConsumerError::invalid(format!(
                "property name `{}` must start with a letter, `_` or `$`",
                key
            )));
        }
        Some(_) => {}
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$') {
        return Err(ConsumerError::invalid(format!(
            "property name `{}` contains characters outside [A-Za-z0-9_$]",
            key
        )));
    }

    if let PropertyValue::Float(value) = value {
        if !value.is_finite() {
            return Err(ConsumerError::invalid(format!(
                "property `{}` has non-finite value {}",
                key, value
            )));
        }
    }
    Ok(())
}
