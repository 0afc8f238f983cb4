//!
//! Uniform view over a transport message: headers, properties and body.
//!
use bytes::Bytes;
use serde::{Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use tracing::warn;

use crate::error::ConsumerError;
use crate::header::{DeliveryMode, Destination, HeaderField, HeaderValue};
use crate::message::{Body, TransportMessage};
use crate::property::{self, PropertyValue};

/// Borrowed view over a transport message for the duration of one handler invocation.
///
/// Every mutator validates its input, then writes through to the underlying message at once.
/// Validation failures surface as [`ConsumerError`] and are never swallowed here.
pub struct MessageView<'a, M: TransportMessage + ?Sized> {
    message: &'a mut M,
}

impl<'a, M: TransportMessage + ?Sized> MessageView<'a, M> {
    pub fn new(message: &'a mut M) -> Self {
        MessageView { message }
    }

    pub fn header(&self, field: HeaderField) -> Option<HeaderValue> {
        self.message.header(field)
    }

    /// Write a header field; `None` clears it.
    ///
    /// # Errors
    /// Raise ConsumerError::InvalidArgument if `value` does not have the type `field` stores.
    pub fn set_header(
        &mut self,
        field: HeaderField,
        value: Option<HeaderValue>,
    ) -> Result<(), ConsumerError> {
        if let Some(value) = &value {
            field.validate(value)?;
        }
        self.message.set_header(field, value)
    }

    pub fn correlation_id(&self) -> Option<Bytes> {
        match self.header(HeaderField::CorrelationId) {
            Some(HeaderValue::Bytes(id)) => Some(id),
            _ => None,
        }
    }

    pub fn set_correlation_id(&mut self, id: Option<Bytes>) -> Result<(), ConsumerError> {
        self.set_header(HeaderField::CorrelationId, id.map(HeaderValue::Bytes))
    }

    pub fn delivery_mode(&self) -> Option<DeliveryMode> {
        match self.header(HeaderField::DeliveryMode) {
            Some(HeaderValue::Int(code)) => Some(DeliveryMode::from_code(code)),
            _ => None,
        }
    }

    /// `persistent`, `non_persistent`, or `unknown` for any other (or missing) code.
    pub fn delivery_mode_symbolic(&self) -> &'static str {
        self.delivery_mode()
            .map(|mode| mode.as_symbol())
            .unwrap_or("unknown")
    }

    /// # Errors
    /// Raise ConsumerError::UnknownEnum unless `symbol` is `persistent` or `non_persistent`.
    pub fn set_delivery_mode_symbolic(&mut self, symbol: &str) -> Result<(), ConsumerError> {
        let mode: DeliveryMode = symbol.parse()?;
        self.set_header(HeaderField::DeliveryMode, Some(HeaderValue::Int(mode.code())))
    }

    pub fn destination(&self) -> Option<Destination> {
        self.destination_header(HeaderField::Destination)
    }

    pub fn set_destination(&mut self, destination: Option<Destination>) -> Result<(), ConsumerError> {
        self.set_header(
            HeaderField::Destination,
            destination.map(HeaderValue::Destination),
        )
    }

    /// Epoch milliseconds; 0 means the message never expires.
    pub fn expiration(&self) -> Option<i64> {
        self.long_header(HeaderField::Expiration)
    }

    pub fn set_expiration(&mut self, expiration: Option<i64>) -> Result<(), ConsumerError> {
        self.set_header(HeaderField::Expiration, expiration.map(HeaderValue::Long))
    }

    pub fn message_id(&self) -> Option<String> {
        self.text_header(HeaderField::MessageId)
    }

    pub fn set_message_id(&mut self, id: Option<String>) -> Result<(), ConsumerError> {
        self.set_header(HeaderField::MessageId, id.map(HeaderValue::Text))
    }

    pub fn priority(&self) -> Option<i32> {
        match self.header(HeaderField::Priority) {
            Some(HeaderValue::Int(priority)) => Some(priority),
            _ => None,
        }
    }

    pub fn set_priority(&mut self, priority: Option<i32>) -> Result<(), ConsumerError> {
        self.set_header(HeaderField::Priority, priority.map(HeaderValue::Int))
    }

    pub fn redelivered(&self) -> Option<bool> {
        match self.header(HeaderField::Redelivered) {
            Some(HeaderValue::Bool(redelivered)) => Some(redelivered),
            _ => None,
        }
    }

    pub fn set_redelivered(&mut self, redelivered: Option<bool>) -> Result<(), ConsumerError> {
        self.set_header(HeaderField::Redelivered, redelivered.map(HeaderValue::Bool))
    }

    pub fn reply_to(&self) -> Option<Destination> {
        self.destination_header(HeaderField::ReplyTo)
    }

    pub fn set_reply_to(&mut self, reply_to: Option<Destination>) -> Result<(), ConsumerError> {
        self.set_header(HeaderField::ReplyTo, reply_to.map(HeaderValue::Destination))
    }

    /// Epoch milliseconds at which the message was handed to the provider.
    pub fn timestamp(&self) -> Option<i64> {
        self.long_header(HeaderField::Timestamp)
    }

    pub fn set_timestamp(&mut self, timestamp: Option<i64>) -> Result<(), ConsumerError> {
        self.set_header(HeaderField::Timestamp, timestamp.map(HeaderValue::Long))
    }

    pub fn message_type(&self) -> Option<String> {
        self.text_header(HeaderField::Type)
    }

    pub fn set_message_type(&mut self, message_type: Option<String>) -> Result<(), ConsumerError> {
        self.set_header(HeaderField::Type, message_type.map(HeaderValue::Text))
    }

    /// Returns `None` for an absent key, never a typed default.
    pub fn property(&self, key: &str) -> Option<PropertyValue> {
        self.message.property(key)
    }

    pub fn has_property(&self, key: &str) -> bool {
        self.message.property(key).is_some()
    }

    /// # Errors
    /// Raise ConsumerError::InvalidArgument for a malformed name or a non-finite float.
    pub fn set_property(
        &mut self,
        key: &str,
        value: impl Into<PropertyValue>,
    ) -> Result<(), ConsumerError> {
        let value = value.into();
        property::validate(key, &value)?;
        self.message.set_property(key, value)
    }

    /// Every property pair currently on the message.
    pub fn properties(&self) -> HashMap<String, PropertyValue> {
        self.message
            .property_names()
            .into_iter()
            .filter_map(|key| self.message.property(&key).map(|value| (key, value)))
            .collect()
    }

    /// Replace all properties with `properties`.
    ///
    /// All-or-nothing: every pair is validated before anything is cleared, and if the
    /// transport rejects a write part way through, the previous properties are put back.
    ///
    /// # Errors
    /// Raise ConsumerError::InvalidArgument for the first invalid pair, or whatever the
    /// transport raised while writing.
    pub fn replace_properties(
        &mut self,
        properties: HashMap<String, PropertyValue>,
    ) -> Result<(), ConsumerError> {
        for (key, value) in &properties {
            property::validate(key, value)?;
        }

        let previous = self.properties();
        self.message.clear_properties();
        for (key, value) in properties {
            if let Err(e) = self.message.set_property(&key, value) {
                self.message.clear_properties();
                for (key, value) in previous {
                    if let Err(restore) = self.message.set_property(&key, value) {
                        warn!(
                            property = %key,
                            error = %restore,
                            "could not restore property after failed replace"
                        );
                    }
                }
                return Err(e);
            }
        }
        Ok(())
    }

    pub fn data(&self) -> &Body {
        self.message.body()
    }

    /// Flattened, read-only snapshot of every header field.
    pub fn attributes(&self) -> Attributes {
        Attributes {
            correlation_id: self.correlation_id(),
            delivery_mode: self.delivery_mode().map(|mode| mode.as_symbol()),
            destination: self.destination().map(|d| d.to_string()),
            expiration: self.expiration(),
            message_id: self.message_id(),
            priority: self.priority(),
            redelivered: self.redelivered(),
            reply_to: self.reply_to().map(|d| d.to_string()),
            timestamp: self.timestamp(),
            message_type: self.message_type(),
        }
    }

    /// Attributes, properties and a body reference; what gets logged for a poison message.
    pub fn diagnostics(&self) -> Diagnostics {
        Diagnostics {
            attributes: self.attributes(),
            properties: self.properties(),
            body: self.data().describe(),
        }
    }

    fn destination_header(&self, field: HeaderField) -> Option<Destination> {
        match self.header(field) {
            Some(HeaderValue::Destination(destination)) => Some(destination),
            _ => None,
        }
    }

    fn long_header(&self, field: HeaderField) -> Option<i64> {
        match self.header(field) {
            Some(HeaderValue::Long(value)) => Some(value),
            _ => None,
        }
    }

    fn text_header(&self, field: HeaderField) -> Option<String> {
        match self.header(field) {
            Some(HeaderValue::Text(value)) => Some(value),
            _ => None,
        }
    }
}

impl<'a, M: TransportMessage + ?Sized> fmt::Display for MessageView<'a, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Message(id={}, destination={}, mode={}, properties={}, body={})",
            self.message_id().as_deref().unwrap_or("-"),
            self.destination()
                .map(|d| d.to_string())
                .unwrap_or_else(|| "-".to_owned()),
            self.delivery_mode_symbolic(),
            self.message.property_names().len(),
            self.data().describe()
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Attributes {
    #[serde(serialize_with = "escaped_bytes")]
    pub correlation_id: Option<Bytes>,
    pub delivery_mode: Option<&'static str>,
    pub destination: Option<String>,
    pub expiration: Option<i64>,
    pub message_id: Option<String>,
    pub priority: Option<i32>,
    pub redelivered: Option<bool>,
    pub reply_to: Option<String>,
    pub timestamp: Option<i64>,
    #[serde(rename = "type")]
    pub message_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostics {
    pub attributes: Attributes,
    pub properties: HashMap<String, PropertyValue>,
    pub body: String,
}

fn escaped_bytes<S: Serializer>(value: &Option<Bytes>, serializer: S) -> Result<S::Ok, S::Error> {
    match value {
        Some(bytes) => serializer.serialize_str(&bytes.escape_ascii().to_string()),
        None => serializer.serialize_none(),
    }
}
