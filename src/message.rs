use bytes::Bytes;
use std::collections::HashMap;

use crate::error::ConsumerError;
use crate::header::{HeaderField, HeaderValue};
use crate::property::PropertyValue;

/// The message handle a transport hands to the consumer.
///
/// Implementations write straight through to the provider's message; no buffering is
/// expected. Validation of shapes and ranges happens in [`MessageView`](crate::view::MessageView),
/// so implementations only report failures the provider itself raises.
pub trait TransportMessage {
    fn header(&self, field: HeaderField) -> Option<HeaderValue>;

    fn set_header(
        &mut self,
        field: HeaderField,
        value: Option<HeaderValue>,
    ) -> Result<(), ConsumerError>;

    fn property(&self, key: &str) -> Option<PropertyValue>;

    fn set_property(&mut self, key: &str, value: PropertyValue) -> Result<(), ConsumerError>;

    /// Names of every property present. Order is unspecified.
    fn property_names(&self) -> Vec<String>;

    fn clear_properties(&mut self);

    fn body(&self) -> &Body;
}

/// Message payload. Its shape depends on the message subtype.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Body {
    #[default]
    Empty,
    Text(String),
    Bytes(Bytes),
    Map(HashMap<String, PropertyValue>),
    Stream(Vec<PropertyValue>),
    /// Serialized object in whatever encoding the producer used.
    Object(Bytes),
}

impl Body {
    /// Short reference to the payload, suitable for logs. Never includes the content itself.
    pub fn describe(&self) -> String {
        match self {
            Body::Empty => "empty".to_owned(),
            Body::Text(text) => format!("text({} bytes)", text.len()),
            Body::Bytes(bytes) => format!("bytes({} bytes)", bytes.len()),
            Body::Map(map) => format!("map({} entries)", map.len()),
            Body::Stream(items) => format!("stream({} items)", items.len()),
            Body::Object(bytes) => format!("object({} bytes)", bytes.len()),
        }
    }
}

/// In-memory transport message.
///
/// Bindings that materialise provider messages before dispatch can hand these to the
/// adapter directly.
#[derive(Debug, Clone, Default)]
pub struct Message {
    headers: HashMap<HeaderField, HeaderValue>,

    /// User defined attributes in form of key-value pairs.
    properties: HashMap<String, PropertyValue>,

    pub body: Body,
}

impl Message {
    pub fn new(body: Body) -> Self {
        Message {
            body,
            ..Default::default()
        }
    }

    pub fn with_header(mut self, field: HeaderField, value: HeaderValue) -> Self {
        self.headers.insert(field, value);
        self
    }

    pub fn with_property(mut self, key: &str, value: impl Into<PropertyValue>) -> Self {
        self.properties.insert(key.to_owned(), value.into());
        self
    }
}

impl TransportMessage for Message {
    fn header(&self, field: HeaderField) -> Option<HeaderValue> {
        self.headers.get(&field).cloned()
    }

    fn set_header(
        &mut self,
        field: HeaderField,
        value: Option<HeaderValue>,
    ) -> Result<(), ConsumerError> {
        match value {
            Some(value) => {
                self.headers.insert(field, value);
            }
            None => {
                self.headers.remove(&field);
            }
        }
        Ok(())
    }

    fn property(&self, key: &str) -> Option<PropertyValue> {
        self.properties.get(key).cloned()
    }

    fn set_property(&mut self, key: &str, value: PropertyValue) -> Result<(), ConsumerError> {
        self.properties.insert(key.to_owned(), value);
        Ok(())
    }

    fn property_names(&self) -> Vec<String> {
        self.properties.keys().cloned().collect()
    }

    fn clear_properties(&mut self) {
        self.properties.clear();
    }

    fn body(&self) -> &Body {
        &self.body
    }
}
