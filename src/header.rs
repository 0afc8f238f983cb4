//!
//! Header fields carried by every transport message.
//!
use bytes::Bytes;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use crate::error::ConsumerError;

/// Raw transport code for messages that may be lost on broker restart.
pub const NON_PERSISTENT: i32 = 1;

/// Raw transport code for messages that survive broker restart.
pub const PERSISTENT: i32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeaderField {
    CorrelationId,
    DeliveryMode,
    Destination,
    Expiration,
    MessageId,
    Priority,
    Redelivered,
    ReplyTo,
    Timestamp,
    Type,
}

impl HeaderField {
    pub fn name(&self) -> &'static str {
        match self {
            HeaderField::CorrelationId => "correlation_id",
            HeaderField::DeliveryMode => "delivery_mode",
            HeaderField::Destination => "destination",
            HeaderField::Expiration => "expiration",
            HeaderField::MessageId => "message_id",
            HeaderField::Priority => "priority",
            HeaderField::Redelivered => "redelivered",
            HeaderField::ReplyTo => "reply_to",
            HeaderField::Timestamp => "timestamp",
            HeaderField::Type => "type",
        }
    }

    /// Checks that `value` has the shape this field stores.
    ///
    /// # Errors
    /// Raise ConsumerError::InvalidArgument for a wrong-typed value, a priority outside 0..=9
    /// or a delivery mode code the transport does not define.
    pub(crate) fn validate(&self, value: &HeaderValue) -> Result<(), ConsumerError> {
        match (self, value) {
            (HeaderField::CorrelationId, HeaderValue::Bytes(_)) => Ok(()),
            (HeaderField::DeliveryMode, HeaderValue::Int(code)) => match DeliveryMode::from_code(*code) {
                DeliveryMode::Unknown(code) => Err(ConsumerError::invalid(format!(
                    "delivery_mode code {} is neither {} nor {}",
                    code, NON_PERSISTENT, PERSISTENT
                ))),
                _ => Ok(()),
            },
            (HeaderField::Destination, HeaderValue::Destination(_)) => Ok(()),
            (HeaderField::ReplyTo, HeaderValue::Destination(_)) => Ok(()),
            (HeaderField::Expiration, HeaderValue::Long(_)) => Ok(()),
            (HeaderField::Timestamp, HeaderValue::Long(_)) => Ok(()),
            (HeaderField::MessageId, HeaderValue::Text(_)) => Ok(()),
            (HeaderField::Type, HeaderValue::Text(_)) => Ok(()),
            (HeaderField::Priority, HeaderValue::Int(priority)) => {
                if (0..=9).contains(priority) {
                    Ok(())
                } else {
                    Err(ConsumerError::invalid(format!(
                        "priority {} is outside 0..=9",
                        priority
                    )))
                }
            }
            (HeaderField::Redelivered, HeaderValue::Bool(_)) => Ok(()),
            (field, value) => Err(ConsumerError::invalid(format!(
                "{} does not accept a {} value",
                field.name(),
                value.kind()
            ))),
        }
    }
}

impl fmt::Display for HeaderField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum HeaderValue {
    /// Byte-exact; embedded zero bytes are preserved.
    Bytes(Bytes),
    Int(i32),
    Long(i64),
    Bool(bool),
    Text(String),
    Destination(Destination),
}

impl HeaderValue {
    fn kind(&self) -> &'static str {
        match self {
            HeaderValue::Bytes(_) => "bytes",
            HeaderValue::Int(_) => "int",
            HeaderValue::Long(_) => "long",
            HeaderValue::Bool(_) => "bool",
            HeaderValue::Text(_) => "text",
            HeaderValue::Destination(_) => "destination",
        }
    }
}

/// Persistence guarantee as seen by the consumer.
///
/// Transports speak raw integer codes; anything other than [`PERSISTENT`] or
/// [`NON_PERSISTENT`] is kept as `Unknown` instead of being coerced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    Persistent,
    NonPersistent,
    Unknown(i32),
}

impl DeliveryMode {
    pub fn from_code(code: i32) -> Self {
        match code {
            PERSISTENT => DeliveryMode::Persistent,
            NON_PERSISTENT => DeliveryMode::NonPersistent,
            other => DeliveryMode::Unknown(other),
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            DeliveryMode::Persistent => PERSISTENT,
            DeliveryMode::NonPersistent => NON_PERSISTENT,
            DeliveryMode::Unknown(code) => *code,
        }
    }

    pub fn as_symbol(&self) -> &'static str {
        match self {
            DeliveryMode::Persistent => "persistent",
            DeliveryMode::NonPersistent => "non_persistent",
            DeliveryMode::Unknown(_) => "unknown",
        }
    }
}

impl FromStr for DeliveryMode {
    type Err = ConsumerError;

    /// Only the two recognised symbols parse; `unknown` is an output sentinel, not an input.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "persistent" => Ok(DeliveryMode::Persistent),
            "non_persistent" => Ok(DeliveryMode::NonPersistent),
            other => Err(ConsumerError::UnknownEnum(other.to_owned())),
        }
    }
}

impl fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_symbol())
    }
}

/// Opaque reference to a queue or topic. Rendered in its string form for logging.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(into = "String")]
pub enum Destination {
    Queue(String),
    Topic(String),
    TemporaryQueue(String),
    TemporaryTopic(String),
}

impl Destination {
    pub fn name(&self) -> &str {
        match self {
            Destination::Queue(name)
            | Destination::Topic(name)
            | Destination::TemporaryQueue(name)
            | Destination::TemporaryTopic(name) => name,
        }
    }

    fn scheme(&self) -> &'static str {
        match self {
            Destination::Queue(_) => "queue",
            Destination::Topic(_) => "topic",
            Destination::TemporaryQueue(_) => "temp-queue",
            Destination::TemporaryTopic(_) => "temp-topic",
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme(), self.name())
    }
}

impl From<Destination> for String {
    fn from(destination: Destination) -> String {
        destination.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delivery_mode_codes() {
        assert_eq!(DeliveryMode::from_code(2), DeliveryMode::Persistent);
        assert_eq!(DeliveryMode::from_code(1), DeliveryMode::NonPersistent);
        assert_eq!(DeliveryMode::from_code(7), DeliveryMode::Unknown(7));
        assert_eq!(DeliveryMode::Unknown(7).as_symbol(), "unknown");
        assert_eq!(DeliveryMode::Persistent.code(), PERSISTENT);
    }

    #[test]
    fn test_delivery_mode_from_str() {
        assert_eq!("persistent".parse::<DeliveryMode>(), Ok(DeliveryMode::Persistent));
        assert_eq!(
            "non_persistent".parse::<DeliveryMode>(),
            Ok(DeliveryMode::NonPersistent)
        );
        assert_eq!(
            "bogus".parse::<DeliveryMode>(),
            Err(ConsumerError::UnknownEnum("bogus".to_owned()))
        );
        assert!("unknown".parse::<DeliveryMode>().is_err());
    }

    #[test]
    fn test_destination_display() {
        assert_eq!(Destination::Queue("orders".into()).to_string(), "queue://orders");
        assert_eq!(Destination::Topic("prices".into()).to_string(), "topic://prices");
        assert_eq!(
            Destination::TemporaryQueue("ID:1".into()).to_string(),
            "temp-queue://ID:1"
        );
    }

    #[test]
    fn test_validate_rejects_wrong_types() {
        let err = HeaderField::Redelivered.validate(&HeaderValue::Int(1));
        assert!(matches!(err, Err(ConsumerError::InvalidArgument(_))));

        let err = HeaderField::DeliveryMode.validate(&HeaderValue::Text("persistent".into()));
        assert!(matches!(err, Err(ConsumerError::InvalidArgument(_))));

        let err = HeaderField::DeliveryMode.validate(&HeaderValue::Int(5));
        assert!(matches!(err, Err(ConsumerError::InvalidArgument(_))));

        assert!(HeaderField::DeliveryMode.validate(&HeaderValue::Int(PERSISTENT)).is_ok());
    }

    #[test]
    fn test_validate_priority_range() {
        assert!(HeaderField::Priority.validate(&HeaderValue::Int(0)).is_ok());
        assert!(HeaderField::Priority.validate(&HeaderValue::Int(9)).is_ok());
        assert!(HeaderField::Priority.validate(&HeaderValue::Int(10)).is_err());
        assert!(HeaderField::Priority.validate(&HeaderValue::Int(-1)).is_err());
    }
}
