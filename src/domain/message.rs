// src/domain/message.rs

//! AMQP 1.0 wire model.
//!
//! These types describe a message as the transport sees it: the header,
//! the bare-message properties, the two annotation/property maps and one
//! body section. They carry no encoding logic; translation to and from the
//! bus representation lives in [`crate::codec`].

use std::collections::BTreeMap;
use std::fmt;

use bytes::Bytes;
use uuid::Uuid;

/// Default message priority defined by AMQP 1.0.
pub const DEFAULT_PRIORITY: u8 = 4;

/// An AMQP 1.0 typed value.
///
/// Only the primitive and compound types a bridge needs to carry are
/// modelled. Maps keep their wire order.
#[derive(Clone, Debug, PartialEq)]
pub enum AmqpValue {
    Null,
    Bool(bool),
    Ubyte(u8),
    Ushort(u16),
    Uint(u32),
    Ulong(u64),
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Char(char),
    /// Milliseconds since the Unix epoch.
    Timestamp(i64),
    Uuid(Uuid),
    Binary(Bytes),
    String(String),
    Symbol(String),
    List(Vec<AmqpValue>),
    Map(Vec<(AmqpValue, AmqpValue)>),
    Array(Vec<AmqpValue>),
}

impl From<&str> for AmqpValue {
    fn from(value: &str) -> Self {
        AmqpValue::String(value.to_string())
    }
}

impl From<String> for AmqpValue {
    fn from(value: String) -> Self {
        AmqpValue::String(value)
    }
}

impl From<i64> for AmqpValue {
    fn from(value: i64) -> Self {
        AmqpValue::Long(value)
    }
}

impl From<bool> for AmqpValue {
    fn from(value: bool) -> Self {
        AmqpValue::Bool(value)
    }
}

/// The body of a message.
///
/// AMQP carries exactly one of three body encodings; a sum type keeps
/// "data with a list payload" and similar combinations unrepresentable.
#[derive(Clone, Debug, PartialEq)]
pub enum Body {
    /// A single `amqp-value` section.
    Value(AmqpValue),
    /// A single `data` section of opaque bytes.
    Data(Bytes),
    /// A single `amqp-sequence` section.
    Sequence(Vec<AmqpValue>),
}

/// Message identifier as permitted for `message-id` and `correlation-id`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum MessageId {
    String(String),
    Ulong(u64),
    Uuid(Uuid),
    Binary(Bytes),
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // ---
        match self {
            MessageId::String(s) => f.write_str(s),
            MessageId::Ulong(n) => write!(f, "{n}"),
            MessageId::Uuid(u) => write!(f, "{}", u.hyphenated()),
            MessageId::Binary(b) => {
                for byte in b.iter() {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
        }
    }
}

impl From<&str> for MessageId {
    fn from(value: &str) -> Self {
        MessageId::String(value.to_string())
    }
}

impl From<String> for MessageId {
    fn from(value: String) -> Self {
        MessageId::String(value)
    }
}

impl From<u64> for MessageId {
    fn from(value: u64) -> Self {
        MessageId::Ulong(value)
    }
}

/// The AMQP `header` section.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Header {
    pub durable: bool,
    pub priority: u8,
    /// Time to live in milliseconds.
    pub ttl: Option<u32>,
    pub first_acquirer: bool,
    /// Set by the sending peer; never transmitted by the bridge.
    pub delivery_count: u32,
}

impl Default for Header {
    fn default() -> Self {
        Self {
            durable: false,
            priority: DEFAULT_PRIORITY,
            ttl: None,
            first_acquirer: false,
            delivery_count: 0,
        }
    }
}

/// The AMQP `properties` section. Every field is optional.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Properties {
    pub message_id: Option<MessageId>,
    pub user_id: Option<Bytes>,
    pub to: Option<String>,
    pub subject: Option<String>,
    pub reply_to: Option<String>,
    pub correlation_id: Option<MessageId>,
    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
    /// Milliseconds since the Unix epoch.
    pub absolute_expiry_time: Option<i64>,
    /// Milliseconds since the Unix epoch.
    pub creation_time: Option<i64>,
    pub group_id: Option<String>,
    pub group_sequence: Option<u32>,
    pub reply_to_group_id: Option<String>,
}

/// A complete AMQP message as exchanged with the transport.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WireMessage {
    pub header: Option<Header>,
    /// Keys are AMQP symbols.
    pub message_annotations: Option<BTreeMap<String, AmqpValue>>,
    pub properties: Option<Properties>,
    pub application_properties: Option<BTreeMap<String, AmqpValue>>,
    pub body: Option<Body>,
}

impl WireMessage {
    /// Create a message carrying a single `amqp-value` body.
    pub fn with_value(value: impl Into<AmqpValue>) -> Self {
        // ---
        Self {
            body: Some(Body::Value(value.into())),
            ..Self::default()
        }
    }

    /// Properties section, created empty on first use.
    pub fn properties_mut(&mut self) -> &mut Properties {
        self.properties.get_or_insert_with(Properties::default)
    }

    pub fn message_id(&self) -> Option<&MessageId> {
        self.properties.as_ref()?.message_id.as_ref()
    }

    pub fn correlation_id(&self) -> Option<&MessageId> {
        self.properties.as_ref()?.correlation_id.as_ref()
    }

    pub fn reply_to(&self) -> Option<&str> {
        self.properties.as_ref()?.reply_to.as_deref()
    }

    pub fn to(&self) -> Option<&str> {
        self.properties.as_ref()?.to.as_deref()
    }
}
