use std::borrow::Borrow;
use std::fmt;
use uuid::Uuid;

use crate::MessageId;

/// Key used to match an inbound reply to its pending registration.
///
/// The bridge stamps a freshly generated id on each outgoing request as its
/// `message-id`; a compatible peer copies it into the reply's
/// `correlation-id`. The key is the string rendering of that id, so a peer
/// that echoes it back as a UUID or ulong still matches.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Generate a new globally unique id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Borrow the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The id as carried in the AMQP `message-id` property.
    pub fn to_message_id(&self) -> MessageId {
        MessageId::String(self.0.clone())
    }
}

impl From<String> for CorrelationId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for CorrelationId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<&MessageId> for CorrelationId {
    fn from(value: &MessageId) -> Self {
        Self(value.to_string())
    }
}

impl Borrow<str> for CorrelationId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
