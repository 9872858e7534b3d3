//! Bus-level message representation.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{BridgeError, Result};

/// Field names of the generic message document.
///
/// Names and defaults are part of the bridge's external contract; peers that
/// exchange this schema depend on them matching exactly.
pub mod keys {
    pub const BODY: &str = "body";
    pub const BODY_TYPE: &str = "body_type";
    pub const HEADER: &str = "header";
    pub const PROPERTIES: &str = "properties";
    pub const APPLICATION_PROPERTIES: &str = "application_properties";
    pub const MESSAGE_ANNOTATIONS: &str = "message_annotations";

    pub const BODY_TYPE_VALUE: &str = "value";
    pub const BODY_TYPE_DATA: &str = "data";
    pub const BODY_TYPE_SEQUENCE: &str = "sequence";

    pub const HEADER_DURABLE: &str = "durable";
    pub const HEADER_PRIORITY: &str = "priority";
    pub const HEADER_TTL: &str = "ttl";
    pub const HEADER_FIRST_ACQUIRER: &str = "first_acquirer";
    pub const HEADER_DELIVERY_COUNT: &str = "delivery_count";

    pub const PROPERTIES_TO: &str = "to";
    pub const PROPERTIES_REPLY_TO: &str = "reply_to";
    pub const PROPERTIES_MESSAGE_ID: &str = "message_id";
    pub const PROPERTIES_CORRELATION_ID: &str = "correlation_id";
    pub const PROPERTIES_SUBJECT: &str = "subject";
    pub const PROPERTIES_GROUP_ID: &str = "group_id";
    pub const PROPERTIES_GROUP_SEQUENCE: &str = "group_sequence";
    pub const PROPERTIES_REPLY_TO_GROUP_ID: &str = "reply_to_group_id";
    pub const PROPERTIES_CONTENT_TYPE: &str = "content_type";
    pub const PROPERTIES_CONTENT_ENCODING: &str = "content_encoding";
    pub const PROPERTIES_CREATION_TIME: &str = "creation_time";
    pub const PROPERTIES_ABSOLUTE_EXPIRY_TIME: &str = "absolute_expiry_time";
    pub const PROPERTIES_USER_ID: &str = "user_id";

    /// Every top-level key the codec accepts.
    pub const TOP_LEVEL: [&str; 6] = [
        BODY,
        BODY_TYPE,
        HEADER,
        PROPERTIES,
        APPLICATION_PROPERTIES,
        MESSAGE_ANNOTATIONS,
    ];
}

/// The protocol-neutral message exchanged with the pub/sub bus.
///
/// A JSON object whose top-level keys are drawn from [`keys::TOP_LEVEL`].
/// The type itself does not enforce the schema; [`MessageCodec::from_generic`]
/// does, so applications can build documents incrementally.
///
/// [`MessageCodec::from_generic`]: crate::MessageCodec::from_generic
///
/// # Example
///
/// ```
/// use amqp_bridge::GenericMessage;
/// use serde_json::json;
///
/// let msg = GenericMessage::with_body("hello")
///     .with_property("subject", "greeting");
///
/// assert_eq!(msg.body(), Some(&json!("hello")));
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GenericMessage(Map<String, Value>);

impl GenericMessage {
    /// An empty document.
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// A document with only a `body`, sent as an `amqp-value`.
    pub fn with_body(body: impl Into<Value>) -> Self {
        // ---
        let mut map = Map::new();
        map.insert(keys::BODY.to_string(), body.into());
        Self(map)
    }

    /// Wrap an arbitrary JSON value, which must be an object.
    pub fn from_value(value: Value) -> Result<Self> {
        // ---
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(BridgeError::Codec(format!(
                "generic message must be a JSON object, got {}",
                super::value::kind(&other)
            ))),
        }
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn as_map_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.0
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    pub fn body(&self) -> Option<&Value> {
        self.0.get(keys::BODY)
    }

    /// The declared body type, `"value"` when absent.
    pub fn body_type(&self) -> Option<&str> {
        // ---
        match self.0.get(keys::BODY_TYPE) {
            None => Some(keys::BODY_TYPE_VALUE),
            Some(v) => v.as_str(),
        }
    }

    pub fn header(&self) -> Option<&Map<String, Value>> {
        self.0.get(keys::HEADER).and_then(Value::as_object)
    }

    pub fn properties(&self) -> Option<&Map<String, Value>> {
        self.0.get(keys::PROPERTIES).and_then(Value::as_object)
    }

    pub fn application_properties(&self) -> Option<&Map<String, Value>> {
        self.0
            .get(keys::APPLICATION_PROPERTIES)
            .and_then(Value::as_object)
    }

    pub fn message_annotations(&self) -> Option<&Map<String, Value>> {
        self.0
            .get(keys::MESSAGE_ANNOTATIONS)
            .and_then(Value::as_object)
    }

    /// Look up one entry of the `properties` object.
    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties()?.get(name)
    }

    /// Set one entry of the `properties` object, creating it if needed.
    ///
    /// A non-object `properties` value is replaced.
    pub fn set_property(&mut self, name: &str, value: impl Into<Value>) {
        // ---
        let props = self
            .0
            .entry(keys::PROPERTIES)
            .or_insert_with(|| Value::Object(Map::new()));

        if !props.is_object() {
            *props = Value::Object(Map::new());
        }
        if let Value::Object(map) = props {
            map.insert(name.to_string(), value.into());
        }
    }

    /// Builder form of [`set_property`](Self::set_property).
    pub fn with_property(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.set_property(name, value);
        self
    }
}

impl GenericMessage {
    /// Parse a document from JSON text, as carried on the bus.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Serialization`] if `text` is not valid JSON,
    /// [`BridgeError::Codec`] if it is not an object.
    pub fn from_json(text: &str) -> Result<Self> {
        // ---
        let value: Value = serde_json::from_str(text)?;
        Self::from_value(value)
    }

    /// Render the document as JSON text.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.0)?)
    }
}

impl From<Map<String, Value>> for GenericMessage {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl TryFrom<Value> for GenericMessage {
    type Error = BridgeError;

    fn try_from(value: Value) -> Result<Self> {
        Self::from_value(value)
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use serde_json::json;

    #[test]
    fn body_type_defaults_to_value() {
        // ---
        let msg = GenericMessage::with_body(1);
        assert_eq!(msg.body_type(), Some("value"));

        let mut msg = msg;
        msg.insert(keys::BODY_TYPE, "data");
        assert_eq!(msg.body_type(), Some("data"));

        msg.insert(keys::BODY_TYPE, 7);
        assert_eq!(msg.body_type(), None);
    }

    #[test]
    fn set_property_creates_and_replaces_section() {
        // ---
        let mut msg = GenericMessage::from_value(json!({ "properties": 5 })).unwrap();
        msg.set_property("subject", "s");
        assert_eq!(msg.property("subject"), Some(&json!("s")));
    }

    #[test]
    fn from_value_requires_object() {
        // ---
        assert!(GenericMessage::from_value(json!("text")).is_err());
        assert!(GenericMessage::from_value(json!({})).is_ok());
    }

    #[test]
    fn json_text_parsing() {
        // ---
        let msg = GenericMessage::from_json(r#"{"body":"x","properties":{"subject":"s"}}"#).unwrap();
        assert_eq!(msg.body(), Some(&json!("x")));
        assert_eq!(msg.to_json().unwrap(), r#"{"body":"x","properties":{"subject":"s"}}"#);

        assert!(matches!(
            GenericMessage::from_json("{not json"),
            Err(BridgeError::Serialization(_))
        ));
        assert!(matches!(
            GenericMessage::from_json("[1, 2]"),
            Err(BridgeError::Codec(_))
        ));
    }

    #[test]
    fn serializes_transparently() {
        // ---
        let msg = GenericMessage::with_body("x");
        assert_eq!(serde_json::to_value(&msg).unwrap(), json!({ "body": "x" }));
    }
}
