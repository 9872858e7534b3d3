//! Bidirectional translation between [`WireMessage`] and [`GenericMessage`].
//!
//! The codec is stateless. Each AMQP section maps onto one top-level key of
//! the generic document:
//!
//! | wire section              | generic key              |
//! |---------------------------|--------------------------|
//! | body                      | `body` + `body_type`     |
//! | header                    | `header`                 |
//! | properties                | `properties`             |
//! | application-properties    | `application_properties` |
//! | message-annotations       | `message_annotations`    |
//!
//! ## Body encodings
//!
//! - `"value"` (default, omitted when decoding): `body` is any JSON value.
//! - `"data"`: `body` is the base64 (standard alphabet) rendering of the bytes.
//! - `"sequence"`: `body` is a JSON array.
//!
//! ## Unknown fields
//!
//! Keys outside the schema are rejected with [`BridgeError::Codec`], whether
//! they appear at the top level, in `header` or in `properties`.
//! `application_properties` and `message_annotations` are open maps.
//!
//! ## Canonical form
//!
//! Decoding omits default-valued fields (`durable: false`, `priority: 4`,
//! `first_acquirer: false`, `delivery_count: 0`, `body_type: "value"`). A
//! document in that form survives `to_generic(from_generic(doc))` unchanged,
//! and any wire message built from such a document survives the opposite
//! trip unchanged.

mod generic;
mod sections;
pub(crate) mod value;

pub use generic::{keys, GenericMessage};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use serde_json::Value;

use crate::{Body, BridgeError, Result, WireMessage};

/// Stateless translator between the wire model and the bus model.
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageCodec;

impl MessageCodec {
    /// Decode a wire message into its generic document. Never fails: every
    /// wire value has a JSON rendering.
    pub fn to_generic(wire: &WireMessage) -> GenericMessage {
        // ---
        let mut out = GenericMessage::new();

        match &wire.body {
            Some(Body::Value(v)) => {
                out.insert(keys::BODY, value::to_json(v));
            }
            Some(Body::Data(bytes)) => {
                out.insert(keys::BODY, STANDARD.encode(bytes));
                out.insert(keys::BODY_TYPE, keys::BODY_TYPE_DATA);
            }
            Some(Body::Sequence(items)) => {
                out.insert(
                    keys::BODY,
                    Value::Array(items.iter().map(value::to_json).collect()),
                );
                out.insert(keys::BODY_TYPE, keys::BODY_TYPE_SEQUENCE);
            }
            None => {}
        }

        if let Some(header) = &wire.header {
            out.insert(keys::HEADER, sections::header_to_json(header));
        }
        if let Some(props) = &wire.properties {
            out.insert(keys::PROPERTIES, sections::properties_to_json(props));
        }
        if let Some(app) = &wire.application_properties {
            out.insert(keys::APPLICATION_PROPERTIES, sections::map_to_json(app));
        }
        if let Some(ann) = &wire.message_annotations {
            out.insert(keys::MESSAGE_ANNOTATIONS, sections::map_to_json(ann));
        }

        out
    }

    /// Encode a generic document as a wire message, validating every field.
    pub fn from_generic(msg: &GenericMessage) -> Result<WireMessage> {
        // ---
        if let Some(unknown) = msg
            .as_map()
            .keys()
            .find(|k| !keys::TOP_LEVEL.contains(&k.as_str()))
        {
            return Err(BridgeError::Codec(format!(
                "unknown top-level field '{unknown}'"
            )));
        }

        let mut wire = WireMessage {
            body: Self::body_from_generic(msg)?,
            ..WireMessage::default()
        };

        if let Some(v) = present(msg, keys::HEADER) {
            wire.header = Some(sections::header_from_json(v)?);
        }
        if let Some(v) = present(msg, keys::PROPERTIES) {
            wire.properties = Some(sections::properties_from_json(v)?);
        }
        if let Some(v) = present(msg, keys::APPLICATION_PROPERTIES) {
            wire.application_properties = Some(sections::application_properties_from_json(v)?);
        }
        if let Some(v) = present(msg, keys::MESSAGE_ANNOTATIONS) {
            wire.message_annotations = Some(sections::annotations_from_json(v)?);
        }

        Ok(wire)
    }

    fn body_from_generic(msg: &GenericMessage) -> Result<Option<Body>> {
        // ---
        let body_type = match present(msg, keys::BODY_TYPE) {
            None => None,
            Some(Value::String(s)) => Some(s.as_str()),
            Some(other) => {
                return Err(BridgeError::Codec(format!(
                    "body_type must be a string, got {}",
                    value::kind(other)
                )))
            }
        };

        let Some(body) = msg.body() else {
            return match body_type {
                None | Some(keys::BODY_TYPE_VALUE) => Ok(None),
                Some(t) => Err(BridgeError::Codec(format!(
                    "body_type '{t}' given without a body"
                ))),
            };
        };

        match body_type.unwrap_or(keys::BODY_TYPE_VALUE) {
            keys::BODY_TYPE_VALUE => Ok(Some(Body::Value(value::from_json(body)))),
            keys::BODY_TYPE_DATA => {
                let encoded = body.as_str().ok_or_else(|| {
                    BridgeError::Codec(format!(
                        "data body must be a base64 string, got {}",
                        value::kind(body)
                    ))
                })?;
                let bytes = STANDARD
                    .decode(encoded)
                    .map_err(|e| BridgeError::Codec(format!("data body is not valid base64: {e}")))?;
                Ok(Some(Body::Data(Bytes::from(bytes))))
            }
            keys::BODY_TYPE_SEQUENCE => {
                let items = body.as_array().ok_or_else(|| {
                    BridgeError::Codec(format!(
                        "sequence body must be an array, got {}",
                        value::kind(body)
                    ))
                })?;
                Ok(Some(Body::Sequence(items.iter().map(value::from_json).collect())))
            }
            other => Err(BridgeError::Codec(format!("unknown body_type '{other}'"))),
        }
    }
}

// `null` counts as absent.
fn present<'a>(msg: &'a GenericMessage, key: &str) -> Option<&'a Value> {
    msg.get(key).filter(|v| !v.is_null())
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::{AmqpValue, Header, MessageId, Properties};
    use serde_json::json;
    use std::collections::BTreeMap;

    fn generic(value: Value) -> GenericMessage {
        GenericMessage::from_value(value).unwrap()
    }

    fn assert_generic_round_trip(doc: Value) {
        // ---
        let msg = generic(doc);
        let wire = MessageCodec::from_generic(&msg).unwrap();
        assert_eq!(MessageCodec::to_generic(&wire), msg);
        assert_eq!(MessageCodec::from_generic(&MessageCodec::to_generic(&wire)).unwrap(), wire);
    }

    #[test]
    fn value_body_round_trips() {
        // ---
        assert_generic_round_trip(json!({ "body": "hello" }));
        assert_generic_round_trip(json!({ "body": { "qty": 3, "items": ["a", 1.5, null] } }));
        assert_generic_round_trip(json!({ "body": null }));
    }

    #[test]
    fn data_body_round_trips() {
        // ---
        assert_generic_round_trip(json!({ "body": "AAEC/w==", "body_type": "data" }));

        let wire = WireMessage {
            body: Some(Body::Data(Bytes::from_static(&[0, 1, 2, 255]))),
            ..WireMessage::default()
        };
        let doc = MessageCodec::to_generic(&wire);
        assert_eq!(doc.body(), Some(&json!("AAEC/w==")));
        assert_eq!(doc.body_type(), Some("data"));
    }

    #[test]
    fn sequence_body_round_trips() {
        // ---
        assert_generic_round_trip(json!({ "body": [1, "two", [3]], "body_type": "sequence" }));
        assert_generic_round_trip(json!({ "body": [], "body_type": "sequence" }));
    }

    #[test]
    fn full_document_round_trips() {
        // ---
        assert_generic_round_trip(json!({
            "body": "payload",
            "header": { "durable": true, "priority": 9, "ttl": 60000, "first_acquirer": true },
            "properties": {
                "to": "orders",
                "reply_to": "_reply@1",
                "message_id": "m-1",
                "correlation_id": 77,
                "subject": "new-order",
                "group_id": "g",
                "group_sequence": 12,
                "reply_to_group_id": "rg",
                "content_type": "application/json",
                "content_encoding": "utf-8",
                "creation_time": 1_700_000_000_000i64,
                "absolute_expiry_time": 1_700_000_060_000i64,
                "user_id": "alice"
            },
            "application_properties": { "region": "eu", "retries": 2, "vip": false },
            "message_annotations": { "x-opt-trace": { "span": "abc" } }
        }));
    }

    #[test]
    fn wire_round_trips_for_each_body_kind() {
        // ---
        let bodies = [
            Body::Value(AmqpValue::Map(vec![(
                AmqpValue::from("k"),
                AmqpValue::List(vec![AmqpValue::Long(1), AmqpValue::Double(2.5)]),
            )])),
            Body::Data(Bytes::from_static(b"\x00binary\xff")),
            Body::Sequence(vec![AmqpValue::from("a"), AmqpValue::Null]),
        ];

        for body in bodies {
            let wire = WireMessage {
                header: Some(Header {
                    durable: true,
                    ttl: Some(5),
                    ..Header::default()
                }),
                properties: Some(Properties {
                    message_id: Some(MessageId::from("id-1")),
                    subject: Some("s".into()),
                    ..Properties::default()
                }),
                application_properties: Some(BTreeMap::from([(
                    "k".to_string(),
                    AmqpValue::Long(1),
                )])),
                message_annotations: Some(BTreeMap::new()),
                body: Some(body),
            };

            let doc = MessageCodec::to_generic(&wire);
            assert_eq!(MessageCodec::from_generic(&doc).unwrap(), wire);
        }
    }

    #[test]
    fn header_defaults_apply_and_are_omitted() {
        // ---
        let wire = MessageCodec::from_generic(&generic(json!({ "header": {} }))).unwrap();
        assert_eq!(wire.header, Some(Header::default()));
        assert_eq!(wire.header.as_ref().map(|h| h.priority), Some(4));

        let doc = MessageCodec::to_generic(&wire);
        assert_eq!(doc.header(), Some(&serde_json::Map::new()));
    }

    #[test]
    fn explicit_defaults_decode_to_canonical_form() {
        // ---
        let explicit = generic(json!({
            "body": "x",
            "body_type": "value",
            "header": {
                "durable": false,
                "priority": 4,
                "first_acquirer": false,
                "delivery_count": 0,
            },
        }));
        let wire = MessageCodec::from_generic(&explicit).unwrap();

        let canonical = generic(json!({ "body": "x", "header": {} }));
        assert_eq!(MessageCodec::to_generic(&wire), canonical);
        assert_eq!(MessageCodec::from_generic(&canonical).unwrap(), wire);
    }

    #[test]
    fn delivery_count_is_receive_only() {
        // ---
        let inbound = WireMessage {
            header: Some(Header {
                delivery_count: 3,
                ..Header::default()
            }),
            ..WireMessage::default()
        };
        let doc = MessageCodec::to_generic(&inbound);
        assert_eq!(doc.header().and_then(|h| h.get("delivery_count")), Some(&json!(3)));

        let outbound = MessageCodec::from_generic(&doc).unwrap();
        assert_eq!(outbound.header.map(|h| h.delivery_count), Some(0));

        let bad = generic(json!({ "header": { "delivery_count": "3" } }));
        assert!(matches!(MessageCodec::from_generic(&bad), Err(BridgeError::Codec(_))));
    }

    #[test]
    fn absent_sections_stay_absent() {
        // ---
        let wire = MessageCodec::from_generic(&GenericMessage::new()).unwrap();
        assert_eq!(wire, WireMessage::default());
        assert!(MessageCodec::to_generic(&wire).as_map().is_empty());
    }

    #[test]
    fn null_fields_count_as_absent() {
        // ---
        let doc = generic(json!({ "body": 1, "header": null, "properties": { "subject": null } }));
        let wire = MessageCodec::from_generic(&doc).unwrap();
        assert_eq!(wire.header, None);
        assert_eq!(wire.properties, Some(Properties::default()));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        // ---
        for doc in [
            json!({ "body": 1, "extra": true }),
            json!({ "header": { "urgent": true } }),
            json!({ "properties": { "reply-to": "x" } }),
        ] {
            let err = MessageCodec::from_generic(&generic(doc)).unwrap_err();
            assert!(err.to_string().contains("unknown"), "{err}");
        }
    }

    #[test]
    fn mistyped_fields_are_rejected() {
        // ---
        for doc in [
            json!({ "header": { "durable": "yes" } }),
            json!({ "header": { "priority": 256 } }),
            json!({ "header": { "ttl": -1 } }),
            json!({ "header": 3 }),
            json!({ "properties": { "to": 5 } }),
            json!({ "properties": { "message_id": -4 } }),
            json!({ "properties": { "message_id": true } }),
            json!({ "properties": { "group_sequence": 4_294_967_296u64 } }),
            json!({ "properties": { "creation_time": "now" } }),
            json!({ "application_properties": { "nested": { "a": 1 } } }),
            json!({ "message_annotations": [] }),
            json!({ "body": 1, "body_type": 1 }),
        ] {
            let result = MessageCodec::from_generic(&generic(doc.clone()));
            assert!(matches!(result, Err(BridgeError::Codec(_))), "accepted {doc}");
        }
    }

    #[test]
    fn body_type_validation() {
        // ---
        let bad_kind = generic(json!({ "body": "x", "body_type": "stream" }));
        assert!(MessageCodec::from_generic(&bad_kind).is_err());

        let bad_data = generic(json!({ "body": "***", "body_type": "data" }));
        assert!(MessageCodec::from_generic(&bad_data).is_err());

        let data_not_string = generic(json!({ "body": [1], "body_type": "data" }));
        assert!(MessageCodec::from_generic(&data_not_string).is_err());

        let seq_not_array = generic(json!({ "body": "x", "body_type": "sequence" }));
        assert!(MessageCodec::from_generic(&seq_not_array).is_err());

        let missing_body = generic(json!({ "body_type": "data" }));
        assert!(MessageCodec::from_generic(&missing_body).is_err());
    }

    #[test]
    fn message_ids_keep_their_kind() {
        // ---
        let doc = generic(json!({ "properties": { "message_id": "abc", "correlation_id": 9 } }));
        let wire = MessageCodec::from_generic(&doc).unwrap();
        assert_eq!(wire.message_id(), Some(&MessageId::String("abc".into())));
        assert_eq!(wire.correlation_id(), Some(&MessageId::Ulong(9)));
    }

    #[test]
    fn user_id_is_utf8_binary() {
        // ---
        let doc = generic(json!({ "properties": { "user_id": "bob" } }));
        let wire = MessageCodec::from_generic(&doc).unwrap();
        assert_eq!(
            wire.properties.and_then(|p| p.user_id),
            Some(Bytes::from_static(b"bob"))
        );
    }
}
