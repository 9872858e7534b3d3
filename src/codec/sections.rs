//! Header, properties and map sections.
//!
//! Decoding emits only non-default header fields so that a document built
//! from defaults round-trips without growing extra keys. Encoding rejects
//! subfields outside the schema and treats JSON `null` as absent.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use serde_json::{Map, Value};

use super::generic::keys;
use super::value;
use crate::{AmqpValue, BridgeError, Header, MessageId, Properties, Result, DEFAULT_PRIORITY};

// --------------------
// header
// --------------------

pub(super) fn header_to_json(header: &Header) -> Value {
    // ---
    let mut map = Map::new();

    if header.durable {
        map.insert(keys::HEADER_DURABLE.into(), Value::Bool(true));
    }
    if header.priority != DEFAULT_PRIORITY {
        map.insert(keys::HEADER_PRIORITY.into(), Value::from(header.priority));
    }
    if let Some(ttl) = header.ttl {
        map.insert(keys::HEADER_TTL.into(), Value::from(ttl));
    }
    if header.first_acquirer {
        map.insert(keys::HEADER_FIRST_ACQUIRER.into(), Value::Bool(true));
    }
    if header.delivery_count > 0 {
        map.insert(
            keys::HEADER_DELIVERY_COUNT.into(),
            Value::from(header.delivery_count),
        );
    }

    Value::Object(map)
}

pub(super) fn header_from_json(value: &Value) -> Result<Header> {
    // ---
    let map = section(keys::HEADER, value)?;
    let mut header = Header::default();

    for (name, field) in map {
        if field.is_null() {
            continue;
        }
        match name.as_str() {
            keys::HEADER_DURABLE => header.durable = boolean(keys::HEADER, name, field)?,
            keys::HEADER_PRIORITY => header.priority = unsigned(keys::HEADER, name, field)?,
            keys::HEADER_TTL => header.ttl = Some(unsigned(keys::HEADER, name, field)?),
            keys::HEADER_FIRST_ACQUIRER => {
                header.first_acquirer = boolean(keys::HEADER, name, field)?
            }
            keys::HEADER_DELIVERY_COUNT => {
                // receive-only: validated, never transmitted
                let _: u32 = unsigned(keys::HEADER, name, field)?;
            }
            other => return Err(unknown(keys::HEADER, other)),
        }
    }

    Ok(header)
}

// --------------------
// properties
// --------------------

pub(super) fn properties_to_json(props: &Properties) -> Value {
    // ---
    let mut map = Map::new();

    let mut put_str = |key: &str, v: &Option<String>| {
        if let Some(s) = v {
            map.insert(key.to_string(), Value::String(s.clone()));
        }
    };
    put_str(keys::PROPERTIES_TO, &props.to);
    put_str(keys::PROPERTIES_REPLY_TO, &props.reply_to);
    put_str(keys::PROPERTIES_SUBJECT, &props.subject);
    put_str(keys::PROPERTIES_GROUP_ID, &props.group_id);
    put_str(keys::PROPERTIES_REPLY_TO_GROUP_ID, &props.reply_to_group_id);
    put_str(keys::PROPERTIES_CONTENT_TYPE, &props.content_type);
    put_str(keys::PROPERTIES_CONTENT_ENCODING, &props.content_encoding);

    if let Some(id) = &props.message_id {
        map.insert(keys::PROPERTIES_MESSAGE_ID.into(), message_id_to_json(id));
    }
    if let Some(id) = &props.correlation_id {
        map.insert(keys::PROPERTIES_CORRELATION_ID.into(), message_id_to_json(id));
    }
    if let Some(seq) = props.group_sequence {
        map.insert(keys::PROPERTIES_GROUP_SEQUENCE.into(), Value::from(seq));
    }
    if let Some(t) = props.creation_time {
        map.insert(keys::PROPERTIES_CREATION_TIME.into(), Value::from(t));
    }
    if let Some(t) = props.absolute_expiry_time {
        map.insert(keys::PROPERTIES_ABSOLUTE_EXPIRY_TIME.into(), Value::from(t));
    }
    if let Some(user) = &props.user_id {
        map.insert(
            keys::PROPERTIES_USER_ID.into(),
            Value::String(String::from_utf8_lossy(user).into_owned()),
        );
    }

    Value::Object(map)
}

pub(super) fn properties_from_json(value: &Value) -> Result<Properties> {
    // ---
    let map = section(keys::PROPERTIES, value)?;
    let mut props = Properties::default();
    let p = keys::PROPERTIES;

    for (name, field) in map {
        if field.is_null() {
            continue;
        }
        match name.as_str() {
            keys::PROPERTIES_TO => props.to = Some(string(p, name, field)?),
            keys::PROPERTIES_REPLY_TO => props.reply_to = Some(string(p, name, field)?),
            keys::PROPERTIES_SUBJECT => props.subject = Some(string(p, name, field)?),
            keys::PROPERTIES_GROUP_ID => props.group_id = Some(string(p, name, field)?),
            keys::PROPERTIES_REPLY_TO_GROUP_ID => {
                props.reply_to_group_id = Some(string(p, name, field)?)
            }
            keys::PROPERTIES_CONTENT_TYPE => props.content_type = Some(string(p, name, field)?),
            keys::PROPERTIES_CONTENT_ENCODING => {
                props.content_encoding = Some(string(p, name, field)?)
            }
            keys::PROPERTIES_MESSAGE_ID => props.message_id = Some(message_id(name, field)?),
            keys::PROPERTIES_CORRELATION_ID => {
                props.correlation_id = Some(message_id(name, field)?)
            }
            keys::PROPERTIES_GROUP_SEQUENCE => {
                props.group_sequence = Some(unsigned(p, name, field)?)
            }
            keys::PROPERTIES_CREATION_TIME => props.creation_time = Some(signed(p, name, field)?),
            keys::PROPERTIES_ABSOLUTE_EXPIRY_TIME => {
                props.absolute_expiry_time = Some(signed(p, name, field)?)
            }
            keys::PROPERTIES_USER_ID => {
                props.user_id = Some(Bytes::from(string(p, name, field)?.into_bytes()))
            }
            other => return Err(unknown(p, other)),
        }
    }

    Ok(props)
}

fn message_id_to_json(id: &MessageId) -> Value {
    // ---
    match id {
        MessageId::String(s) => Value::String(s.clone()),
        MessageId::Ulong(n) => Value::from(*n),
        MessageId::Uuid(u) => Value::String(u.to_string()),
        MessageId::Binary(b) => Value::String(STANDARD.encode(b)),
    }
}

fn message_id(name: &str, field: &Value) -> Result<MessageId> {
    // ---
    match field {
        Value::String(s) => Ok(MessageId::String(s.clone())),
        Value::Number(n) => n.as_u64().map(MessageId::Ulong).ok_or_else(|| {
            BridgeError::Codec(format!(
                "properties.{name} must be a string or unsigned integer, got {n}"
            ))
        }),
        other => Err(mismatch(keys::PROPERTIES, name, "string or unsigned integer", other)),
    }
}

// --------------------
// application_properties / message_annotations
// --------------------

pub(super) fn map_to_json(map: &BTreeMap<String, AmqpValue>) -> Value {
    Value::Object(
        map.iter()
            .map(|(k, v)| (k.clone(), value::to_json(v)))
            .collect(),
    )
}

pub(super) fn application_properties_from_json(
    value: &Value,
) -> Result<BTreeMap<String, AmqpValue>> {
    // ---
    section(keys::APPLICATION_PROPERTIES, value)?
        .iter()
        .map(|(k, v)| Ok((k.clone(), value::simple_from_json(k, v)?)))
        .collect()
}

pub(super) fn annotations_from_json(value: &Value) -> Result<BTreeMap<String, AmqpValue>> {
    // ---
    Ok(section(keys::MESSAGE_ANNOTATIONS, value)?
        .iter()
        .map(|(k, v)| (k.clone(), value::from_json(v)))
        .collect())
}

// --------------------
// field readers
// --------------------

fn section<'a>(name: &str, value: &'a Value) -> Result<&'a Map<String, Value>> {
    value
        .as_object()
        .ok_or_else(|| BridgeError::Codec(format!("'{name}' must be an object, got {}", value::kind(value))))
}

fn boolean(section: &str, name: &str, field: &Value) -> Result<bool> {
    field
        .as_bool()
        .ok_or_else(|| mismatch(section, name, "boolean", field))
}

fn string(section: &str, name: &str, field: &Value) -> Result<String> {
    field
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| mismatch(section, name, "string", field))
}

fn signed(section: &str, name: &str, field: &Value) -> Result<i64> {
    field
        .as_i64()
        .ok_or_else(|| mismatch(section, name, "integer", field))
}

/// Unsigned integer that must fit the wire type `T`.
fn unsigned<T: TryFrom<u64>>(section: &str, name: &str, field: &Value) -> Result<T> {
    // ---
    let n = field
        .as_u64()
        .ok_or_else(|| mismatch(section, name, "unsigned integer", field))?;

    T::try_from(n).map_err(|_| {
        BridgeError::Codec(format!(
            "{section}.{name} value {n} is out of range"
        ))
    })
}

fn mismatch(section: &str, name: &str, expected: &str, got: &Value) -> BridgeError {
    BridgeError::Codec(format!(
        "{section}.{name} must be {expected}, got {}",
        value::kind(got)
    ))
}

fn unknown(section: &str, name: &str) -> BridgeError {
    BridgeError::Codec(format!("unknown field '{name}' in {section}"))
}
