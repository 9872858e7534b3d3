//! AMQP typed values ⇄ JSON values.
//!
//! JSON-native values survive a round trip unchanged: integers travel as
//! `long` (or `ulong` beyond `i64::MAX`), other numbers as `double`, arrays
//! as `list` and objects as string-keyed `map`. AMQP types without a JSON
//! counterpart decode to their natural rendering and come back as the
//! corresponding JSON-native type.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{Map, Number, Value};

use crate::{AmqpValue, BridgeError, Result};

/// Render an AMQP value as JSON.
pub(crate) fn to_json(value: &AmqpValue) -> Value {
    // ---
    match value {
        AmqpValue::Null => Value::Null,
        AmqpValue::Bool(b) => Value::Bool(*b),
        AmqpValue::Ubyte(n) => Value::from(*n),
        AmqpValue::Ushort(n) => Value::from(*n),
        AmqpValue::Uint(n) => Value::from(*n),
        AmqpValue::Ulong(n) => Value::from(*n),
        AmqpValue::Byte(n) => Value::from(*n),
        AmqpValue::Short(n) => Value::from(*n),
        AmqpValue::Int(n) => Value::from(*n),
        AmqpValue::Long(n) => Value::from(*n),
        AmqpValue::Float(f) => float_to_json(f64::from(*f)),
        AmqpValue::Double(f) => float_to_json(*f),
        AmqpValue::Char(c) => Value::String(c.to_string()),
        AmqpValue::Timestamp(ms) => Value::from(*ms),
        AmqpValue::Uuid(u) => Value::String(u.to_string()),
        AmqpValue::Binary(b) => Value::String(STANDARD.encode(b)),
        AmqpValue::String(s) | AmqpValue::Symbol(s) => Value::String(s.clone()),
        AmqpValue::List(items) | AmqpValue::Array(items) => {
            Value::Array(items.iter().map(to_json).collect())
        }
        AmqpValue::Map(entries) => {
            let mut map = Map::with_capacity(entries.len());
            for (key, value) in entries {
                map.insert(map_key(key), to_json(value));
            }
            Value::Object(map)
        }
    }
}

/// Build an AMQP value from JSON.
pub(crate) fn from_json(value: &Value) -> AmqpValue {
    // ---
    match value {
        Value::Null => AmqpValue::Null,
        Value::Bool(b) => AmqpValue::Bool(*b),
        Value::Number(n) => number_to_amqp(n),
        Value::String(s) => AmqpValue::String(s.clone()),
        Value::Array(items) => AmqpValue::List(items.iter().map(from_json).collect()),
        Value::Object(map) => AmqpValue::Map(
            map.iter()
                .map(|(k, v)| (AmqpValue::String(k.clone()), from_json(v)))
                .collect(),
        ),
    }
}

/// Build a simple (non-compound) AMQP value, as required for
/// `application-properties` entries.
pub(crate) fn simple_from_json(field: &str, value: &Value) -> Result<AmqpValue> {
    // ---
    match value {
        Value::Array(_) | Value::Object(_) => Err(BridgeError::Codec(format!(
            "application property '{field}' must be a simple value, got {}",
            kind(value)
        ))),
        other => Ok(from_json(other)),
    }
}

/// Short type name for error messages.
pub(crate) fn kind(value: &Value) -> &'static str {
    // ---
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn number_to_amqp(n: &Number) -> AmqpValue {
    // ---
    if let Some(i) = n.as_i64() {
        AmqpValue::Long(i)
    } else if let Some(u) = n.as_u64() {
        AmqpValue::Ulong(u)
    } else {
        AmqpValue::Double(n.as_f64().unwrap_or(f64::NAN))
    }
}

// NaN and infinities have no JSON form.
fn float_to_json(f: f64) -> Value {
    Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
}

fn map_key(key: &AmqpValue) -> String {
    // ---
    match key {
        AmqpValue::String(s) | AmqpValue::Symbol(s) => s.clone(),
        other => to_json(other).to_string(),
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use bytes::Bytes;
    use serde_json::json;

    #[test]
    fn json_native_values_round_trip() {
        // ---
        let doc = json!({
            "name": "widget",
            "count": 3,
            "big": u64::MAX,
            "ratio": 0.5,
            "tags": ["a", "b", null, true],
            "nested": { "z": 1, "a": [] }
        });

        let amqp = from_json(&doc);
        assert_eq!(to_json(&amqp), doc);
        assert_eq!(from_json(&to_json(&amqp)), amqp);
    }

    #[test]
    fn object_keys_keep_wire_order() {
        // ---
        let amqp = AmqpValue::Map(vec![
            (AmqpValue::from("zeta"), AmqpValue::Long(1)),
            (AmqpValue::from("alpha"), AmqpValue::Long(2)),
        ]);

        assert_eq!(from_json(&to_json(&amqp)), amqp);
    }

    #[test]
    fn non_json_types_render_naturally() {
        // ---
        assert_eq!(to_json(&AmqpValue::Symbol("x".into())), json!("x"));
        assert_eq!(to_json(&AmqpValue::Int(-7)), json!(-7));
        assert_eq!(to_json(&AmqpValue::Timestamp(1_000)), json!(1_000));
        assert_eq!(to_json(&AmqpValue::Char('q')), json!("q"));
        assert_eq!(
            to_json(&AmqpValue::Binary(Bytes::from_static(b"hi"))),
            json!("aGk=")
        );
        assert_eq!(to_json(&AmqpValue::Double(f64::NAN)), Value::Null);
    }

    #[test]
    fn non_string_map_keys_are_stringified() {
        // ---
        let amqp = AmqpValue::Map(vec![(AmqpValue::Int(1), AmqpValue::Bool(true))]);
        assert_eq!(to_json(&amqp), json!({ "1": true }));
    }

    #[test]
    fn simple_values_reject_compounds() {
        // ---
        assert!(simple_from_json("k", &json!("v")).is_ok());
        assert!(matches!(
            simple_from_json("k", &json!([1])),
            Err(BridgeError::Codec(_))
        ));
        assert!(matches!(
            simple_from_json("k", &json!({})),
            Err(BridgeError::Codec(_))
        ));
    }
}
