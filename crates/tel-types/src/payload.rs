use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::TypeError;

/// Caller-supplied business content notarized by a ledger entry: a mapping
/// of named fields (an audit description, an evidence digest, a governance
/// action).
///
/// The ledger treats the payload as opaque; only the canonical hasher looks
/// inside it.
pub type Payload = Map<String, Value>;

/// Convert any serializable value into a [`Payload`].
///
/// Fails with [`TypeError::Serialization`] if the value cannot be serialized
/// or does not serialize to a JSON object.
pub fn payload_from<T: Serialize>(value: &T) -> Result<Payload, TypeError> {
    match serde_json::to_value(value).map_err(|e| TypeError::Serialization(e.to_string()))? {
        Value::Object(map) => Ok(map),
        other => Err(TypeError::Serialization(format!(
            "payload must be an object, got {}",
            kind_name(&other)
        ))),
    }
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[derive(Serialize)]
    struct Evidence {
        control: &'static str,
        blob_digest: &'static str,
    }

    #[test]
    fn struct_becomes_payload() {
        let payload = payload_from(&Evidence {
            control: "AC-2",
            blob_digest: "abc",
        })
        .unwrap();
        assert_eq!(payload["control"], "AC-2");
        assert_eq!(payload.len(), 2);
    }

    #[test]
    fn non_object_is_rejected() {
        let err = payload_from(&vec![1, 2, 3]).unwrap_err();
        assert!(matches!(err, TypeError::Serialization(msg) if msg.contains("array")));
    }

    #[test]
    fn non_string_keys_are_rejected() {
        let mut map = HashMap::new();
        map.insert((1, 2), "tuple key");
        assert!(matches!(
            payload_from(&map),
            Err(TypeError::Serialization(_))
        ));
    }
}
