//! Message envelope codec
//!
//! Commands travel as JSON objects in the protobuf-JSON dialect spoken by the
//! gateway: lowerCamelCase keys, 64-bit integers written as strings, unset
//! fields omitted. Decoding is lenient about key casing and integer
//! representation but strict about shape: unknown keys are rejected, so a
//! payload never decodes silently as the wrong entity or operation.
//!
//! The envelope carries no schema tag. The caller picks the decode target
//! from the topic the bytes arrived on.

use std::fmt;

use bytes::Bytes;
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};

use super::command::{EntityKind, FieldMap, FieldValue, MutationCommand, Operation, Route};
use super::error::{RelayError, Result};

// ===== Wire Integers =====

/// int64 in protobuf-JSON form: written as a string, read from a string or number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct WireInt(i64);

impl Serialize for WireInt {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for WireInt {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct WireIntVisitor;

        impl<'de> Visitor<'de> for WireIntVisitor {
            type Value = WireInt;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a 64-bit integer or a numeric string")
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<WireInt, E> {
                Ok(WireInt(v))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<WireInt, E> {
                i64::try_from(v)
                    .map(WireInt)
                    .map_err(|_| E::custom(format!("integer {} out of range", v)))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<WireInt, E> {
                v.parse::<i64>()
                    .map(WireInt)
                    .map_err(|_| E::custom(format!("'{}' is not a 64-bit integer", v)))
            }
        }

        deserializer.deserialize_any(WireIntVisitor)
    }
}

// ===== Envelopes =====

/// Post update: `{"id":"42","userId":"7","title":"New","content":"..."}`
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct PostUpdateEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<WireInt>,
    #[serde(default, alias = "user_id", skip_serializing_if = "Option::is_none")]
    user_id: Option<WireInt>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content: Option<String>,
}

/// Log update: `{"id":"3","level":"warn","message":"...","serviceName":"auth"}`
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct LogUpdateEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<WireInt>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(default, alias = "service_name", skip_serializing_if = "Option::is_none")]
    service_name: Option<String>,
}

/// Delete of either entity: `{"id":"7"}`
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct IdEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<WireInt>,
}

fn text(fields: &FieldMap, name: &str) -> Option<String> {
    fields.get(name).and_then(FieldValue::as_text).map(str::to_string)
}

fn integer(fields: &FieldMap, name: &str) -> Option<WireInt> {
    fields.get(name).and_then(FieldValue::as_integer).map(WireInt)
}

fn put_text(fields: &mut FieldMap, name: &str, value: Option<String>) {
    if let Some(v) = value {
        fields.insert(name.to_string(), FieldValue::Text(v));
    }
}

// ===== Encode / Decode =====

/// Encode a command into its wire payload
///
/// Fails with `UnsupportedCommand` when the target id is absent, a delete
/// carries fields, or a field does not belong to the entity schema.
pub fn encode(command: &MutationCommand) -> Result<Bytes> {
    if !command.has_target() {
        return Err(RelayError::UnsupportedCommand(format!(
            "{} requires a positive target id, got {}",
            command.route(),
            command.target_id
        )));
    }
    command.check_fields()?;

    let id = Some(WireInt(command.target_id));
    let fields = &command.fields;

    let json = match (command.entity, command.operation) {
        (_, Operation::Delete) => {
            if !fields.is_empty() {
                return Err(RelayError::UnsupportedCommand(format!(
                    "{} carries no fields, got {}",
                    command.route(),
                    fields.len()
                )));
            }
            serde_json::to_vec(&IdEnvelope { id })
        }
        (EntityKind::Post, Operation::Update) => serde_json::to_vec(&PostUpdateEnvelope {
            id,
            user_id: integer(fields, "user_id"),
            title: text(fields, "title"),
            content: text(fields, "content"),
        }),
        (EntityKind::Log, Operation::Update) => serde_json::to_vec(&LogUpdateEnvelope {
            id,
            level: text(fields, "level"),
            message: text(fields, "message"),
            service_name: text(fields, "service_name"),
        }),
    }
    .map_err(|e| RelayError::UnsupportedCommand(format!("serialization failed: {}", e)))?;

    Ok(Bytes::from(json))
}

/// Decode a payload that arrived on `route`'s topic
///
/// Any payload that is not the envelope shape for `route`, or that lacks a
/// positive id, is `MalformedEnvelope`.
pub fn decode(route: Route, payload: &[u8]) -> Result<MutationCommand> {
    let topic = route.topic();
    let malformed = |e: serde_json::Error| RelayError::malformed(topic, e);

    let (id, fields) = match (route.entity, route.operation) {
        (_, Operation::Delete) => {
            let env: IdEnvelope = serde_json::from_slice(payload).map_err(malformed)?;
            (env.id, FieldMap::new())
        }
        (EntityKind::Post, Operation::Update) => {
            let env: PostUpdateEnvelope = serde_json::from_slice(payload).map_err(malformed)?;
            let mut fields = FieldMap::new();
            if let Some(WireInt(user_id)) = env.user_id {
                fields.insert("user_id".to_string(), FieldValue::Integer(user_id));
            }
            put_text(&mut fields, "title", env.title);
            put_text(&mut fields, "content", env.content);
            (env.id, fields)
        }
        (EntityKind::Log, Operation::Update) => {
            let env: LogUpdateEnvelope = serde_json::from_slice(payload).map_err(malformed)?;
            let mut fields = FieldMap::new();
            put_text(&mut fields, "level", env.level);
            put_text(&mut fields, "message", env.message);
            put_text(&mut fields, "service_name", env.service_name);
            (env.id, fields)
        }
    };

    let target_id = match id {
        Some(WireInt(v)) if v > 0 => v,
        Some(WireInt(v)) => {
            return Err(RelayError::malformed(
                topic,
                format!("id must be positive, got {}", v),
            ))
        }
        None => return Err(RelayError::malformed(topic, "missing id")),
    };

    Ok(MutationCommand {
        entity: route.entity,
        operation: route.operation,
        target_id,
        fields,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post_update() -> Route {
        Route::new(EntityKind::Post, Operation::Update)
    }

    fn log_delete() -> Route {
        Route::new(EntityKind::Log, Operation::Delete)
    }

    #[test]
    fn test_encode_post_update_wire_shape() {
        let cmd = MutationCommand::update(EntityKind::Post, 42)
            .with_field("title", "New")
            .with_field("user_id", 7);
        let bytes = encode(&cmd).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"id": "42", "userId": "7", "title": "New"})
        );
    }

    #[test]
    fn test_encode_omits_unset_keeps_empty() {
        let cmd = MutationCommand::update(EntityKind::Log, 3).with_field("message", "");
        let bytes = encode(&cmd).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value, serde_json::json!({"id": "3", "message": ""}));
    }

    #[test]
    fn test_encode_rejects_absent_id() {
        let cmd = MutationCommand::delete(EntityKind::Post, 0);
        assert!(matches!(
            encode(&cmd),
            Err(RelayError::UnsupportedCommand(_))
        ));
    }

    #[test]
    fn test_encode_rejects_delete_with_fields() {
        let cmd = MutationCommand::delete(EntityKind::Post, 1).with_field("title", "x");
        assert!(matches!(
            encode(&cmd),
            Err(RelayError::UnsupportedCommand(_))
        ));
    }

    #[test]
    fn test_decode_accepts_numbers_and_snake_case() {
        let cmd = decode(post_update(), br#"{"id":42,"user_id":7,"title":"New"}"#).unwrap();
        assert_eq!(cmd.target_id, 42);
        assert_eq!(cmd.fields["user_id"], FieldValue::Integer(7));
        assert_eq!(cmd.fields["title"], FieldValue::Text("New".into()));
        assert!(!cmd.fields.contains_key("content"));
    }

    #[test]
    fn test_decode_null_is_unset() {
        let cmd = decode(post_update(), br#"{"id":"1","title":null}"#).unwrap();
        assert!(cmd.fields.is_empty());
    }

    #[test]
    fn test_decode_rejects_update_payload_on_delete_topic() {
        let err = decode(log_delete(), br#"{"id":"7","level":"info"}"#).unwrap_err();
        match err {
            RelayError::MalformedEnvelope { topic, .. } => assert_eq!(topic, "log-delete"),
            other => panic!("expected MalformedEnvelope, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_rejects_missing_and_non_positive_id() {
        assert!(matches!(
            decode(log_delete(), b"{}"),
            Err(RelayError::MalformedEnvelope { .. })
        ));
        assert!(matches!(
            decode(log_delete(), br#"{"id":"0"}"#),
            Err(RelayError::MalformedEnvelope { .. })
        ));
        assert!(matches!(
            decode(log_delete(), br#"{"id":"-4"}"#),
            Err(RelayError::MalformedEnvelope { .. })
        ));
    }

    #[test]
    fn test_decode_rejects_non_numeric_id() {
        assert!(matches!(
            decode(post_update(), br#"{"id":"forty-two"}"#),
            Err(RelayError::MalformedEnvelope { .. })
        ));
    }
}
