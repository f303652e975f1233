//! Helpers for payloads coming from identity providers and enrollment forms,
//! where blank strings mean "absent" and identifiers may arrive as numbers.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Returns the value only when it contains something other than whitespace.
pub fn presence(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

pub fn deserialize_blank_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt: Option<String> = Option::deserialize(deserializer)?;
    Ok(opt.filter(|s| !s.trim().is_empty()))
}

/// Accepts `"42"` or `42` and yields `"42"`.
pub fn deserialize_string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected a string or number, got {}",
            other
        ))),
    }
}

/// Reads an integer id from a JSON value, accepting numeric strings.
pub fn value_as_id(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Deserialize)]
    struct Payload {
        #[serde(deserialize_with = "deserialize_string_or_number")]
        uid: String,
        #[serde(default, deserialize_with = "deserialize_blank_as_none")]
        nickname: Option<String>,
    }

    #[test]
    fn test_presence() {
        assert_eq!(presence(Some("jane")), Some("jane"));
        assert_eq!(presence(Some("   ")), None);
        assert_eq!(presence(Some("")), None);
        assert_eq!(presence(None), None);
    }

    #[test]
    fn test_numeric_uid_is_stringified() {
        let payload: Payload = serde_json::from_value(json!({"uid": 12345})).unwrap();
        assert_eq!(payload.uid, "12345");
        assert_eq!(payload.nickname, None);
    }

    #[test]
    fn test_blank_nickname_is_none() {
        let payload: Payload =
            serde_json::from_value(json!({"uid": "abc", "nickname": "  "})).unwrap();
        assert_eq!(payload.uid, "abc");
        assert_eq!(payload.nickname, None);
    }

    #[test]
    fn test_uid_rejects_objects() {
        let result: Result<Payload, _> = serde_json::from_value(json!({"uid": {"id": 1}}));
        assert!(result.is_err());
    }

    #[test]
    fn test_value_as_id() {
        assert_eq!(value_as_id(&json!(7)), Some(7));
        assert_eq!(value_as_id(&json!("3")), Some(3));
        assert_eq!(value_as_id(&json!("three")), None);
        assert_eq!(value_as_id(&Value::Null), None);
    }
}
