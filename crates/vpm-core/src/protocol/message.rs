//! The application message: an ordered JSON object.
//!
//! VPM attaches no meaning to payloads.  By convention every message carries
//! a `"type"` field (`"hello"`, ...) plus whatever fields the application
//! needs.  Field order is preserved when the message is serialized.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// An ordered mapping from string keys to arbitrary JSON values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Message(Map<String, Value>);

impl Message {
    /// Creates a message with only the `"type"` field set.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use vpm_core::Message;
    ///
    /// let msg = Message::new("hello").with("content", "Hello from client!");
    /// assert_eq!(msg.message_type(), Some("hello"));
    /// assert_eq!(msg.get("content").and_then(|v| v.as_str()), Some("Hello from client!"));
    /// ```
    pub fn new(message_type: &str) -> Self {
        let mut fields = Map::new();
        fields.insert("type".to_string(), Value::String(message_type.to_string()));
        Self(fields)
    }

    /// Builder-style insert.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Inserts or replaces a field, returning the previous value.
    pub fn insert(&mut self, key: &str, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.to_string(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Returns the conventional `"type"` field when it is a string.
    pub fn message_type(&self) -> Option<&str> {
        self.0.get("type").and_then(Value::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Borrows the underlying JSON object.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_fields(self) -> Map<String, Value> {
        self.0
    }

    /// Serializes the message to compact JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error if a value cannot be serialized.
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&self.0)
    }

    /// Parses a message from JSON bytes.  The top-level value must be an object.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error for malformed JSON or a non-object value.
    pub fn from_json(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

impl From<Map<String, Value>> for Message {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}

impl TryFrom<Value> for Message {
    type Error = Value;

    /// Accepts only JSON objects; any other value is handed back unchanged.
    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(fields) => Ok(Self(fields)),
            other => Err(other),
        }
    }
}

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let json = serde_json::to_string(&self.0).map_err(|_| std::fmt::Error)?;
        f.write_str(&json)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_sets_type_field() {
        let msg = Message::new("hello");
        assert_eq!(msg.message_type(), Some("hello"));
        assert_eq!(msg.len(), 1);
    }

    #[test]
    fn test_json_preserves_field_order() {
        // Arrange
        let msg = Message::new("hello")
            .with("content", "Hello from client!")
            .with("alpha", 1);

        // Act
        let text = String::from_utf8(msg.to_json().unwrap()).unwrap();

        // Assert
        assert_eq!(
            text,
            r#"{"type":"hello","content":"Hello from client!","alpha":1}"#
        );
    }

    #[test]
    fn test_from_json_accepts_arbitrary_nested_values() {
        let bytes = br#"{"type":"data","items":[1,2,{"k":null}],"ok":true}"#;
        let msg = Message::from_json(bytes).unwrap();
        assert_eq!(msg.message_type(), Some("data"));
        assert_eq!(msg.get("items"), Some(&json!([1, 2, {"k": null}])));
    }

    #[test]
    fn test_from_json_rejects_non_object() {
        assert!(Message::from_json(b"[1,2,3]").is_err());
        assert!(Message::from_json(b"\"hello\"").is_err());
    }

    #[test]
    fn test_message_without_type_is_still_valid() {
        let msg = Message::from_json(br#"{"content":"x"}"#).unwrap();
        assert_eq!(msg.message_type(), None);
    }

    #[test]
    fn test_try_from_value_rejects_array() {
        let result = Message::try_from(json!([1]));
        assert_eq!(result, Err(json!([1])));
    }

    #[test]
    fn test_insert_replaces_existing_field() {
        let mut msg = Message::new("a");
        let previous = msg.insert("type", "b");
        assert_eq!(previous, Some(json!("a")));
        assert_eq!(msg.message_type(), Some("b"));
    }

    #[test]
    fn test_display_renders_json() {
        let msg = Message::new("ping");
        assert_eq!(msg.to_string(), r#"{"type":"ping"}"#);
    }
}
