use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Channel prefix used on the backplane unless configured otherwise
pub const DEFAULT_CHANNEL_PREFIX: &str = "chatty:events:";

/// Longest accepted topic name
const MAX_TOPIC_LEN: usize = 128;

/// A real-time event as carried over the backplane.
///
/// The `origin` tag is stamped by the publishing bridge and lets a process
/// recognize its own events when they come back through its subscriber.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Topic the event was published on
    pub topic: String,
    /// Opaque JSON payload
    pub payload: serde_json::Value,
    /// Identifier of the publishing process
    pub origin: Uuid,
}

impl Event {
    /// Create a new event
    #[must_use]
    pub fn new(topic: impl Into<String>, payload: serde_json::Value, origin: Uuid) -> Self {
        Self {
            topic: topic.into(),
            payload,
            origin,
        }
    }

    /// Serialize for the wire
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Parse a wire message
    pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Whether the event was published by the given process
    #[must_use]
    pub fn is_from(&self, origin: Uuid) -> bool {
        self.origin == origin
    }
}

/// Check a client-supplied topic name.
///
/// Topics are non-empty, at most 128 bytes, and free of whitespace and of the
/// glob characters the subscriber pattern relies on.
#[must_use]
pub fn is_valid_topic(topic: &str) -> bool {
    !topic.is_empty()
        && topic.len() <= MAX_TOPIC_LEN
        && !topic
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '*' | '?' | '[' | ']'))
}

pub(crate) fn channel_for(prefix: &str, topic: &str) -> String {
    format!("{}{}", prefix, topic)
}

pub(crate) fn subscription_pattern(prefix: &str) -> String {
    format!("{}*", prefix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_format() {
        let origin = Uuid::new_v4();
        let event = Event::new("room:42", json!({"text": "hi"}), origin);

        let bytes = event.encode().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["topic"], "room:42");
        assert_eq!(value["payload"]["text"], "hi");
        assert_eq!(value["origin"], origin.to_string());

        assert_eq!(Event::decode(&bytes).unwrap(), event);
        assert!(event.is_from(origin));
        assert!(!event.is_from(Uuid::new_v4()));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(Event::decode(b"not json").is_err());
        assert!(Event::decode(br#"{"topic":"a"}"#).is_err());
    }

    #[test]
    fn test_topic_validation() {
        assert!(is_valid_topic("room:42"));
        assert!(is_valid_topic("user.typing"));
        assert!(!is_valid_topic(""));
        assert!(!is_valid_topic("room 42"));
        assert!(!is_valid_topic("room:*"));
        assert!(!is_valid_topic(&"x".repeat(129)));
    }

    #[test]
    fn test_channel_naming() {
        assert_eq!(
            channel_for(DEFAULT_CHANNEL_PREFIX, "room:1"),
            "chatty:events:room:1"
        );
        assert_eq!(
            subscription_pattern(DEFAULT_CHANNEL_PREFIX),
            "chatty:events:*"
        );
    }
}
