//! Envelopes and control messages.
//!
//! Inbound frames are 4-tuples `(targetGroup, topic, senderId, payload)`.
//! Outbound frames are 3-tuples `(targetGroup, topic, body)`; the server
//! stamps the sender.

use crate::topics::{self, wire_topic};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An inbound message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Group the message was addressed to (`*` for broadcast)
    pub target_group: String,
    /// Uppercase topic
    pub topic: String,
    /// Id of the sending node
    pub sender_id: String,
    /// Message payload
    pub payload: Value,
}

impl Envelope {
    /// Create an envelope; the topic is normalized to uppercase.
    #[must_use]
    pub fn new(
        target_group: impl Into<String>,
        topic: &str,
        sender_id: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            target_group: target_group.into(),
            topic: wire_topic(topic),
            sender_id: sender_id.into(),
            payload,
        }
    }

    /// Build from the wire tuple. Nil group or sender decode as empty strings.
    ///
    /// # Errors
    ///
    /// Returns error if `value` is not a 4-element sequence of the expected shape.
    pub fn from_wire(value: Value) -> Result<Self, MessageError> {
        let (target_group, topic, sender_id, payload): (
            Option<String>,
            String,
            Option<String>,
            Value,
        ) = serde_json::from_value(value).map_err(|e| MessageError::Shape(e.to_string()))?;
        Ok(Self::new(
            target_group.unwrap_or_default(),
            &topic,
            sender_id.unwrap_or_default(),
            payload,
        ))
    }

    /// Convert to the wire tuple.
    #[must_use]
    pub fn to_wire(&self) -> Value {
        Value::Array(vec![
            Value::String(self.target_group.clone()),
            Value::String(self.topic.clone()),
            Value::String(self.sender_id.clone()),
            self.payload.clone(),
        ])
    }
}

/// An outbound message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outbound {
    /// Destination group; `None` lets the server route to the default
    pub target_group: Option<String>,
    /// Uppercase topic
    pub topic: String,
    /// Message body
    pub body: Value,
}

impl Outbound {
    /// Create an outbound message; the topic is normalized to uppercase.
    #[must_use]
    pub fn new(topic: &str, body: Value, target_group: Option<String>) -> Self {
        Self {
            target_group,
            topic: wire_topic(topic),
            body,
        }
    }

    /// Build from the wire tuple.
    ///
    /// # Errors
    ///
    /// Returns error if `value` is not a 3-element sequence of the expected shape.
    pub fn from_wire(value: Value) -> Result<Self, MessageError> {
        let (target_group, topic, body): (Option<String>, String, Value) =
            serde_json::from_value(value).map_err(|e| MessageError::Shape(e.to_string()))?;
        Ok(Self::new(&topic, body, target_group))
    }

    /// Convert to the wire tuple.
    #[must_use]
    pub fn to_wire(&self) -> Value {
        Value::Array(vec![
            self.target_group
                .clone()
                .map_or(Value::Null, Value::String),
            Value::String(self.topic.clone()),
            self.body.clone(),
        ])
    }
}

/// A `(fromGroup, toGroup)` routing pair for a subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupPair {
    /// Group the messages originate from
    pub from_group: String,
    /// Group the messages are delivered to
    pub to_group: String,
}

impl GroupPair {
    /// Create a routing pair.
    #[must_use]
    pub fn new(from_group: impl Into<String>, to_group: impl Into<String>) -> Self {
        Self {
            from_group: from_group.into(),
            to_group: to_group.into(),
        }
    }
}

impl std::fmt::Display for GroupPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}|{}", self.from_group, self.to_group)
    }
}

/// Body of a `SUBSCRIBE` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeBody {
    /// Uppercase topic
    pub topic: String,
    /// Originating group
    pub from_group: String,
    /// Destination group
    pub to_group: String,
    /// Only forward messages from the active node
    pub actonly: bool,
}

/// Body of an `UNSUBSCRIBE` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsubscribeBody {
    /// Uppercase topic
    pub topic: String,
    /// Originating group
    pub from_group: String,
    /// Destination group
    pub to_group: String,
}

/// Control messages sent by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    /// Start receiving a topic
    Subscribe(SubscribeBody),
    /// Stop receiving a topic
    Unsubscribe(UnsubscribeBody),
    /// Ask a node for the full state of these topics
    Request {
        /// Node to ask
        node_id: String,
        /// Topics to dump, in order
        topics: Vec<String>,
    },
}

impl ControlMessage {
    /// Build a `SUBSCRIBE` message.
    #[must_use]
    pub fn subscribe(topic: &str, pair: &GroupPair, actonly: bool) -> Self {
        Self::Subscribe(SubscribeBody {
            topic: wire_topic(topic),
            from_group: pair.from_group.clone(),
            to_group: pair.to_group.clone(),
            actonly,
        })
    }

    /// Build an `UNSUBSCRIBE` message.
    #[must_use]
    pub fn unsubscribe(topic: &str, pair: &GroupPair) -> Self {
        Self::Unsubscribe(UnsubscribeBody {
            topic: wire_topic(topic),
            from_group: pair.from_group.clone(),
            to_group: pair.to_group.clone(),
        })
    }

    /// Wire topic of this message.
    #[must_use]
    pub fn topic(&self) -> &'static str {
        match self {
            Self::Subscribe(_) => topics::SUBSCRIBE,
            Self::Unsubscribe(_) => topics::UNSUBSCRIBE,
            Self::Request { .. } => topics::REQUEST,
        }
    }

    /// Convert into an outbound message.
    ///
    /// Subscription control goes to the default target; requests are
    /// addressed to the node they ask.
    ///
    /// # Errors
    ///
    /// Returns error if the body cannot be serialized.
    pub fn to_outbound(&self) -> Result<Outbound, MessageError> {
        let (body, target) = match self {
            Self::Subscribe(body) => (to_value(body)?, None),
            Self::Unsubscribe(body) => (to_value(body)?, None),
            Self::Request { node_id, topics } => (to_value(topics)?, Some(node_id.clone())),
        };
        Ok(Outbound::new(self.topic(), body, target))
    }
}

fn to_value<T: Serialize>(value: &T) -> Result<Value, MessageError> {
    serde_json::to_value(value).map_err(|e| MessageError::Serialize(e.to_string()))
}

/// Errors for message construction and parsing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MessageError {
    /// Serialization failed
    #[error("serialization failed: {0}")]
    Serialize(String),
    /// Frame does not have the expected tuple shape
    #[error("malformed frame: {0}")]
    Shape(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_from_wire_normalizes() {
        let env = Envelope::from_wire(json!([null, "acdata", "S1", ["U", {}]])).unwrap();
        assert_eq!(env.target_group, "");
        assert_eq!(env.topic, "ACDATA");
        assert_eq!(env.sender_id, "S1");
        assert_eq!(env.payload, json!(["U", {}]));
    }

    #[test]
    fn envelope_rejects_short_frames() {
        assert!(matches!(
            Envelope::from_wire(json!(["*", "ACDATA", "S1"])),
            Err(MessageError::Shape(_))
        ));
        assert!(Envelope::from_wire(json!({"topic": "X"})).is_err());
    }

    #[test]
    fn subscribe_body_uses_camel_case() {
        let msg = ControlMessage::subscribe("acdata", &GroupPair::new("S", ""), true);
        let out = msg.to_outbound().unwrap();
        assert_eq!(out.topic, "SUBSCRIBE");
        assert_eq!(out.target_group, None);
        assert_eq!(
            out.body,
            json!({"topic": "ACDATA", "fromGroup": "S", "toGroup": "", "actonly": true})
        );
    }

    #[test]
    fn unsubscribe_body_has_no_actonly() {
        let msg = ControlMessage::unsubscribe("route", &GroupPair::new("S", "C1"));
        let out = msg.to_outbound().unwrap();
        assert_eq!(out.topic, "UNSUBSCRIBE");
        assert_eq!(
            out.body,
            json!({"topic": "ROUTE", "fromGroup": "S", "toGroup": "C1"})
        );
    }

    #[test]
    fn request_is_addressed_to_node() {
        let msg = ControlMessage::Request {
            node_id: "S2".to_string(),
            topics: vec!["ACDATA".to_string(), "ROUTE".to_string()],
        };
        let out = msg.to_outbound().unwrap();
        assert_eq!(out.target_group.as_deref(), Some("S2"));
        assert_eq!(out.to_wire(), json!(["S2", "REQUEST", ["ACDATA", "ROUTE"]]));
    }

    #[test]
    fn outbound_wire_shape() {
        let out = Outbound::new("echo", json!("hi"), None);
        assert_eq!(out.to_wire(), json!([null, "ECHO", "hi"]));
        assert_eq!(Outbound::from_wire(out.to_wire()).unwrap(), out);
    }
}
