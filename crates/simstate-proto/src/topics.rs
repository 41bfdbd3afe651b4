//! Topic naming.
//!
//! Topics travel uppercase on the wire and key subscriptions uppercase.
//! State mirrors key them lowercase (see `simstate_core::topic_key`).
//!
//! A handful of topics carry protocol control traffic rather than
//! application data.

/// Client -> server: start receiving a topic.
pub const SUBSCRIBE: &str = "SUBSCRIBE";
/// Client -> server: stop receiving a topic.
pub const UNSUBSCRIBE: &str = "UNSUBSCRIBE";
/// Client -> node: request a full-state dump for a list of topics.
pub const REQUEST: &str = "REQUEST";
/// Server -> client: one or more nodes joined.
pub const NODE_ADDED: &str = "NODE-ADDED";
/// Server -> client: the active node changed.
pub const ACTNODE_CHANGED: &str = "ACTNODE-CHANGED";
/// Node -> client: the sender's state was reset.
pub const RESET: &str = "RESET";

/// Broadcast target group.
pub const BROADCAST: &str = "*";

/// Normalize a topic for the wire and for subscription lookup.
#[must_use]
pub fn wire_topic(topic: &str) -> String {
    topic.to_uppercase()
}

/// Inbound topics handled by membership tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlTopic {
    /// Nodes joined
    NodeAdded,
    /// Active node changed
    ActNodeChanged,
    /// Sender reset its state
    Reset,
}

impl ControlTopic {
    /// Classify an inbound topic.
    #[must_use]
    pub fn parse(topic: &str) -> Option<Self> {
        match wire_topic(topic).as_str() {
            NODE_ADDED => Some(Self::NodeAdded),
            ACTNODE_CHANGED => Some(Self::ActNodeChanged),
            RESET => Some(Self::Reset),
            _ => None,
        }
    }

    /// Wire name of the topic.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NodeAdded => NODE_ADDED,
            Self::ActNodeChanged => ACTNODE_CHANGED,
            Self::Reset => RESET,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_topic_parsing() {
        assert_eq!(ControlTopic::parse("NODE-ADDED"), Some(ControlTopic::NodeAdded));
        assert_eq!(
            ControlTopic::parse("actnode-changed"),
            Some(ControlTopic::ActNodeChanged)
        );
        assert_eq!(ControlTopic::parse("Reset"), Some(ControlTopic::Reset));
        assert_eq!(ControlTopic::parse("ACDATA"), None);
    }

    #[test]
    fn wire_topic_is_uppercase() {
        assert_eq!(wire_topic("acdata"), "ACDATA");
        assert_eq!(wire_topic("Route-Data"), "ROUTE-DATA");
    }
}
