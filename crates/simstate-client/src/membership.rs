//! Remote node membership.
//!
//! Tracks the ids announced through `NODE-ADDED`. Only ids matching the
//! configured prefix are tracked; simulation servers announce both
//! simulation nodes (`S...`) and other clients on the same channel.

use serde_json::Value;

/// Known remote nodes, in announcement order.
#[derive(Debug, Clone, Default)]
pub struct Membership {
    node_prefix: Option<String>,
    nodes: Vec<String>,
}

impl Membership {
    /// Create a membership list; `node_prefix` filters announced ids.
    #[must_use]
    pub fn new(node_prefix: Option<String>) -> Self {
        Self {
            node_prefix,
            nodes: Vec::new(),
        }
    }

    /// Whether an id passes the prefix filter.
    #[must_use]
    pub fn accepts(&self, node_id: &str) -> bool {
        self.node_prefix
            .as_deref()
            .map_or(true, |prefix| node_id.starts_with(prefix))
    }

    /// Whether `node_id` has been announced.
    #[must_use]
    pub fn knows(&self, node_id: &str) -> bool {
        self.nodes.iter().any(|known| known == node_id)
    }

    /// Announced nodes.
    #[must_use]
    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    /// Record a `NODE-ADDED` payload.
    ///
    /// The payload is a sequence of ids (a single id string is accepted
    /// too). Returns every accepted id in the payload, in order, including
    /// ids seen before.
    pub fn announce(&mut self, payload: &Value) -> Vec<String> {
        let ids: Vec<String> = match payload {
            Value::Array(items) => items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            Value::String(id) => vec![id.clone()],
            other => {
                tracing::warn!(payload = %other, "Ignoring malformed node announcement");
                Vec::new()
            }
        };

        let mut accepted = Vec::with_capacity(ids.len());
        for id in ids {
            if !self.accepts(&id) {
                tracing::debug!(node_id = %id, "Ignoring node outside prefix filter");
                continue;
            }
            if !self.knows(&id) {
                self.nodes.push(id.clone());
            }
            if !accepted.contains(&id) {
                accepted.push(id);
            }
        }
        accepted
    }
}
