//! Per-node state mirrors.
//!
//! The store keeps one topic map per remote node:
//! - Keys are lowercase topic names
//! - Values are value trees reconciled from the node's deltas
//!
//! Every node store is an independent deep copy of the defaults template,
//! extended with every topic registered since.

use crate::action::{ActionType, Delta, DeltaError};
use crate::merge;
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Mapping of lowercase topic name to value tree.
pub type TopicMap = Map<String, Value>;

/// Normalize a topic name to its store key.
#[must_use]
pub fn topic_key(topic: &str) -> String {
    topic.to_lowercase()
}

/// Notification that a topic's state changed for a node.
#[derive(Debug, Clone, PartialEq)]
pub struct StateChange {
    /// Lowercase topic name
    pub topic: String,
    /// Full current value of the topic for `sender_id`
    pub value: Value,
    /// Node whose mirror changed
    pub sender_id: String,
    /// Target group of the message that caused the change
    pub target_group: String,
}

/// Result of applying a delta.
#[derive(Debug, Clone, PartialEq)]
pub enum DeltaOutcome {
    /// The delta was applied; contains notifications for observers
    Applied(Vec<StateChange>),
    /// The sender was unknown: its store was created and the delta discarded
    FirstContact(Vec<StateChange>),
}

impl DeltaOutcome {
    /// Notifications produced by the delta.
    #[must_use]
    pub fn changes(&self) -> &[StateChange] {
        match self {
            DeltaOutcome::Applied(changes) | DeltaOutcome::FirstContact(changes) => changes,
        }
    }

    /// Consume the outcome, returning its notifications.
    #[must_use]
    pub fn into_changes(self) -> Vec<StateChange> {
        match self {
            DeltaOutcome::Applied(changes) | DeltaOutcome::FirstContact(changes) => changes,
        }
    }
}

/// Shared-state mirrors for all remote nodes.
#[derive(Debug, Clone, Default)]
pub struct StateStore {
    /// Template used to initialize node stores
    defaults: TopicMap,
    /// node id -> topic map
    remotes: HashMap<String, TopicMap>,
    /// Node whose changes are surfaced to observers
    active: Option<String>,
}

impl StateStore {
    /// Create a store with an empty defaults template.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store seeded with a defaults template.
    ///
    /// Topic names in `defaults` are normalized to lowercase.
    #[must_use]
    pub fn with_defaults(defaults: TopicMap) -> Self {
        let defaults = defaults
            .into_iter()
            .map(|(topic, value)| (topic_key(&topic), value))
            .collect();
        Self {
            defaults,
            ..Self::default()
        }
    }

    /// The defaults template.
    #[must_use]
    pub fn defaults(&self) -> &TopicMap {
        &self.defaults
    }

    /// The currently active node, if any.
    #[must_use]
    pub fn active_node(&self) -> Option<&str> {
        self.active.as_deref()
    }

    /// Whether `node_id` is the active node.
    #[must_use]
    pub fn is_active(&self, node_id: &str) -> bool {
        self.active.as_deref() == Some(node_id)
    }

    /// Whether a store exists for `node_id`.
    #[must_use]
    pub fn has_node(&self, node_id: &str) -> bool {
        self.remotes.contains_key(node_id)
    }

    /// Ids of all known nodes.
    pub fn nodes(&self) -> impl Iterator<Item = &str> {
        self.remotes.keys().map(String::as_str)
    }

    /// The full store of a node.
    #[must_use]
    pub fn node_store(&self, node_id: &str) -> Option<&TopicMap> {
        self.remotes.get(node_id)
    }

    /// The state of one topic for a node.
    #[must_use]
    pub fn node_state(&self, node_id: &str, topic: &str) -> Option<&Value> {
        self.remotes.get(node_id)?.get(&topic_key(topic))
    }

    /// Register a shared-state topic.
    ///
    /// Adds an empty map to the defaults and to every existing node store.
    /// Returns `true` if the topic was new.
    pub fn add_topic(&mut self, topic: &str) -> bool {
        let key = topic_key(topic);
        if self.defaults.contains_key(&key) {
            return false;
        }
        self.defaults.insert(key.clone(), Value::Object(Map::new()));
        for store in self.remotes.values_mut() {
            store
                .entry(key.clone())
                .or_insert_with(|| Value::Object(Map::new()));
        }
        tracing::debug!(topic = %key, nodes = self.remotes.len(), "Registered shared-state topic");
        true
    }

    /// Whether `topic` is a registered shared-state topic.
    #[must_use]
    pub fn is_shared_state(&self, topic: &str) -> bool {
        self.defaults.contains_key(&topic_key(topic))
    }

    /// Replace a node's store with a fresh copy of the defaults.
    ///
    /// If the node is active, returns one notification per topic so
    /// observers see the cleared state.
    pub fn reset_node(&mut self, node_id: &str) -> Vec<StateChange> {
        self.remotes
            .insert(node_id.to_string(), self.defaults.clone());
        tracing::debug!(node_id, "Reset node store");

        if self.is_active(node_id) {
            self.snapshot(node_id)
        } else {
            Vec::new()
        }
    }

    /// Make `node_id` the active node.
    ///
    /// Creates its store if needed and returns one notification per topic
    /// with the node's current state.
    pub fn set_active_node(&mut self, node_id: &str) -> Vec<StateChange> {
        if !self.remotes.contains_key(node_id) {
            self.remotes
                .insert(node_id.to_string(), self.defaults.clone());
        }
        self.active = Some(node_id.to_string());
        tracing::info!(node_id, "Active node changed");
        self.snapshot(node_id)
    }

    /// Apply a `[code, data]` delta from `sender_id` to its mirror of `topic`.
    ///
    /// A delta from a node without a store creates the store and is
    /// otherwise discarded. Keyed actions only produce a notification when the
    /// sender is the active node.
    ///
    /// # Errors
    ///
    /// Returns error if the payload is malformed. The store is left untouched.
    pub fn apply_delta(
        &mut self,
        sender_id: &str,
        topic: &str,
        target_group: &str,
        payload: &Value,
    ) -> Result<DeltaOutcome, DeltaError> {
        if !self.remotes.contains_key(sender_id) {
            tracing::debug!(sender_id, topic, "Delta from unsynchronized node, discarding");
            return Ok(DeltaOutcome::FirstContact(self.reset_node(sender_id)));
        }

        let delta = Delta::from_payload(payload)?;
        match delta.action {
            ActionType::Reset => return Ok(DeltaOutcome::Applied(self.reset_node(sender_id))),
            ActionType::ActChange => {
                return Ok(DeltaOutcome::Applied(self.set_active_node(sender_id)));
            }
            _ => {}
        }

        // Reject malformed data before a missing topic entry is created
        if delta.action.is_keyed() {
            delta.entries()?;
        }

        let key = topic_key(topic);
        let is_active = self.is_active(sender_id);
        let Some(store) = self.remotes.get_mut(sender_id) else {
            return Ok(DeltaOutcome::Applied(Vec::new()));
        };
        let state = store
            .entry(key.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        let Some(map) = state.as_object_mut() else {
            return Err(DeltaError::TopicNotMap(key));
        };
        merge::apply(map, &delta)?;

        tracing::debug!(
            sender_id,
            topic = %key,
            action = %delta.action,
            is_active,
            "Applied delta"
        );

        if !is_active {
            return Ok(DeltaOutcome::Applied(Vec::new()));
        }
        Ok(DeltaOutcome::Applied(vec![StateChange {
            topic: key,
            value: state.clone(),
            sender_id: sender_id.to_string(),
            target_group: target_group.to_string(),
        }]))
    }

    fn snapshot(&self, node_id: &str) -> Vec<StateChange> {
        self.remotes
            .get(node_id)
            .map(|store| {
                store
                    .iter()
                    .map(|(topic, value)| StateChange {
                        topic: topic.clone(),
                        value: value.clone(),
                        sender_id: node_id.to_string(),
                        target_group: String::new(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn template(value: Value) -> TopicMap {
        match value {
            Value::Object(map) => map,
            other => panic!("expected map, got {other}"),
        }
    }

    fn synced(node: &str, topics: &[&str]) -> StateStore {
        let mut store = StateStore::new();
        for topic in topics {
            store.add_topic(topic);
        }
        store.reset_node(node);
        store
    }

    #[test]
    fn add_topic_propagates_to_existing_nodes() {
        let mut store = StateStore::new();
        store.add_topic("pos");
        store.reset_node("N1");
        store
            .apply_delta("N1", "POS", "", &json!(["R", {"x": 1}]))
            .unwrap();

        assert!(store.add_topic("Route"));
        assert!(!store.add_topic("ROUTE"));

        assert!(store.is_shared_state("route"));
        assert!(store.is_shared_state("POS"));
        assert_eq!(store.node_state("N1", "route"), Some(&json!({})));
        assert_eq!(store.node_state("N1", "pos"), Some(&json!({"x": 1})));
    }

    #[test]
    fn node_stores_are_independent() {
        let mut store = StateStore::with_defaults(template(json!({"alt": {"v": 0}})));
        store.reset_node("N1");
        store.reset_node("N2");
        store
            .apply_delta("N1", "alt", "", &json!(["U", {"v": 9}]))
            .unwrap();

        assert_eq!(store.node_state("N1", "alt"), Some(&json!({"v": 9})));
        assert_eq!(store.node_state("N2", "alt"), Some(&json!({"v": 0})));
        assert_eq!(store.defaults()["alt"], json!({"v": 0}));
    }

    #[test]
    fn first_contact_discards_delta() {
        let mut store = StateStore::new();
        store.add_topic("pos");

        let outcome = store
            .apply_delta("N9", "pos", "", &json!(["A", {"x": 1}]))
            .unwrap();
        assert_eq!(outcome, DeltaOutcome::FirstContact(Vec::new()));
        assert_eq!(store.node_state("N9", "pos"), Some(&json!({})));
    }

    #[test]
    fn append_scenario() {
        let mut store = synced("N1", &["pos"]);
        store.set_active_node("N1");

        let outcome = store
            .apply_delta("N1", "POS", "*", &json!(["A", {"x": 5}]))
            .unwrap();
        assert_eq!(
            outcome.changes(),
            [StateChange {
                topic: "pos".to_string(),
                value: json!({"x": [5]}),
                sender_id: "N1".to_string(),
                target_group: "*".to_string(),
            }]
        );

        store
            .apply_delta("N1", "POS", "*", &json!(["A", {"x": 6}]))
            .unwrap();
        assert_eq!(store.node_store("N1"), Some(&template(json!({"pos": {"x": [5, 6]}}))));
    }

    #[test]
    fn delete_scenarios() {
        let mut store = synced("N1", &["pos"]);
        store
            .apply_delta("N1", "pos", "", &json!(["R", {"x": [5, 6, 7], "y": [50, 60, 70]}]))
            .unwrap();
        store
            .apply_delta("N1", "pos", "", &json!(["D", {"z": 1}]))
            .unwrap();
        assert_eq!(
            store.node_state("N1", "pos"),
            Some(&json!({"x": [5, 7], "y": [50, 70]}))
        );

        let mut store = synced("N1", &["pos"]);
        store
            .apply_delta("N1", "pos", "", &json!(["R", {"x": [5, 6, 7]}]))
            .unwrap();
        store
            .apply_delta("N1", "pos", "", &json!(["D", {"x": 6}]))
            .unwrap();
        assert_eq!(store.node_state("N1", "pos"), Some(&json!({"x": [5, 7]})));
    }

    #[test]
    fn reset_while_active_notifies_each_topic() {
        let mut store = StateStore::with_defaults(template(json!({"alt": {"v": 0}})));
        store.set_active_node("N1");
        store
            .apply_delta("N1", "alt", "", &json!(["U", {"v": 3000}]))
            .unwrap();

        let outcome = store.apply_delta("N1", "alt", "", &json!(["X", null])).unwrap();
        assert_eq!(
            outcome.changes(),
            [StateChange {
                topic: "alt".to_string(),
                value: json!({"v": 0}),
                sender_id: "N1".to_string(),
                target_group: String::new(),
            }]
        );
        assert_eq!(store.node_state("N1", "alt"), Some(&json!({"v": 0})));
    }

    #[test]
    fn reset_inactive_node_is_silent() {
        let mut store = StateStore::with_defaults(template(json!({"alt": {"v": 0}})));
        store.set_active_node("N1");
        store.reset_node("N2");
        assert!(store.reset_node("N2").is_empty());
    }

    #[test]
    fn reset_then_activate_yields_defaults() {
        let defaults = template(json!({"alt": {"v": 0}, "pos": {"x": []}}));
        let mut store = StateStore::with_defaults(defaults.clone());
        store.reset_node("N1");
        let changes = store.set_active_node("N1");

        assert_eq!(store.node_store("N1"), Some(&defaults));
        let topics: Vec<_> = changes.iter().map(|c| c.topic.as_str()).collect();
        assert_eq!(topics, ["alt", "pos"]);
    }

    #[test]
    fn inactive_deltas_accumulate_silently() {
        let mut store = synced("N1", &["pos"]);
        store.reset_node("N2");
        store.set_active_node("N1");

        for x in [1, 2, 3] {
            let outcome = store
                .apply_delta("N2", "pos", "", &json!(["A", {"x": x}]))
                .unwrap();
            assert!(outcome.changes().is_empty());
        }

        let changes = store.set_active_node("N2");
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].value, json!({"x": [1, 2, 3]}));
        assert_eq!(changes[0].sender_id, "N2");
    }

    #[test]
    fn act_change_delta_activates_sender() {
        let mut store = synced("N1", &["pos"]);
        let outcome = store.apply_delta("N1", "pos", "", &json!(["C", null])).unwrap();
        assert_eq!(store.active_node(), Some("N1"));
        assert_eq!(outcome.changes().len(), 1);
    }

    #[test]
    fn malformed_delta_leaves_store_untouched() {
        let mut store = synced("N1", &["pos"]);
        assert_eq!(
            store.apply_delta("N1", "pos", "", &json!(["U", 5])),
            Err(DeltaError::DataNotMap(ActionType::Update))
        );
        assert_eq!(
            store.apply_delta("N1", "pos", "", &json!(["?", {}])),
            Err(DeltaError::UnknownAction("?".to_string()))
        );
        assert_eq!(store.node_state("N1", "pos"), Some(&json!({})));
    }

    #[test]
    fn malformed_delta_on_unseen_topic_adds_no_entry() {
        let mut store = synced("N1", &["pos"]);
        assert_eq!(
            store.apply_delta("N1", "route", "", &json!(["A", [1, 2]])),
            Err(DeltaError::DataNotMap(ActionType::Append))
        );
        assert_eq!(store.node_state("N1", "route"), None);
        assert_eq!(store.node_store("N1").map(TopicMap::len), Some(1));
    }

    #[test]
    fn non_map_topic_root_is_rejected() {
        let mut store = StateStore::with_defaults(template(json!({"list": [1, 2]})));
        store.reset_node("N1");
        assert_eq!(
            store.apply_delta("N1", "list", "", &json!(["A", {"x": 1}])),
            Err(DeltaError::TopicNotMap("list".to_string()))
        );
    }
}
