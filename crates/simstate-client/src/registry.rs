//! Subscription registry.
//!
//! One [`Subscription`] per uppercase topic. A subscription starts out
//! `Unknown` and is classified exactly once, by the first message that
//! arrives on its topic:
//!
//! - payload led by an action code: `SharedState`, messages are deltas
//! - anything else: `Regular`, messages are plain events
//!
//! Callbacks registered before classification are deferred and attached to
//! the right delivery path once the type is known.

use simstate_core::{is_action_payload, StateChange};
use simstate_proto::{wire_topic, ControlMessage, Envelope, GroupPair};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap, VecDeque};

/// An event delivered to callbacks.
///
/// For raw delivery this is the inbound message; for shared-state delivery
/// `data` holds the full current value of the topic for `sender_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Uppercase topic
    pub topic: String,
    /// Message payload or topic state
    pub data: Value,
    /// Originating node
    pub sender_id: String,
    /// Target group of the originating message
    pub target_group: String,
}

impl From<Envelope> for Event {
    fn from(envelope: Envelope) -> Self {
        Self {
            topic: envelope.topic,
            data: envelope.payload,
            sender_id: envelope.sender_id,
            target_group: envelope.target_group,
        }
    }
}

impl From<StateChange> for Event {
    fn from(change: StateChange) -> Self {
        Self {
            topic: wire_topic(&change.topic),
            data: change.value,
            sender_id: change.sender_id,
            target_group: change.target_group,
        }
    }
}

/// A subscriber callback.
pub type Callback = Box<dyn FnMut(&Event) + Send>;

/// Classification of a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionType {
    /// No message seen yet
    Unknown,
    /// Plain event stream
    Regular,
    /// Delta stream reconciled into per-node state
    SharedState,
}

/// What the caller must do after a subscription received a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Raw callbacks were invoked; nothing else to do
    Regular,
    /// The message is a delta and must be applied to the sender's store
    SharedState {
        /// This message classified the topic
        classified: bool,
    },
}

/// Subscription state for one topic.
pub struct Subscription {
    topic: String,
    kind: SubscriptionType,
    active: BTreeSet<GroupPair>,
    pending: VecDeque<GroupPair>,
    actonly: bool,
    deferred: Vec<Callback>,
    raw: Vec<Callback>,
    state: Vec<Callback>,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .field("kind", &self.kind)
            .field("active", &self.active)
            .field("pending", &self.pending)
            .field("actonly", &self.actonly)
            .field("deferred", &self.deferred.len())
            .field("raw", &self.raw.len())
            .field("state", &self.state.len())
            .finish()
    }
}

impl Subscription {
    /// Create an unclassified subscription.
    #[must_use]
    pub fn new(topic: &str) -> Self {
        Self::with_kind(topic, SubscriptionType::Unknown)
    }

    /// Create a subscription with a known classification.
    #[must_use]
    pub fn with_kind(topic: &str, kind: SubscriptionType) -> Self {
        Self {
            topic: wire_topic(topic),
            kind,
            active: BTreeSet::new(),
            pending: VecDeque::new(),
            actonly: false,
            deferred: Vec::new(),
            raw: Vec::new(),
            state: Vec::new(),
        }
    }

    /// Uppercase topic.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Current classification.
    #[must_use]
    pub fn kind(&self) -> SubscriptionType {
        self.kind
    }

    /// Whether only the active node's messages are requested.
    #[must_use]
    pub fn actonly(&self) -> bool {
        self.actonly
    }

    /// Set the flag sent with future `SUBSCRIBE` requests.
    pub fn set_actonly(&mut self, actonly: bool) {
        self.actonly = actonly;
    }

    /// Whether `pair` is subscribed on the server.
    #[must_use]
    pub fn is_subscribed(&self, pair: &GroupPair) -> bool {
        self.active.contains(pair)
    }

    /// Pairs subscribed on the server.
    pub fn active_pairs(&self) -> impl Iterator<Item = &GroupPair> {
        self.active.iter()
    }

    /// Pairs waiting for a connection, in request order.
    pub fn pending_pairs(&self) -> impl Iterator<Item = &GroupPair> {
        self.pending.iter()
    }

    /// Number of callbacks waiting for classification.
    #[must_use]
    pub fn deferred_len(&self) -> usize {
        self.deferred.len()
    }

    /// Attach a callback.
    ///
    /// Raw callbacks and callbacks on regular topics receive every inbound
    /// message. On shared-state topics callbacks receive state changes. On
    /// unclassified topics the callback waits for classification.
    pub fn connect(&mut self, callback: Callback, raw: bool) {
        match (raw, self.kind) {
            (true, _) | (false, SubscriptionType::Regular) => self.raw.push(callback),
            (false, SubscriptionType::Unknown) => self.deferred.push(callback),
            (false, SubscriptionType::SharedState) => self.state.push(callback),
        }
    }

    /// Deliver an inbound message, classifying the topic on first contact.
    pub fn receive(&mut self, event: &Event) -> Delivery {
        self.deliver_raw(event);

        match self.kind {
            SubscriptionType::Regular => Delivery::Regular,
            SubscriptionType::SharedState => Delivery::SharedState { classified: false },
            SubscriptionType::Unknown if is_action_payload(&event.data) => {
                self.kind = SubscriptionType::SharedState;
                self.state.append(&mut self.deferred);
                tracing::debug!(topic = %self.topic, callbacks = self.state.len(), "Classified as shared state");
                Delivery::SharedState { classified: true }
            }
            SubscriptionType::Unknown => {
                self.kind = SubscriptionType::Regular;
                for mut callback in self.deferred.drain(..) {
                    callback(event);
                    self.raw.push(callback);
                }
                tracing::debug!(topic = %self.topic, callbacks = self.raw.len(), "Classified as regular");
                Delivery::Regular
            }
        }
    }

    /// Deliver a state change to shared-state callbacks.
    pub fn deliver_state(&mut self, event: &Event) {
        for callback in &mut self.state {
            callback(event);
        }
    }

    fn deliver_raw(&mut self, event: &Event) {
        for callback in &mut self.raw {
            callback(event);
        }
    }

    /// Request a routing pair.
    ///
    /// Returns the `SUBSCRIBE` message to send when connected; otherwise the
    /// pair is queued until [`Subscription::flush`].
    pub fn request(&mut self, pair: GroupPair, connected: bool) -> Option<ControlMessage> {
        if self.active.contains(&pair) || self.pending.contains(&pair) {
            return None;
        }
        if connected {
            let message = ControlMessage::subscribe(&self.topic, &pair, self.actonly);
            self.active.insert(pair);
            Some(message)
        } else {
            tracing::debug!(topic = %self.topic, pair = %pair, "Queued subscription until connected");
            self.pending.push_back(pair);
            None
        }
    }

    /// Promote all queued pairs, returning their `SUBSCRIBE` messages in order.
    pub fn flush(&mut self) -> Vec<ControlMessage> {
        let mut messages = Vec::with_capacity(self.pending.len());
        while let Some(pair) = self.pending.pop_front() {
            messages.push(ControlMessage::subscribe(&self.topic, &pair, self.actonly));
            self.active.insert(pair);
        }
        messages
    }

    /// Drop a routing pair.
    ///
    /// Returns the `UNSUBSCRIBE` message to send if the pair was active and
    /// the connection is open.
    pub fn cancel(&mut self, pair: &GroupPair, connected: bool) -> Option<ControlMessage> {
        self.pending.retain(|queued| queued != pair);
        if !self.active.remove(pair) {
            return None;
        }
        connected.then(|| ControlMessage::unsubscribe(&self.topic, pair))
    }
}

/// All subscriptions, in creation order.
#[derive(Debug, Default)]
pub struct Registry {
    subscriptions: Vec<Subscription>,
    index: HashMap<String, usize>,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of subscriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Whether a subscription exists for `topic`.
    #[must_use]
    pub fn contains(&self, topic: &str) -> bool {
        self.index.contains_key(&wire_topic(topic))
    }

    /// Look up a subscription.
    #[must_use]
    pub fn get(&self, topic: &str) -> Option<&Subscription> {
        let index = *self.index.get(&wire_topic(topic))?;
        self.subscriptions.get(index)
    }

    /// Look up a subscription mutably.
    pub fn get_mut(&mut self, topic: &str) -> Option<&mut Subscription> {
        let index = *self.index.get(&wire_topic(topic))?;
        self.subscriptions.get_mut(index)
    }

    /// Get the subscription for `topic`, creating it with `kind` if absent.
    pub fn get_or_insert(&mut self, topic: &str, kind: SubscriptionType) -> &mut Subscription {
        let key = wire_topic(topic);
        let index = match self.index.get(&key) {
            Some(index) => *index,
            None => {
                tracing::debug!(topic = %key, ?kind, "Created subscription");
                self.subscriptions.push(Subscription::with_kind(&key, kind));
                let index = self.subscriptions.len() - 1;
                self.index.insert(key, index);
                index
            }
        };
        &mut self.subscriptions[index]
    }

    /// Iterate subscriptions in creation order.
    pub fn iter(&self) -> impl Iterator<Item = &Subscription> {
        self.subscriptions.iter()
    }

    /// Drain every subscription's queued pairs, returning `SUBSCRIBE` messages.
    pub fn flush_pending(&mut self) -> Vec<ControlMessage> {
        self.subscriptions
            .iter_mut()
            .flat_map(Subscription::flush)
            .collect()
    }

    /// Topics a newly seen node should dump: shared-state and unclassified ones.
    #[must_use]
    pub fn topics_needing_sync(&self) -> Vec<String> {
        self.subscriptions
            .iter()
            .filter(|sub| {
                matches!(
                    sub.kind,
                    SubscriptionType::SharedState | SubscriptionType::Unknown
                )
            })
            .map(|sub| sub.topic.clone())
            .collect()
    }
}
