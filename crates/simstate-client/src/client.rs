//! Client context.
//!
//! [`Client`] owns the state store, the subscription registry and the
//! membership list, and drives them from transport notifications:
//!
//! 1. **Open**: queued subscription requests are flushed, including the
//!    `RESET` routing every client requests on construction
//! 2. **Message**: frames are decoded, control topics update membership,
//!    other topics are routed to their subscription
//! 3. **Close / Error**: logged; no reconnection is attempted
//!
//! Every entry point takes `&mut self`; hosts with several threads must
//! serialize access. Callbacks run inside the entry point and cannot call
//! back into the client.

use crate::membership::Membership;
use crate::registry::{Callback, Delivery, Event, Registry, Subscription, SubscriptionType};
use crate::transport::Transport;
use simstate_core::{DeltaOutcome, StateChange, StateStore, TopicMap};
use simstate_proto::{
    topics, Codec, ControlMessage, ControlTopic, Envelope, GroupPair, MsgpackCodec, Outbound,
};
use serde_json::Value;

/// Client behaviour settings.
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    /// Only track announced nodes whose id starts with this prefix
    pub node_prefix: Option<String>,
    /// Create subscriptions for inbound topics nobody subscribed to
    pub accept_unsolicited: bool,
    /// Initial shared-state template
    pub defaults: TopicMap,
}

/// Options for [`Client::subscribe_with`].
#[derive(Debug, Clone)]
pub struct SubscribeOptions {
    /// Ask the server to route the topic to us
    pub broadcast: bool,
    /// Deliver raw messages even on shared-state topics
    pub raw: bool,
    /// Override the subscription's active-node-only flag
    pub actonly: Option<bool>,
    /// Routing pair to request
    pub groups: GroupPair,
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self {
            broadcast: true,
            raw: false,
            actonly: None,
            groups: GroupPair::new("", ""),
        }
    }
}

impl SubscribeOptions {
    /// Deliver raw messages.
    #[must_use]
    pub fn raw(mut self) -> Self {
        self.raw = true;
        self
    }

    /// Register the callback without requesting routing from the server.
    #[must_use]
    pub fn local(mut self) -> Self {
        self.broadcast = false;
        self
    }

    /// Set the active-node-only flag.
    #[must_use]
    pub fn actonly(mut self, actonly: bool) -> Self {
        self.actonly = Some(actonly);
        self
    }

    /// Request a specific routing pair.
    #[must_use]
    pub fn groups(mut self, from_group: &str, to_group: &str) -> Self {
        self.groups = GroupPair::new(from_group, to_group);
        self
    }
}

/// Subscription and shared-state client over a duplex transport.
pub struct Client<T, C = MsgpackCodec> {
    config: ClientConfig,
    transport: T,
    codec: C,
    store: StateStore,
    registry: Registry,
    membership: Membership,
}

impl<T: Transport> Client<T, MsgpackCodec> {
    /// Create a client speaking MessagePack.
    #[must_use]
    pub fn new(transport: T, config: ClientConfig) -> Self {
        Self::with_codec(transport, MsgpackCodec, config)
    }
}

impl<T: Transport, C: Codec> Client<T, C> {
    /// Create a client with an explicit codec.
    #[must_use]
    pub fn with_codec(transport: T, codec: C, config: ClientConfig) -> Self {
        let store = StateStore::with_defaults(config.defaults.clone());
        let membership = Membership::new(config.node_prefix.clone());

        // Remote resets are only routed to clients that ask for them
        let mut registry = Registry::new();
        registry
            .get_or_insert(topics::RESET, SubscriptionType::Regular)
            .request(GroupPair::new("", ""), false);

        Self {
            config,
            transport,
            codec,
            store,
            registry,
            membership,
        }
    }

    /// The transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// The transport, mutably.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// The codec.
    pub fn codec(&self) -> &C {
        &self.codec
    }

    /// Per-node state mirrors.
    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Subscriptions.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Announced nodes.
    pub fn membership(&self) -> &Membership {
        &self.membership
    }

    /// The active node, if any.
    pub fn active_node(&self) -> Option<&str> {
        self.store.active_node()
    }

    /// Whether the transport is open.
    pub fn is_connected(&self) -> bool {
        self.transport.is_open()
    }

    /// Subscribe to a topic with default options.
    pub fn subscribe<F>(&mut self, topic: &str, callback: F) -> &Subscription
    where
        F: FnMut(&Event) + Send + 'static,
    {
        self.subscribe_with(topic, SubscribeOptions::default(), callback)
    }

    /// Subscribe to a topic.
    ///
    /// Creates the subscription if needed, applies the options, requests
    /// routing from the server and attaches the callback.
    pub fn subscribe_with<F>(
        &mut self,
        topic: &str,
        options: SubscribeOptions,
        callback: F,
    ) -> &Subscription
    where
        F: FnMut(&Event) + Send + 'static,
    {
        let connected = self.transport.is_open();
        let sub = self.subscription(topic);
        if let Some(actonly) = options.actonly {
            sub.set_actonly(actonly);
        }
        let request = if options.broadcast {
            sub.request(options.groups, connected)
        } else {
            None
        };
        sub.connect(Box::new(callback) as Callback, options.raw);
        let key = sub.topic().to_string();

        if let Some(message) = request {
            self.send_control(&message);
        }
        self.subscription(&key)
    }

    /// Attach a callback to a topic without requesting routing.
    pub fn register_callback(&mut self, topic: &str, callback: Callback, raw: bool) {
        self.subscription(topic).connect(callback, raw);
    }

    /// Request a routing pair for a topic.
    pub fn request_subscription(
        &mut self,
        topic: &str,
        groups: GroupPair,
        actonly: Option<bool>,
    ) {
        let connected = self.transport.is_open();
        let sub = self.subscription(topic);
        if let Some(actonly) = actonly {
            sub.set_actonly(actonly);
        }
        if let Some(message) = sub.request(groups, connected) {
            self.send_control(&message);
        }
    }

    /// Drop a routing pair for a topic.
    pub fn unsubscribe(&mut self, topic: &str, groups: &GroupPair) {
        let connected = self.transport.is_open();
        let Some(sub) = self.registry.get_mut(topic) else {
            return;
        };
        if let Some(message) = sub.cancel(groups, connected) {
            self.send_control(&message);
        }
    }

    /// Publish a message. An empty target group addresses the active node.
    pub fn send(&mut self, topic: &str, body: Value, target_group: &str) {
        let target = (!target_group.is_empty()).then(|| target_group.to_string());
        self.send_outbound(Outbound::new(topic, body, target));
    }

    /// Ask a node for a full-state dump of every shared or unclassified topic.
    pub fn request_state(&mut self, node_id: &str) {
        let message = ControlMessage::Request {
            node_id: node_id.to_string(),
            topics: self.registry.topics_needing_sync(),
        };
        self.send_control(&message);
    }

    /// Make `node_id` the active node and surface its state.
    pub fn set_active_node(&mut self, node_id: &str) {
        let changes = self.store.set_active_node(node_id);
        self.notify(changes);
    }

    /// Transport opened: flush queued subscription requests.
    pub fn handle_open(&mut self) {
        let messages = self.registry.flush_pending();
        tracing::info!(pending = messages.len(), "Connection opened");
        for message in &messages {
            self.send_control(message);
        }
    }

    /// Transport delivered a frame.
    pub fn handle_message(&mut self, frame: &[u8]) {
        match self.codec.decode_envelope(frame) {
            Ok(envelope) => self.dispatch(envelope),
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    codec = self.codec.name(),
                    frame_len = frame.len(),
                    "Failed to decode frame, dropping"
                );
            }
        }
    }

    /// Transport closed.
    pub fn handle_close(&mut self) {
        tracing::info!("Connection closed");
    }

    /// Transport reported an error.
    pub fn handle_error(&mut self, error: &dyn std::fmt::Display) {
        tracing::error!(error = %error, "Transport error");
    }

    /// Route a decoded envelope.
    pub fn dispatch(&mut self, envelope: Envelope) {
        let event = Event::from(envelope);
        let control = ControlTopic::parse(&event.topic);
        if let Some(control) = control {
            self.handle_control(control, &event);
        }

        if !self.registry.contains(&event.topic) {
            if control.is_some() {
                return;
            }
            if !self.config.accept_unsolicited {
                tracing::warn!(
                    topic = %event.topic,
                    sender_id = %event.sender_id,
                    "Message for unknown subscription, dropping"
                );
                return;
            }
            self.subscription(&event.topic);
        }

        let Some(sub) = self.registry.get_mut(&event.topic) else {
            return;
        };
        match sub.receive(&event) {
            Delivery::Regular => {}
            Delivery::SharedState { classified } => {
                if classified {
                    self.store.add_topic(&event.topic);
                }
                self.apply_delta(&event);
            }
        }
    }

    fn handle_control(&mut self, control: ControlTopic, event: &Event) {
        match control {
            ControlTopic::NodeAdded => {
                let nodes = self.membership.announce(&event.data);
                if nodes.is_empty() {
                    return;
                }
                for node_id in &nodes {
                    let changes = self.store.reset_node(node_id);
                    self.notify(changes);
                }
                if self.store.active_node().is_none() {
                    self.set_active_node(&nodes[0]);
                }
                tracing::info!(?nodes, "Nodes added, requesting state");
                for node_id in &nodes {
                    self.request_state(node_id);
                }
            }
            ControlTopic::ActNodeChanged => match event.data.as_str() {
                Some(node_id) => self.set_active_node(node_id),
                None => {
                    tracing::warn!(payload = %event.data, "Malformed active node change");
                }
            },
            ControlTopic::Reset => {
                let changes = self.store.reset_node(&event.sender_id);
                self.notify(changes);
            }
        }
    }

    fn apply_delta(&mut self, event: &Event) {
        let outcome = self.store.apply_delta(
            &event.sender_id,
            &event.topic,
            &event.target_group,
            &event.data,
        );
        match outcome {
            Ok(DeltaOutcome::Applied(changes)) => self.notify(changes),
            Ok(DeltaOutcome::FirstContact(changes)) => {
                self.notify(changes);
                tracing::info!(
                    sender_id = %event.sender_id,
                    topic = %event.topic,
                    "Delta from unsynchronized node, requesting state"
                );
                if self.transport.is_open() {
                    self.request_state(&event.sender_id);
                }
            }
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    topic = %event.topic,
                    sender_id = %event.sender_id,
                    "Dropping malformed delta"
                );
            }
        }
    }

    fn notify(&mut self, changes: Vec<StateChange>) {
        for change in changes {
            let event = Event::from(change);
            if let Some(sub) = self.registry.get_mut(&event.topic) {
                sub.deliver_state(&event);
            }
        }
    }

    fn subscription(&mut self, topic: &str) -> &mut Subscription {
        let kind = if self.store.is_shared_state(topic) {
            SubscriptionType::SharedState
        } else {
            SubscriptionType::Unknown
        };
        self.registry.get_or_insert(topic, kind)
    }

    fn send_control(&mut self, message: &ControlMessage) {
        match message.to_outbound() {
            Ok(outbound) => self.send_outbound(outbound),
            Err(err) => {
                tracing::warn!(error = %err, topic = message.topic(), "Failed to build control message");
            }
        }
    }

    fn send_outbound(&mut self, mut outbound: Outbound) {
        if !self.transport.is_open() {
            tracing::warn!(topic = %outbound.topic, "Transport not open, cannot send");
            return;
        }
        if outbound.target_group.as_deref().map_or(true, str::is_empty) {
            outbound.target_group = self.store.active_node().map(str::to_string);
        }

        let frame = match self.codec.encode_outbound(&outbound) {
            Ok(frame) => frame,
            Err(err) => {
                tracing::warn!(error = %err, topic = %outbound.topic, "Failed to encode message");
                return;
            }
        };
        tracing::debug!(
            topic = %outbound.topic,
            target = ?outbound.target_group,
            frame_len = frame.len(),
            "Sending message"
        );
        if let Err(err) = self.transport.send(frame) {
            tracing::warn!(error = %err, topic = %outbound.topic, "Failed to send message");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    type Seen = Arc<Mutex<Vec<Event>>>;

    fn recorder() -> (Seen, impl FnMut(&Event) + Send + 'static) {
        let seen: Seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |event: &Event| sink.lock().unwrap().push(event.clone()))
    }

    fn frame(client: &Client<MemoryTransport>, target: &str, topic: &str, sender: &str, payload: Value) -> Vec<u8> {
        client
            .codec()
            .encode_envelope(&Envelope::new(target, topic, sender, payload))
            .unwrap()
    }

    fn sent(client: &mut Client<MemoryTransport>) -> Vec<Outbound> {
        client
            .transport_mut()
            .take_sent()
            .iter()
            .map(|bytes| MsgpackCodec.decode_outbound(bytes).unwrap())
            .collect()
    }

    #[test]
    fn subscribe_while_connected_sends_immediately() {
        let mut client = Client::new(MemoryTransport::open(), ClientConfig::default());
        client.subscribe_with("acdata", SubscribeOptions::default().actonly(true), |_| {});
        client.subscribe("acdata", |_| {});

        let out = sent(&mut client);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].topic, "SUBSCRIBE");
        assert_eq!(out[0].target_group, None);
        assert_eq!(
            out[0].body,
            json!({"topic": "ACDATA", "fromGroup": "", "toGroup": "", "actonly": true})
        );
    }

    #[test]
    fn reset_routing_is_requested_on_open() {
        let mut client = Client::new(MemoryTransport::open(), ClientConfig::default());
        assert!(client.transport().sent().is_empty());
        assert_eq!(
            client.registry().get("reset").map(Subscription::kind),
            Some(SubscriptionType::Regular)
        );

        client.handle_open();
        let out = sent(&mut client);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].topic, "SUBSCRIBE");
        assert_eq!(
            out[0].body,
            json!({"topic": "RESET", "fromGroup": "", "toGroup": "", "actonly": false})
        );
        assert!(client.registry().topics_needing_sync().is_empty());
    }

    #[test]
    fn remote_reset_reaches_local_reset_subscribers() {
        let mut client = Client::new(MemoryTransport::open(), ClientConfig::default());
        let (seen, callback) = recorder();
        client.subscribe_with("reset", SubscribeOptions::default().local(), callback);
        client.set_active_node("S1");

        let bytes = frame(&client, "*", "RESET", "S1", Value::Null);
        client.handle_message(&bytes);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].sender_id, "S1");
    }

    #[test]
    fn local_subscribe_sends_nothing() {
        let mut client = Client::new(MemoryTransport::open(), ClientConfig::default());
        let sub = client.subscribe_with("echo", SubscribeOptions::default().local(), |_| {});
        assert_eq!(sub.active_pairs().count(), 0);
        assert!(sent(&mut client).is_empty());
    }

    #[test]
    fn send_while_closed_is_a_noop() {
        let mut client = Client::new(MemoryTransport::new(), ClientConfig::default());
        client.send("stack", json!("OP"), "");
        assert!(client.transport().sent().is_empty());
    }

    #[test]
    fn send_defaults_target_to_active_node() {
        let mut client = Client::new(MemoryTransport::open(), ClientConfig::default());
        client.send("stack", json!("OP"), "");
        client.set_active_node("S1");
        client.send("stack", json!("HOLD"), "");
        client.send("stack", json!("HOLD"), "S2");

        let targets: Vec<_> = sent(&mut client)
            .into_iter()
            .map(|out| out.target_group)
            .collect();
        assert_eq!(
            targets,
            vec![None, Some("S1".to_string()), Some("S2".to_string())]
        );
    }

    #[test]
    fn unknown_topic_is_dropped() {
        let mut client = Client::new(MemoryTransport::open(), ClientConfig::default());
        let bytes = frame(&client, "*", "acdata", "S1", json!(["U", {}]));
        client.handle_message(&bytes);
        assert!(!client.registry().contains("ACDATA"));
        assert!(!client.store().is_shared_state("acdata"));
    }

    #[test]
    fn unsolicited_topic_is_classified_when_accepted() {
        let config = ClientConfig {
            accept_unsolicited: true,
            ..ClientConfig::default()
        };
        let mut client = Client::new(MemoryTransport::open(), config);
        let bytes = frame(&client, "*", "acdata", "S1", json!(["U", {}]));
        client.handle_message(&bytes);
        assert_eq!(
            client.registry().get("ACDATA").map(Subscription::kind),
            Some(SubscriptionType::SharedState)
        );
        assert!(client.store().is_shared_state("acdata"));
    }

    #[test]
    fn garbage_frame_is_dropped() {
        let mut client = Client::new(MemoryTransport::open(), ClientConfig::default());
        client.handle_message(&[0xc1, 0x00]);
        assert_eq!(client.registry().len(), 1);
    }

    #[test]
    fn seeded_topic_starts_as_shared_state() {
        let mut defaults = TopicMap::new();
        defaults.insert("alt".to_string(), json!({"v": 0}));
        let config = ClientConfig {
            defaults,
            ..ClientConfig::default()
        };
        let mut client = Client::new(MemoryTransport::new(), config);
        let (seen, callback) = recorder();
        client.subscribe("ALT", callback);
        assert_eq!(
            client.registry().get("alt").map(Subscription::kind),
            Some(SubscriptionType::SharedState)
        );

        client.set_active_node("N1");
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].topic, "ALT");
        assert_eq!(seen[0].data, json!({"v": 0}));
    }

    #[test]
    fn unsubscribe_sends_when_active() {
        let mut client = Client::new(MemoryTransport::open(), ClientConfig::default());
        client.subscribe("route", |_| {});
        client.unsubscribe("route", &GroupPair::new("", ""));
        client.unsubscribe("route", &GroupPair::new("", ""));
        client.unsubscribe("never", &GroupPair::new("", ""));

        let topics: Vec<_> = sent(&mut client).into_iter().map(|out| out.topic).collect();
        assert_eq!(topics, vec!["SUBSCRIBE", "UNSUBSCRIBE"]);
    }

    #[test]
    fn malformed_active_node_change_is_ignored() {
        let mut client = Client::new(MemoryTransport::open(), ClientConfig::default());
        let bytes = frame(&client, "*", "ACTNODE-CHANGED", "server", json!(42));
        client.handle_message(&bytes);
        assert_eq!(client.active_node(), None);
    }
}
