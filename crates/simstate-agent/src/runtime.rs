//! Agent runtime orchestration.

use crate::config::AgentConfig;
use crate::transport::ChannelTransport;
use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use simstate_client::{Client, Event, SubscribeOptions};
use simstate_proto::WireCodec;
use tokio_tungstenite::tungstenite::Message;

/// The main agent runtime.
pub struct Agent {
    config: AgentConfig,
    client_id: String,
}

impl Agent {
    /// Create a new agent.
    #[must_use]
    pub fn new(config: AgentConfig, client_id: String) -> Self {
        Self { config, client_id }
    }

    /// Build the client and register the configured subscriptions.
    ///
    /// The returned receiver yields every frame the client sends.
    fn build_client(
        &self,
    ) -> (
        Client<ChannelTransport, WireCodec>,
        tokio::sync::mpsc::UnboundedReceiver<Vec<u8>>,
    ) {
        let (transport, outbound) = ChannelTransport::new();
        let mut client =
            Client::with_codec(transport, self.config.server.codec, self.config.client_config());

        for sub in &self.config.subscriptions {
            let options = SubscribeOptions {
                groups: sub.groups(),
                actonly: sub.actonly,
                ..SubscribeOptions::default()
            };
            client.subscribe_with(&sub.topic, options, log_event);
        }
        (client, outbound)
    }

    /// Run the agent's main loop.
    ///
    /// # Errors
    ///
    /// Returns error if the server cannot be reached.
    pub async fn run(self) -> Result<()> {
        tracing::info!("Starting agent runtime");

        let url = self.config.websocket_url(&self.client_id)?;
        let (mut client, mut outbound) = self.build_client();

        let (ws, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .with_context(|| format!("Failed to connect to {url}"))?;
        let (mut write, mut read) = ws.split();

        client.transport().set_open(true);
        client.handle_open();

        tracing::info!(%url, "Agent running, press Ctrl+C to stop");

        // Main event loop
        loop {
            tokio::select! {
                // Handle inbound frames
                message = read.next() => {
                    match message {
                        Some(Ok(Message::Binary(frame))) => client.handle_message(&frame),
                        Some(Ok(Message::Text(text))) => client.handle_message(text.as_bytes()),
                        Some(Ok(Message::Close(frame))) => {
                            tracing::debug!(?frame, "Close frame received");
                            client.transport().set_open(false);
                            client.handle_close();
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(err)) => {
                            client.transport().set_open(false);
                            client.handle_error(&err);
                            client.handle_close();
                            break;
                        }
                        None => {
                            client.transport().set_open(false);
                            client.handle_close();
                            break;
                        }
                    }
                }

                // Forward client frames to the socket
                Some(frame) = outbound.recv() => {
                    if let Err(err) = write.send(Message::Binary(frame)).await {
                        client.transport().set_open(false);
                        client.handle_error(&err);
                        client.handle_close();
                        break;
                    }
                }

                // Handle shutdown
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Shutdown signal received");
                    client.transport().set_open(false);
                    if let Err(err) = write.close().await {
                        tracing::debug!(error = %err, "Close handshake failed");
                    }
                    break;
                }
            }
        }

        tracing::info!(
            nodes = client.membership().nodes().len(),
            active_node = ?client.active_node(),
            "Agent stopped"
        );
        Ok(())
    }
}

fn log_event(event: &Event) {
    tracing::info!(
        topic = %event.topic,
        sender_id = %event.sender_id,
        target_group = %event.target_group,
        data = %event.data,
        "Update"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SubscriptionConfig;
    use simstate_proto::{Codec, ControlMessage, GroupPair};

    #[test]
    fn configured_subscriptions_queue_until_open() {
        let config = AgentConfig {
            subscriptions: vec![SubscriptionConfig {
                topic: "acdata".to_string(),
                from_group: "S".to_string(),
                to_group: String::new(),
                actonly: Some(true),
            }],
            ..AgentConfig::default()
        };
        let agent = Agent::new(config, "observer".to_string());
        let (mut client, mut outbound) = agent.build_client();
        assert!(outbound.try_recv().is_err());

        client.transport().set_open(true);
        client.handle_open();

        let mut sent = Vec::new();
        while let Ok(frame) = outbound.try_recv() {
            sent.push(WireCodec::Msgpack.decode_outbound(&frame).unwrap());
        }
        let expected = vec![
            ControlMessage::subscribe("RESET", &GroupPair::new("", ""), false)
                .to_outbound()
                .unwrap(),
            ControlMessage::subscribe("ACDATA", &GroupPair::new("S", ""), true)
                .to_outbound()
                .unwrap(),
        ];
        assert_eq!(sent, expected);
    }
}
