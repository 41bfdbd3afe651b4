//! Agent configuration.

use anyhow::{Context, Result};
use serde::Deserialize;
use simstate_client::ClientConfig;
use simstate_proto::{GroupPair, WireCodec};
use url::Url;
use uuid::Uuid;

/// Agent configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Client identifier used in the connection path
    pub client_id: Option<String>,

    /// Server connection configuration
    pub server: ServerConfig,

    /// Only track nodes whose id starts with this prefix
    pub node_prefix: Option<String>,

    /// Track topics nobody subscribed to
    pub accept_unsolicited: bool,

    /// Topics to subscribe to
    pub subscriptions: Vec<SubscriptionConfig>,
}

/// Server connection configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Frame codec
    pub codec: WireCodec,
}

/// Subscription configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionConfig {
    /// Topic name
    pub topic: String,

    /// Sending group filter
    #[serde(default)]
    pub from_group: String,

    /// Receiving group filter
    #[serde(default)]
    pub to_group: String,

    /// Only route messages from the active node
    #[serde(default)]
    pub actonly: Option<bool>,
}

impl SubscriptionConfig {
    /// The routing pair to request.
    #[must_use]
    pub fn groups(&self) -> GroupPair {
        GroupPair::new(self.from_group.clone(), self.to_group.clone())
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 5000,
                codec: WireCodec::Msgpack,
            },
            node_prefix: None,
            accept_unsolicited: false,
            subscriptions: Vec::new(),
        }
    }
}

impl AgentConfig {
    /// Load configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `SIMSTATE_HOST`: Server host
    /// - `SIMSTATE_PORT`: Server port
    /// - `SIMSTATE_CLIENT_ID`: Client identifier (random UUID if unset)
    /// - `SIMSTATE_NODE_PREFIX`: Node id prefix filter
    /// - `SIMSTATE_ACCEPT_UNSOLICITED`: "true" to track unsubscribed topics
    /// - `SIMSTATE_SUBSCRIPTIONS`: JSON list of `{topic, fromGroup, toGroup, actonly}`
    /// - `SIMSTATE_CODEC`: "msgpack" or "cbor"
    ///
    /// # Errors
    ///
    /// Returns error if a variable is set but cannot be parsed.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(host) = std::env::var("SIMSTATE_HOST") {
            config.server.host = host;
        }

        if let Ok(port) = std::env::var("SIMSTATE_PORT") {
            config.server.port = port.parse().context("Invalid SIMSTATE_PORT")?;
        }

        if let Ok(id) = std::env::var("SIMSTATE_CLIENT_ID") {
            config.client_id = Some(id);
        }

        if let Ok(prefix) = std::env::var("SIMSTATE_NODE_PREFIX") {
            config.node_prefix = Some(prefix).filter(|p| !p.is_empty());
        }

        if let Ok(flag) = std::env::var("SIMSTATE_ACCEPT_UNSOLICITED") {
            config.accept_unsolicited = parse_flag(&flag)
                .with_context(|| format!("Invalid SIMSTATE_ACCEPT_UNSOLICITED: {flag}"))?;
        }

        if let Ok(codec) = std::env::var("SIMSTATE_CODEC") {
            config.server.codec = codec.parse().context("Invalid SIMSTATE_CODEC")?;
        }

        // Parse subscriptions from JSON env var
        if let Ok(subs_json) = std::env::var("SIMSTATE_SUBSCRIPTIONS") {
            config.subscriptions =
                serde_json::from_str(&subs_json).context("Invalid SIMSTATE_SUBSCRIPTIONS JSON")?;
        }

        Ok(config)
    }

    /// The client id, generating a random one if none is configured.
    #[must_use]
    pub fn resolve_client_id(&self) -> String {
        self.client_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string())
    }

    /// WebSocket endpoint for `client_id`.
    ///
    /// # Errors
    ///
    /// Returns error if host or client id produce an invalid URL.
    pub fn websocket_url(&self, client_id: &str) -> Result<Url> {
        let base = format!("ws://{}:{}/", self.server.host, self.server.port);
        let mut url = Url::parse(&base).with_context(|| format!("Invalid server address {base}"))?;
        url.path_segments_mut()
            .map_err(|()| anyhow::anyhow!("Server URL cannot carry a path"))?
            .clear()
            .push("ws")
            .push(client_id);
        Ok(url)
    }

    /// Library configuration derived from the agent settings.
    #[must_use]
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            node_prefix: self.node_prefix.clone(),
            accept_unsolicited: self.accept_unsolicited,
            ..ClientConfig::default()
        }
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn websocket_url_uses_client_id_path() {
        let config = AgentConfig::default();
        let url = config.websocket_url("observer-1").unwrap();
        assert_eq!(url.as_str(), "ws://127.0.0.1:5000/ws/observer-1");
    }

    #[test]
    fn websocket_url_escapes_client_id() {
        let config = AgentConfig::default();
        let url = config.websocket_url("a b/c").unwrap();
        assert_eq!(url.path(), "/ws/a%20b%2Fc");
    }

    #[test]
    fn subscriptions_parse_with_defaults() {
        let subs: Vec<SubscriptionConfig> = serde_json::from_str(
            r#"[{"topic": "acdata"}, {"topic": "route", "fromGroup": "S", "actonly": true}]"#,
        )
        .unwrap();
        assert_eq!(subs[0].groups(), GroupPair::new("", ""));
        assert_eq!(subs[0].actonly, None);
        assert_eq!(subs[1].groups(), GroupPair::new("S", ""));
        assert_eq!(subs[1].actonly, Some(true));
    }

    #[test]
    fn flags() {
        assert_eq!(parse_flag("TRUE"), Some(true));
        assert_eq!(parse_flag("0"), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }

    #[test]
    fn configured_client_id_wins() {
        let config = AgentConfig {
            client_id: Some("fixed".to_string()),
            ..AgentConfig::default()
        };
        assert_eq!(config.resolve_client_id(), "fixed");
        assert_eq!(AgentConfig::default().resolve_client_id().len(), 36);
    }
}
