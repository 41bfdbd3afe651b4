//! # SimState Agent
//!
//! Headless observer for SimState simulation servers.
//!
//! ## Architecture
//!
//! The agent runs a single loop that owns the client:
//! 1. **Ingress**: WebSocket frames are decoded and routed to subscriptions
//! 2. **Egress**: frames queued by the client are written to the socket
//! 3. **Shutdown**: Ctrl+C closes the socket and stops the loop
//!
//! Shared-state updates and regular events are logged through `tracing`.

use anyhow::Result;
use tracing_subscriber::EnvFilter;

mod config;
mod runtime;
mod transport;

pub use config::AgentConfig;
pub use runtime::Agent;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting SimState Agent"
    );

    // Load configuration
    let config = AgentConfig::from_env()?;

    let client_id = config.resolve_client_id();
    tracing::info!(
        %client_id,
        codec = ?config.server.codec,
        subscriptions = config.subscriptions.len(),
        "Agent initialized"
    );

    let agent = Agent::new(config, client_id);

    // Run agent
    agent.run().await?;

    Ok(())
}
