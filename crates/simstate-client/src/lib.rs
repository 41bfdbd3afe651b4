//! # SimState Client
//!
//! Subscription and shared-state client for SimState simulation servers.
//!
//! ## Architecture
//!
//! - [`Registry`]: one subscription per topic, classified on first message
//! - [`Membership`]: remote nodes announced by the server
//! - [`Client`]: glues registry, membership and the core state store to a
//!   duplex [`Transport`]
//!
//! The client never opens a connection itself. The host owns the socket,
//! hands outbound frames to the network and calls `handle_open`,
//! `handle_message`, `handle_close` and `handle_error` as events arrive.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod membership;
pub mod registry;
pub mod transport;

pub use client::{Client, ClientConfig, SubscribeOptions};
pub use membership::Membership;
pub use registry::{Callback, Delivery, Event, Registry, Subscription, SubscriptionType};
pub use transport::{MemoryTransport, Transport, TransportError};
