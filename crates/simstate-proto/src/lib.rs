//! # SimState Protocol
//!
//! Wire framing and control messages for SimState.
//!
//! ## Frames
//!
//! - Inbound: `(targetGroup, topic, senderId, payload)`
//! - Outbound: `(targetGroup, topic, body)`
//!
//! ## Control Topics
//!
//! - `SUBSCRIBE` / `UNSUBSCRIBE`: subscription routing on the server
//! - `REQUEST`: full-state dump request to a node
//! - `NODE-ADDED`, `ACTNODE-CHANGED`, `RESET`: membership notifications

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod messages;
pub mod topics;

pub use codec::{CborCodec, Codec, CodecError, MsgpackCodec, WireCodec, NDARRAY_EXT_TYPE};
pub use messages::{
    ControlMessage, Envelope, GroupPair, MessageError, Outbound, SubscribeBody, UnsubscribeBody,
};
pub use topics::{wire_topic, ControlTopic};
