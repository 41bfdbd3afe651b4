//! # SimState Core
//!
//! Shared-state reconciliation for SimState.
//!
//! This crate provides:
//! - The delta action taxonomy and payload classification
//! - Merge rules for keyed delta actions on value trees
//! - Per-node state mirrors seeded from a defaults template
//! - Active-node tracking and change notifications

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod action;
pub mod merge;
pub mod store;

pub use action::{is_action, is_action_payload, ActionType, Delta, DeltaError};
pub use store::{topic_key, DeltaOutcome, StateChange, StateStore, TopicMap};
