//! Merge semantics for keyed delta actions.
//!
//! Each keyed action operates on the value map of a single topic. The map's
//! attributes are value trees (scalars, sequences, maps).
//!
//! # Merge Rules
//!
//! | Action | Strategy |
//! |--------|----------|
//! | Update | Recursive key-by-key merge of maps, leaves overwritten |
//! | Append / Extend | Push one value onto a sequence (created if absent) |
//! | Replace | Overwrite the attribute |
//! | Delete | Remove an index from every sequence, or keys from a map |
//!
//! Delete resolves its target per entry, in order:
//!
//! - attribute absent: the value is an index, removed from every sequence
//! - attribute is a sequence: the index of the value in it, removed from every sequence
//! - attribute is a map: the value is a key (or keys) removed from that map, then stop
//!
//! An entry that resolves to no index stops the action.

use crate::action::{ActionType, Delta, DeltaError};
use serde_json::{Map, Value};

/// Apply a keyed delta to a topic's value map.
///
/// Reset and ActChange act on whole nodes and are ignored here.
///
/// # Errors
///
/// Returns error if the delta data is not a map; the target is untouched.
pub fn apply(target: &mut Map<String, Value>, delta: &Delta) -> Result<(), DeltaError> {
    if !delta.action.is_keyed() {
        return Ok(());
    }
    let entries = delta.entries()?;
    match delta.action {
        ActionType::Update => update(target, entries),
        ActionType::Append | ActionType::Extend => append(target, entries),
        ActionType::Replace => replace(target, entries),
        ActionType::Delete => delete(target, entries),
        ActionType::Reset | ActionType::ActChange | ActionType::NoAction => {}
    }
    Ok(())
}

/// Recursively merge `entries` into `target`.
///
/// Keys only in `entries` are added, keys in both are merged (maps) or
/// overwritten (anything else), keys only in `target` are untouched.
pub fn update(target: &mut Map<String, Value>, entries: &Map<String, Value>) {
    for (key, value) in entries {
        match target.get_mut(key) {
            Some(slot) => merge_value(slot, value),
            None => {
                target.insert(key.clone(), value.clone());
            }
        }
    }
}

/// Merge a single value into an existing slot.
pub fn merge_value(slot: &mut Value, value: &Value) {
    match (slot, value) {
        (Value::Object(existing), Value::Object(incoming)) => update(existing, incoming),
        (slot, _) => *slot = value.clone(),
    }
}

/// Push each value onto its sequence attribute, creating it if absent.
pub fn append(target: &mut Map<String, Value>, entries: &Map<String, Value>) {
    for (key, value) in entries {
        match target.get_mut(key) {
            None => {
                target.insert(key.clone(), Value::Array(vec![value.clone()]));
            }
            Some(Value::Array(items)) => items.push(value.clone()),
            Some(_) => {
                tracing::warn!(key = %key, "Cannot append to a non-sequence attribute, skipping");
            }
        }
    }
}

/// Overwrite each attribute.
pub fn replace(target: &mut Map<String, Value>, entries: &Map<String, Value>) {
    for (key, value) in entries {
        target.insert(key.clone(), value.clone());
    }
}

/// Remove sequence elements or map keys.
pub fn delete(target: &mut Map<String, Value>, entries: &Map<String, Value>) {
    for (key, value) in entries {
        let index = match target.get_mut(key) {
            None => as_index(value),
            Some(Value::Array(items)) => items.iter().position(|item| loosely_equal(item, value)),
            Some(Value::Object(map)) => {
                remove_keys(map, value);
                break;
            }
            Some(_) => None,
        };

        let Some(index) = index else {
            tracing::debug!(key = %key, value = %value, "Unresolved delete target");
            break;
        };
        remove_index(target, index);
    }
}

/// Remove `index` from every sequence attribute long enough to hold it.
fn remove_index(target: &mut Map<String, Value>, index: usize) {
    for value in target.values_mut() {
        if let Value::Array(items) = value {
            if index < items.len() {
                items.remove(index);
            }
        }
    }
}

fn remove_keys(map: &mut Map<String, Value>, keys: &Value) {
    match keys {
        Value::Array(keys) => {
            for key in keys {
                if let Some(key) = as_key(key) {
                    map.shift_remove(&key);
                }
            }
        }
        key => {
            if let Some(key) = as_key(key) {
                map.shift_remove(&key);
            }
        }
    }
}

fn as_key(value: &Value) -> Option<String> {
    match value {
        Value::String(key) => Some(key.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn as_index(value: &Value) -> Option<usize> {
    if let Some(index) = value.as_u64() {
        return usize::try_from(index).ok();
    }
    // Integral floats are valid indices too.
    value
        .as_f64()
        .filter(|f| *f >= 0.0 && f.fract() == 0.0)
        .map(|f| f as usize)
}

/// Equality where numbers compare by value regardless of integer/float encoding.
fn loosely_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x == y || x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}
