//! Delta action taxonomy.
//!
//! A shared-state message carries a payload of the form `[code, data]` where
//! `code` is a single-character action code. The codes are:
//!
//! | Code | Action | Effect |
//! |------|--------|--------|
//! | `A` | Append | push a value onto a sequence attribute |
//! | `E` | Extend | same as append |
//! | `D` | Delete | remove by index, by value lookup, or by map key |
//! | `U` | Update | recursive merge into map attributes |
//! | `R` | Replace | overwrite attributes |
//! | `X` | Reset | restore the sender's store from the defaults |
//! | `C` | ActChange | make the sender the active node |

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The kind of mutation carried by a delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionType {
    /// Push one value onto a sequence attribute
    #[serde(rename = "A")]
    Append,
    /// Treated identically to `Append`
    #[serde(rename = "E")]
    Extend,
    /// Remove sequence elements or map keys
    #[serde(rename = "D")]
    Delete,
    /// Recursively merge map attributes
    #[serde(rename = "U")]
    Update,
    /// Overwrite attributes without merging
    #[serde(rename = "R")]
    Replace,
    /// Reset the sender's store to the defaults
    #[serde(rename = "X")]
    Reset,
    /// The sender becomes the active node
    #[serde(rename = "C")]
    ActChange,
    /// Placeholder; never a valid detected action
    #[serde(rename = "")]
    NoAction,
}

impl ActionType {
    /// All action types, including `NoAction`.
    pub const ALL: [ActionType; 8] = [
        ActionType::Append,
        ActionType::Extend,
        ActionType::Delete,
        ActionType::Update,
        ActionType::Replace,
        ActionType::Reset,
        ActionType::ActChange,
        ActionType::NoAction,
    ];

    /// The wire code of this action.
    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            ActionType::Append => "A",
            ActionType::Extend => "E",
            ActionType::Delete => "D",
            ActionType::Update => "U",
            ActionType::Replace => "R",
            ActionType::Reset => "X",
            ActionType::ActChange => "C",
            ActionType::NoAction => "",
        }
    }

    /// Look up an action by its wire code.
    #[must_use]
    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|action| action.code() == code)
    }

    /// Whether this action mutates attributes of a topic map (as opposed to
    /// acting on the whole node).
    #[must_use]
    pub fn is_keyed(self) -> bool {
        matches!(
            self,
            ActionType::Append
                | ActionType::Extend
                | ActionType::Delete
                | ActionType::Update
                | ActionType::Replace
        )
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Returns `true` if `code` names an action other than `NoAction`.
#[must_use]
pub fn is_action(code: &str) -> bool {
    ActionType::from_code(code).is_some_and(|action| action != ActionType::NoAction)
}

/// Returns `true` if the payload's leading element is an action code.
///
/// This is the only signal used to classify a topic as shared state.
#[must_use]
pub fn is_action_payload(payload: &Value) -> bool {
    payload
        .as_array()
        .and_then(|items| items.first())
        .and_then(Value::as_str)
        .is_some_and(is_action)
}

/// A parsed `[code, data]` delta.
#[derive(Debug, Clone, PartialEq)]
pub struct Delta {
    /// The action to apply
    pub action: ActionType,
    /// Action data; a map of attribute -> value for keyed actions
    pub data: Value,
}

impl Delta {
    /// Create a delta from its parts.
    #[must_use]
    pub fn new(action: ActionType, data: Value) -> Self {
        Self { action, data }
    }

    /// Parse a delta from a message payload.
    ///
    /// # Errors
    ///
    /// Returns error if the payload is not a `[code, data]` sequence or the
    /// code is not a valid action.
    pub fn from_payload(payload: &Value) -> Result<Self, DeltaError> {
        let items = payload.as_array().ok_or(DeltaError::NotASequence)?;
        let code = items
            .first()
            .and_then(Value::as_str)
            .ok_or(DeltaError::NotASequence)?;
        let action = ActionType::from_code(code)
            .filter(|action| *action != ActionType::NoAction)
            .ok_or_else(|| DeltaError::UnknownAction(code.to_string()))?;
        let data = items.get(1).cloned().unwrap_or(Value::Null);
        Ok(Self { action, data })
    }

    /// The action data as an attribute map.
    ///
    /// # Errors
    ///
    /// Returns error if the data is not a map.
    pub fn entries(&self) -> Result<&Map<String, Value>, DeltaError> {
        self.data
            .as_object()
            .ok_or(DeltaError::DataNotMap(self.action))
    }

    /// Encode back into a `[code, data]` payload.
    #[must_use]
    pub fn to_payload(&self) -> Value {
        Value::Array(vec![
            Value::String(self.action.code().to_string()),
            self.data.clone(),
        ])
    }
}

/// Errors raised while parsing or applying a delta.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeltaError {
    /// Payload is not a `[code, data]` sequence
    #[error("delta payload is not a [code, data] sequence")]
    NotASequence,
    /// Leading element is not a known action code
    #[error("unknown action code '{0}'")]
    UnknownAction(String),
    /// Keyed action whose data is not a map
    #[error("{0} delta data is not a map")]
    DataNotMap(ActionType),
    /// The topic value in the store is not a map
    #[error("state for topic '{0}' is not a map")]
    TopicNotMap(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn codes_roundtrip() {
        for action in ActionType::ALL {
            assert_eq!(ActionType::from_code(action.code()), Some(action));
        }
        assert_eq!(ActionType::from_code("Q"), None);
    }

    #[test]
    fn no_action_is_not_an_action() {
        assert!(!is_action(""));
        assert!(!is_action("Z"));
        assert!(!is_action("a"));
        for code in ["A", "E", "D", "U", "R", "X", "C"] {
            assert!(is_action(code), "{code} should be an action");
        }
    }

    #[test]
    fn payload_classification() {
        assert!(is_action_payload(&json!(["U", {"x": 1}])));
        assert!(is_action_payload(&json!(["X", null])));
        assert!(!is_action_payload(&json!(["hello", 1])));
        assert!(!is_action_payload(&json!([1, 2, 3])));
        assert!(!is_action_payload(&json!({"U": 1})));
        assert!(!is_action_payload(&json!([])));
        assert!(!is_action_payload(&json!("U")));
    }

    #[test]
    fn delta_parsing() {
        let delta = Delta::from_payload(&json!(["A", {"x": 5}])).unwrap();
        assert_eq!(delta.action, ActionType::Append);
        assert_eq!(delta.entries().unwrap()["x"], json!(5));

        let reset = Delta::from_payload(&json!(["X"])).unwrap();
        assert_eq!(reset.action, ActionType::Reset);
        assert_eq!(reset.data, Value::Null);

        assert_eq!(
            Delta::from_payload(&json!(["", {}])),
            Err(DeltaError::UnknownAction(String::new()))
        );
        assert_eq!(
            Delta::from_payload(&json!({"a": 1})),
            Err(DeltaError::NotASequence)
        );
    }

    #[test]
    fn keyed_data_must_be_map() {
        let delta = Delta::new(ActionType::Update, json!([1, 2]));
        assert_eq!(
            delta.entries(),
            Err(DeltaError::DataNotMap(ActionType::Update))
        );
    }

    #[test]
    fn serde_uses_wire_codes() {
        assert_eq!(serde_json::to_value(ActionType::Delete).unwrap(), json!("D"));
        let action: ActionType = serde_json::from_value(json!("C")).unwrap();
        assert_eq!(action, ActionType::ActChange);
    }
}
