//! Identifier newtypes used throughout the engine.

use serde::{Deserialize, Serialize};

use crate::config::GROUP_DELIMITER;

/// A persisted entity's identifier (business key).
///
/// Use natural business keys rather than synthetic values where possible —
/// they make log lines and conflict reports readable.
///
/// # Example
///
/// ```
/// use gearflow::EntityId;
///
/// let id = EntityId::new("window-7");
/// assert_eq!(id.as_str(), "window-7");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityId(String);

impl EntityId {
    /// Create a new entity id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume the wrapper and return the inner string.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

impl From<String> for EntityId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// An opaque workflow state identifier.
///
/// States are plain names drawn from the workflow's declared state set plus
/// the distinguished initial state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StateId(String);

impl StateId {
    /// Create a new state id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

impl From<String> for StateId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for StateId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// A message identifier, unique within one workflow.
///
/// An id may encode a hierarchical group with the `__` delimiter:
/// `edit__resize` is the leaf `resize` inside the group `edit`.
///
/// # Example
///
/// ```
/// use gearflow::MessageId;
///
/// let id = MessageId::new("edit__resize");
/// assert!(id.is_grouped());
/// assert_eq!(id.group_path(), vec!["edit", "resize"]);
///
/// let flat = MessageId::new("minimize");
/// assert!(!flat.is_grouped());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    /// Create a new message id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the id encodes a group path.
    pub fn is_grouped(&self) -> bool {
        self.0.contains(GROUP_DELIMITER)
    }

    /// The id split on the group delimiter. A flat id yields one segment.
    pub fn group_path(&self) -> Vec<&str> {
        self.0.split(GROUP_DELIMITER).collect()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}
