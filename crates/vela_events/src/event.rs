//! The immutable event record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of change carried by a repository event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    /// A new entity was stored.
    Created,
    /// An existing entity was replaced.
    Updated,
    /// An entity was removed.
    Deleted,
}

impl ChangeType {
    /// Returns the wire name of the change type.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
        }
    }
}

impl core::str::FromStr for ChangeType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "updated" => Ok(Self::Updated),
            "deleted" => Ok(Self::Deleted),
            _ => Err(()),
        }
    }
}

/// Fields carried by events describing a change to a reactive collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryChange {
    /// Name of the repository that changed.
    pub repository_name: String,
    /// What happened to the entity.
    pub change_type: ChangeType,
    /// Id of the affected entity, when it has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    /// Value after the change.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_value: Option<Value>,
    /// Value before the change.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_value: Option<Value>,
}

/// An immutable record of something that happened.
///
/// Serializes as `{"kind", "timestamp", "payload"}`, with the
/// [`RepositoryChange`] fields flattened alongside for repository events.
///
/// # Example
///
/// ```
/// use vela_events::Event;
/// use serde_json::json;
///
/// let event = Event::new("file.created", json!({"path": "/tmp/a.txt"}));
/// assert_eq!(event.kind(), "file.created");
/// assert_eq!(event.payload()["path"], "/tmp/a.txt");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    kind: String,
    timestamp: DateTime<Utc>,
    #[serde(default)]
    payload: Value,
    #[serde(flatten)]
    change: Option<RepositoryChange>,
}

impl Event {
    /// Creates an event stamped with the current time.
    #[must_use]
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            timestamp: Utc::now(),
            payload,
            change: None,
        }
    }

    /// Creates a repository change event.
    ///
    /// The payload is the new value for created/updated changes and the old
    /// value for deletions.
    #[must_use]
    pub fn repository_change(kind: impl Into<String>, change: RepositoryChange) -> Self {
        let payload = change
            .new_value
            .clone()
            .or_else(|| change.old_value.clone())
            .unwrap_or(Value::Null);
        Self {
            kind: kind.into(),
            timestamp: Utc::now(),
            payload,
            change: Some(change),
        }
    }

    /// Overrides the timestamp.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// The event kind, e.g. `"file.created"`.
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// When the event was created.
    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// The structured payload.
    #[must_use]
    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// Repository change fields, for repository events.
    #[must_use]
    pub fn change(&self) -> Option<&RepositoryChange> {
        self.change.as_ref()
    }

    /// Serializes the event to its JSON wire shape.
    pub fn to_json(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}
