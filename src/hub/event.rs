//! Project events and their wire envelope.
//!
//! Every frame exchanged on the real-time channel uses the same JSON envelope:
//!
//! ```json
//! { "type": "task_created", "project_id": 7, "user_id": 3, "data": { ... } }
//! ```
//!
//! Envelopes are decoded into a typed [`Event`] before they reach the hub, so
//! an unknown `type` or a payload that does not fit its kind never gets routed.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Identifier of a project, the fan-out scope of the hub
pub type ProjectId = u64;

/// Identifier of an authenticated user
pub type UserId = u64;

/// Kinds of state mutation that are pushed to connected clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    TaskCreated,
    TaskUpdated,
    TaskDeleted,
    FileCreated,
    FileUpdated,
    FileDeleted,
    ChatMessage,
    SprintCreated,
    SprintUpdated,
    SprintDeleted,
}

impl EventKind {
    pub const ALL: [EventKind; 10] = [
        EventKind::TaskCreated,
        EventKind::TaskUpdated,
        EventKind::TaskDeleted,
        EventKind::FileCreated,
        EventKind::FileUpdated,
        EventKind::FileDeleted,
        EventKind::ChatMessage,
        EventKind::SprintCreated,
        EventKind::SprintUpdated,
        EventKind::SprintDeleted,
    ];

    /// Wire name used in the envelope `type` field
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::TaskCreated => "task_created",
            EventKind::TaskUpdated => "task_updated",
            EventKind::TaskDeleted => "task_deleted",
            EventKind::FileCreated => "file_created",
            EventKind::FileUpdated => "file_updated",
            EventKind::FileDeleted => "file_deleted",
            EventKind::ChatMessage => "chat_message",
            EventKind::SprintCreated => "sprint_created",
            EventKind::SprintUpdated => "sprint_updated",
            EventKind::SprintDeleted => "sprint_deleted",
        }
    }

    /// The entity this kind of event mutates (used as a metrics label)
    pub fn entity(&self) -> &'static str {
        match self {
            EventKind::TaskCreated | EventKind::TaskUpdated | EventKind::TaskDeleted => "task",
            EventKind::FileCreated | EventKind::FileUpdated | EventKind::FileDeleted => "file",
            EventKind::ChatMessage => "chat",
            EventKind::SprintCreated | EventKind::SprintUpdated | EventKind::SprintDeleted => {
                "sprint"
            }
        }
    }

    /// Deletions only carry the id of the removed record
    pub fn is_deletion(&self) -> bool {
        matches!(
            self,
            EventKind::TaskDeleted | EventKind::FileDeleted | EventKind::SprintDeleted
        )
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| DecodeError::UnknownType(s.to_string()))
    }
}

/// Payload of an event, shaped by its kind
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    /// The created or updated record, or the chat message that was sent
    Record(Value),
    /// Id of the deleted record
    Deleted { id: u64 },
}

impl EventPayload {
    fn into_value(self) -> Value {
        match self {
            EventPayload::Record(value) => value,
            EventPayload::Deleted { id } => serde_json::json!({ "id": id }),
        }
    }
}

/// Errors produced while decoding an envelope into an [`Event`]
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed envelope: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown event type: {0}")]
    UnknownType(String),

    #[error("invalid payload for {kind}: {reason}")]
    InvalidPayload { kind: EventKind, reason: String },
}

/// JSON envelope as it travels over the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub event_type: String,
    pub project_id: ProjectId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    #[serde(default)]
    pub data: Value,
}

/// One fan-out unit: a state mutation scoped to exactly one project
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub kind: EventKind,
    pub project_id: ProjectId,
    pub user_id: Option<UserId>,
    pub payload: EventPayload,
}

impl Event {
    /// Event carrying a full record (created / updated / chat kinds)
    pub fn record(kind: EventKind, project_id: ProjectId, data: Value) -> Self {
        Self {
            kind,
            project_id,
            user_id: None,
            payload: EventPayload::Record(data),
        }
    }

    /// Event carrying a serializable record
    pub fn record_from<T: Serialize>(
        kind: EventKind,
        project_id: ProjectId,
        record: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::record(kind, project_id, serde_json::to_value(record)?))
    }

    /// Event announcing the deletion of a record
    pub fn deleted(kind: EventKind, project_id: ProjectId, id: u64) -> Self {
        Self {
            kind,
            project_id,
            user_id: None,
            payload: EventPayload::Deleted { id },
        }
    }

    /// Attach the user that caused the mutation
    pub fn with_user(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    /// Decode raw bytes (a JSON envelope) into an event
    pub fn decode(raw: &[u8]) -> Result<Self, DecodeError> {
        let envelope: Envelope = serde_json::from_slice(raw)?;
        Self::try_from(envelope)
    }

    /// Serialize the event back into its wire envelope
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.to_envelope())
    }

    pub fn to_envelope(&self) -> Envelope {
        Envelope {
            event_type: self.kind.as_str().to_string(),
            project_id: self.project_id,
            user_id: self.user_id,
            data: self.payload.clone().into_value(),
        }
    }
}

impl TryFrom<Envelope> for Event {
    type Error = DecodeError;

    fn try_from(envelope: Envelope) -> Result<Self, Self::Error> {
        let kind: EventKind = envelope.event_type.parse()?;

        let payload = if kind.is_deletion() {
            let id = envelope
                .data
                .get("id")
                .and_then(Value::as_u64)
                .ok_or_else(|| DecodeError::InvalidPayload {
                    kind,
                    reason: "expected an object with a numeric `id`".to_string(),
                })?;
            EventPayload::Deleted { id }
        } else {
            if !envelope.data.is_object() {
                return Err(DecodeError::InvalidPayload {
                    kind,
                    reason: "expected a record object".to_string(),
                });
            }
            EventPayload::Record(envelope.data)
        };

        Ok(Self {
            kind,
            project_id: envelope.project_id,
            user_id: envelope.user_id,
            payload,
        })
    }
}
