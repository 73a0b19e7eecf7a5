//! Wire protocol types for Colloquy notification events and common ids.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a conversation thread.
pub type ThreadId = Uuid;
/// Unique identifier for a persisted message.
pub type MessageId = Uuid;
/// Unique identifier for one in-flight generation.
pub type GenerationId = Uuid;

/// Author of a message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Function,
}

impl Role {
    /// Every role, in declaration order.
    pub const ALL: [Role; 4] = [Role::User, Role::Assistant, Role::System, Role::Function];

    /// Lowercase wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
            Role::Function => "function",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|role| role.as_str() == value)
            .ok_or_else(|| format!("unknown role `{value}`"))
    }
}

/// Wrapper for events published on the notification bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventMsg {
    /// Unique id for the event.
    pub id: Uuid,
    /// Thread the event belongs to.
    pub thread_id: ThreadId,
    /// Timestamp when the event was created.
    pub created_at: DateTime<Utc>,
    /// Event payload content.
    pub payload: EventPayload,
}

impl EventMsg {
    /// Build a new event stamped with a fresh id and the current time.
    pub fn new(thread_id: ThreadId, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            thread_id,
            created_at: Utc::now(),
            payload,
        }
    }
}

/// All events emitted while a generation is in flight.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case", tag = "type", content = "payload")]
pub enum EventPayload {
    /// Partial assistant text, delivered as soon as it arrives.
    Token {
        generation_id: GenerationId,
        text: String,
    },
    /// Generation finished and the assistant message was persisted.
    Complete {
        generation_id: GenerationId,
        message_id: MessageId,
        content: String,
    },
    /// Generation was cancelled on request.
    Cancelled { generation_id: Option<GenerationId> },
    /// Generation failed; carries a human-readable cause.
    Error {
        generation_id: Option<GenerationId>,
        message: String,
    },
}

impl EventPayload {
    /// Return the generation id carried by the payload, if any.
    pub fn generation_id(&self) -> Option<GenerationId> {
        match self {
            EventPayload::Token { generation_id, .. }
            | EventPayload::Complete { generation_id, .. } => Some(*generation_id),
            EventPayload::Cancelled { generation_id }
            | EventPayload::Error { generation_id, .. } => *generation_id,
        }
    }

    /// True for events that end a generation.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, EventPayload::Token { .. })
    }
}

/// Sink interface for orchestrator notifications.
pub trait EventSink: Send + Sync {
    /// Emit an event to downstream listeners without blocking.
    fn emit(&self, event: EventMsg);
}
