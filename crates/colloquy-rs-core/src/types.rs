//! Core data types shared across the conversation API.

use chrono::{DateTime, Local, Utc};
use colloquy_rs_store::Record;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use colloquy_rs_protocol::{GenerationId, MessageId, Role, ThreadId};

/// Presentation hint for a message, independent of its role.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StyleType {
    #[default]
    None,
    Accent,
    Warning,
    Success,
    Danger,
}

/// One persisted turn of a conversation.
///
/// `display_content` is what a reader sees; `model_content` is what the
/// generator is fed. They differ when a prompt template was applied.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: MessageId,
    pub thread_id: ThreadId,
    pub role: Role,
    #[serde(default)]
    pub display_content: String,
    #[serde(default)]
    pub model_content: String,
    #[serde(default)]
    pub style_type: StyleType,
    pub created_at: DateTime<Utc>,
    /// Prompt template applied to produce `model_content`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_id: Option<String>,
    /// Author name; function messages use it for the tool name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Message {
    /// Create a message whose display and model content are identical.
    pub fn new(thread_id: ThreadId, role: Role, content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            id: Uuid::new_v4(),
            thread_id,
            role,
            display_content: content.clone(),
            model_content: content,
            style_type: StyleType::None,
            created_at: Utc::now(),
            command_id: None,
            name: None,
        }
    }

    pub fn with_model_content(mut self, model_content: impl Into<String>) -> Self {
        self.model_content = model_content.into();
        self
    }

    pub fn with_style(mut self, style_type: StyleType) -> Self {
        self.style_type = style_type;
        self
    }

    pub fn with_command_id(mut self, command_id: Option<String>) -> Self {
        self.command_id = command_id;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// User and assistant messages with visible text.
    pub fn is_displayable(&self) -> bool {
        matches!(self.role, Role::User | Role::Assistant) && !self.display_content.trim().is_empty()
    }
}

impl Record for Message {
    type Id = MessageId;

    fn id(&self) -> &MessageId {
        &self.id
    }
}

/// Conversation metadata kept by the thread registry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Thread {
    pub id: ThreadId,
    pub name: String,
    pub created_at: DateTime<Utc>,
    /// Set by the first successful message write.
    #[serde(default)]
    pub modified_at: Option<DateTime<Utc>>,
}

impl Thread {
    /// Create a thread with a fresh id, named after its local creation time
    /// unless a name is given.
    pub fn new(name: Option<String>) -> Self {
        let name = name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(default_thread_name);
        Self {
            id: Uuid::new_v4(),
            name,
            created_at: Utc::now(),
            modified_at: None,
        }
    }
}

impl Record for Thread {
    type Id = ThreadId;

    fn id(&self) -> &ThreadId {
        &self.id
    }
}

/// `YYYY-MM-DD (HH:MM:SS)` in local time.
pub fn default_thread_name() -> String {
    Local::now().format("%Y-%m-%d (%H:%M:%S)").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn message_serializes_with_snake_case_fields() {
        let thread_id = Uuid::new_v4();
        let message = Message::new(thread_id, Role::User, "hi")
            .with_model_content("Translate: hi")
            .with_command_id(Some("translate".to_string()));
        let value = serde_json::to_value(&message).expect("serialize");

        assert_eq!(value["role"], json!("user"));
        assert_eq!(value["display_content"], json!("hi"));
        assert_eq!(value["model_content"], json!("Translate: hi"));
        assert_eq!(value["style_type"], json!("none"));
        assert_eq!(value["command_id"], json!("translate"));
        assert_eq!(value.get("name"), None);
    }

    #[test]
    fn message_defaults_missing_optional_fields() {
        let thread_id = Uuid::new_v4();
        let id = Uuid::new_v4();
        let line = json!({
            "id": id,
            "thread_id": thread_id,
            "role": "assistant",
            "display_content": "hello",
            "created_at": "2024-05-01T10:00:00Z"
        });
        let message: Message = serde_json::from_value(line).expect("decode");
        assert_eq!(message.style_type, StyleType::None);
        assert_eq!(message.model_content, "");
        assert_eq!(message.command_id, None);
    }

    #[test]
    fn displayable_requires_user_or_assistant_with_text() {
        let thread_id = Uuid::new_v4();
        assert!(Message::new(thread_id, Role::User, "hi").is_displayable());
        assert!(Message::new(thread_id, Role::Assistant, "ok").is_displayable());
        assert!(!Message::new(thread_id, Role::Assistant, "  ").is_displayable());
        assert!(!Message::new(thread_id, Role::System, "rules").is_displayable());
        assert!(!Message::new(thread_id, Role::Function, "42").is_displayable());
    }

    #[test]
    fn thread_name_defaults_to_timestamp() {
        let thread = Thread::new(None);
        let name = thread.name.as_bytes();
        assert_eq!(thread.name.len(), "2024-05-01 (10:00:00)".len());
        assert_eq!((name[4], name[7], name[10], name[11]), (b'-', b'-', b' ', b'('));
        assert_eq!(Thread::new(Some("  ".to_string())).name.len(), thread.name.len());
        assert_eq!(Thread::new(Some("Trip".to_string())).name, "Trip");
    }
}
