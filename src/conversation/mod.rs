//! Conversation and message types
//!
//! The serialized shape (camelCase fields, ISO-8601 timestamps) matches both
//! the persisted store payload and the cross-tab broadcast payload.

pub mod persona;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use persona::Persona;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    User,
    Agent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    /// User-authored turn awaiting its paired reply.
    Pending,
    Sent,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub content: String,
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Message {
    /// New user turn, created `pending` until its reply arrives.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageKind::User, content, MessageStatus::Pending)
    }

    /// New agent turn, created `sent` directly.
    pub fn agent(content: impl Into<String>) -> Self {
        Self::new(MessageKind::Agent, content, MessageStatus::Sent)
    }

    fn new(kind: MessageKind, content: impl Into<String>, status: MessageStatus) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            kind,
            content: content.into(),
            status,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn set_status(&mut self, status: MessageStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }

    /// Presentation text for this message.
    ///
    /// The welcome message carries its text JSON-wrapped as `{"content": ...}`
    /// (a compatibility quirk of the persisted format); this unwraps it.
    /// Regular turns come back unchanged.
    pub fn display_content(&self) -> String {
        persona::unwrap_welcome(&self.content).unwrap_or_else(|| self.content.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: Uuid,
    pub persona_id: String,
    /// Set at most once, when the mystery persona's first reply reveals the
    /// assigned celebrity identity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub celebrity_id: Option<String>,
    /// Append-only; individual messages are never reordered or removed.
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(persona_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            persona_id: persona_id.into(),
            celebrity_id: None,
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Append a message and refresh `updated_at`.
    pub fn push_message(&mut self, message: Message) {
        self.messages.push(message);
        self.touch();
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// One-time celebrity assignment; later calls are ignored.
    pub fn set_celebrity(&mut self, celebrity_id: impl Into<String>) {
        if self.celebrity_id.is_none() {
            self.celebrity_id = Some(celebrity_id.into());
        }
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_message_starts_pending() {
        let msg = Message::user("Hello");
        assert_eq!(msg.kind, MessageKind::User);
        assert_eq!(msg.status, MessageStatus::Pending);
    }

    #[test]
    fn test_agent_message_starts_sent() {
        let msg = Message::agent("Hi there");
        assert_eq!(msg.kind, MessageKind::Agent);
        assert_eq!(msg.status, MessageStatus::Sent);
    }

    #[test]
    fn test_status_transition_refreshes_updated_at() {
        let mut msg = Message::user("Hello");
        let before = msg.updated_at;
        msg.set_status(MessageStatus::Sent);
        assert!(msg.updated_at >= before);
        assert_eq!(msg.status, MessageStatus::Sent);
    }

    #[test]
    fn test_celebrity_set_once() {
        let mut chat = Conversation::new("mystery");
        chat.set_celebrity("elvis");
        chat.set_celebrity("madonna");
        assert_eq!(chat.celebrity_id.as_deref(), Some("elvis"));
    }

    #[test]
    fn test_serialized_shape_is_camel_case() {
        let chat = Conversation::new("therapist");
        let value = serde_json::to_value(&chat).unwrap();
        assert!(value.get("personaId").is_some());
        assert!(value.get("createdAt").is_some());
        // Unset celebrity is omitted entirely
        assert!(value.get("celebrityId").is_none());
    }

    #[test]
    fn test_timestamps_serialize_as_iso8601() {
        let msg = Message::user("Hello");
        let value = serde_json::to_value(&msg).unwrap();
        let created = value["createdAt"].as_str().unwrap();
        assert!(created.parse::<DateTime<Utc>>().is_ok());
    }
}
