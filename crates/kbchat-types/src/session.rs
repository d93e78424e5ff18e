//! Chat session and message types.
//!
//! These mirror the back-end's persisted records. The client never fabricates
//! a persisted [`Message`]; in-flight assistant text lives in the core's
//! transient stream state instead.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use std::fmt;
use std::str::FromStr;

/// Role of a message in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::System => write!(f, "system"),
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
        }
    }
}

impl FromStr for MessageRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "system" => Ok(MessageRole::System),
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            other => Err(format!("invalid message role: '{other}'")),
        }
    }
}

/// A conversation thread known to the back-end.
///
/// The title is server-assigned (the back-end renames a session after its
/// first exchange). Persona and provider are foreign references owned by
/// other collaborators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub title: String,
    #[serde(default)]
    pub persona_id: Option<Uuid>,
    pub llm_provider: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Session {
    /// Timestamp of the most recent activity on this session.
    pub fn last_active_at(&self) -> DateTime<Utc> {
        self.updated_at.unwrap_or(self.created_at)
    }
}

/// A persisted message within a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub session_id: Uuid,
    pub role: MessageRole,
    pub content: String,
    /// Identifiers of the retrieved chunks that grounded this reply.
    #[serde(default)]
    pub context_chunks: Option<Vec<String>>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Number of grounding references cited by this message.
    pub fn source_count(&self) -> usize {
        self.context_chunks.as_ref().map_or(0, Vec::len)
    }
}

/// A session together with its ordered transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionDetail {
    #[serde(flatten)]
    pub session: Session,
    #[serde(default)]
    pub messages: Vec<Message>,
}

/// Body of a create-session request.
///
/// Omitted fields fall back to back-end defaults: a missing persona means
/// the system default persona, a missing title means "New Chat".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewSession {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persona_id: Option<Uuid>,
    pub llm_provider: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_role_roundtrip() {
        for role in [MessageRole::System, MessageRole::User, MessageRole::Assistant] {
            let parsed: MessageRole = role.to_string().parse().unwrap();
            assert_eq!(role, parsed);
        }
        assert!("tool".parse::<MessageRole>().is_err());
    }

    #[test]
    fn test_session_detail_deserializes_backend_payload() {
        let json = r#"{
            "id": "0f8fad5b-d9cb-469f-a165-70867728950e",
            "title": "New Chat",
            "persona_id": null,
            "llm_provider": "ollama",
            "created_at": "2024-05-01T10:00:00.123456+00:00",
            "updated_at": null,
            "messages": [
                {
                    "id": "7c9e6679-7425-40de-944b-e07fc1f90ae7",
                    "session_id": "0f8fad5b-d9cb-469f-a165-70867728950e",
                    "role": "assistant",
                    "content": "Hi there",
                    "context_chunks": ["a", "b"],
                    "created_at": "2024-05-01T10:00:01+00:00"
                }
            ]
        }"#;

        let detail: SessionDetail = serde_json::from_str(json).unwrap();
        assert_eq!(detail.session.llm_provider, "ollama");
        assert_eq!(detail.messages.len(), 1);
        assert_eq!(detail.messages[0].role, MessageRole::Assistant);
        assert_eq!(detail.messages[0].source_count(), 2);
    }

    #[test]
    fn test_session_without_messages_field() {
        let json = r#"{
            "id": "0f8fad5b-d9cb-469f-a165-70867728950e",
            "title": "t",
            "llm_provider": "azure_openai",
            "created_at": "2024-05-01T10:00:00Z"
        }"#;
        let detail: SessionDetail = serde_json::from_str(json).unwrap();
        assert!(detail.messages.is_empty());
        assert!(detail.session.persona_id.is_none());
    }

    #[test]
    fn test_last_active_prefers_updated_at() {
        let created = "2024-05-01T10:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let updated = "2024-05-02T10:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let mut session = Session {
            id: Uuid::now_v7(),
            title: "x".to_string(),
            persona_id: None,
            llm_provider: "ollama".to_string(),
            created_at: created,
            updated_at: None,
        };
        assert_eq!(session.last_active_at(), created);
        session.updated_at = Some(updated);
        assert_eq!(session.last_active_at(), updated);
    }

    #[test]
    fn test_new_session_skips_missing_fields() {
        let body = NewSession {
            title: None,
            persona_id: None,
            llm_provider: "ollama".to_string(),
        };
        let json = serde_json::to_string(&body).unwrap();
        assert_eq!(json, r#"{"llm_provider":"ollama"}"#);
    }
}
