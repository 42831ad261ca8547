//! Core data models shared by the chat, forms, and retrieval modules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who authored a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Bot,
}

/// Client-side action attached to a bot message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageAction {
    /// Navigate to `route` after `delay_ms`.
    Redirect { route: String, delay_ms: u64 },
}

/// A knowledge snippet attributed on a retrieval-augmented reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSnippet {
    pub content: String,
    pub metadata: serde_json::Value,
    pub similarity: f32,
}

/// One entry of a chat transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub id: String,
    pub text: String,
    pub sender: Sender,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<MessageAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<SourceSnippet>,
}

impl ConversationMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(text.into(), Sender::User)
    }

    pub fn bot(text: impl Into<String>) -> Self {
        Self::new(text.into(), Sender::Bot)
    }

    fn new(text: String, sender: Sender) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            text,
            sender,
            timestamp: Utc::now(),
            action: None,
            agent_name: None,
            sources: Vec::new(),
        }
    }

    pub fn with_agent(mut self, agent: Option<String>) -> Self {
        self.agent_name = agent;
        self
    }

    pub fn with_action(mut self, action: MessageAction) -> Self {
        self.action = Some(action);
        self
    }

    pub fn with_sources(mut self, sources: Vec<SourceSnippet>) -> Self {
        self.sources = sources;
        self
    }
}

/// Role of a turn in the history sent to the reply generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A prior conversation turn in chat-completion form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryTurn {
    pub role: Role,
    pub content: String,
}

impl From<&ConversationMessage> for HistoryTurn {
    fn from(msg: &ConversationMessage) -> Self {
        let role = match msg.sender {
            Sender::User => Role::User,
            Sender::Bot => Role::Assistant,
        };
        Self {
            role,
            content: msg.text.clone(),
        }
    }
}

/// A reply produced by the retrieval + generation step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RagReply {
    pub reply: String,
    #[serde(default)]
    pub sources: Vec<SourceSnippet>,
}

/// Kind of a stored inquiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InquiryKind {
    Contact,
    Training,
}

impl InquiryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InquiryKind::Contact => "contact",
            InquiryKind::Training => "training",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "contact" => Some(InquiryKind::Contact),
            "training" => Some(InquiryKind::Training),
            _ => None,
        }
    }
}

/// A contact or training inquiry as stored.
#[derive(Debug, Clone, Serialize)]
pub struct Inquiry {
    pub id: String,
    pub kind: InquiryKind,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub subject: String,
    pub message: String,
    pub created_at: i64,
}

/// An open position listed on the careers page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub title: String,
    pub slug: String,
    pub description: String,
    pub location: String,
    pub employment_type: String,
    pub created_at: i64,
}

/// A job application as stored.
#[derive(Debug, Clone, Serialize)]
pub struct JobApplication {
    pub id: String,
    pub job_id: String,
    pub name: String,
    pub email: String,
    pub cover_letter: String,
    pub resume_key: String,
    pub created_at: i64,
}
