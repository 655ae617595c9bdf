use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{deserialize_id, new_local_id, SyncStatus};

/// Role of a message in a conversation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    #[default]
    User,
    Assistant,
    System,
}

/// Token accounting reported by the provider when a response completes.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl TokenUsage {
    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

/// Opaque handle to an uploaded file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AttachmentRef {
    pub handle: String,
    pub name: String,
    #[serde(default)]
    pub mime_type: Option<String>,
}

/// One prior revision of an edited message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageEdit {
    pub previous_content: String,
    pub edited_at: DateTime<Utc>,
}

/// Position of a message inside its conversation.
///
/// Confirmed messages sort by server timestamp, optimistic ones by local
/// creation time; the local sequence breaks ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct OrderKey {
    pub at: DateTime<Utc>,
    pub sequence: u64,
}

/// A single chat message, local or confirmed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    #[serde(deserialize_with = "deserialize_id")]
    pub thread_id: String,
    pub role: MessageRole,
    #[serde(default, deserialize_with = "super::deserialize_nullable_string")]
    pub content: String,
    #[serde(default)]
    pub is_streaming: bool,
    /// Bumped on every local or authoritative change.
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub sequence: u64,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub server_timestamp: Option<DateTime<Utc>>,
    /// Idempotency token; equals the local id the message was created under.
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub status: SyncStatus,
    #[serde(default)]
    pub usage: Option<TokenUsage>,
    #[serde(default)]
    pub attachments: Vec<AttachmentRef>,
    #[serde(default)]
    pub edit_history: Vec<MessageEdit>,
}

impl Message {
    /// Optimistic user message under a fresh local id.
    pub fn user(thread_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::local(thread_id.into(), MessageRole::User, content.into(), false)
    }

    /// Empty assistant message that receives streamed tokens.
    pub fn assistant_placeholder(thread_id: impl Into<String>) -> Self {
        Self::local(thread_id.into(), MessageRole::Assistant, String::new(), true)
    }

    fn local(thread_id: String, role: MessageRole, content: String, is_streaming: bool) -> Self {
        let id = new_local_id();
        Self {
            client_id: Some(id.clone()),
            id,
            thread_id,
            role,
            content,
            is_streaming,
            version: 1,
            sequence: 0,
            created_at: Utc::now(),
            server_timestamp: None,
            status: SyncStatus::Pending,
            usage: None,
            attachments: Vec::new(),
            edit_history: Vec::new(),
        }
    }

    pub fn order_key(&self) -> OrderKey {
        OrderKey {
            at: self.server_timestamp.unwrap_or(self.created_at),
            sequence: self.sequence,
        }
    }

    /// Messages with unconfirmed local state must survive eviction and pruning.
    pub fn is_protected(&self) -> bool {
        self.is_streaming || !self.status.is_confirmed()
    }

    /// True when `other` refers to the same logical message, by id or idempotency token.
    pub fn same_entity(&self, other: &Message) -> bool {
        if self.id == other.id {
            return true;
        }
        match (&self.client_id, &other.client_id) {
            (Some(a), Some(b)) => a == b,
            (Some(a), None) => a == &other.id,
            (None, Some(b)) => &self.id == b,
            (None, None) => false,
        }
    }

    pub fn append_token(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.content.push_str(text);
        self.version += 1;
    }

    /// Close the stream; content becomes immutable.
    pub fn finalize(&mut self, usage: Option<TokenUsage>) {
        self.is_streaming = false;
        if usage.is_some() {
            self.usage = usage;
        }
        self.version += 1;
    }

    /// Replace content and remember the previous revision.
    pub fn apply_edit(&mut self, content: impl Into<String>) {
        let previous = std::mem::replace(&mut self.content, content.into());
        self.edit_history.push(MessageEdit {
            previous_content: previous,
            edited_at: Utc::now(),
        });
        self.status = SyncStatus::Pending;
        self.version += 1;
    }

    /// Undo the most recent edit, if any.
    pub fn revert_edit(&mut self, previous_content: &str) {
        self.content = previous_content.to_string();
        self.edit_history.pop();
        self.status = SyncStatus::Confirmed;
        self.version += 1;
    }

    pub fn mark_failed(&mut self, reason: impl Into<String>) {
        self.status = SyncStatus::Failed {
            reason: reason.into(),
        };
        self.version += 1;
    }

    pub fn mark_pending(&mut self) {
        self.status = SyncStatus::Pending;
        self.version += 1;
    }
}
