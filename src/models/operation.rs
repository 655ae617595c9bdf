use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{AttachmentRef, Message, TokenUsage};

/// What a pending operation asks the remote store to do.
///
/// Each variant keeps enough of the prior local state to roll the
/// optimistic change back if the operation is discarded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OperationKind {
    CreateThread {
        title: String,
        #[serde(default)]
        provider: Option<String>,
        #[serde(default)]
        model: Option<String>,
        #[serde(default)]
        parent_id: Option<String>,
        /// Copy the parent's messages up to and including this one
        #[serde(default)]
        branch_from: Option<String>,
    },
    SendMessage {
        message_id: String,
        content: String,
        #[serde(default)]
        attachments: Vec<AttachmentRef>,
    },
    /// Persist a finished assistant response.
    CompleteMessage {
        message_id: String,
        content: String,
        #[serde(default)]
        usage: Option<TokenUsage>,
    },
    EditMessage {
        message_id: String,
        content: String,
        previous_content: String,
    },
    DeleteMessage {
        message_id: String,
        #[serde(default)]
        snapshot: Option<Message>,
    },
    RenameThread {
        title: String,
        previous_title: String,
    },
    ArchiveThread {
        archived: bool,
    },
}

impl OperationKind {
    pub fn name(&self) -> &'static str {
        match self {
            OperationKind::CreateThread { .. } => "create_thread",
            OperationKind::SendMessage { .. } => "send_message",
            OperationKind::CompleteMessage { .. } => "complete_message",
            OperationKind::EditMessage { .. } => "edit_message",
            OperationKind::DeleteMessage { .. } => "delete_message",
            OperationKind::RenameThread { .. } => "rename_thread",
            OperationKind::ArchiveThread { .. } => "archive_thread",
        }
    }

    /// Message this operation targets, if any.
    pub fn message_id(&self) -> Option<&str> {
        match self {
            OperationKind::SendMessage { message_id, .. }
            | OperationKind::CompleteMessage { message_id, .. }
            | OperationKind::EditMessage { message_id, .. }
            | OperationKind::DeleteMessage { message_id, .. } => Some(message_id),
            _ => None,
        }
    }

    /// True when success of this operation mints a new remote id.
    pub fn creates_entity(&self) -> bool {
        matches!(
            self,
            OperationKind::CreateThread { .. }
                | OperationKind::SendMessage { .. }
                | OperationKind::CompleteMessage { .. }
        )
    }
}

/// Lifecycle state of a queued record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    #[default]
    Queued,
    InFlight,
    /// Retries exhausted or rejected; kept for manual retry or discard.
    Failed,
}

/// Last failure recorded against an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationError {
    pub code: String,
    pub message: String,
    pub retryable: bool,
}

/// A not-yet-confirmed mutation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingOperation {
    pub id: String,
    /// Conversation the operation belongs to; FIFO ordering is per thread.
    pub thread_id: String,
    #[serde(flatten)]
    pub kind: OperationKind,
    /// Sent as `client_id` and reused on every retry.
    pub idempotency_key: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub status: OperationStatus,
    #[serde(default)]
    pub next_attempt_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_error: Option<OperationError>,
    /// Server id once confirmed.
    #[serde(default)]
    pub remote_id: Option<String>,
}

impl PendingOperation {
    pub fn new(thread_id: impl Into<String>, kind: OperationKind) -> Self {
        let idempotency_key = match &kind {
            OperationKind::SendMessage { message_id, .. }
            | OperationKind::CompleteMessage { message_id, .. } => message_id.clone(),
            _ => uuid::Uuid::new_v4().to_string(),
        };
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            thread_id: thread_id.into(),
            kind,
            idempotency_key,
            created_at: Utc::now(),
            retry_count: 0,
            status: OperationStatus::Queued,
            next_attempt_at: None,
            last_error: None,
            remote_id: None,
        }
    }

    /// Thread creation keyed by the optimistic thread id.
    pub fn create_thread(local_thread_id: impl Into<String>, kind: OperationKind) -> Self {
        let thread_id = local_thread_id.into();
        let mut op = Self::new(thread_id.clone(), kind);
        op.idempotency_key = thread_id;
        op
    }

    /// Id of the optimistic entity this operation is correlated with.
    pub fn entity_id(&self) -> &str {
        self.kind.message_id().unwrap_or(&self.thread_id)
    }

    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.status == OperationStatus::Queued && self.next_attempt_at.map_or(true, |at| now >= at)
    }

    pub fn is_failed(&self) -> bool {
        self.status == OperationStatus::Failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_reuses_message_id_as_idempotency_key() {
        let op = PendingOperation::new(
            "t1",
            OperationKind::SendMessage {
                message_id: "local-abc".into(),
                content: "hi".into(),
                attachments: vec![],
            },
        );
        assert_eq!(op.idempotency_key, "local-abc");
        assert_eq!(op.entity_id(), "local-abc");
        assert_eq!(op.kind.name(), "send_message");
    }

    #[test]
    fn test_create_thread_entity_is_thread() {
        let op = PendingOperation::create_thread(
            "local-t",
            OperationKind::CreateThread {
                title: "New".into(),
                provider: None,
                model: None,
                parent_id: None,
                branch_from: None,
            },
        );
        assert_eq!(op.entity_id(), "local-t");
        assert_eq!(op.idempotency_key, "local-t");
        assert!(op.kind.creates_entity());
    }

    #[test]
    fn test_ready_respects_next_attempt() {
        let now = Utc::now();
        let mut op = PendingOperation::new("t1", OperationKind::ArchiveThread { archived: true });
        assert!(op.is_ready(now));
        op.next_attempt_at = Some(now + chrono::Duration::seconds(1));
        assert!(!op.is_ready(now));
        assert!(op.is_ready(now + chrono::Duration::seconds(1)));
        op.status = OperationStatus::InFlight;
        assert!(!op.is_ready(now + chrono::Duration::seconds(2)));
    }

    #[test]
    fn test_operation_serializes_flat_kind() {
        let op = PendingOperation::new(
            "t1",
            OperationKind::RenameThread {
                title: "b".into(),
                previous_title: "a".into(),
            },
        );
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["kind"], "rename_thread");
        assert_eq!(json["title"], "b");
        let back: PendingOperation = serde_json::from_value(json).unwrap();
        assert_eq!(back, op);
    }
}
