//! Typed surface over the remote store's function names and payloads.
//!
//! The store itself is untyped (`query`/`mutate` by name with JSON args);
//! this module is the single place that knows the names and shapes.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::RemoteError;
use crate::models::{is_local_id, Message, OperationKind, PendingOperation, Thread};
use crate::queue::PendingQueue;
use crate::traits::{RemoteStore, UpdateStream};

pub const THREADS_LIST: &str = "threads:list";
pub const THREADS_CREATE: &str = "threads:create";
pub const THREADS_RENAME: &str = "threads:rename";
pub const THREADS_ARCHIVE: &str = "threads:archive";
pub const MESSAGES_LIST: &str = "messages:list";
pub const MESSAGES_SEND: &str = "messages:send";
pub const MESSAGES_COMPLETE: &str = "messages:complete";
pub const MESSAGES_EDIT: &str = "messages:edit";
pub const MESSAGES_DELETE: &str = "messages:delete";

/// One page of a conversation, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessagePage {
    pub messages: Vec<Message>,
    /// Older messages exist before this page.
    #[serde(default)]
    pub has_more: bool,
}

/// Decoded result of a successful mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum MutationOutcome {
    Thread(Thread),
    Message(Message),
    Deleted { message_id: String },
}

impl MutationOutcome {
    /// Server id of the entity the mutation produced or touched.
    pub fn remote_id(&self) -> &str {
        match self {
            MutationOutcome::Thread(thread) => &thread.id,
            MutationOutcome::Message(message) => &message.id,
            MutationOutcome::Deleted { message_id } => message_id,
        }
    }
}

pub async fn list_threads(store: &dyn RemoteStore) -> Result<Vec<Thread>, RemoteError> {
    let value = store.query(THREADS_LIST, json!({})).await?;
    Ok(serde_json::from_value(value)?)
}

/// Newest `limit` messages, or the `limit` before `before` when paginating.
pub async fn fetch_page(
    store: &dyn RemoteStore,
    thread_id: &str,
    before: Option<&str>,
    limit: usize,
) -> Result<MessagePage, RemoteError> {
    let value = store
        .query(MESSAGES_LIST, page_args(thread_id, before, limit))
        .await?;
    Ok(serde_json::from_value(value)?)
}

/// Live view of the newest `limit` messages of a conversation; each item is a [`MessagePage`].
pub async fn subscribe_messages(
    store: &dyn RemoteStore,
    thread_id: &str,
    limit: usize,
) -> Result<UpdateStream, RemoteError> {
    store
        .subscribe(MESSAGES_LIST, page_args(thread_id, None, limit))
        .await
}

fn page_args(thread_id: &str, before: Option<&str>, limit: usize) -> Value {
    json!({
        "thread_id": thread_id,
        "before": before,
        "limit": limit,
    })
}

/// Function name and arguments for an operation, with local ids resolved.
///
/// A reference that is still local after resolution means the entity it
/// depends on was never confirmed; the store could not accept it.
pub fn mutation_for(
    op: &PendingOperation,
    queue: &PendingQueue,
) -> Result<(&'static str, Value), RemoteError> {
    let resolve = |id: &str| -> Result<String, RemoteError> {
        let resolved = queue.resolve(id);
        if is_local_id(resolved) {
            Err(RemoteError::rejected(
                "unresolved_reference",
                format!("{} has not been confirmed", id),
            ))
        } else {
            Ok(resolved.to_string())
        }
    };
    let client_id = &op.idempotency_key;

    let call = match &op.kind {
        OperationKind::CreateThread {
            title,
            provider,
            model,
            parent_id,
            branch_from,
        } => (
            THREADS_CREATE,
            json!({
                "client_id": client_id,
                "title": title,
                "provider": provider,
                "model": model,
                "parent_id": parent_id.as_deref().map(resolve).transpose()?,
                "branch_from": branch_from.as_deref().map(resolve).transpose()?,
            }),
        ),
        OperationKind::SendMessage {
            content,
            attachments,
            ..
        } => (
            MESSAGES_SEND,
            json!({
                "client_id": client_id,
                "thread_id": resolve(&op.thread_id)?,
                "content": content,
                "attachments": attachments,
            }),
        ),
        OperationKind::CompleteMessage { content, usage, .. } => (
            MESSAGES_COMPLETE,
            json!({
                "client_id": client_id,
                "thread_id": resolve(&op.thread_id)?,
                "content": content,
                "usage": usage,
            }),
        ),
        OperationKind::EditMessage {
            message_id,
            content,
            ..
        } => (
            MESSAGES_EDIT,
            json!({
                "client_id": client_id,
                "message_id": resolve(message_id)?,
                "content": content,
            }),
        ),
        OperationKind::DeleteMessage { message_id, .. } => (
            MESSAGES_DELETE,
            json!({
                "client_id": client_id,
                "message_id": resolve(message_id)?,
            }),
        ),
        OperationKind::RenameThread { title, .. } => (
            THREADS_RENAME,
            json!({
                "client_id": client_id,
                "thread_id": resolve(&op.thread_id)?,
                "title": title,
            }),
        ),
        OperationKind::ArchiveThread { archived } => (
            THREADS_ARCHIVE,
            json!({
                "client_id": client_id,
                "thread_id": resolve(&op.thread_id)?,
                "archived": archived,
            }),
        ),
    };
    Ok(call)
}

pub fn decode_outcome(op: &PendingOperation, value: Value) -> Result<MutationOutcome, RemoteError> {
    match &op.kind {
        OperationKind::CreateThread { .. }
        | OperationKind::RenameThread { .. }
        | OperationKind::ArchiveThread { .. } => {
            Ok(MutationOutcome::Thread(serde_json::from_value(value)?))
        }
        OperationKind::SendMessage { .. }
        | OperationKind::CompleteMessage { .. }
        | OperationKind::EditMessage { .. } => {
            Ok(MutationOutcome::Message(serde_json::from_value(value)?))
        }
        OperationKind::DeleteMessage { message_id, .. } => {
            let message_id = value
                .get("message_id")
                .and_then(Value::as_str)
                .unwrap_or(message_id)
                .to_string();
            Ok(MutationOutcome::Deleted { message_id })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edit(message_id: &str) -> PendingOperation {
        PendingOperation::new(
            "thr_1",
            OperationKind::EditMessage {
                message_id: message_id.into(),
                content: "new".into(),
                previous_content: "old".into(),
            },
        )
    }

    #[test]
    fn test_mutation_resolves_local_ids() {
        let mut queue = PendingQueue::new();
        queue.record_mapping("local-m", "msg_5");
        let op = edit("local-m");

        let (name, args) = mutation_for(&op, &queue).unwrap();
        assert_eq!(name, MESSAGES_EDIT);
        assert_eq!(args["message_id"], "msg_5");
        assert_eq!(args["client_id"], op.idempotency_key.as_str());
    }

    #[test]
    fn test_unresolved_reference_is_rejected() {
        let queue = PendingQueue::new();
        let err = mutation_for(&edit("local-m"), &queue).unwrap_err();
        assert!(matches!(err, RemoteError::Rejected { ref code, .. } if code == "unresolved_reference"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_send_uses_message_id_as_client_id() {
        let queue = PendingQueue::new();
        let op = PendingOperation::new(
            "thr_1",
            OperationKind::SendMessage {
                message_id: "local-x".into(),
                content: "Hello".into(),
                attachments: vec![],
            },
        );
        let (name, args) = mutation_for(&op, &queue).unwrap();
        assert_eq!(name, MESSAGES_SEND);
        assert_eq!(args["client_id"], "local-x");
        assert_eq!(args["thread_id"], "thr_1");
    }

    #[test]
    fn test_decode_delete_falls_back_to_local_id() {
        let op = PendingOperation::new(
            "thr_1",
            OperationKind::DeleteMessage {
                message_id: "msg_1".into(),
                snapshot: None,
            },
        );
        let outcome = decode_outcome(&op, json!({"deleted": true})).unwrap();
        assert_eq!(outcome.remote_id(), "msg_1");
    }

    #[test]
    fn test_page_decodes_with_default_flag() {
        let page: MessagePage = serde_json::from_value(json!({"messages": []})).unwrap();
        assert!(!page.has_more);
    }
}
