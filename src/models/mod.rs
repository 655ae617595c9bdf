//! Domain models shared by every sync component.
//!
//! Threads and messages mirror the remote store's records plus the local
//! bookkeeping (sync status, versions, idempotency tokens) that optimistic
//! mutation needs. Pending operations and cross-tab envelopes are purely
//! client-side.

mod envelope;
mod error_info;
mod message;
mod operation;
mod thread;

pub use envelope::{Envelope, TabEvent, TabEventType};
pub use error_info::ErrorInfo;
pub use message::{AttachmentRef, Message, MessageEdit, MessageRole, OrderKey, TokenUsage};
pub use operation::{
    OperationError, OperationKind, OperationStatus, PendingOperation,
};
pub use thread::Thread;

use serde::{Deserialize, Deserializer, Serialize};

/// Prefix of identifiers minted locally for optimistic entities.
pub const LOCAL_ID_PREFIX: &str = "local-";

/// Mint a fresh local identifier for an optimistic thread or message.
pub fn new_local_id() -> String {
    format!("{}{}", LOCAL_ID_PREFIX, uuid::Uuid::new_v4())
}

/// True when the id was minted locally and has not been confirmed yet.
pub fn is_local_id(id: &str) -> bool {
    id.starts_with(LOCAL_ID_PREFIX)
}

/// Confirmation state of an optimistically created or mutated entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SyncStatus {
    /// Applied locally, waiting for the remote store.
    Pending,
    /// Acknowledged by the remote store.
    #[default]
    Confirmed,
    /// The remote store rejected the change or retries ran out.
    Failed { reason: String },
}

impl SyncStatus {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, SyncStatus::Confirmed)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, SyncStatus::Failed { .. })
    }
}

/// Helper to deserialize id as either string or integer
pub(crate) fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::{self, Visitor};
    use std::fmt;

    struct IdVisitor;

    impl<'de> Visitor<'de> for IdVisitor {
        type Value = String;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a record id as string or integer")
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<String, E> {
            Ok(value.to_string())
        }

        fn visit_string<E: de::Error>(self, value: String) -> Result<String, E> {
            Ok(value)
        }

        fn visit_i64<E: de::Error>(self, value: i64) -> Result<String, E> {
            Ok(value.to_string())
        }

        fn visit_u64<E: de::Error>(self, value: u64) -> Result<String, E> {
            Ok(value.to_string())
        }
    }

    deserializer.deserialize_any(IdVisitor)
}

/// Helper to deserialize nullable strings as empty string
pub(crate) fn deserialize_nullable_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(|opt| opt.unwrap_or_default())
}
