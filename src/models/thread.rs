use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{deserialize_id, deserialize_nullable_string, is_local_id, new_local_id, SyncStatus};

/// Represents a conversation thread as stored by the remote store
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Thread {
    /// Unique identifier (server-assigned once confirmed, can be string or integer)
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    /// Display title (API may send as "name")
    #[serde(
        default,
        deserialize_with = "deserialize_nullable_string",
        alias = "name"
    )]
    pub title: String,
    /// Owning user reference
    #[serde(default)]
    pub user_id: Option<String>,
    /// Bumped on every new message, rename or archive
    #[serde(default = "Utc::now", alias = "updated_at")]
    pub last_activity: DateTime<Utc>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    /// Thread this one was branched from
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub archived: bool,
    /// Idempotency token; the local id the thread was created under
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub status: SyncStatus,
}

impl Thread {
    /// Optimistic thread under a fresh local id.
    pub fn optimistic(
        title: impl Into<String>,
        provider: Option<String>,
        model: Option<String>,
        parent_id: Option<String>,
    ) -> Self {
        let id = new_local_id();
        Self {
            client_id: Some(id.clone()),
            id,
            title: title.into(),
            user_id: None,
            last_activity: Utc::now(),
            provider,
            model,
            parent_id,
            archived: false,
            status: SyncStatus::Pending,
        }
    }

    pub fn is_local(&self) -> bool {
        is_local_id(&self.id)
    }

    pub fn touch(&mut self, at: DateTime<Utc>) {
        if at > self.last_activity {
            self.last_activity = at;
        }
    }

    /// True when `other` is the same thread, by id or idempotency token.
    pub fn same_entity(&self, other: &Thread) -> bool {
        self.id == other.id
            || self
                .client_id
                .as_deref()
                .is_some_and(|c| Some(c) == other.client_id.as_deref() || c == other.id)
    }
}
