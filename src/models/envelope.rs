use serde::{Deserialize, Serialize};

use super::{Message, Thread};

/// Discriminant of a cross-tab event, used for handler routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TabEventType {
    MessageUpserted,
    MessageDeleted,
    MessagesSynced,
    ThreadUpserted,
    ThreadRemoved,
    Presence,
    Resync,
}

/// Payload carried between tabs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum TabEvent {
    /// A message was added or changed. `replaces` names the local id a
    /// confirmed message supersedes.
    MessageUpserted {
        message: Message,
        #[serde(default)]
        replaces: Option<String>,
    },
    MessageDeleted {
        thread_id: String,
        message_id: String,
    },
    /// Authoritative batch merged from a remote push.
    MessagesSynced {
        thread_id: String,
        messages: Vec<Message>,
    },
    ThreadUpserted {
        thread: Thread,
        #[serde(default)]
        replaces: Option<String>,
    },
    ThreadRemoved {
        thread_id: String,
    },
    Presence {
        tab_id: String,
        is_leader: bool,
        #[serde(default)]
        leaving: bool,
    },
    /// Ask siblings to re-fetch from the remote store.
    Resync {
        #[serde(default)]
        thread_id: Option<String>,
    },
}

impl TabEvent {
    pub fn event_type(&self) -> TabEventType {
        match self {
            TabEvent::MessageUpserted { .. } => TabEventType::MessageUpserted,
            TabEvent::MessageDeleted { .. } => TabEventType::MessageDeleted,
            TabEvent::MessagesSynced { .. } => TabEventType::MessagesSynced,
            TabEvent::ThreadUpserted { .. } => TabEventType::ThreadUpserted,
            TabEvent::ThreadRemoved { .. } => TabEventType::ThreadRemoved,
            TabEvent::Presence { .. } => TabEventType::Presence,
            TabEvent::Resync { .. } => TabEventType::Resync,
        }
    }

    /// Conversation the event belongs to, if any.
    pub fn thread_id(&self) -> Option<&str> {
        match self {
            TabEvent::MessageUpserted { message, .. } => Some(&message.thread_id),
            TabEvent::MessageDeleted { thread_id, .. }
            | TabEvent::MessagesSynced { thread_id, .. }
            | TabEvent::ThreadRemoved { thread_id } => Some(thread_id),
            TabEvent::ThreadUpserted { thread, .. } => Some(&thread.id),
            TabEvent::Resync { thread_id } => thread_id.as_deref(),
            TabEvent::Presence { .. } => None,
        }
    }

    /// Message version used for per-message causal ordering.
    pub fn sequence(&self) -> Option<u64> {
        match self {
            TabEvent::MessageUpserted { message, .. } => Some(message.version),
            _ => None,
        }
    }
}

/// Wire wrapper around a [`TabEvent`].
///
/// Envelopes are deduplicated by `(id, origin)`; `logical_ts` is the
/// sender's Lamport clock.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    pub id: String,
    pub origin: String,
    pub event_type: TabEventType,
    pub payload: serde_json::Value,
    pub logical_ts: u64,
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub sequence: Option<u64>,
}

impl Envelope {
    pub fn wrap(origin: &str, logical_ts: u64, event: &TabEvent) -> serde_json::Result<Self> {
        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            origin: origin.to_string(),
            event_type: event.event_type(),
            payload: serde_json::to_value(event)?,
            logical_ts,
            thread_id: event.thread_id().map(str::to_string),
            sequence: event.sequence(),
        })
    }

    pub fn event(&self) -> serde_json::Result<TabEvent> {
        serde_json::from_value(self.payload.clone())
    }
}
