//! Side effects requested by the reducer and carried out by the engine.

use crate::models::{PendingOperation, SyncStatus, TabEvent};

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    PersistQueue,
    PersistThreads,
    Broadcast(TabEvent),
    /// Load a window (memory, local cache, remote) and mirror it.
    LoadViewport { thread_id: String },
    /// Re-fetch the newest page and merge it.
    RefreshViewport { thread_id: String },
    Subscribe { thread_id: String },
    Unsubscribe,
    /// Dispatch every due operation.
    ProcessQueue,
    StartStream { thread_id: String, message_id: String },
    SetMessageStatus {
        thread_id: String,
        message_id: String,
        status: SyncStatus,
    },
    /// Undo the window-level part of a discarded operation.
    RollBack(PendingOperation),
    RekeyThread { old_id: String, new_id: String },
    DropThread { thread_id: String },
}

impl Effect {
    /// Effects that are idempotent and only need to run once per drain.
    pub fn coalesces(&self) -> bool {
        matches!(
            self,
            Effect::PersistQueue | Effect::PersistThreads | Effect::ProcessQueue
        )
    }
}
