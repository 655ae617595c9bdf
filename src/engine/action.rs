//! Inputs to the reducer.
//!
//! Actions carry everything a transition needs, including the clock reading
//! and jitter sample, so applying one is deterministic.

use chrono::{DateTime, Utc};

use crate::circuit_breaker::CircuitState;
use crate::config::RetryPolicy;
use crate::error::RemoteError;
use crate::models::{ErrorInfo, Message, PendingOperation, TabEvent, Thread};
use crate::network::ConnectionQuality;
use crate::queue::PendingQueue;
use crate::viewport::Viewport;

#[derive(Debug, Clone)]
pub enum Action {
    /// Engine started; restores the persisted queue.
    Started { queue: Option<PendingQueue> },
    /// Thread list from the local cache or the remote store.
    ThreadsLoaded {
        threads: Vec<Thread>,
        authoritative: bool,
    },
    ConversationSelected { thread_id: String },
    /// A window changed; mirrored only if it belongs to the active thread.
    WindowUpdated { viewport: Viewport },

    ThreadCreated {
        thread: Thread,
        op: PendingOperation,
    },
    MessageSent {
        user: Message,
        assistant: Message,
        op: PendingOperation,
    },
    ThreadUpdated {
        thread_id: String,
        title: Option<String>,
        archived: Option<bool>,
        op: PendingOperation,
    },
    /// A mutation whose optimistic effect was already applied to a window.
    OperationQueued {
        op: PendingOperation,
        events: Vec<TabEvent>,
    },
    /// An edit folded into a send that has not left yet.
    SendContentReplaced { op_id: String, message: Message },
    /// Records dropped without reaching the store.
    OperationsCancelled {
        op_ids: Vec<String>,
        events: Vec<TabEvent>,
    },

    OperationsDispatched { op_ids: Vec<String> },
    OperationConfirmed {
        op_id: String,
        remote_id: Option<String>,
    },
    ThreadConfirmed {
        local_id: String,
        thread: Thread,
    },
    /// A message reconciled with the store; re-broadcast to siblings.
    MessageConfirmed {
        message: Message,
        replaces: Option<String>,
    },
    OperationFailed {
        op_id: String,
        error: RemoteError,
        at: DateTime<Utc>,
        jitter_unit: f64,
        backoff_multiplier: u32,
        policy: RetryPolicy,
    },
    OperationRetried { op_id: String },
    OperationDiscarded { op_id: String },

    /// Buffered tokens reached the window.
    StreamProgressed { message: Message },
    StreamFinished {
        message_id: String,
        message: Option<Message>,
        complete: Option<PendingOperation>,
        error: Option<ErrorInfo>,
    },

    /// Authoritative push merged into the active window.
    RemoteSynced {
        thread_id: String,
        messages: Vec<Message>,
    },
    /// Thread-level or presence event accepted from a sibling tab.
    TabEventReceived(TabEvent),

    ConnectivityChanged {
        online: bool,
        quality: ConnectionQuality,
    },
    CircuitChanged(CircuitState),
    LeadershipChanged { is_leader: bool },
    PeersObserved { tabs: Vec<String> },
    ErrorRaised(ErrorInfo),
    ErrorsCleared,
}

impl Action {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Action::Started { .. } => "started",
            Action::ThreadsLoaded { .. } => "threads_loaded",
            Action::ConversationSelected { .. } => "conversation_selected",
            Action::WindowUpdated { .. } => "window_updated",
            Action::ThreadCreated { .. } => "thread_created",
            Action::MessageSent { .. } => "message_sent",
            Action::ThreadUpdated { .. } => "thread_updated",
            Action::OperationQueued { .. } => "operation_queued",
            Action::SendContentReplaced { .. } => "send_content_replaced",
            Action::OperationsCancelled { .. } => "operations_cancelled",
            Action::OperationsDispatched { .. } => "operations_dispatched",
            Action::OperationConfirmed { .. } => "operation_confirmed",
            Action::ThreadConfirmed { .. } => "thread_confirmed",
            Action::MessageConfirmed { .. } => "message_confirmed",
            Action::OperationFailed { .. } => "operation_failed",
            Action::OperationRetried { .. } => "operation_retried",
            Action::OperationDiscarded { .. } => "operation_discarded",
            Action::StreamProgressed { .. } => "stream_progressed",
            Action::StreamFinished { .. } => "stream_finished",
            Action::RemoteSynced { .. } => "remote_synced",
            Action::TabEventReceived(_) => "tab_event_received",
            Action::ConnectivityChanged { .. } => "connectivity_changed",
            Action::CircuitChanged(_) => "circuit_changed",
            Action::LeadershipChanged { .. } => "leadership_changed",
            Action::PeersObserved { .. } => "peers_observed",
            Action::ErrorRaised(_) => "error_raised",
            Action::ErrorsCleared => "errors_cleared",
        }
    }
}
