//! Reactive state tree owned by the engine.
//!
//! Everything the UI reads lives here. The tree is replaced wholesale on
//! every transition and published through a `watch` channel.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::circuit_breaker::CircuitState;
use crate::models::{ErrorInfo, Message, PendingOperation, Thread};
use crate::network::ConnectionQuality;
use crate::queue::PendingQueue;

/// Surfaced errors kept in state, oldest dropped first.
pub const MAX_ERRORS: usize = 50;

/// Connectivity as the UI shows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OnlineStatus {
    pub online: bool,
    pub quality: ConnectionQuality,
    pub circuit: CircuitState,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyncState {
    pub tab_id: String,
    /// Newest activity first.
    pub threads: Vec<Thread>,
    pub active_thread: Option<String>,
    /// Window of the active conversation only.
    pub messages: Vec<Message>,
    pub has_more_top: bool,
    pub has_more_bottom: bool,
    pub loading: bool,
    pub queue: PendingQueue,
    /// Ids of messages receiving tokens.
    pub streaming: BTreeSet<String>,
    pub online: bool,
    pub quality: ConnectionQuality,
    pub circuit: CircuitState,
    pub is_leader: bool,
    /// Sibling tabs known to be alive, excluding this one.
    pub peers: BTreeSet<String>,
    pub errors: Vec<ErrorInfo>,
}

impl Default for SyncState {
    fn default() -> Self {
        Self::new("")
    }
}

impl SyncState {
    pub fn new(tab_id: impl Into<String>) -> Self {
        Self {
            tab_id: tab_id.into(),
            threads: Vec::new(),
            active_thread: None,
            messages: Vec::new(),
            has_more_top: false,
            has_more_bottom: false,
            loading: false,
            queue: PendingQueue::new(),
            streaming: BTreeSet::new(),
            online: true,
            quality: ConnectionQuality::default(),
            circuit: CircuitState::default(),
            is_leader: false,
            peers: BTreeSet::new(),
            errors: Vec::new(),
        }
    }

    pub fn threads(&self) -> &[Thread] {
        &self.threads
    }

    /// Threads not archived, newest first.
    pub fn visible_threads(&self) -> impl Iterator<Item = &Thread> {
        self.threads.iter().filter(|t| !t.archived)
    }

    pub fn thread(&self, id: &str) -> Option<&Thread> {
        let id = self.queue.resolve(id);
        self.threads.iter().find(|t| t.id == id)
    }

    pub(crate) fn thread_mut(&mut self, id: &str) -> Option<&mut Thread> {
        let id = self.queue.resolve(id).to_string();
        self.threads.iter_mut().find(|t| t.id == id)
    }

    /// Messages of a conversation; empty unless it is the active one.
    pub fn messages(&self, thread_id: &str) -> &[Message] {
        let thread_id = self.queue.resolve(thread_id);
        match &self.active_thread {
            Some(active) if active == thread_id => &self.messages,
            _ => &[],
        }
    }

    pub fn online_status(&self) -> OnlineStatus {
        OnlineStatus {
            online: self.online,
            quality: self.quality,
            circuit: self.circuit,
        }
    }

    /// Operations not yet confirmed, excluding failed ones.
    pub fn pending_operation_count(&self) -> usize {
        self.queue.pending_count()
    }

    pub fn failed_operations(&self) -> Vec<&PendingOperation> {
        self.queue.failed()
    }

    pub fn is_streaming(&self, message_id: &str) -> bool {
        self.streaming.contains(message_id)
    }

    pub fn live_tab_count(&self) -> usize {
        self.peers.len() + 1
    }

    pub(crate) fn sort_threads(&mut self) {
        self.threads
            .sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
    }

    pub(crate) fn push_error(&mut self, error: ErrorInfo) {
        self.errors.push(error);
        if self.errors.len() > MAX_ERRORS {
            let excess = self.errors.len() - MAX_ERRORS;
            self.errors.drain(..excess);
        }
    }
}
