//! In-process stand-ins for the browser's same-origin primitives.
//!
//! [`TabHub`] plays the role of a broadcast channel shared by every tab of
//! one origin; [`MemoryHeartbeatBoard`] plays shared key/value storage.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use super::lock;
use crate::error::BroadcastError;
use crate::traits::{HeartbeatBoard, Lease, TabTransport};

/// One origin's broadcast channel plus its shared storage.
#[derive(Clone)]
pub struct TabHub {
    sender: broadcast::Sender<String>,
    board: Arc<MemoryHeartbeatBoard>,
}

impl TabHub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            board: Arc::new(MemoryHeartbeatBoard::new()),
        }
    }

    /// Open the channel from a new tab.
    pub fn connect(&self, tab_id: impl Into<String>) -> HubTransport {
        HubTransport {
            tab_id: tab_id.into(),
            sender: self.sender.clone(),
        }
    }

    pub fn board(&self) -> Arc<MemoryHeartbeatBoard> {
        self.board.clone()
    }
}

/// A tab's end of a [`TabHub`]. Receives its own publishes.
pub struct HubTransport {
    tab_id: String,
    sender: broadcast::Sender<String>,
}

#[async_trait]
impl TabTransport for HubTransport {
    fn tab_id(&self) -> &str {
        &self.tab_id
    }

    async fn publish(&self, payload: String) -> Result<(), BroadcastError> {
        // fire-and-forget: no listeners is not a failure
        let _ = self.sender.send(payload);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<String> {
        self.sender.subscribe()
    }
}

#[derive(Default)]
struct BoardState {
    heartbeats: HashMap<String, DateTime<Utc>>,
    lease: Option<Lease>,
}

#[derive(Default)]
pub struct MemoryHeartbeatBoard {
    state: Mutex<BoardState>,
}

impl MemoryHeartbeatBoard {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HeartbeatBoard for MemoryHeartbeatBoard {
    async fn write_heartbeat(&self, tab_id: &str, at: DateTime<Utc>) {
        lock(&self.state).heartbeats.insert(tab_id.to_string(), at);
    }

    async fn heartbeats(&self) -> HashMap<String, DateTime<Utc>> {
        lock(&self.state).heartbeats.clone()
    }

    async fn remove(&self, tab_id: &str) {
        lock(&self.state).heartbeats.remove(tab_id);
    }

    async fn lease(&self) -> Option<Lease> {
        lock(&self.state).lease.clone()
    }

    async fn compare_and_set_lease(&self, expected: Option<&Lease>, new: Lease) -> bool {
        let mut state = lock(&self.state);
        if state.lease.as_ref() != expected {
            return false;
        }
        state.lease = Some(new);
        true
    }

    async fn release_lease(&self, holder: &str) {
        let mut state = lock(&self.state);
        if state.lease.as_ref().is_some_and(|l| l.holder == holder) {
            state.lease = None;
        }
    }
}
