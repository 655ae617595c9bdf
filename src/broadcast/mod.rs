//! Cross-tab propagation of local mutations, presence and leadership.
//!
//! Delivery is at-least-once and unordered. Incoming envelopes pass three
//! filters before reaching handlers:
//!
//! 1. own origin (a transport may echo our own publishes)
//! 2. `(id, origin)` dedupe
//! 3. per-message version ordering: an upsert older than one already
//!    applied from the same origin is discarded, and a deleted message is
//!    never resurrected
//!
//! Malformed payloads are counted and dropped silently.

pub mod dedupe;
pub mod leader;

pub use dedupe::{SeenSet, VersionTable};
pub use leader::{HeartbeatLeader, LeaderElection};

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::error::BroadcastError;
use crate::models::{Envelope, TabEvent, TabEventType};
use crate::traits::TabTransport;

const SEEN_CAPACITY: usize = 4096;

type Handler = Box<dyn FnMut(&TabEvent) + Send>;

/// Counters for diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    pub sent: u64,
    pub delivered: u64,
    pub duplicates: u64,
    pub stale: u64,
    pub malformed: u64,
}

pub struct Broadcaster {
    transport: Arc<dyn TabTransport>,
    tab_id: String,
    /// Lamport clock.
    clock: u64,
    seen: SeenSet,
    versions: VersionTable,
    handlers: HashMap<TabEventType, Vec<Handler>>,
    stats: BroadcastStats,
}

impl Broadcaster {
    pub fn new(transport: Arc<dyn TabTransport>) -> Self {
        let tab_id = transport.tab_id().to_string();
        Self {
            transport,
            tab_id,
            clock: 0,
            seen: SeenSet::new(SEEN_CAPACITY),
            versions: VersionTable::new(),
            handlers: HashMap::new(),
            stats: BroadcastStats::default(),
        }
    }

    pub fn tab_id(&self) -> &str {
        &self.tab_id
    }

    pub fn logical_time(&self) -> u64 {
        self.clock
    }

    pub fn stats(&self) -> &BroadcastStats {
        &self.stats
    }

    pub fn transport(&self) -> &Arc<dyn TabTransport> {
        &self.transport
    }

    /// Register a handler for accepted events of one type.
    pub fn subscribe<F>(&mut self, event_type: TabEventType, handler: F)
    where
        F: FnMut(&TabEvent) + Send + 'static,
    {
        self.handlers
            .entry(event_type)
            .or_default()
            .push(Box::new(handler));
    }

    /// Publish an event to sibling tabs.
    pub async fn broadcast(&mut self, event: &TabEvent) -> Result<(), BroadcastError> {
        self.clock += 1;
        let envelope = Envelope::wrap(&self.tab_id, self.clock, event)?;
        let raw = serde_json::to_string(&envelope)?;
        self.transport.publish(raw).await?;
        self.stats.sent += 1;
        trace!("Broadcast {:?} at t={}", envelope.event_type, envelope.logical_ts);
        Ok(())
    }

    /// Filter one raw payload from the transport.
    ///
    /// Returns the event when it should be applied; handlers registered for
    /// its type have already run.
    pub fn accept(&mut self, raw: &str) -> Option<TabEvent> {
        let envelope: Envelope = match serde_json::from_str(raw) {
            Ok(envelope) => envelope,
            Err(err) => {
                self.stats.malformed += 1;
                debug!("Dropping malformed envelope: {}", err);
                return None;
            }
        };

        if envelope.origin == self.tab_id {
            return None;
        }
        if !self.seen.insert(&envelope.id, &envelope.origin) {
            self.stats.duplicates += 1;
            return None;
        }
        self.clock = self.clock.max(envelope.logical_ts) + 1;

        let event = match envelope.event() {
            Ok(event) => event,
            Err(err) => {
                self.stats.malformed += 1;
                debug!("Dropping envelope {} with bad payload: {}", envelope.id, err);
                return None;
            }
        };

        let event = match self.order(&envelope.origin, event) {
            Some(event) => event,
            None => {
                self.stats.stale += 1;
                return None;
            }
        };

        self.stats.delivered += 1;
        if let Some(handlers) = self.handlers.get_mut(&event.event_type()) {
            for handler in handlers.iter_mut() {
                handler(&event);
            }
        }
        Some(event)
    }

    fn order(&mut self, origin: &str, event: TabEvent) -> Option<TabEvent> {
        match event {
            TabEvent::MessageUpserted { message, replaces } => {
                if let Some(local_id) = &replaces {
                    if self.versions.is_deleted(local_id) {
                        return None;
                    }
                }
                self.versions
                    .accept(origin, &message.id, message.version)
                    .then_some(TabEvent::MessageUpserted { message, replaces })
            }
            TabEvent::MessageDeleted {
                thread_id,
                message_id,
            } => {
                self.versions.tombstone(&message_id);
                Some(TabEvent::MessageDeleted {
                    thread_id,
                    message_id,
                })
            }
            TabEvent::MessagesSynced {
                thread_id,
                mut messages,
            } => {
                messages.retain(|m| self.versions.accept(origin, &m.id, m.version));
                (!messages.is_empty()).then_some(TabEvent::MessagesSynced {
                    thread_id,
                    messages,
                })
            }
            other => Some(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::TabHub;
    use crate::models::Message;
    use std::sync::Mutex;

    fn pair() -> (Broadcaster, Broadcaster) {
        let hub = TabHub::new(256);
        (
            Broadcaster::new(Arc::new(hub.connect("tab-a"))),
            Broadcaster::new(Arc::new(hub.connect("tab-b"))),
        )
    }

    #[tokio::test]
    async fn test_delivery_dedupe_and_own_origin() {
        let (mut a, mut b) = pair();
        let mut rx_a = a.transport().subscribe();
        let mut rx_b = b.transport().subscribe();

        let event = TabEvent::Resync { thread_id: None };
        a.broadcast(&event).await.unwrap();

        let raw = rx_b.recv().await.unwrap();
        assert_eq!(b.accept(&raw), Some(event));
        assert_eq!(b.accept(&raw), None);
        assert_eq!(b.stats().duplicates, 1);

        // sender ignores its own echo
        let own = rx_a.recv().await.unwrap();
        assert_eq!(a.accept(&own), None);
        assert!(b.logical_time() > a.logical_time());
    }

    #[tokio::test]
    async fn test_stale_versions_and_tombstones() {
        let (mut a, mut b) = pair();
        let mut rx_b = b.transport().subscribe();

        let mut msg = Message::user("t1", "v2");
        msg.version = 2;
        a.broadcast(&TabEvent::MessageUpserted { message: msg.clone(), replaces: None })
            .await
            .unwrap();
        let mut older = msg.clone();
        older.version = 1;
        older.content = "v1".into();
        a.broadcast(&TabEvent::MessageUpserted { message: older, replaces: None })
            .await
            .unwrap();
        a.broadcast(&TabEvent::MessageDeleted {
            thread_id: "t1".into(),
            message_id: msg.id.clone(),
        })
        .await
        .unwrap();
        let mut resurrect = msg.clone();
        resurrect.version = 9;
        a.broadcast(&TabEvent::MessageUpserted { message: resurrect, replaces: None })
            .await
            .unwrap();

        let mut applied = Vec::new();
        for _ in 0..4 {
            let raw = rx_b.recv().await.unwrap();
            if let Some(event) = b.accept(&raw) {
                applied.push(event.event_type());
            }
        }
        assert_eq!(
            applied,
            vec![TabEventType::MessageUpserted, TabEventType::MessageDeleted]
        );
        assert_eq!(b.stats().stale, 2);
    }

    #[tokio::test]
    async fn test_malformed_dropped_and_handlers_called() {
        let (mut a, mut b) = pair();
        let mut rx_b = b.transport().subscribe();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        b.subscribe(TabEventType::Presence, move |event| {
            sink.lock().unwrap().push(event.clone());
        });

        assert_eq!(b.accept("not json"), None);
        assert_eq!(b.accept(r#"{"id":"x"}"#), None);
        assert_eq!(b.stats().malformed, 2);

        a.broadcast(&TabEvent::Presence {
            tab_id: "tab-a".into(),
            is_leader: true,
            leaving: false,
        })
        .await
        .unwrap();
        let raw = rx_b.recv().await.unwrap();
        assert!(b.accept(&raw).is_some());
        assert_eq!(seen.lock().unwrap().len(), 1);
    }
}
