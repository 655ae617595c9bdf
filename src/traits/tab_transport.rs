//! Cross-tab transport trait abstraction.

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::BroadcastError;

/// Same-origin publish/subscribe channel between tabs.
///
/// Payloads are opaque serialized envelopes. Delivery is at-least-once and
/// unordered across publishers; a publisher may receive its own payloads.
/// A lagging receiver reports `RecvError::Lagged`, which the engine treats
/// as a cue to re-sync from the remote store.
#[async_trait]
pub trait TabTransport: Send + Sync {
    /// Identifier of this tab; stamped as the origin of outgoing envelopes.
    fn tab_id(&self) -> &str;

    async fn publish(&self, payload: String) -> Result<(), BroadcastError>;

    fn subscribe(&self) -> broadcast::Receiver<String>;
}
