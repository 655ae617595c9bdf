//! Shared heartbeat board trait abstraction.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Leadership claim stored on the board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub holder: String,
    pub renewed_at: DateTime<Utc>,
    /// Incremented on every change of holder.
    pub term: u64,
}

/// A storage location every tab can read and write, such as origin-scoped
/// key/value storage.
///
/// `compare_and_set_lease` must be atomic with respect to other tabs; it is
/// the only primitive leader election relies on for mutual exclusion.
#[async_trait]
pub trait HeartbeatBoard: Send + Sync {
    async fn write_heartbeat(&self, tab_id: &str, at: DateTime<Utc>);

    async fn heartbeats(&self) -> HashMap<String, DateTime<Utc>>;

    async fn remove(&self, tab_id: &str);

    async fn lease(&self) -> Option<Lease>;

    /// Install `new` if the current lease equals `expected`. Returns whether it did.
    async fn compare_and_set_lease(&self, expected: Option<&Lease>, new: Lease) -> bool;

    /// Clear the lease if `holder` owns it.
    async fn release_lease(&self, holder: &str);
}
