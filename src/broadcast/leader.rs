//! Leader election over a shared heartbeat board.
//!
//! Each tab writes a heartbeat every interval. Leadership is a single lease
//! on the board: the holder renews it on every heartbeat, and any tab may
//! claim it with compare-and-set once it is older than the staleness bound.
//! Because the lease is one record, a reader of the board always sees at
//! most one leader.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::info;

use crate::config::LeaderConfig;
use crate::traits::{HeartbeatBoard, Lease};

pub type LeadershipCallback = Box<dyn FnMut(bool) + Send + Sync>;

#[async_trait]
pub trait LeaderElection: Send + Sync {
    /// Publish liveness and try to acquire or keep leadership.
    /// Returns whether this tab leads afterwards.
    async fn heartbeat(&mut self) -> bool;

    fn is_leader(&self) -> bool;

    fn on_leadership_change(&mut self, callback: LeadershipCallback);

    /// Give up leadership and liveness, e.g. when the tab closes.
    async fn resign(&mut self);

    /// Tabs with a fresh heartbeat, including this one.
    async fn live_tabs(&self) -> Vec<String>;
}

pub struct HeartbeatLeader {
    board: Arc<dyn HeartbeatBoard>,
    tab_id: String,
    config: LeaderConfig,
    is_leader: bool,
    callbacks: Vec<LeadershipCallback>,
}

impl HeartbeatLeader {
    pub fn new(board: Arc<dyn HeartbeatBoard>, tab_id: impl Into<String>, config: LeaderConfig) -> Self {
        Self {
            board,
            tab_id: tab_id.into(),
            config,
            is_leader: false,
            callbacks: Vec::new(),
        }
    }

    pub fn config(&self) -> &LeaderConfig {
        &self.config
    }

    pub async fn heartbeat_at(&mut self, now: DateTime<Utc>) -> bool {
        self.board.write_heartbeat(&self.tab_id, now).await;

        let current = self.board.lease().await;
        let leading = match current {
            Some(lease) if lease.holder == self.tab_id => {
                let renewed = Lease {
                    renewed_at: now,
                    ..lease.clone()
                };
                self.board.compare_and_set_lease(Some(&lease), renewed).await
            }
            Some(lease) if !self.is_stale(lease.renewed_at, now) => false,
            stale => {
                let claim = Lease {
                    holder: self.tab_id.clone(),
                    renewed_at: now,
                    term: stale.as_ref().map(|l| l.term + 1).unwrap_or(1),
                };
                self.board.compare_and_set_lease(stale.as_ref(), claim).await
            }
        };

        self.set_leader(leading);
        leading
    }

    pub async fn live_tabs_at(&self, now: DateTime<Utc>) -> Vec<String> {
        let mut tabs: Vec<String> = self
            .board
            .heartbeats()
            .await
            .into_iter()
            .filter(|(_, at)| !self.is_stale(*at, now))
            .map(|(tab, _)| tab)
            .collect();
        tabs.sort();
        tabs
    }

    fn is_stale(&self, at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(at)
            .to_std()
            .map(|age| age > self.config.staleness)
            .unwrap_or(false)
    }

    fn set_leader(&mut self, leading: bool) {
        if leading == self.is_leader {
            return;
        }
        self.is_leader = leading;
        if leading {
            info!("Tab {} became leader", self.tab_id);
        } else {
            info!("Tab {} lost leadership", self.tab_id);
        }
        for callback in self.callbacks.iter_mut() {
            callback(leading);
        }
    }
}

#[async_trait]
impl LeaderElection for HeartbeatLeader {
    async fn heartbeat(&mut self) -> bool {
        self.heartbeat_at(Utc::now()).await
    }

    fn is_leader(&self) -> bool {
        self.is_leader
    }

    fn on_leadership_change(&mut self, callback: LeadershipCallback) {
        self.callbacks.push(callback);
    }

    async fn resign(&mut self) {
        self.board.release_lease(&self.tab_id).await;
        self.board.remove(&self.tab_id).await;
        self.set_leader(false);
    }

    async fn live_tabs(&self) -> Vec<String> {
        self.live_tabs_at(Utc::now()).await
    }
}
