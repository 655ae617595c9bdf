//! Common test utilities for integration tests.
//!
//! An origin is one tab hub, one heartbeat board and one remote store;
//! tabs opened from it are full engines wired to mocks.
//!
//! # Example
//!
//! ```ignore
//! use common::TestOrigin;
//!
//! let origin = TestOrigin::new();
//! let mut tab = origin.open_tab("tab-a").await;
//! tab.engine.create_conversation("Inbox").await?;
//! tab.engine.run_until_idle().await;
//! ```

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chatsync::adapters::mock::{MockRemoteStore, ScriptedProvider};
use chatsync::adapters::{MemoryCache, TabHub};
use chatsync::config::{BreakerConfig, RetryPolicy, SyncConfig};
use chatsync::models::Message;
use chatsync::{Collaborators, SyncEngine};

/// Config with instant retries and a breaker that stays closed, so tests
/// never wait on timers.
pub fn test_config() -> SyncConfig {
    SyncConfig::default()
        .with_retry(RetryPolicy {
            max_retries: 3,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter_ratio: 0.0,
        })
        .with_breaker(BreakerConfig {
            failure_threshold: 1_000,
            cool_down: Duration::from_secs(30),
        })
}

/// A tab under test and the doubles only it uses.
pub struct TestTab {
    pub engine: SyncEngine,
    pub cache: Arc<MemoryCache>,
    pub provider: ScriptedProvider,
}

impl TestTab {
    /// Messages of the tab's active conversation.
    pub fn window(&self) -> Vec<Message> {
        self.engine.state().messages.clone()
    }

    pub fn contents(&self) -> Vec<String> {
        self.window().into_iter().map(|m| m.content).collect()
    }
}

/// Builder for the shared side of a set of tabs.
pub struct TestOrigin {
    pub hub: TabHub,
    pub store: Arc<MockRemoteStore>,
    config: SyncConfig,
}

impl Default for TestOrigin {
    fn default() -> Self {
        Self::new()
    }
}

impl TestOrigin {
    pub fn new() -> Self {
        Self {
            hub: TabHub::new(1024),
            store: Arc::new(MockRemoteStore::new()),
            config: test_config(),
        }
    }

    pub fn with_config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    /// A second origin that shares this one's remote store.
    pub fn sharing_store(&self) -> Self {
        Self {
            hub: TabHub::new(1024),
            store: self.store.clone(),
            config: self.config.clone(),
        }
    }

    /// Open and start a tab.
    pub async fn open_tab(&self, tab_id: &str) -> TestTab {
        self.open_tab_with_cache(tab_id, Arc::new(MemoryCache::new()))
            .await
    }

    /// Open a tab over an existing local cache, as after a reload.
    pub async fn open_tab_with_cache(&self, tab_id: &str, cache: Arc<MemoryCache>) -> TestTab {
        let mut tab = self.build_tab(tab_id, cache);
        tab.engine.start().await;
        tab
    }

    /// Construct without starting.
    pub fn build_tab(&self, tab_id: &str, cache: Arc<MemoryCache>) -> TestTab {
        let provider = ScriptedProvider::new();
        let collaborators = Collaborators {
            remote: self.store.clone(),
            local: cache.clone(),
            transport: Arc::new(self.hub.connect(tab_id)),
            board: self.hub.board(),
            provider: Arc::new(provider.clone()),
            probe: None,
        };
        TestTab {
            engine: SyncEngine::new(self.config.clone(), collaborators),
            cache,
            provider,
        }
    }
}

/// Run every tab until idle, a few rounds so replies to replies land.
pub async fn settle(tabs: &mut [&mut TestTab]) {
    for _ in 0..4 {
        for tab in tabs.iter_mut() {
            tab.engine.run_until_idle().await;
        }
    }
}

/// Create a conversation in `tab`, select it and wait for confirmation.
/// Returns the confirmed id.
pub async fn confirmed_conversation(tab: &mut TestTab, title: &str) -> String {
    let local_id = tab.engine.create_conversation(title).await.unwrap();
    tab.engine.select_conversation(&local_id).await.unwrap();
    tab.engine.run_until_idle().await;
    tab.engine
        .state()
        .active_thread
        .clone()
        .expect("conversation should stay selected")
}
