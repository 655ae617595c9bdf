//! Bounded, paginated cache of conversation windows.
//!
//! Lookup order for a window: memory, then the local persistent cache, then
//! one page from the remote store. Full history is never loaded. Local cache
//! failures are logged and treated as misses.
//!
//! Only the engine mutates this cache.

mod window;

pub use window::{EvictFrom, Viewport};

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::api;
use crate::config::ViewportConfig;
use crate::error::{ErrorContext, ResultExt, SyncResult};
use crate::models::{is_local_id, Message};
use crate::traits::{CachedWindow, LocalCache, RemoteStore};

pub struct ViewportCache {
    config: ViewportConfig,
    windows: HashMap<String, Viewport>,
    /// Most recently used thread ids, newest last.
    recency: VecDeque<String>,
    local: Arc<dyn LocalCache>,
    remote: Arc<dyn RemoteStore>,
}

impl ViewportCache {
    pub fn new(
        config: ViewportConfig,
        local: Arc<dyn LocalCache>,
        remote: Arc<dyn RemoteStore>,
    ) -> Self {
        Self {
            config,
            windows: HashMap::new(),
            recency: VecDeque::new(),
            local,
            remote,
        }
    }

    pub fn config(&self) -> &ViewportConfig {
        &self.config
    }

    pub fn peek(&self, thread_id: &str) -> Option<&Viewport> {
        self.windows.get(thread_id)
    }

    pub fn cached_threads(&self) -> usize {
        self.windows.len()
    }

    /// Window for a conversation: memory, local cache, then remote.
    pub async fn get_viewport(&mut self, thread_id: &str) -> SyncResult<Viewport> {
        if let Some(viewport) = self.windows.get(thread_id) {
            let viewport = viewport.clone();
            self.touch(thread_id);
            return Ok(viewport);
        }

        if let Some(viewport) = self.load_local(thread_id).await {
            debug!(
                "Viewport for {} served from local cache ({} messages)",
                thread_id,
                viewport.len()
            );
            self.store(viewport.clone());
            return Ok(viewport);
        }

        if is_local_id(thread_id) {
            let viewport = Viewport::new(thread_id);
            self.store(viewport.clone());
            return Ok(viewport);
        }

        let page = api::fetch_page(self.remote.as_ref(), thread_id, None, self.config.window_size)
            .await
            .with_context(|| {
                ErrorContext::new("get_viewport")
                    .with_component("viewport")
                    .with_thread_id(thread_id)
            })?;
        debug!(
            "Viewport for {} fetched from remote ({} messages)",
            thread_id,
            page.messages.len()
        );
        let mut viewport = Viewport::from_parts(thread_id, page.messages, page.has_more, false);
        viewport.trim(self.config.window_size, EvictFrom::Top);
        self.persist_all(&viewport).await;
        self.store(viewport.clone());
        Ok(viewport)
    }

    /// Re-fetch the newest page and merge it into the window.
    pub async fn refresh(&mut self, thread_id: &str) -> SyncResult<Viewport> {
        let page = api::fetch_page(self.remote.as_ref(), thread_id, None, self.config.window_size)
            .await
            .with_context(|| {
                ErrorContext::new("refresh")
                    .with_component("viewport")
                    .with_thread_id(thread_id)
            })?;
        let has_more = page.has_more;
        self.sync_messages(thread_id, page.messages).await;
        let viewport = self.window_mut(thread_id);
        if !viewport.has_more_top {
            viewport.has_more_top = has_more;
        }
        Ok(viewport.clone())
    }

    /// Merge an authoritative batch. Returns the window when it changed.
    pub async fn sync_messages(&mut self, thread_id: &str, batch: Vec<Message>) -> Option<Viewport> {
        let window_size = self.config.window_size;
        let viewport = self.window_mut(thread_id);
        let mut changed = viewport.merge_authoritative(batch);
        changed |= viewport.trim(window_size, EvictFrom::Top) > 0;
        if !changed {
            return None;
        }
        let snapshot = viewport.clone();
        self.persist_all(&snapshot).await;
        Some(snapshot)
    }

    /// Insert a local message at its causal position.
    pub async fn add_optimistic_message(&mut self, message: Message) -> Viewport {
        let window_size = self.config.window_size;
        if !message.is_streaming {
            // streaming placeholders are persisted once final
            self.persist_message(&message).await;
        }
        let viewport = self.window_mut(&message.thread_id);
        viewport.insert_ordered(message);
        viewport.trim(window_size, EvictFrom::Top);
        let snapshot = viewport.clone();
        self.persist_window(&snapshot).await;
        snapshot
    }

    /// Swap an optimistic message for its confirmed record.
    pub async fn confirm_message(
        &mut self,
        thread_id: &str,
        local_id: &str,
        confirmed: Message,
    ) -> Message {
        let stamped = self.window_mut(thread_id).confirm(local_id, confirmed);
        if let Err(err) = self.local.delete_message(local_id).await {
            warn!("Failed to drop cached message {}: {}", local_id, err);
        }
        self.persist_message(&stamped).await;
        if let Some(viewport) = self.windows.get(thread_id).cloned() {
            self.persist_window(&viewport).await;
        }
        stamped
    }

    /// Append streamed text; kept in memory only until the stream ends.
    pub fn append_stream_text(
        &mut self,
        thread_id: &str,
        message_id: &str,
        text: &str,
    ) -> Option<Message> {
        self.windows
            .get_mut(thread_id)?
            .update(message_id, |m| m.append_token(text))
            .cloned()
    }

    /// Apply a local change to one message and persist it unless streaming.
    pub async fn update_message<F>(
        &mut self,
        thread_id: &str,
        message_id: &str,
        f: F,
    ) -> Option<Message>
    where
        F: FnOnce(&mut Message),
    {
        let updated = self
            .windows
            .get_mut(thread_id)?
            .update(message_id, f)
            .cloned()?;
        if !updated.is_streaming {
            self.persist_message(&updated).await;
        }
        Some(updated)
    }

    pub async fn remove_message(&mut self, thread_id: &str, message_id: &str) -> Option<Message> {
        let removed = self.windows.get_mut(thread_id)?.remove(message_id)?;
        if let Err(err) = self.local.delete_message(message_id).await {
            warn!("Failed to drop cached message {}: {}", message_id, err);
        }
        if let Some(viewport) = self.windows.get(thread_id).cloned() {
            self.persist_window(&viewport).await;
        }
        Some(removed)
    }

    /// Apply a message received from a sibling tab.
    ///
    /// `replaces` names the local id a confirmed message supersedes. Only
    /// windows already in memory are updated.
    pub async fn upsert_message(&mut self, message: Message, replaces: Option<&str>) -> Option<Message> {
        let thread_id = message.thread_id.clone();
        let viewport = self.windows.get_mut(&thread_id)?;

        let applied = match replaces {
            Some(local_id) if viewport.get(local_id).is_some() => viewport.confirm(local_id, message),
            _ => {
                if let Some(existing) = viewport.entity(&message) {
                    // a late optimistic copy never replaces the confirmed one
                    let superseded = existing.id != message.id && is_local_id(&message.id);
                    if superseded || (existing.id == message.id && existing.version >= message.version) {
                        return None;
                    }
                }
                if !viewport.upsert(message.clone()) {
                    return None;
                }
                message
            }
        };
        viewport.trim(self.config.window_size, EvictFrom::Top);
        let snapshot = viewport.clone();
        if !applied.is_streaming {
            self.persist_message(&applied).await;
        }
        self.persist_window(&snapshot).await;
        Some(applied)
    }

    /// Page older history into the window, evicting from the bottom.
    /// Returns the number of messages added.
    pub async fn load_older(&mut self, thread_id: &str) -> SyncResult<usize> {
        let Some(viewport) = self.windows.get(thread_id) else {
            return Ok(0);
        };
        if !viewport.has_more_top {
            return Ok(0);
        }
        let cursor = viewport.oldest_confirmed().map(|m| m.id.clone());
        let page = api::fetch_page(
            self.remote.as_ref(),
            thread_id,
            cursor.as_deref(),
            self.config.page_size,
        )
        .await
        .with_context(|| {
            ErrorContext::new("load_older_messages")
                .with_component("viewport")
                .with_thread_id(thread_id)
        })?;

        let window_size = self.config.window_size;
        let viewport = self.window_mut(thread_id);
        let added = viewport.prepend_page(page.messages);
        viewport.has_more_top = page.has_more;
        viewport.trim(window_size, EvictFrom::Bottom);
        let snapshot = viewport.clone();
        self.persist_all(&snapshot).await;
        Ok(added)
    }

    /// Move a window to the confirmed thread id.
    pub async fn rekey_thread(&mut self, old_id: &str, new_id: &str) {
        let Some(mut viewport) = self.windows.remove(old_id) else {
            return;
        };
        viewport.rekey_thread(new_id);
        if let Err(err) = self.local.delete_window(old_id).await {
            warn!("Failed to drop cached window {}: {}", old_id, err);
        }
        self.recency.retain(|id| id != old_id);
        self.persist_all(&viewport).await;
        self.store(viewport);
    }

    /// Forget a conversation in memory and in the local cache.
    pub async fn drop_thread(&mut self, thread_id: &str) {
        if let Some(viewport) = self.windows.remove(thread_id) {
            for id in viewport.message_ids() {
                if let Err(err) = self.local.delete_message(&id).await {
                    warn!("Failed to drop cached message {}: {}", id, err);
                }
            }
        }
        self.recency.retain(|id| id != thread_id);
        if let Err(err) = self.local.delete_window(thread_id).await {
            warn!("Failed to drop cached window {}: {}", thread_id, err);
        }
    }

    async fn load_local(&self, thread_id: &str) -> Option<Viewport> {
        let window = match self.local.get_window(thread_id).await {
            Ok(Some(window)) => window,
            Ok(None) => return None,
            Err(err) => {
                warn!("Local cache read failed for {}, using remote: {}", thread_id, err);
                return None;
            }
        };
        match self.local.get_messages(&window.message_ids).await {
            Ok(messages) => Some(Viewport::from_parts(
                thread_id,
                messages,
                window.has_more_top,
                window.has_more_bottom,
            )),
            Err(err) => {
                warn!("Local cache read failed for {}, using remote: {}", thread_id, err);
                None
            }
        }
    }

    fn window_mut(&mut self, thread_id: &str) -> &mut Viewport {
        if !self.windows.contains_key(thread_id) {
            self.store(Viewport::new(thread_id));
        } else {
            self.touch(thread_id);
        }
        self.windows
            .entry(thread_id.to_string())
            .or_insert_with(|| Viewport::new(thread_id))
    }

    fn store(&mut self, viewport: Viewport) {
        let thread_id = viewport.thread_id.clone();
        self.windows.insert(thread_id.clone(), viewport);
        self.touch(&thread_id);
        while self.recency.len() > self.config.max_cached_threads.max(1) {
            // windows holding a live stream or unconfirmed messages stay resident
            let Some(index) = self.recency.iter().position(|id| {
                id != &thread_id
                    && self
                        .windows
                        .get(id)
                        .map_or(true, |w| !w.messages().iter().any(Message::is_protected))
            }) else {
                debug!("All {} cached windows are pinned", self.recency.len());
                break;
            };
            if let Some(evicted) = self.recency.remove(index) {
                debug!("Evicting window {} from memory", evicted);
                self.windows.remove(&evicted);
            }
        }
    }

    fn touch(&mut self, thread_id: &str) {
        self.recency.retain(|id| id != thread_id);
        self.recency.push_back(thread_id.to_string());
    }

    async fn persist_message(&self, message: &Message) {
        if let Err(err) = self.local.put_message(message).await {
            warn!("Failed to cache message {}: {}", message.id, err);
        }
    }

    async fn persist_window(&self, viewport: &Viewport) {
        let window = CachedWindow {
            thread_id: viewport.thread_id.clone(),
            message_ids: viewport
                .messages()
                .iter()
                .filter(|m| !m.is_streaming)
                .map(|m| m.id.clone())
                .collect(),
            has_more_top: viewport.has_more_top,
            has_more_bottom: viewport.has_more_bottom,
        };
        if let Err(err) = self.local.put_window(&window).await {
            warn!("Failed to cache window {}: {}", viewport.thread_id, err);
        }
    }

    async fn persist_all(&self, viewport: &Viewport) {
        for message in viewport.messages().iter().filter(|m| !m.is_streaming) {
            self.persist_message(message).await;
        }
        self.persist_window(viewport).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::mock::{FailingCache, MockRemoteStore};
    use crate::adapters::MemoryCache;
    use crate::models::SyncStatus;

    fn config(window_size: usize) -> ViewportConfig {
        ViewportConfig {
            window_size,
            page_size: 10,
            max_cached_threads: 2,
        }
    }

    fn seeded_store(thread_id: &str, count: usize) -> Arc<MockRemoteStore> {
        let store = Arc::new(MockRemoteStore::new());
        store.seed_thread(thread_id, "seeded");
        for i in 0..count {
            store.seed_message(thread_id, &format!("message {}", i));
        }
        store
    }

    #[tokio::test]
    async fn test_remote_fallback_is_bounded() {
        let store = seeded_store("thr_1", 1000);
        let mut cache = ViewportCache::new(config(50), Arc::new(MemoryCache::new()), store.clone());

        let viewport = cache.get_viewport("thr_1").await.unwrap();
        assert_eq!(viewport.len(), 50);
        assert!(viewport.has_more_top);
        assert_eq!(viewport.messages()[49].content, "message 999");
        assert_eq!(store.query_count(), 1);

        // second lookup served from memory
        cache.get_viewport("thr_1").await.unwrap();
        assert_eq!(store.query_count(), 1);
    }

    #[tokio::test]
    async fn test_local_cache_first_then_degrades_on_error() {
        let store = seeded_store("thr_1", 3);
        let local = Arc::new(MemoryCache::new());
        let mut warm = ViewportCache::new(config(50), local.clone(), store.clone());
        warm.get_viewport("thr_1").await.unwrap();

        // a fresh tab with the same local cache never hits the remote
        let mut cold = ViewportCache::new(config(50), local, store.clone());
        let viewport = cold.get_viewport("thr_1").await.unwrap();
        assert_eq!(viewport.len(), 3);
        assert_eq!(store.query_count(), 1);

        let mut broken = ViewportCache::new(config(50), Arc::new(FailingCache), store.clone());
        let viewport = broken.get_viewport("thr_1").await.unwrap();
        assert_eq!(viewport.len(), 3);
        assert_eq!(store.query_count(), 2);
    }

    #[tokio::test]
    async fn test_local_thread_starts_empty_without_remote() {
        let store = Arc::new(MockRemoteStore::new());
        let mut cache = ViewportCache::new(config(50), Arc::new(MemoryCache::new()), store.clone());
        let viewport = cache.get_viewport("local-abc").await.unwrap();
        assert!(viewport.is_empty());
        assert_eq!(store.query_count(), 0);
    }

    #[tokio::test]
    async fn test_optimistic_then_confirm_yields_one_message() {
        let store = seeded_store("thr_1", 2);
        let mut cache = ViewportCache::new(config(50), Arc::new(MemoryCache::new()), store);
        cache.get_viewport("thr_1").await.unwrap();

        let local = Message::user("thr_1", "Hello");
        let local_id = local.id.clone();
        cache.add_optimistic_message(local.clone()).await;

        let mut server = local.clone();
        server.id = "msg_new".into();
        server.status = SyncStatus::Confirmed;
        server.server_timestamp = Some(chrono::Utc::now());
        cache.confirm_message("thr_1", &local_id, server.clone()).await;

        // authoritative echo through the subscription
        cache.sync_messages("thr_1", vec![server]).await;
        let viewport = cache.peek("thr_1").unwrap();
        let hellos: Vec<_> = viewport.messages().iter().filter(|m| m.content == "Hello").collect();
        assert_eq!(hellos.len(), 1);
        assert_eq!(hellos[0].id, "msg_new");
    }

    #[tokio::test]
    async fn test_window_with_live_stream_is_never_evicted() {
        let store = seeded_store("thr_1", 2);
        store.seed_thread("thr_2", "second");
        store.seed_thread("thr_3", "third");
        let mut cache = ViewportCache::new(config(50), Arc::new(MemoryCache::new()), store);
        cache.get_viewport("thr_1").await.unwrap();
        let placeholder = Message::assistant_placeholder("thr_1");
        let placeholder_id = placeholder.id.clone();
        cache.add_optimistic_message(placeholder).await;

        // two more conversations overflow a cache of two
        cache.get_viewport("thr_2").await.unwrap();
        cache.get_viewport("thr_3").await.unwrap();

        assert!(cache.peek("thr_1").is_some());
        assert!(cache.peek("thr_2").is_none());
        assert!(cache.append_stream_text("thr_1", &placeholder_id, "Hi").is_some());
    }

    #[tokio::test]
    async fn test_load_older_pages_and_trims_bottom() {
        let store = seeded_store("thr_1", 40);
        let mut cache = ViewportCache::new(config(20), Arc::new(MemoryCache::new()), store);
        let viewport = cache.get_viewport("thr_1").await.unwrap();
        assert_eq!(viewport.messages()[0].content, "message 20");

        let added = cache.load_older("thr_1").await.unwrap();
        assert_eq!(added, 10);
        let viewport = cache.peek("thr_1").unwrap();
        assert_eq!(viewport.len(), 20);
        assert_eq!(viewport.messages()[0].content, "message 10");
        assert!(viewport.has_more_top);
        assert!(viewport.has_more_bottom);
    }

    #[tokio::test]
    async fn test_memory_is_lru_bounded() {
        let store = seeded_store("a", 1);
        store.seed_thread("b", "b");
        store.seed_thread("c", "c");
        let mut cache = ViewportCache::new(config(10), Arc::new(MemoryCache::new()), store);
        cache.get_viewport("a").await.unwrap();
        cache.get_viewport("b").await.unwrap();
        cache.get_viewport("c").await.unwrap();
        assert_eq!(cache.cached_threads(), 2);
        assert!(cache.peek("a").is_none());
    }

    #[tokio::test]
    async fn test_sibling_upsert_discards_stale_versions() {
        let store = seeded_store("thr_1", 0);
        let mut cache = ViewportCache::new(config(10), Arc::new(MemoryCache::new()), store);
        cache.get_viewport("thr_1").await.unwrap();

        let mut msg = Message::user("thr_1", "v1");
        msg.version = 3;
        assert!(cache.upsert_message(msg.clone(), None).await.is_some());
        let mut stale = msg.clone();
        stale.version = 2;
        stale.content = "old".into();
        assert!(cache.upsert_message(stale, None).await.is_none());
        assert_eq!(cache.peek("thr_1").unwrap().get(&msg.id).unwrap().content, "v1");
    }
}
