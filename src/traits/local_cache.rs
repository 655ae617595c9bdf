//! Local persistent cache trait abstraction.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CacheError;
use crate::models::{Message, Thread};
use crate::queue::PendingQueue;

/// Persisted shape of one conversation window: message ids in order plus
/// the pagination flags. Messages themselves are stored by id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CachedWindow {
    pub thread_id: String,
    pub message_ids: Vec<String>,
    #[serde(default)]
    pub has_more_top: bool,
    #[serde(default)]
    pub has_more_bottom: bool,
}

/// Per-tab persistent cache.
///
/// Must tolerate being empty (cold start) and being the only source
/// (offline start). Callers treat every error as a cache miss.
#[async_trait]
pub trait LocalCache: Send + Sync {
    async fn get_threads(&self) -> Result<Option<Vec<Thread>>, CacheError>;

    async fn put_threads(&self, threads: &[Thread]) -> Result<(), CacheError>;

    async fn get_window(&self, thread_id: &str) -> Result<Option<CachedWindow>, CacheError>;

    async fn put_window(&self, window: &CachedWindow) -> Result<(), CacheError>;

    async fn delete_window(&self, thread_id: &str) -> Result<(), CacheError>;

    async fn get_message(&self, message_id: &str) -> Result<Option<Message>, CacheError>;

    async fn put_message(&self, message: &Message) -> Result<(), CacheError>;

    async fn delete_message(&self, message_id: &str) -> Result<(), CacheError>;

    async fn load_queue(&self) -> Result<Option<PendingQueue>, CacheError>;

    async fn save_queue(&self, queue: &PendingQueue) -> Result<(), CacheError>;

    /// Load the messages of a cached window, skipping ids with no record.
    async fn get_messages(&self, ids: &[String]) -> Result<Vec<Message>, CacheError> {
        let mut messages = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(message) = self.get_message(id).await? {
                messages.push(message);
            }
        }
        Ok(messages)
    }
}
