//! Local cache held in memory.
//!
//! Share one instance between engines (wrapped in `Arc`) to model tabs of
//! the same origin that see the same persistent storage.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::lock;
use crate::error::CacheError;
use crate::models::{Message, Thread};
use crate::queue::PendingQueue;
use crate::traits::{CachedWindow, LocalCache};

#[derive(Default)]
struct CacheState {
    threads: Option<Vec<Thread>>,
    windows: HashMap<String, CachedWindow>,
    messages: HashMap<String, Message>,
    queue: Option<PendingQueue>,
}

#[derive(Default)]
pub struct MemoryCache {
    state: Mutex<CacheState>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn message_count(&self) -> usize {
        lock(&self.state).messages.len()
    }

    pub fn window(&self, thread_id: &str) -> Option<CachedWindow> {
        lock(&self.state).windows.get(thread_id).cloned()
    }
}

#[async_trait]
impl LocalCache for MemoryCache {
    async fn get_threads(&self) -> Result<Option<Vec<Thread>>, CacheError> {
        Ok(lock(&self.state).threads.clone())
    }

    async fn put_threads(&self, threads: &[Thread]) -> Result<(), CacheError> {
        lock(&self.state).threads = Some(threads.to_vec());
        Ok(())
    }

    async fn get_window(&self, thread_id: &str) -> Result<Option<CachedWindow>, CacheError> {
        Ok(lock(&self.state).windows.get(thread_id).cloned())
    }

    async fn put_window(&self, window: &CachedWindow) -> Result<(), CacheError> {
        lock(&self.state)
            .windows
            .insert(window.thread_id.clone(), window.clone());
        Ok(())
    }

    async fn delete_window(&self, thread_id: &str) -> Result<(), CacheError> {
        lock(&self.state).windows.remove(thread_id);
        Ok(())
    }

    async fn get_message(&self, message_id: &str) -> Result<Option<Message>, CacheError> {
        Ok(lock(&self.state).messages.get(message_id).cloned())
    }

    async fn put_message(&self, message: &Message) -> Result<(), CacheError> {
        lock(&self.state)
            .messages
            .insert(message.id.clone(), message.clone());
        Ok(())
    }

    async fn delete_message(&self, message_id: &str) -> Result<(), CacheError> {
        lock(&self.state).messages.remove(message_id);
        Ok(())
    }

    async fn load_queue(&self) -> Result<Option<PendingQueue>, CacheError> {
        Ok(lock(&self.state).queue.clone())
    }

    async fn save_queue(&self, queue: &PendingQueue) -> Result<(), CacheError> {
        lock(&self.state).queue = Some(queue.clone());
        Ok(())
    }
}
