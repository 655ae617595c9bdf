//! Local cache double whose every operation fails.

use async_trait::async_trait;

use crate::error::CacheError;
use crate::models::{Message, Thread};
use crate::queue::PendingQueue;
use crate::traits::{CachedWindow, LocalCache};

/// Models storage that is full, corrupt or disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingCache;

fn unavailable() -> CacheError {
    CacheError::Unavailable("storage disabled".into())
}

#[async_trait]
impl LocalCache for FailingCache {
    async fn get_threads(&self) -> Result<Option<Vec<Thread>>, CacheError> {
        Err(unavailable())
    }

    async fn put_threads(&self, _threads: &[Thread]) -> Result<(), CacheError> {
        Err(unavailable())
    }

    async fn get_window(&self, _thread_id: &str) -> Result<Option<CachedWindow>, CacheError> {
        Err(unavailable())
    }

    async fn put_window(&self, _window: &CachedWindow) -> Result<(), CacheError> {
        Err(unavailable())
    }

    async fn delete_window(&self, _thread_id: &str) -> Result<(), CacheError> {
        Err(unavailable())
    }

    async fn get_message(&self, _message_id: &str) -> Result<Option<Message>, CacheError> {
        Err(unavailable())
    }

    async fn put_message(&self, _message: &Message) -> Result<(), CacheError> {
        Err(unavailable())
    }

    async fn delete_message(&self, _message_id: &str) -> Result<(), CacheError> {
        Err(unavailable())
    }

    async fn load_queue(&self) -> Result<Option<PendingQueue>, CacheError> {
        Err(unavailable())
    }

    async fn save_queue(&self, _queue: &PendingQueue) -> Result<(), CacheError> {
        Err(unavailable())
    }
}
