//! Local cache persisted as JSON files.
//!
//! Layout under the root directory:
//!
//! ```text
//! threads.json
//! queue.json
//! windows/<thread_id>.json
//! messages/<message_id>.json
//! ```
//!
//! Writes go to a temporary sibling first and are renamed into place, so a
//! crash never leaves a half-written record behind.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs;

use crate::error::CacheError;
use crate::models::{Message, Thread};
use crate::queue::PendingQueue;
use crate::traits::{CachedWindow, LocalCache};

const CACHE_DIR: &str = ".chatsync";
const THREADS_FILE: &str = "threads.json";
const QUEUE_FILE: &str = "queue.json";
const WINDOWS_DIR: &str = "windows";
const MESSAGES_DIR: &str = "messages";

#[derive(Debug, Clone)]
pub struct FileCache {
    root: PathBuf,
}

impl FileCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Cache rooted at `~/.chatsync/<profile>`.
    ///
    /// Returns `None` if the home directory cannot be determined.
    pub fn for_profile(profile: &str) -> Option<Self> {
        let home = dirs::home_dir()?;
        Some(Self::new(home.join(CACHE_DIR).join(file_name(profile))))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn window_path(&self, thread_id: &str) -> PathBuf {
        self.root
            .join(WINDOWS_DIR)
            .join(format!("{}.json", file_name(thread_id)))
    }

    fn message_path(&self, message_id: &str) -> PathBuf {
        self.root
            .join(MESSAGES_DIR)
            .join(format!("{}.json", file_name(message_id)))
    }

    async fn read<T: DeserializeOwned>(&self, path: &Path) -> Result<Option<T>, CacheError> {
        match fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(CacheError::io(path.display().to_string(), &err)),
        }
    }

    async fn write<T: Serialize + ?Sized>(&self, path: &Path, value: &T) -> Result<(), CacheError> {
        let io_err = |err: std::io::Error| CacheError::io(path.display().to_string(), &err);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        let bytes = serde_json::to_vec(value)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, bytes).await.map_err(io_err)?;
        fs::rename(&tmp, path).await.map_err(io_err)
    }

    async fn delete(&self, path: &Path) -> Result<(), CacheError> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(CacheError::io(path.display().to_string(), &err)),
        }
    }
}

/// Map an id onto a safe file name.
fn file_name(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[async_trait]
impl LocalCache for FileCache {
    async fn get_threads(&self) -> Result<Option<Vec<Thread>>, CacheError> {
        self.read(&self.root.join(THREADS_FILE)).await
    }

    async fn put_threads(&self, threads: &[Thread]) -> Result<(), CacheError> {
        self.write(&self.root.join(THREADS_FILE), threads).await
    }

    async fn get_window(&self, thread_id: &str) -> Result<Option<CachedWindow>, CacheError> {
        self.read(&self.window_path(thread_id)).await
    }

    async fn put_window(&self, window: &CachedWindow) -> Result<(), CacheError> {
        self.write(&self.window_path(&window.thread_id), window).await
    }

    async fn delete_window(&self, thread_id: &str) -> Result<(), CacheError> {
        self.delete(&self.window_path(thread_id)).await
    }

    async fn get_message(&self, message_id: &str) -> Result<Option<Message>, CacheError> {
        self.read(&self.message_path(message_id)).await
    }

    async fn put_message(&self, message: &Message) -> Result<(), CacheError> {
        self.write(&self.message_path(&message.id), message).await
    }

    async fn delete_message(&self, message_id: &str) -> Result<(), CacheError> {
        self.delete(&self.message_path(message_id)).await
    }

    async fn load_queue(&self) -> Result<Option<PendingQueue>, CacheError> {
        self.read(&self.root.join(QUEUE_FILE)).await
    }

    async fn save_queue(&self, queue: &PendingQueue) -> Result<(), CacheError> {
        self.write(&self.root.join(QUEUE_FILE), queue).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OperationKind;
    use crate::models::PendingOperation;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_cold_start_is_empty() {
        let dir = TempDir::new().unwrap();
        let cache = FileCache::new(dir.path());
        assert!(cache.get_threads().await.unwrap().is_none());
        assert!(cache.get_window("t").await.unwrap().is_none());
        assert!(cache.load_queue().await.unwrap().is_none());
        cache.delete_message("missing").await.unwrap();
    }

    #[tokio::test]
    async fn test_records_survive_a_new_instance() {
        let dir = TempDir::new().unwrap();
        let message = Message::user("local-t", "persist me");
        let mut queue = PendingQueue::new();
        queue.push(PendingOperation::new(
            "local-t",
            OperationKind::SendMessage {
                message_id: message.id.clone(),
                content: message.content.clone(),
                attachments: vec![],
            },
        ));

        {
            let cache = FileCache::new(dir.path());
            cache.put_message(&message).await.unwrap();
            cache
                .put_window(&CachedWindow {
                    thread_id: "local-t".into(),
                    message_ids: vec![message.id.clone()],
                    has_more_top: true,
                    has_more_bottom: false,
                })
                .await
                .unwrap();
            cache.save_queue(&queue).await.unwrap();
        }

        let reopened = FileCache::new(dir.path());
        let window = reopened.get_window("local-t").await.unwrap().unwrap();
        assert!(window.has_more_top);
        let messages = reopened.get_messages(&window.message_ids).await.unwrap();
        assert_eq!(messages, vec![message]);
        assert_eq!(reopened.load_queue().await.unwrap(), Some(queue));
    }

    #[tokio::test]
    async fn test_corrupt_record_is_an_error() {
        let dir = TempDir::new().unwrap();
        let cache = FileCache::new(dir.path());
        std::fs::write(dir.path().join(THREADS_FILE), b"{not json").unwrap();
        let err = cache.get_threads().await.unwrap_err();
        assert_eq!(err.error_code(), "E_CACHE_CORRUPT");
    }

    #[test]
    fn test_file_name_sanitizes() {
        assert_eq!(file_name("msg_1"), "msg_1");
        assert_eq!(file_name("../etc/passwd"), "___etc_passwd");
    }
}
