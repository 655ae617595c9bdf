//! Mock remote store for testing.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use crate::adapters::{lock, InMemoryStore};
use crate::error::RemoteError;
use crate::models::{Message, Thread};
use crate::traits::{RemoteStore, UpdateStream};

/// A recorded store call for verification in tests.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    /// `query`, `mutate` or `subscribe`
    pub kind: &'static str,
    pub name: String,
    pub args: Value,
}

/// Wraps an [`InMemoryStore`] with failure injection.
///
/// # Example
///
/// ```ignore
/// use chatsync::adapters::mock::MockRemoteStore;
///
/// let store = MockRemoteStore::new();
/// store.seed_thread("thr_1", "Inbox");
/// store.push_failure(RemoteError::Network("reset".into()));
///
/// // the next mutation fails, later ones reach the store
/// assert!(store.mutate("messages:send", args.clone()).await.is_err());
/// assert!(store.mutate("messages:send", args).await.is_ok());
/// assert_eq!(store.mutate_count(), 2);
/// ```
#[derive(Clone)]
pub struct MockRemoteStore {
    inner: InMemoryStore,
    /// Errors returned by the next mutations, in order
    failures: Arc<Mutex<VecDeque<RemoteError>>>,
    offline: Arc<AtomicBool>,
    queries: Arc<AtomicUsize>,
    mutations: Arc<AtomicUsize>,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
}

impl Default for MockRemoteStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRemoteStore {
    pub fn new() -> Self {
        Self {
            inner: InMemoryStore::new(),
            failures: Arc::new(Mutex::new(VecDeque::new())),
            offline: Arc::new(AtomicBool::new(false)),
            queries: Arc::new(AtomicUsize::new(0)),
            mutations: Arc::new(AtomicUsize::new(0)),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn inner(&self) -> &InMemoryStore {
        &self.inner
    }

    pub fn seed_thread(&self, id: &str, title: &str) -> Thread {
        self.inner.seed_thread(id, title)
    }

    pub fn seed_message(&self, thread_id: &str, content: &str) -> Message {
        self.inner.seed_message(thread_id, content)
    }

    pub fn messages(&self, thread_id: &str) -> Vec<Message> {
        self.inner.messages(thread_id)
    }

    pub fn threads(&self) -> Vec<Thread> {
        self.inner.threads()
    }

    /// Fail the next mutation with `err`.
    pub fn push_failure(&self, err: RemoteError) {
        lock(&self.failures).push_back(err);
    }

    /// Fail the next `count` mutations with clones of `err`.
    pub fn push_failures(&self, err: RemoteError, count: usize) {
        let mut failures = lock(&self.failures);
        for _ in 0..count {
            failures.push_back(err.clone());
        }
    }

    /// While offline every call fails with a network error.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    pub fn mutate_count(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        lock(&self.calls).clone()
    }

    /// Mutation calls made with `name`.
    pub fn mutations_named(&self, name: &str) -> Vec<RecordedCall> {
        lock(&self.calls)
            .iter()
            .filter(|c| c.kind == "mutate" && c.name == name)
            .cloned()
            .collect()
    }

    fn record(&self, kind: &'static str, name: &str, args: &Value) {
        lock(&self.calls).push(RecordedCall {
            kind,
            name: name.to_string(),
            args: args.clone(),
        });
    }

    fn check_online(&self) -> Result<(), RemoteError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(RemoteError::Network("connection refused".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RemoteStore for MockRemoteStore {
    async fn query(&self, name: &str, args: Value) -> Result<Value, RemoteError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.record("query", name, &args);
        self.check_online()?;
        self.inner.query(name, args).await
    }

    async fn mutate(&self, name: &str, args: Value) -> Result<Value, RemoteError> {
        self.mutations.fetch_add(1, Ordering::SeqCst);
        self.record("mutate", name, &args);
        self.check_online()?;
        let scripted = lock(&self.failures).pop_front();
        if let Some(err) = scripted {
            return Err(err);
        }
        self.inner.mutate(name, args).await
    }

    async fn subscribe(&self, name: &str, args: Value) -> Result<UpdateStream, RemoteError> {
        self.record("subscribe", name, &args);
        self.check_online()?;
        self.inner.subscribe(name, args).await
    }
}
