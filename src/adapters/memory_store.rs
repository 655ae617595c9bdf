//! In-process reactive store.
//!
//! Implements the function names from [`crate::api`] over plain collections.
//! Mutations are idempotent by `client_id`; every change to a conversation
//! pushes that conversation's newest page to its subscribers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tracing::debug;

use super::lock;
use crate::api::{self, MessagePage};
use crate::error::RemoteError;
use crate::models::{AttachmentRef, Message, MessageEdit, MessageRole, SyncStatus, Thread, TokenUsage};
use crate::traits::{RemoteStore, UpdateStream};

const UPDATE_CAPACITY: usize = 1024;

#[derive(Default)]
struct StoreState {
    threads: Vec<Thread>,
    messages: HashMap<String, Vec<Message>>,
    next_id: u64,
    clock: Option<DateTime<Utc>>,
}

impl StoreState {
    fn mint(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}_{}", prefix, self.next_id)
    }

    /// Strictly increasing server timestamps.
    fn tick(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let at = match self.clock {
            Some(last) if now <= last => last + chrono::Duration::microseconds(1),
            _ => now,
        };
        self.clock = Some(at);
        at
    }

    fn thread_mut(&mut self, thread_id: &str) -> Result<&mut Thread, RemoteError> {
        self.threads
            .iter_mut()
            .find(|t| t.id == thread_id)
            .ok_or_else(|| RemoteError::NotFound(format!("thread {}", thread_id)))
    }

    fn find_message_mut(&mut self, message_id: &str) -> Option<&mut Message> {
        self.messages
            .values_mut()
            .flat_map(|list| list.iter_mut())
            .find(|m| m.id == message_id)
    }

    fn page(&self, thread_id: &str, before: Option<&str>, limit: usize) -> Result<MessagePage, RemoteError> {
        if !self.threads.iter().any(|t| t.id == thread_id) {
            return Err(RemoteError::NotFound(format!("thread {}", thread_id)));
        }
        let all = self.messages.get(thread_id).map(Vec::as_slice).unwrap_or(&[]);
        let end = before
            .and_then(|id| all.iter().position(|m| m.id == id))
            .unwrap_or(all.len());
        let start = end.saturating_sub(limit);
        Ok(MessagePage {
            messages: all[start..end].to_vec(),
            has_more: start > 0,
        })
    }
}

struct Inner {
    state: Mutex<StoreState>,
    updates: broadcast::Sender<String>,
    user_id: String,
}

impl Inner {
    fn notify(&self, thread_id: &str) {
        // no subscribers is fine
        let _ = self.updates.send(thread_id.to_string());
    }
}

#[derive(Clone)]
pub struct InMemoryStore {
    inner: Arc<Inner>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Deserialize)]
struct CreateThreadArgs {
    client_id: String,
    title: String,
    #[serde(default)]
    provider: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    parent_id: Option<String>,
    #[serde(default)]
    branch_from: Option<String>,
}

#[derive(Deserialize)]
struct AppendArgs {
    client_id: String,
    thread_id: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    attachments: Vec<AttachmentRef>,
    #[serde(default)]
    usage: Option<TokenUsage>,
}

#[derive(Deserialize)]
struct MessageArgs {
    message_id: String,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ThreadArgs {
    thread_id: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    archived: Option<bool>,
}

#[derive(Deserialize)]
struct PageArgs {
    thread_id: String,
    #[serde(default)]
    before: Option<String>,
    limit: usize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::for_user("user_1")
    }

    pub fn for_user(user_id: impl Into<String>) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(StoreState::default()),
                updates,
                user_id: user_id.into(),
            }),
        }
    }

    /// Insert a confirmed thread directly.
    pub fn seed_thread(&self, id: &str, title: &str) -> Thread {
        let mut state = lock(&self.inner.state);
        let thread = Thread {
            id: id.to_string(),
            title: title.to_string(),
            user_id: Some(self.inner.user_id.clone()),
            last_activity: state.tick(),
            provider: None,
            model: None,
            parent_id: None,
            archived: false,
            client_id: None,
            status: SyncStatus::Confirmed,
        };
        state.threads.push(thread.clone());
        state.messages.entry(id.to_string()).or_default();
        thread
    }

    /// Append a confirmed user message directly.
    pub fn seed_message(&self, thread_id: &str, content: &str) -> Message {
        let message = {
            let mut state = lock(&self.inner.state);
            let message = new_message(&mut state, thread_id, MessageRole::User, content, None);
            state.messages.entry(thread_id.to_string()).or_default().push(message.clone());
            message
        };
        self.inner.notify(thread_id);
        message
    }

    pub fn threads(&self) -> Vec<Thread> {
        lock(&self.inner.state).threads.clone()
    }

    pub fn messages(&self, thread_id: &str) -> Vec<Message> {
        lock(&self.inner.state)
            .messages
            .get(thread_id)
            .cloned()
            .unwrap_or_default()
    }

    fn create_thread(&self, args: CreateThreadArgs) -> Result<Value, RemoteError> {
        let mut state = lock(&self.inner.state);
        if let Some(existing) = state
            .threads
            .iter()
            .find(|t| t.client_id.as_deref() == Some(args.client_id.as_str()))
        {
            return Ok(serde_json::to_value(existing)?);
        }
        if args.title.trim().is_empty() {
            return Err(RemoteError::rejected("invalid", "title must not be empty"));
        }

        let mut copied = Vec::new();
        if let Some(parent_id) = &args.parent_id {
            let parent = state
                .messages
                .get(parent_id)
                .ok_or_else(|| RemoteError::NotFound(format!("thread {}", parent_id)))?
                .clone();
            copied = match &args.branch_from {
                Some(cut) => {
                    let end = parent
                        .iter()
                        .position(|m| &m.id == cut)
                        .ok_or_else(|| RemoteError::NotFound(format!("message {}", cut)))?;
                    parent[..=end].to_vec()
                }
                None => parent,
            };
        }

        let id = state.mint("thr");
        let thread = Thread {
            id: id.clone(),
            title: args.title,
            user_id: Some(self.inner.user_id.clone()),
            last_activity: state.tick(),
            provider: args.provider,
            model: args.model,
            parent_id: args.parent_id,
            archived: false,
            client_id: Some(args.client_id),
            status: SyncStatus::Confirmed,
        };
        let branch: Vec<Message> = copied
            .into_iter()
            .map(|m| {
                let mut copy = new_message(&mut state, &id, m.role, &m.content, m.usage.clone());
                copy.attachments = m.attachments;
                copy
            })
            .collect();
        state.messages.insert(id.clone(), branch);
        state.threads.push(thread.clone());
        debug!("Store created thread {}", id);
        Ok(serde_json::to_value(thread)?)
    }

    fn append(&self, args: AppendArgs, role: MessageRole) -> Result<Value, RemoteError> {
        let message = {
            let mut state = lock(&self.inner.state);
            let existing = state
                .messages
                .get(&args.thread_id)
                .and_then(|list| list.iter().find(|m| m.client_id.as_deref() == Some(args.client_id.as_str())))
                .cloned();
            if let Some(existing) = existing {
                return Ok(serde_json::to_value(existing)?);
            }
            if role == MessageRole::User && args.content.trim().is_empty() {
                return Err(RemoteError::rejected("invalid", "message content must not be empty"));
            }
            let at = state.tick();
            state.thread_mut(&args.thread_id)?.touch(at);

            let mut message = new_message(&mut state, &args.thread_id, role, &args.content, args.usage);
            message.client_id = Some(args.client_id);
            message.attachments = args.attachments;
            state
                .messages
                .entry(args.thread_id.clone())
                .or_default()
                .push(message.clone());
            message
        };
        self.inner.notify(&args.thread_id);
        Ok(serde_json::to_value(message)?)
    }

    fn edit(&self, args: MessageArgs) -> Result<Value, RemoteError> {
        let content = args
            .content
            .ok_or_else(|| RemoteError::rejected("invalid", "content is required"))?;
        let message = {
            let mut state = lock(&self.inner.state);
            let now = state.tick();
            let message = state
                .find_message_mut(&args.message_id)
                .ok_or_else(|| RemoteError::NotFound(format!("message {}", args.message_id)))?;
            if message.content != content {
                let previous = std::mem::replace(&mut message.content, content);
                message.edit_history.push(MessageEdit {
                    previous_content: previous,
                    edited_at: now,
                });
                message.version += 1;
            }
            message.clone()
        };
        self.inner.notify(&message.thread_id);
        Ok(serde_json::to_value(message)?)
    }

    fn delete(&self, args: MessageArgs) -> Result<Value, RemoteError> {
        let removed_from = {
            let mut state = lock(&self.inner.state);
            let mut removed_from = None;
            for (thread_id, list) in state.messages.iter_mut() {
                if let Some(index) = list.iter().position(|m| m.id == args.message_id) {
                    list.remove(index);
                    removed_from = Some(thread_id.clone());
                    break;
                }
            }
            removed_from
        };
        if let Some(thread_id) = &removed_from {
            self.inner.notify(thread_id);
        }
        Ok(json!({ "deleted": true, "message_id": args.message_id }))
    }

    fn update_thread(&self, args: ThreadArgs) -> Result<Value, RemoteError> {
        let mut state = lock(&self.inner.state);
        let at = state.tick();
        let thread = state.thread_mut(&args.thread_id)?;
        if let Some(title) = args.title {
            if title.trim().is_empty() {
                return Err(RemoteError::rejected("invalid", "title must not be empty"));
            }
            thread.title = title;
        }
        if let Some(archived) = args.archived {
            thread.archived = archived;
        }
        thread.touch(at);
        Ok(serde_json::to_value(thread.clone())?)
    }
}

fn new_message(
    state: &mut StoreState,
    thread_id: &str,
    role: MessageRole,
    content: &str,
    usage: Option<TokenUsage>,
) -> Message {
    let at = state.tick();
    Message {
        id: state.mint("msg"),
        thread_id: thread_id.to_string(),
        role,
        content: content.to_string(),
        is_streaming: false,
        version: 1,
        sequence: 0,
        created_at: at,
        server_timestamp: Some(at),
        client_id: None,
        status: SyncStatus::Confirmed,
        usage,
        attachments: Vec::new(),
        edit_history: Vec::new(),
    }
}

fn parse<T: serde::de::DeserializeOwned>(args: Value) -> Result<T, RemoteError> {
    serde_json::from_value(args).map_err(|e| RemoteError::rejected("invalid_args", e.to_string()))
}

#[async_trait]
impl RemoteStore for InMemoryStore {
    async fn query(&self, name: &str, args: Value) -> Result<Value, RemoteError> {
        let state = lock(&self.inner.state);
        match name {
            api::THREADS_LIST => {
                let mut threads = state.threads.clone();
                threads.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
                Ok(serde_json::to_value(threads)?)
            }
            api::MESSAGES_LIST => {
                let args: PageArgs = parse(args)?;
                let page = state.page(&args.thread_id, args.before.as_deref(), args.limit)?;
                Ok(serde_json::to_value(page)?)
            }
            other => Err(RemoteError::rejected("unknown_function", other)),
        }
    }

    async fn mutate(&self, name: &str, args: Value) -> Result<Value, RemoteError> {
        match name {
            api::THREADS_CREATE => self.create_thread(parse(args)?),
            api::MESSAGES_SEND => self.append(parse(args)?, MessageRole::User),
            api::MESSAGES_COMPLETE => self.append(parse(args)?, MessageRole::Assistant),
            api::MESSAGES_EDIT => self.edit(parse(args)?),
            api::MESSAGES_DELETE => self.delete(parse(args)?),
            api::THREADS_RENAME | api::THREADS_ARCHIVE => self.update_thread(parse(args)?),
            other => Err(RemoteError::rejected("unknown_function", other)),
        }
    }

    async fn subscribe(&self, name: &str, args: Value) -> Result<UpdateStream, RemoteError> {
        if name != api::MESSAGES_LIST {
            return Err(RemoteError::rejected("unknown_subscription", name));
        }
        let args: PageArgs = parse(args)?;
        lock(&self.inner.state).page(&args.thread_id, None, args.limit)?;

        let rx = self.inner.updates.subscribe();
        let seed = (self.inner.clone(), rx, args.thread_id, args.limit, true);
        let stream = futures::stream::unfold(seed, |(inner, mut rx, thread_id, limit, initial)| async move {
            if !initial {
                loop {
                    match rx.recv().await {
                        Ok(changed) if changed == thread_id => break,
                        Ok(_) => continue,
                        Err(broadcast::error::RecvError::Lagged(_)) => break,
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            }
            let page = lock(&inner.state).page(&thread_id, None, limit).ok()?;
            let value = serde_json::to_value(page).ok()?;
            Some((value, (inner, rx, thread_id, limit, false)))
        });
        Ok(stream.boxed())
    }
}
