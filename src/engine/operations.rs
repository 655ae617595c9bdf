//! User-facing actions and dispatch of the pending queue.

use chrono::Utc;
use futures::future::join_all;
use tracing::{debug, info, warn};

use super::{Action, Effect, SyncEngine};
use crate::api::{self, MutationOutcome};
use crate::error::{ErrorContext, RemoteError, ResultExt, SyncError, SyncResult};
use crate::models::{
    is_local_id, Message, OperationKind, OperationStatus, PendingOperation, SyncStatus, TabEvent,
    Thread,
};

impl SyncEngine {
    /// Make `thread_id` the active conversation. The previous window is
    /// cleared from state before the new one loads.
    pub async fn select_conversation(&mut self, thread_id: &str) -> SyncResult<()> {
        let thread_id = self.known_thread(thread_id)?.id.clone();
        self.dispatch(Action::ConversationSelected { thread_id });
        self.drain().await;
        Ok(())
    }

    /// Create a conversation optimistically. Returns its local id, which
    /// keeps resolving after the server assigns the real one.
    pub async fn create_conversation(&mut self, title: &str) -> SyncResult<String> {
        let title = title.trim();
        if title.is_empty() {
            return Err(SyncError::invalid("A conversation needs a title."));
        }
        let thread = Thread::optimistic(title, self.config.default_provider.clone(), None, None);
        let op = PendingOperation::create_thread(
            thread.id.clone(),
            OperationKind::CreateThread {
                title: title.to_string(),
                provider: thread.provider.clone(),
                model: None,
                parent_id: None,
                branch_from: None,
            },
        );
        let id = thread.id.clone();
        info!("Creating conversation {}", id);
        self.dispatch(Action::ThreadCreated { thread, op });
        self.drain().await;
        Ok(id)
    }

    /// New conversation seeded with the parent's messages up to and
    /// including `message_id`.
    pub async fn branch_conversation(
        &mut self,
        parent_id: &str,
        message_id: &str,
    ) -> SyncResult<String> {
        let parent = self.known_thread(parent_id)?.clone();
        if parent.is_local() {
            return Err(SyncError::invalid("Wait for the conversation to be saved before branching."));
        }
        let branch_from = self.state.queue.resolve(message_id).to_string();
        if is_local_id(&branch_from) {
            return Err(SyncError::invalid("Wait for the message to be saved before branching."));
        }

        let title = format!("{} (branch)", parent.title);
        let thread = Thread::optimistic(
            title.clone(),
            parent.provider.clone(),
            parent.model.clone(),
            Some(parent.id.clone()),
        );
        let op = PendingOperation::create_thread(
            thread.id.clone(),
            OperationKind::CreateThread {
                title,
                provider: parent.provider,
                model: parent.model,
                parent_id: Some(parent.id),
                branch_from: Some(branch_from),
            },
        );
        let id = thread.id.clone();
        self.dispatch(Action::ThreadCreated { thread, op });
        self.drain().await;
        Ok(id)
    }

    pub async fn rename_conversation(&mut self, thread_id: &str, title: &str) -> SyncResult<()> {
        let thread = self.known_thread(thread_id)?.clone();
        let title = title.trim();
        if title.is_empty() {
            return Err(SyncError::invalid("A conversation needs a title."));
        }
        if title == thread.title {
            return Ok(());
        }
        let op = PendingOperation::new(
            thread.id.clone(),
            OperationKind::RenameThread {
                title: title.to_string(),
                previous_title: thread.title.clone(),
            },
        );
        self.dispatch(Action::ThreadUpdated {
            thread_id: thread.id,
            title: Some(title.to_string()),
            archived: None,
            op,
        });
        self.drain().await;
        Ok(())
    }

    pub async fn archive_conversation(&mut self, thread_id: &str, archived: bool) -> SyncResult<()> {
        let thread = self.known_thread(thread_id)?.clone();
        if thread.archived == archived {
            return Ok(());
        }
        let op = PendingOperation::new(thread.id.clone(), OperationKind::ArchiveThread { archived });
        self.dispatch(Action::ThreadUpdated {
            thread_id: thread.id,
            title: None,
            archived: Some(archived),
            op,
        });
        self.drain().await;
        Ok(())
    }

    /// Send a user message and start streaming the assistant reply.
    /// Returns the local id of the user message.
    pub async fn send_message(&mut self, thread_id: &str, content: &str) -> SyncResult<String> {
        if content.trim().is_empty() {
            return Err(SyncError::invalid("Cannot send an empty message."));
        }
        let thread_id = self.known_thread(thread_id)?.id.clone();
        if self
            .streams
            .values()
            .any(|s| self.state.queue.resolve(&s.thread_id) == thread_id)
        {
            return Err(SyncError::invalid(
                "Wait for the current response to finish before sending.",
            ));
        }

        let mut user = Message::user(thread_id.clone(), content);
        user.sequence = self.next_sequence();
        let mut assistant = Message::assistant_placeholder(thread_id.clone());
        assistant.sequence = self.next_sequence();
        if assistant.created_at < user.created_at {
            assistant.created_at = user.created_at;
        }

        self.viewports.add_optimistic_message(user.clone()).await;
        let viewport = self.viewports.add_optimistic_message(assistant.clone()).await;
        self.dispatch(Action::WindowUpdated { viewport });

        let op = PendingOperation::new(
            thread_id,
            OperationKind::SendMessage {
                message_id: user.id.clone(),
                content: content.to_string(),
                attachments: user.attachments.clone(),
            },
        );
        let id = user.id.clone();
        self.dispatch(Action::MessageSent {
            user,
            assistant,
            op,
        });
        self.drain().await;
        Ok(id)
    }

    /// Edit a message in the active conversation. An edit of a message that
    /// has not been sent yet rewrites the queued send instead.
    pub async fn edit_message(&mut self, message_id: &str, content: &str) -> SyncResult<()> {
        let (thread_id, message) = self.active_message(message_id)?;
        if message.is_streaming {
            return Err(SyncError::invalid("Cannot edit a response while it is streaming."));
        }
        if content.trim().is_empty() {
            return Err(SyncError::invalid("A message cannot be empty."));
        }
        if content == message.content {
            return Ok(());
        }

        if let Some(send) = self.state.queue.unsent_send(&message.id).cloned() {
            let updated = self
                .viewports
                .update_message(&thread_id, &message.id, |m| m.content = content.to_string())
                .await;
            if let Some(message) = updated {
                self.mirror_window(&thread_id);
                self.dispatch(Action::SendContentReplaced {
                    op_id: send.id,
                    message,
                });
            }
            self.drain().await;
            return Ok(());
        }

        let updated = self
            .viewports
            .update_message(&thread_id, &message.id, |m| m.apply_edit(content))
            .await
            .ok_or_else(|| SyncError::unknown("message", message_id))?;
        self.mirror_window(&thread_id);
        let op = PendingOperation::new(
            thread_id,
            OperationKind::EditMessage {
                message_id: message.id,
                content: content.to_string(),
                previous_content: message.content,
            },
        );
        self.dispatch(Action::OperationQueued {
            op,
            events: vec![TabEvent::MessageUpserted {
                message: updated,
                replaces: None,
            }],
        });
        self.drain().await;
        Ok(())
    }

    /// Delete a message in the active conversation. A message that never
    /// reached the server is dropped along with its queued operations.
    pub async fn delete_message(&mut self, message_id: &str) -> SyncResult<()> {
        let (thread_id, message) = self.active_message(message_id)?;
        if message.is_streaming {
            return Err(SyncError::invalid("Stop the response before deleting it."));
        }

        let queued: Vec<&PendingOperation> = self.state.queue.for_entity(&message.id);
        let in_flight = queued.iter().any(|op| op.status == OperationStatus::InFlight);
        let op_ids: Vec<String> = queued.iter().map(|op| op.id.clone()).collect();

        self.viewports.remove_message(&thread_id, &message.id).await;
        self.mirror_window(&thread_id);
        let events = vec![TabEvent::MessageDeleted {
            thread_id: thread_id.clone(),
            message_id: message.id.clone(),
        }];

        if message.status.is_confirmed() || in_flight || !is_local_id(&message.id) {
            let op = PendingOperation::new(
                thread_id,
                OperationKind::DeleteMessage {
                    message_id: message.id.clone(),
                    snapshot: Some(message),
                },
            );
            self.dispatch(Action::OperationQueued { op, events });
        } else {
            debug!("Dropping unsent message {} and {} operations", message.id, op_ids.len());
            self.dispatch(Action::OperationsCancelled { op_ids, events });
        }
        self.drain().await;
        Ok(())
    }

    /// Put a failed operation back in line with a fresh retry budget.
    pub async fn retry_operation(&mut self, op_id: &str) -> SyncResult<()> {
        self.idle_operation(op_id)?;
        self.dispatch(Action::OperationRetried {
            op_id: op_id.to_string(),
        });
        self.drain().await;
        Ok(())
    }

    /// Drop a queued or failed operation and roll back its optimistic effect.
    pub async fn discard_operation(&mut self, op_id: &str) -> SyncResult<()> {
        self.idle_operation(op_id)?;
        self.dispatch(Action::OperationDiscarded {
            op_id: op_id.to_string(),
        });
        self.drain().await;
        Ok(())
    }

    /// Page older history into the window. Returns how many messages were added.
    pub async fn load_older_messages(&mut self, thread_id: &str) -> SyncResult<usize> {
        let thread_id = self.known_thread(thread_id)?.id.clone();
        if is_local_id(&thread_id) {
            return Ok(0);
        }
        let result = self.viewports.load_older(&thread_id).await;
        self.sync_circuit();
        let added = result?;
        if added > 0 {
            self.mirror_window(&thread_id);
        }
        self.drain().await;
        Ok(added)
    }

    /// Load the cached thread list if state is empty, then the remote one.
    pub async fn refresh_threads(&mut self) -> SyncResult<()> {
        if self.state.threads.is_empty() {
            match self.local.get_threads().await {
                Ok(Some(threads)) => self.dispatch(Action::ThreadsLoaded {
                    threads,
                    authoritative: false,
                }),
                Ok(None) => {}
                Err(err) => warn!("Cached thread list unavailable: {}", err),
            }
        }

        let result = api::list_threads(self.remote.as_ref())
            .await
            .with_context(|| ErrorContext::new("refresh_threads").with_component("engine"));
        self.sync_circuit();
        let threads = result?;
        self.dispatch(Action::ThreadsLoaded {
            threads,
            authoritative: true,
        });
        self.drain().await;
        Ok(())
    }

    /// Dispatch one round of due operations: the head of every conversation,
    /// conversations concurrently. Another round is queued while work remains.
    pub async fn process_due_operations(&mut self) {
        if !self.state.online {
            return;
        }
        let ready = self.state.queue.ready(Utc::now());
        if ready.is_empty() {
            return;
        }
        let op_ids: Vec<String> = ready.iter().map(|op| op.id.clone()).collect();
        self.dispatch(Action::OperationsDispatched { op_ids });

        let calls: Vec<_> = ready
            .into_iter()
            .map(|op| {
                let call = api::mutation_for(&op, &self.state.queue);
                (op, call)
            })
            .collect();
        let remote = self.remote.clone();
        let results = join_all(calls.into_iter().map(|(op, call)| {
            let remote = remote.clone();
            async move {
                let result = match call {
                    Ok((name, args)) => {
                        debug!("Dispatching {} ({}) attempt {}", op.id, name, op.retry_count + 1);
                        remote.mutate(name, args).await
                    }
                    Err(err) => Err(err),
                };
                (op, result)
            }
        }))
        .await;
        self.sync_circuit();

        for (op, result) in results {
            match result.and_then(|value| api::decode_outcome(&op, value)) {
                Ok(outcome) => self.confirm_operation(op, outcome).await,
                Err(err) => self.fail_operation(op, err),
            }
        }
        self.enqueue(Effect::ProcessQueue);
    }

    fn fail_operation(&mut self, op: PendingOperation, error: RemoteError) {
        let context = ErrorContext::new("dispatch")
            .with_component("queue")
            .with_thread_id(op.thread_id.clone())
            .with_operation_id(op.id.clone())
            .with_retry_count(op.retry_count);
        debug!("{} failed: {}", context.to_log_string(), error);
        self.dispatch(Action::OperationFailed {
            op_id: op.id,
            error,
            at: Utc::now(),
            jitter_unit: rand::random::<f64>(),
            backoff_multiplier: self.network.quality().backoff_multiplier(),
            policy: self.config.retry.clone(),
        });
    }

    async fn confirm_operation(&mut self, op: PendingOperation, outcome: MutationOutcome) {
        self.dispatch(Action::OperationConfirmed {
            op_id: op.id.clone(),
            remote_id: Some(outcome.remote_id().to_string()),
        });

        match (op.kind, outcome) {
            (OperationKind::CreateThread { .. }, MutationOutcome::Thread(thread))
            | (OperationKind::RenameThread { .. }, MutationOutcome::Thread(thread))
            | (OperationKind::ArchiveThread { .. }, MutationOutcome::Thread(thread)) => {
                let local_id = if thread.client_id.as_deref() == Some(op.thread_id.as_str()) {
                    op.thread_id.clone()
                } else {
                    thread.id.clone()
                };
                self.dispatch(Action::ThreadConfirmed { local_id, thread });
            }
            (OperationKind::SendMessage { message_id, .. }, MutationOutcome::Message(message))
            | (OperationKind::CompleteMessage { message_id, .. }, MutationOutcome::Message(message)) => {
                let thread_id = self.state.queue.resolve(&op.thread_id).to_string();
                let present = self
                    .viewports
                    .peek(&thread_id)
                    .is_some_and(|v| v.get(&message_id).is_some());
                if !present {
                    // deleted or evicted locally; the server copy arrives via sync
                    debug!("Local message {} gone before confirmation", message_id);
                    return;
                }
                let mut message = message;
                message.thread_id = thread_id.clone();
                let stamped = self
                    .viewports
                    .confirm_message(&thread_id, &message_id, message)
                    .await;
                self.mirror_window(&thread_id);
                self.dispatch(Action::MessageConfirmed {
                    message: stamped,
                    replaces: Some(message_id),
                });
            }
            (OperationKind::EditMessage { message_id, .. }, MutationOutcome::Message(server)) => {
                let thread_id = self.state.queue.resolve(&op.thread_id).to_string();
                let message_id = self.state.queue.resolve(&message_id).to_string();
                if !self.state.queue.for_entity(&message_id).is_empty() {
                    // a newer edit is queued; its confirmation settles the content
                    return;
                }
                let updated = self
                    .viewports
                    .update_message(&thread_id, &message_id, |m| {
                        m.content = server.content;
                        m.server_timestamp = server.server_timestamp.or(m.server_timestamp);
                        m.status = SyncStatus::Confirmed;
                    })
                    .await;
                if let Some(message) = updated {
                    self.mirror_window(&thread_id);
                    self.dispatch(Action::MessageConfirmed {
                        message,
                        replaces: None,
                    });
                }
            }
            (OperationKind::DeleteMessage { .. }, MutationOutcome::Deleted { message_id }) => {
                debug!("Delete of {} confirmed", message_id);
            }
            (kind, outcome) => {
                warn!(
                    "Unexpected result {:?} for {} {}",
                    outcome.remote_id(),
                    kind.name(),
                    op.id
                );
            }
        }
    }

    fn next_sequence(&mut self) -> u64 {
        self.sequence += 1;
        self.sequence
    }

    fn known_thread(&self, thread_id: &str) -> SyncResult<&Thread> {
        self.state
            .thread(thread_id)
            .ok_or_else(|| SyncError::unknown("conversation", thread_id))
    }

    /// A message in the active window, with the window's thread id.
    fn active_message(&self, message_id: &str) -> SyncResult<(String, Message)> {
        let thread_id = self
            .state
            .active_thread
            .clone()
            .ok_or_else(|| SyncError::invalid("No conversation is selected."))?;
        let message_id = self.state.queue.resolve(message_id);
        self.viewports
            .peek(&thread_id)
            .and_then(|v| v.get(message_id))
            .cloned()
            .map(|m| (thread_id, m))
            .ok_or_else(|| SyncError::unknown("message", message_id))
    }

    /// An operation that exists and is not currently being dispatched.
    fn idle_operation(&self, op_id: &str) -> SyncResult<&PendingOperation> {
        let op = self
            .state
            .queue
            .get(op_id)
            .ok_or_else(|| SyncError::unknown("operation", op_id))?;
        if op.status == OperationStatus::InFlight {
            return Err(SyncError::invalid("That change is being sent right now."));
        }
        Ok(op)
    }
}
