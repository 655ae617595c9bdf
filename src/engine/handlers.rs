//! Effect execution. This is where the engine touches the outside world.

use tracing::{debug, warn};

use super::{Action, Effect, Subscription, SyncEngine};
use crate::api;
use crate::models::{is_local_id, ErrorInfo, OperationKind, PendingOperation, SyncStatus, TabEvent};
use crate::viewport::Viewport;

impl SyncEngine {
    pub(super) async fn run_effect(&mut self, effect: Effect) {
        match effect {
            Effect::PersistQueue => self.persist_queue().await,
            Effect::PersistThreads => {
                if let Err(err) = self.local.put_threads(&self.state.threads).await {
                    warn!("Failed to cache thread list: {}", err);
                }
            }
            Effect::Broadcast(event) => self.publish(event).await,
            Effect::LoadViewport { thread_id } => self.load_viewport(&thread_id).await,
            Effect::RefreshViewport { thread_id } => self.refresh_viewport(&thread_id).await,
            Effect::Subscribe { thread_id } => self.open_subscription(thread_id).await,
            Effect::Unsubscribe => {
                if let Some(sub) = self.subscription.take() {
                    debug!("Closed subscription for {}", sub.thread_id);
                }
            }
            Effect::ProcessQueue => self.process_due_operations().await,
            Effect::StartStream {
                thread_id,
                message_id,
            } => self.start_stream(&thread_id, &message_id).await,
            Effect::SetMessageStatus {
                thread_id,
                message_id,
                status,
            } => self.set_message_status(&thread_id, &message_id, status).await,
            Effect::RollBack(op) => self.roll_back(op).await,
            Effect::RekeyThread { old_id, new_id } => {
                self.viewports.rekey_thread(&old_id, &new_id).await;
                for stream in self.streams.values_mut() {
                    if stream.thread_id == old_id {
                        stream.thread_id = new_id.clone();
                    }
                }
                self.mirror_window(&new_id);
            }
            Effect::DropThread { thread_id } => {
                let orphaned: Vec<String> = self
                    .streams
                    .iter()
                    .filter(|(_, s)| s.thread_id == thread_id)
                    .map(|(id, _)| id.clone())
                    .collect();
                for message_id in orphaned {
                    if let Some(stream) = self.streams.remove(&message_id) {
                        stream.abort.abort();
                    }
                    self.dispatch(Action::StreamFinished {
                        message_id,
                        message: None,
                        complete: None,
                        error: None,
                    });
                }
                self.viewports.drop_thread(&thread_id).await;
            }
        }
    }

    pub(super) async fn publish(&mut self, event: TabEvent) {
        if let Err(err) = self.broadcaster.broadcast(&event).await {
            debug!("Broadcast of {:?} failed: {}", event.event_type(), err);
        }
    }

    pub(super) async fn persist_queue(&mut self) {
        if let Err(err) = self.local.save_queue(&self.state.queue).await {
            warn!("Failed to persist pending operations: {}", err);
        }
    }

    /// Push the cached window of `thread_id` into state if it is active.
    pub(super) fn mirror_window(&mut self, thread_id: &str) {
        if self.state.active_thread.as_deref() != Some(thread_id) {
            return;
        }
        if let Some(viewport) = self.viewports.peek(thread_id).cloned() {
            self.dispatch(Action::WindowUpdated { viewport });
        }
    }

    async fn load_viewport(&mut self, thread_id: &str) {
        let result = self.viewports.get_viewport(thread_id).await;
        self.sync_circuit();
        match result {
            Ok(viewport) => self.dispatch(Action::WindowUpdated { viewport }),
            Err(err) => {
                warn!("Could not load conversation {}: {}", thread_id, err);
                self.dispatch(Action::ErrorRaised(
                    ErrorInfo::new(err.error_code(), err.user_message()).with_thread(thread_id),
                ));
                self.dispatch(Action::WindowUpdated {
                    viewport: Viewport::new(thread_id),
                });
            }
        }
    }

    async fn refresh_viewport(&mut self, thread_id: &str) {
        if is_local_id(thread_id) || !self.state.online {
            return;
        }
        let result = self.viewports.refresh(thread_id).await;
        self.sync_circuit();
        match result {
            Ok(viewport) => {
                if self.state.active_thread.as_deref() == Some(thread_id) {
                    self.dispatch(Action::WindowUpdated { viewport });
                }
            }
            Err(err) => debug!("Refresh of {} failed: {}", thread_id, err),
        }
    }

    async fn open_subscription(&mut self, thread_id: String) {
        // confirmed ids only; a local thread is subscribed after confirmation
        if is_local_id(&thread_id) || !self.state.online {
            return;
        }
        if self
            .subscription
            .as_ref()
            .is_some_and(|sub| sub.thread_id == thread_id)
        {
            return;
        }
        let result = api::subscribe_messages(
            self.remote.as_ref(),
            &thread_id,
            self.config.viewport.window_size,
        )
        .await;
        self.sync_circuit();
        match result {
            Ok(stream) => {
                debug!("Subscribed to {}", thread_id);
                self.subscription = Some(Subscription { thread_id, stream });
            }
            Err(err) => warn!("Subscription to {} failed: {}", thread_id, err),
        }
    }

    async fn set_message_status(&mut self, thread_id: &str, message_id: &str, status: SyncStatus) {
        let thread_id = self.state.queue.resolve(thread_id).to_string();
        let message_id = self.state.queue.resolve(message_id).to_string();
        let updated = self
            .viewports
            .update_message(&thread_id, &message_id, |m| m.status = status)
            .await;
        if let Some(message) = updated {
            self.mirror_window(&thread_id);
            self.publish(TabEvent::MessageUpserted {
                message,
                replaces: None,
            })
            .await;
        }
    }

    /// Undo the window-level part of a discarded operation.
    async fn roll_back(&mut self, op: PendingOperation) {
        let thread_id = self.state.queue.resolve(&op.thread_id).to_string();
        match op.kind {
            OperationKind::SendMessage { message_id, .. }
            | OperationKind::CompleteMessage { message_id, .. } => {
                self.viewports.remove_message(&thread_id, &message_id).await;
            }
            OperationKind::EditMessage {
                message_id,
                previous_content,
                ..
            } => {
                let message_id = self.state.queue.resolve(&message_id).to_string();
                let reverted = self
                    .viewports
                    .update_message(&thread_id, &message_id, |m| m.revert_edit(&previous_content))
                    .await;
                if let Some(message) = reverted {
                    self.publish(TabEvent::MessageUpserted {
                        message,
                        replaces: None,
                    })
                    .await;
                }
            }
            OperationKind::DeleteMessage { snapshot, .. } => {
                if let Some(mut message) = snapshot {
                    message.thread_id = thread_id.clone();
                    message.version += 1;
                    self.viewports.upsert_message(message, None).await;
                }
                // siblings hold a tombstone; they must re-read instead
                self.publish(TabEvent::Resync {
                    thread_id: Some(thread_id.clone()),
                })
                .await;
            }
            _ => {}
        }
        self.mirror_window(&thread_id);
    }
}
