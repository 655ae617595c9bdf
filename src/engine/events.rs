//! Inbound traffic: sibling tab envelopes and remote subscription pushes.

use serde_json::Value;
use tracing::{debug, warn};

use super::{Action, Effect, SyncEngine};
use crate::api::MessagePage;
use crate::models::TabEvent;

impl SyncEngine {
    /// Apply one raw envelope from the tab transport.
    pub(super) async fn handle_tab_payload(&mut self, raw: &str) {
        let Some(event) = self.broadcaster.accept(raw) else {
            return;
        };
        match event {
            TabEvent::MessageUpserted {
                mut message,
                replaces,
            } => {
                message.thread_id = self.state.queue.resolve(&message.thread_id).to_string();
                let thread_id = message.thread_id.clone();
                if self
                    .viewports
                    .upsert_message(message, replaces.as_deref())
                    .await
                    .is_some()
                {
                    self.mirror_window(&thread_id);
                }
            }
            TabEvent::MessageDeleted {
                thread_id,
                message_id,
            } => {
                let thread_id = self.state.queue.resolve(&thread_id).to_string();
                if self
                    .viewports
                    .remove_message(&thread_id, &message_id)
                    .await
                    .is_some()
                {
                    self.mirror_window(&thread_id);
                }
            }
            TabEvent::MessagesSynced {
                thread_id,
                messages,
            } => {
                let thread_id = self.state.queue.resolve(&thread_id).to_string();
                // a sibling's page must not create windows this tab never opened
                if self.viewports.peek(&thread_id).is_some()
                    && self
                        .viewports
                        .sync_messages(&thread_id, messages)
                        .await
                        .is_some()
                {
                    self.mirror_window(&thread_id);
                }
            }
            TabEvent::Resync { thread_id } => match thread_id {
                Some(thread_id) => {
                    let thread_id = self.state.queue.resolve(&thread_id).to_string();
                    if self.viewports.peek(&thread_id).is_some() {
                        self.enqueue(Effect::RefreshViewport { thread_id });
                    }
                }
                None => {
                    if let Err(err) = self.refresh_threads().await {
                        debug!("Resync thread refresh failed: {}", err);
                    }
                }
            },
            other => self.dispatch(Action::TabEventReceived(other)),
        }
        self.drain().await;
    }

    /// The transport dropped envelopes for this tab; re-read instead of
    /// guessing what was missed.
    pub(super) async fn handle_lag(&mut self, missed: u64) {
        warn!("Tab transport lagged, {} envelopes lost; resyncing", missed);
        if let Some(thread_id) = self.state.active_thread.clone() {
            self.enqueue(Effect::RefreshViewport { thread_id });
        }
        if let Err(err) = self.refresh_threads().await {
            debug!("Thread refresh after lag failed: {}", err);
        }
        self.drain().await;
    }

    /// One push from the live subscription; `None` means it ended.
    pub(super) async fn handle_remote_update(&mut self, thread_id: &str, update: Option<Value>) {
        let Some(value) = update else {
            debug!("Subscription for {} ended", thread_id);
            self.subscription = None;
            return;
        };
        let page: MessagePage = match serde_json::from_value(value) {
            Ok(page) => page,
            Err(err) => {
                warn!("Ignoring malformed update for {}: {}", thread_id, err);
                return;
            }
        };
        if page.messages.iter().any(|m| m.thread_id != thread_id) {
            debug!("Ignoring update with messages outside {}", thread_id);
            return;
        }
        let messages = page.messages.clone();
        if self
            .viewports
            .sync_messages(thread_id, page.messages)
            .await
            .is_some()
        {
            self.mirror_window(thread_id);
            self.dispatch(Action::RemoteSynced {
                thread_id: thread_id.to_string(),
                messages,
            });
        }
        self.drain().await;
    }
}
