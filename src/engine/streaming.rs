//! Consuming provider token streams into assistant messages.
//!
//! Tokens go through a [`StreamBuffer`] per message, so the window and the
//! sibling tabs see a bounded number of updates no matter how fast the
//! provider emits. The message stays in memory until the stream ends; only
//! the final content is persisted and sent to the store.

use futures::future::AbortHandle;
use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use super::{Action, ActiveStream, StreamItem, SyncEngine};
use crate::error::{StreamError, SyncError, SyncResult};
use crate::models::{ErrorInfo, OperationKind, PendingOperation, TokenUsage};
use crate::stream_buffer::StreamBuffer;
use crate::traits::{CompletionRequest, TokenEvent};

impl SyncEngine {
    pub(super) async fn start_stream(&mut self, thread_id: &str, message_id: &str) {
        let thread_id = self.state.queue.resolve(thread_id).to_string();
        let (provider, model) = match self.state.thread(&thread_id) {
            Some(thread) => (
                thread.provider.clone().or_else(|| self.config.default_provider.clone()),
                thread.model.clone(),
            ),
            None => (self.config.default_provider.clone(), None),
        };
        let context = self
            .viewports
            .peek(&thread_id)
            .map(|v| {
                v.messages()
                    .iter()
                    .filter(|m| m.id != message_id && !m.is_streaming)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        let request = CompletionRequest {
            thread_id: thread_id.clone(),
            provider,
            model,
            messages: context,
        };

        match self.provider.stream(request).await {
            Ok(tokens) => {
                let (tokens, abort) = stream::abortable(tokens);
                self.streams.insert(
                    message_id.to_string(),
                    ActiveStream {
                        thread_id,
                        buffer: StreamBuffer::new(self.config.stream.clone()),
                        abort,
                    },
                );
                let id = message_id.to_string();
                let end_id = id.clone();
                let items = tokens
                    .map(move |event| StreamItem {
                        message_id: id.clone(),
                        event: Some(event),
                    })
                    .chain(stream::once(async move {
                        StreamItem {
                            message_id: end_id,
                            event: None,
                        }
                    }));
                self.token_streams.push(items.boxed());
                debug!("Streaming into {}", message_id);
            }
            Err(err) => {
                warn!("Provider refused to stream {}: {}", message_id, err);
                self.streams.insert(
                    message_id.to_string(),
                    ActiveStream {
                        thread_id,
                        buffer: StreamBuffer::new(self.config.stream.clone()),
                        abort: AbortHandle::new_pair().0,
                    },
                );
                self.finish_stream(message_id, Err(err)).await;
            }
        }
    }

    pub(super) async fn handle_token(&mut self, item: StreamItem) {
        let StreamItem { message_id, event } = item;
        let Some(active) = self.streams.get_mut(&message_id) else {
            // finished or cancelled already
            return;
        };
        match event {
            Some(TokenEvent::Delta(text)) => {
                active.buffer.add(&text);
                if active.buffer.should_flush() {
                    self.flush_stream(&message_id).await;
                }
            }
            Some(TokenEvent::Done { usage }) => self.finish_stream(&message_id, Ok(usage)).await,
            Some(TokenEvent::Error(err)) => self.finish_stream(&message_id, Err(err)).await,
            None => {
                self.finish_stream(&message_id, Err(StreamError::Interrupted))
                    .await
            }
        }
    }

    /// Stop a stream; the partial response is kept and saved.
    pub async fn cancel_stream(&mut self, message_id: &str) -> SyncResult<()> {
        if !self.streams.contains_key(message_id) {
            return Err(SyncError::unknown("stream", message_id));
        }
        info!("Cancelling stream {}", message_id);
        self.finish_stream(message_id, Err(StreamError::Cancelled)).await;
        self.drain().await;
        Ok(())
    }

    /// Flush buffers whose idle or rate deadline has passed.
    pub(super) async fn flush_due_streams(&mut self) {
        let due: Vec<String> = self
            .streams
            .iter()
            .filter(|(_, s)| s.buffer.should_flush())
            .map(|(id, _)| id.clone())
            .collect();
        for message_id in due {
            self.flush_stream(&message_id).await;
        }
    }

    async fn flush_stream(&mut self, message_id: &str) {
        let Some(active) = self.streams.get_mut(message_id) else {
            return;
        };
        let text = active.buffer.flush();
        if text.is_empty() {
            return;
        }
        let thread_id = self.state.queue.resolve(&active.thread_id).to_string();
        if let Some(message) = self.viewports.append_stream_text(&thread_id, message_id, &text) {
            self.mirror_window(&thread_id);
            self.dispatch(Action::StreamProgressed { message });
        }
    }

    /// Close a stream: flush what is buffered, finalize the message and
    /// queue its completion. Cancellation keeps the partial text.
    pub(super) async fn finish_stream(
        &mut self,
        message_id: &str,
        outcome: Result<Option<TokenUsage>, StreamError>,
    ) {
        let Some(mut active) = self.streams.remove(message_id) else {
            return;
        };
        active.abort.abort();
        let thread_id = self.state.queue.resolve(&active.thread_id).to_string();
        let rest = active.buffer.force_flush();
        if !rest.is_empty() {
            self.viewports.append_stream_text(&thread_id, message_id, &rest);
        }

        let (usage, failure) = match outcome {
            Ok(usage) => (usage, None),
            Err(StreamError::Cancelled) => (None, None),
            Err(err) => (None, Some(err)),
        };
        let failed = failure.clone();
        let message = self
            .viewports
            .update_message(&thread_id, message_id, move |m| {
                m.finalize(usage);
                if let Some(err) = failed {
                    m.mark_failed(err.user_message());
                }
            })
            .await;
        self.mirror_window(&thread_id);

        let complete = match (&message, &failure) {
            (Some(message), None) => Some(PendingOperation::new(
                thread_id.clone(),
                OperationKind::CompleteMessage {
                    message_id: message_id.to_string(),
                    content: message.content.clone(),
                    usage: message.usage.clone(),
                },
            )),
            _ => None,
        };
        let error = failure.map(|err| {
            warn!("Stream {} ended with error: {}", message_id, err);
            ErrorInfo::new(err.error_code(), err.user_message()).with_thread(thread_id.clone())
        });
        self.dispatch(Action::StreamFinished {
            message_id: message_id.to_string(),
            message,
            complete,
            error,
        });
    }
}
