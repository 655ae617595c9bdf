//! Token provider replaying canned streams.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::StreamExt;

use crate::adapters::lock;
use crate::error::StreamError;
use crate::models::TokenUsage;
use crate::traits::{CompletionRequest, TokenEvent, TokenProvider, TokenStream};

#[derive(Debug, Clone)]
enum Script {
    Events { events: Vec<TokenEvent>, hold_open: bool },
    Refuse(StreamError),
}

/// Each call to `stream` consumes the next queued script. With no script
/// queued, the provider answers with a short default reply.
///
/// # Example
///
/// ```ignore
/// let provider = ScriptedProvider::new();
/// provider.push_reply(&["Hel", "lo"]);
/// provider.push_events(vec![TokenEvent::Delta("par".into())], true); // never finishes
/// ```
#[derive(Debug, Clone, Default)]
pub struct ScriptedProvider {
    scripts: Arc<Mutex<VecDeque<Script>>>,
    requests: Arc<Mutex<Vec<CompletionRequest>>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful reply made of `chunks`.
    pub fn push_reply(&self, chunks: &[&str]) {
        let output_tokens = chunks.len() as u32;
        let mut events: Vec<TokenEvent> = chunks.iter().map(|c| TokenEvent::Delta(c.to_string())).collect();
        events.push(TokenEvent::Done {
            usage: Some(TokenUsage {
                input_tokens: 1,
                output_tokens,
            }),
        });
        self.push_events(events, false);
    }

    /// Queue raw events. With `hold_open` the stream stays pending after
    /// the last event instead of ending.
    pub fn push_events(&self, events: Vec<TokenEvent>, hold_open: bool) {
        lock(&self.scripts).push_back(Script::Events { events, hold_open });
    }

    /// Make the next `stream` call fail before producing anything.
    pub fn push_refusal(&self, err: StreamError) {
        lock(&self.scripts).push_back(Script::Refuse(err));
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        lock(&self.requests).clone()
    }
}

#[async_trait]
impl TokenProvider for ScriptedProvider {
    async fn stream(&self, request: CompletionRequest) -> Result<TokenStream, StreamError> {
        lock(&self.requests).push(request);
        let script = lock(&self.scripts).pop_front().unwrap_or_else(|| Script::Events {
            events: vec![
                TokenEvent::Delta("ok".into()),
                TokenEvent::Done { usage: None },
            ],
            hold_open: false,
        });
        match script {
            Script::Refuse(err) => Err(err),
            Script::Events { events, hold_open } => {
                let replay = futures::stream::iter(events);
                if hold_open {
                    Ok(replay.chain(futures::stream::pending()).boxed())
                } else {
                    Ok(replay.boxed())
                }
            }
        }
    }
}
