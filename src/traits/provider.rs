//! LLM provider trait abstraction.

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::StreamError;
use crate::models::{Message, TokenUsage};

/// Input for one assistant response.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub thread_id: String,
    pub provider: Option<String>,
    pub model: Option<String>,
    /// Conversation context, oldest first.
    pub messages: Vec<Message>,
}

/// One item of a provider stream. `Done` and `Error` are terminal.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenEvent {
    Delta(String),
    Done { usage: Option<TokenUsage> },
    Error(StreamError),
}

pub type TokenStream = BoxStream<'static, TokenEvent>;

/// Opaque async token source. A stream that ends without `Done` or `Error`
/// is treated as interrupted.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn stream(&self, request: CompletionRequest) -> Result<TokenStream, StreamError>;
}
