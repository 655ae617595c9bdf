//! Provider token stream errors.

use thiserror::Error;

/// How a provider token stream ended when it did not complete.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    /// The provider refused to start or reported an error mid-stream.
    #[error("Provider '{provider}' error: {message}")]
    Provider { provider: String, message: String },

    /// The token stream closed without a completion marker.
    #[error("Stream interrupted")]
    Interrupted,

    #[error("Stream cancelled")]
    Cancelled,
}

impl StreamError {
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        StreamError::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Only a local cancel is final; everything else may be regenerated.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, StreamError::Cancelled)
    }

    /// Text shown on the assistant bubble that failed.
    pub fn user_message(&self) -> String {
        match self {
            StreamError::Provider { provider, message } => {
                format!("{provider} stopped answering: {message}")
            }
            StreamError::Interrupted => "The reply was cut off.".into(),
            StreamError::Cancelled => "The reply was stopped.".into(),
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            StreamError::Provider { .. } => "E_STREAM_PROVIDER",
            StreamError::Interrupted => "E_STREAM_INTERRUPTED",
            StreamError::Cancelled => "E_STREAM_CANCELLED",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_error_retryable() {
        assert!(StreamError::provider("openai", "overloaded").is_retryable());
        assert!(StreamError::Interrupted.is_retryable());
        assert!(!StreamError::Cancelled.is_retryable());
    }

    #[test]
    fn test_stream_error_display() {
        let err = StreamError::provider("anthropic", "boom");
        assert_eq!(err.to_string(), "Provider 'anthropic' error: boom");
        assert_eq!(err.error_code(), "E_STREAM_PROVIDER");
    }
}
