//! Errors returned by the remote store and the breaker guarding it.

use thiserror::Error;

/// Failure of a `query`, `mutate` or `subscribe` call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    #[error("network error: {0}")]
    Network(String),

    #[error("{operation} timed out after {elapsed_ms}ms")]
    Timeout { operation: String, elapsed_ms: u64 },

    #[error("server error {status}: {message}")]
    Server { status: u16, message: String },

    #[error("rate limited")]
    RateLimited { retry_after_ms: Option<u64> },

    /// Validation failure, conflict or permission problem.
    #[error("rejected ({code}): {message}")]
    Rejected { code: String, message: String },

    #[error("not found: {0}")]
    NotFound(String),

    /// Fast-fail from the circuit breaker; no request was made.
    #[error("circuit open, retry in {retry_in_ms}ms")]
    CircuitOpen { retry_in_ms: u64 },

    #[error("invalid response: {0}")]
    Decode(String),
}

impl RemoteError {
    /// Classify an HTTP-style status code.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            429 => RemoteError::RateLimited {
                retry_after_ms: None,
            },
            404 => RemoteError::NotFound(message),
            408 => RemoteError::Timeout {
                operation: message,
                elapsed_ms: 0,
            },
            400..=499 => RemoteError::Rejected {
                code: status.to_string(),
                message,
            },
            _ => RemoteError::Server { status, message },
        }
    }

    pub fn rejected(code: impl Into<String>, message: impl Into<String>) -> Self {
        RemoteError::Rejected {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Failures that say something about the backend's health.
    /// Only these count against the circuit breaker.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RemoteError::Network(_)
                | RemoteError::Timeout { .. }
                | RemoteError::Server { .. }
                | RemoteError::RateLimited { .. }
        )
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, RemoteError::CircuitOpen { .. })
    }

    /// Check if this error is likely transient and can be retried.
    pub fn is_retryable(&self) -> bool {
        self.is_transient() || self.is_circuit_open()
    }

    /// Get a short error code for logging.
    pub fn error_code(&self) -> &'static str {
        match self {
            RemoteError::Network(_) => "E_REMOTE_NETWORK",
            RemoteError::Timeout { .. } => "E_REMOTE_TIMEOUT",
            RemoteError::Server { .. } => "E_REMOTE_SERVER",
            RemoteError::RateLimited { .. } => "E_REMOTE_RATE",
            RemoteError::Rejected { .. } => "E_REMOTE_REJECTED",
            RemoteError::NotFound(_) => "E_REMOTE_NOT_FOUND",
            RemoteError::CircuitOpen { .. } => "E_CIRCUIT_OPEN",
            RemoteError::Decode(_) => "E_REMOTE_DECODE",
        }
    }

    /// Get a user-friendly error message.
    pub fn user_message(&self) -> String {
        match self {
            RemoteError::Network(_) | RemoteError::Timeout { .. } => {
                "Could not reach the server. Your change will be retried.".to_string()
            }
            RemoteError::Server { .. } => {
                "The server is experiencing issues. Your change will be retried.".to_string()
            }
            RemoteError::RateLimited { retry_after_ms } => match retry_after_ms {
                Some(ms) => format!(
                    "Too many requests. Retrying in {} seconds.",
                    (ms + 999) / 1000
                ),
                None => "Too many requests. Retrying shortly.".to_string(),
            },
            RemoteError::Rejected { message, .. } => {
                format!("The server rejected this change: {}", message)
            }
            RemoteError::NotFound(what) => format!("{} no longer exists.", what),
            RemoteError::CircuitOpen { .. } => {
                "Requests are paused after repeated failures.".to_string()
            }
            RemoteError::Decode(_) => {
                "Received an invalid response from the server.".to_string()
            }
        }
    }

    /// Delay the server asked for, if any.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            RemoteError::RateLimited { retry_after_ms } => *retry_after_ms,
            RemoteError::CircuitOpen { retry_in_ms } => Some(*retry_in_ms),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for RemoteError {
    fn from(err: serde_json::Error) -> Self {
        RemoteError::Decode(err.to_string())
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RemoteError::Timeout {
                operation: "HTTP request".to_string(),
                elapsed_ms: 0,
            }
        } else if let Some(status) = err.status() {
            RemoteError::from_status(status.as_u16(), err.to_string())
        } else if err.is_decode() {
            RemoteError::Decode(err.to_string())
        } else {
            RemoteError::Network(err.to_string())
        }
    }
}
