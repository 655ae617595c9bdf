//! What the engine does with a failure.
//!
//! Every error maps to exactly one category, and every category to one
//! handling strategy in the queue and the viewport cache.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Network failures, timeouts, 5xx and rate limits.
    /// Retried with backoff and counted by the circuit breaker.
    Transient,

    /// The remote store refused the mutation (validation, conflict, not found).
    /// Never retried automatically; the entity is marked failed.
    Rejected,

    /// Local persistent cache failures.
    /// Logged and degraded to the remote store; never fails a user action.
    LocalCache,

    /// Cross-tab delivery problems (malformed or closed transport).
    /// Dropped silently.
    CrossTab,

    /// The circuit breaker refused the call without touching the network.
    CircuitOpen,

    /// Invalid use of the engine (unknown ids, actions on the wrong state).
    Client,
}

impl ErrorCategory {
    /// The queue keeps the operation pending instead of failing it.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorCategory::Transient | ErrorCategory::CircuitOpen)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Transient => "transient",
            ErrorCategory::Rejected => "rejected",
            ErrorCategory::LocalCache => "local_cache",
            ErrorCategory::CrossTab => "cross_tab",
            ErrorCategory::CircuitOpen => "circuit_open",
            ErrorCategory::Client => "client",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ErrorCategory::Transient => "Temporary connectivity problem",
            ErrorCategory::Rejected => "Change rejected by the server",
            ErrorCategory::LocalCache => "Local cache unavailable",
            ErrorCategory::CrossTab => "Tab synchronization problem",
            ErrorCategory::CircuitOpen => "Server temporarily paused",
            ErrorCategory::Client => "Application error",
        }
    }

    /// Next step offered next to the error in the state.
    pub fn recovery_hint(&self) -> &'static str {
        match self {
            ErrorCategory::Transient => "Your change is queued and will be retried automatically",
            ErrorCategory::Rejected => "Edit the message and retry, or discard the change",
            ErrorCategory::LocalCache => "Data will be loaded from the server instead",
            ErrorCategory::CrossTab => "Other tabs will catch up on their next refresh",
            ErrorCategory::CircuitOpen => {
                "Requests are paused after repeated failures and resume shortly"
            }
            ErrorCategory::Client => "This may be a bug. Please report this issue if it persists",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_retryable() {
        assert!(ErrorCategory::Transient.is_retryable());
        assert!(ErrorCategory::CircuitOpen.is_retryable());
        assert!(!ErrorCategory::Rejected.is_retryable());
        assert!(!ErrorCategory::LocalCache.is_retryable());
        assert!(!ErrorCategory::CrossTab.is_retryable());
        assert!(!ErrorCategory::Client.is_retryable());
    }

    #[test]
    fn test_category_display() {
        assert_eq!(ErrorCategory::CircuitOpen.to_string(), "circuit_open");
        assert_eq!(format!("{}", ErrorCategory::LocalCache), "local_cache");
    }
}
