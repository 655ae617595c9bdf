//! Unified error handling for the sync engine.
//!
//! This module provides:
//!
//! - **Error Categories**: the handling strategy for each failure class
//! - **Component Errors**: remote store, local cache, tab transport and
//!   provider stream errors
//! - **Unified Error Type**: `SyncError` consolidates all of them
//! - **Error Context**: action, thread and operation attached for logging
//! - **Result Type Alias**: `SyncResult<T>`
//!
//! # Error Categories
//!
//! | Category | Source | Handling |
//! |----------|--------|----------|
//! | Transient | network, timeout, 5xx, rate limit | retry with backoff, counted by the breaker |
//! | Rejected | validation, conflict, not found | surface immediately, mark entity failed |
//! | LocalCache | persistent cache I/O | log and degrade to remote |
//! | CrossTab | malformed or closed transport | drop silently |
//! | CircuitOpen | breaker fast-fail | defer until the cool-down ends |
//! | Client | unknown ids, invalid actions | return to the caller |
//!
//! Reducers never produce errors; only action handlers do.

mod broadcast;
mod cache;
mod category;
mod context;
mod remote;
mod result;
mod stream;
mod sync_error;

pub use broadcast::BroadcastError;
pub use cache::CacheError;
pub use category::ErrorCategory;
pub use context::ErrorContext;
pub use remote::RemoteError;
pub use result::{ResultExt, SyncResult};
pub use stream::StreamError;
pub use sync_error::SyncError;

#[cfg(test)]
mod integration_tests {
    use super::*;

    #[test]
    fn test_error_unification() {
        let errors: Vec<SyncError> = vec![
            RemoteError::Timeout {
                operation: "mutate".into(),
                elapsed_ms: 5000,
            }
            .into(),
            RemoteError::rejected("conflict", "stale version").into(),
            CacheError::Serialization("eof".into()).into(),
            BroadcastError::Closed.into(),
            RemoteError::CircuitOpen { retry_in_ms: 100 }.into(),
            SyncError::invalid("no active conversation"),
        ];

        let categories: Vec<ErrorCategory> = errors.iter().map(SyncError::category).collect();
        assert_eq!(
            categories,
            vec![
                ErrorCategory::Transient,
                ErrorCategory::Rejected,
                ErrorCategory::LocalCache,
                ErrorCategory::CrossTab,
                ErrorCategory::CircuitOpen,
                ErrorCategory::Client,
            ]
        );

        for err in &errors {
            assert!(!err.user_message().is_empty());
            assert!(err.error_code().starts_with("E_"));
        }
    }
}
