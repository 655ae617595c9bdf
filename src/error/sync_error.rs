//! Unified error type for the sync engine.

use std::fmt;

use super::broadcast::BroadcastError;
use super::cache::CacheError;
use super::category::ErrorCategory;
use super::context::ErrorContext;
use super::remote::RemoteError;
use super::stream::StreamError;

/// Every failure the engine can report, with category-driven handling.
#[derive(Debug)]
pub enum SyncError {
    Remote(RemoteError),

    Cache(CacheError),

    Broadcast(BroadcastError),

    Stream(StreamError),

    /// An action referenced a thread, message or operation that does not exist.
    UnknownEntity { kind: &'static str, id: String },

    /// The action is not valid in the current state.
    InvalidAction { message: String },

    /// Wrapped error with additional context.
    WithContext {
        error: Box<SyncError>,
        context: ErrorContext,
    },
}

impl SyncError {
    pub fn unknown(kind: &'static str, id: impl Into<String>) -> Self {
        SyncError::UnknownEntity { kind, id: id.into() }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        SyncError::InvalidAction {
            message: message.into(),
        }
    }

    /// Get the category of this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            SyncError::Remote(err) if err.is_circuit_open() => ErrorCategory::CircuitOpen,
            SyncError::Remote(err) if err.is_transient() => ErrorCategory::Transient,
            SyncError::Remote(_) => ErrorCategory::Rejected,
            SyncError::Cache(_) => ErrorCategory::LocalCache,
            SyncError::Broadcast(_) => ErrorCategory::CrossTab,
            SyncError::Stream(StreamError::Cancelled) => ErrorCategory::Client,
            SyncError::Stream(_) => ErrorCategory::Transient,
            SyncError::UnknownEntity { .. } | SyncError::InvalidAction { .. } => {
                ErrorCategory::Client
            }
            SyncError::WithContext { error, .. } => error.category(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }

    /// Get a user-friendly error message.
    pub fn user_message(&self) -> String {
        match self {
            SyncError::Remote(err) => err.user_message(),
            SyncError::Cache(_) => ErrorCategory::LocalCache.description().to_string(),
            SyncError::Broadcast(_) => ErrorCategory::CrossTab.description().to_string(),
            SyncError::Stream(err) => err.user_message(),
            SyncError::UnknownEntity { kind, .. } => format!("That {} no longer exists.", kind),
            SyncError::InvalidAction { message } => message.clone(),
            SyncError::WithContext { error, .. } => error.user_message(),
        }
    }

    /// Get a short error code for logging.
    pub fn error_code(&self) -> &'static str {
        match self {
            SyncError::Remote(err) => err.error_code(),
            SyncError::Cache(err) => err.error_code(),
            SyncError::Broadcast(err) => err.error_code(),
            SyncError::Stream(err) => err.error_code(),
            SyncError::UnknownEntity { .. } => "E_UNKNOWN_ENTITY",
            SyncError::InvalidAction { .. } => "E_INVALID_ACTION",
            SyncError::WithContext { error, .. } => error.error_code(),
        }
    }

    pub fn recovery_hint(&self) -> &'static str {
        self.category().recovery_hint()
    }

    /// Attach context to this error.
    pub fn with_context(self, ctx: ErrorContext) -> Self {
        SyncError::WithContext {
            error: Box::new(self),
            context: ctx,
        }
    }

    /// Get the context if this error has one attached.
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            SyncError::WithContext { context, .. } => Some(context),
            _ => None,
        }
    }

    /// The remote error underneath any context wrappers.
    pub fn as_remote(&self) -> Option<&RemoteError> {
        match self {
            SyncError::Remote(err) => Some(err),
            SyncError::WithContext { error, .. } => error.as_remote(),
            _ => None,
        }
    }
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncError::Remote(err) => write!(f, "Remote store: {}", err),
            SyncError::Cache(err) => write!(f, "Local cache: {}", err),
            SyncError::Broadcast(err) => write!(f, "Tab transport: {}", err),
            SyncError::Stream(err) => write!(f, "{}", err),
            SyncError::UnknownEntity { kind, id } => write!(f, "Unknown {} '{}'", kind, id),
            SyncError::InvalidAction { message } => write!(f, "Invalid action: {}", message),
            SyncError::WithContext { error, context } => write!(f, "{} {}", context, error),
        }
    }
}

impl std::error::Error for SyncError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SyncError::Remote(err) => Some(err),
            SyncError::Cache(err) => Some(err),
            SyncError::Broadcast(err) => Some(err),
            SyncError::Stream(err) => Some(err),
            SyncError::WithContext { error, .. } => Some(error.as_ref()),
            _ => None,
        }
    }
}

impl From<RemoteError> for SyncError {
    fn from(err: RemoteError) -> Self {
        SyncError::Remote(err)
    }
}

impl From<CacheError> for SyncError {
    fn from(err: CacheError) -> Self {
        SyncError::Cache(err)
    }
}

impl From<BroadcastError> for SyncError {
    fn from(err: BroadcastError) -> Self {
        SyncError::Broadcast(err)
    }
}

impl From<StreamError> for SyncError {
    fn from(err: StreamError) -> Self {
        SyncError::Stream(err)
    }
}
