//! Where an error happened.
//!
//! Attached to a [`SyncError`](super::SyncError) at the engine or viewport
//! boundary so one failing queued operation can be followed through its
//! retries in the logs.

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq)]
pub struct ErrorContext {
    /// Engine entry point or internal step, e.g. "send_message" or "dispatch".
    pub action: String,
    /// Subsystem that raised it: "engine", "queue", "viewport".
    pub component: Option<String>,
    pub thread_id: Option<String>,
    pub operation_id: Option<String>,
    /// Attempts already spent on the operation.
    pub attempt: u32,
    pub at: DateTime<Utc>,
}

impl ErrorContext {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            component: None,
            thread_id: None,
            operation_id: None,
            attempt: 0,
            at: Utc::now(),
        }
    }

    pub fn with_component(self, component: impl Into<String>) -> Self {
        Self {
            component: Some(component.into()),
            ..self
        }
    }

    pub fn with_thread_id(self, thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: Some(thread_id.into()),
            ..self
        }
    }

    pub fn with_operation_id(self, operation_id: impl Into<String>) -> Self {
        Self {
            operation_id: Some(operation_id.into()),
            ..self
        }
    }

    pub fn with_retry_count(self, attempt: u32) -> Self {
        Self { attempt, ..self }
    }

    fn fields(&self) -> impl Iterator<Item = (&'static str, String)> + '_ {
        let attempt = (self.attempt > 0).then(|| self.attempt.to_string());
        [
            ("component", self.component.clone()),
            ("thread_id", self.thread_id.clone()),
            ("operation_id", self.operation_id.clone()),
            ("retry_count", attempt),
        ]
        .into_iter()
        .filter_map(|(key, value)| value.map(|v| (key, v)))
    }

    /// `key=value` pairs for a single log line.
    pub fn to_log_string(&self) -> String {
        std::iter::once(("operation", self.action.clone()))
            .chain(self.fields())
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl std::fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}", self.action)?;
        if let Some(thread) = &self.thread_id {
            write!(f, " thread={thread}")?;
        }
        if self.attempt > 0 {
            write!(f, " retry={}", self.attempt)?;
        }
        f.write_str("]")
    }
}
