//! Cross-tab transport errors.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BroadcastError {
    #[error("malformed envelope: {0}")]
    Malformed(String),

    #[error("tab transport closed")]
    Closed,

    #[error("failed to publish envelope: {0}")]
    SendFailed(String),
}

impl BroadcastError {
    pub fn error_code(&self) -> &'static str {
        match self {
            BroadcastError::Malformed(_) => "E_TAB_MALFORMED",
            BroadcastError::Closed => "E_TAB_CLOSED",
            BroadcastError::SendFailed(_) => "E_TAB_SEND",
        }
    }
}

impl From<serde_json::Error> for BroadcastError {
    fn from(err: serde_json::Error) -> Self {
        BroadcastError::Malformed(err.to_string())
    }
}
