//! Latency probe trait abstraction.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeError {
    #[error("probe target unreachable: {0}")]
    Unreachable(String),

    #[error("probe timed out")]
    Timeout,
}

/// Measures one round-trip to the backend.
#[async_trait]
pub trait LatencyProbe: Send + Sync {
    async fn probe(&self) -> Result<Duration, ProbeError>;
}
