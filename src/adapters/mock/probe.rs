//! Latency probe returning a fixed result.

use std::time::Duration;

use async_trait::async_trait;

use crate::traits::{LatencyProbe, ProbeError};

#[derive(Debug, Clone)]
pub struct FixedLatencyProbe {
    result: Result<Duration, ProbeError>,
}

impl FixedLatencyProbe {
    pub fn new(rtt: Duration) -> Self {
        Self { result: Ok(rtt) }
    }

    pub fn failing() -> Self {
        Self {
            result: Err(ProbeError::Unreachable("mock probe".into())),
        }
    }
}

#[async_trait]
impl LatencyProbe for FixedLatencyProbe {
    async fn probe(&self) -> Result<Duration, ProbeError> {
        self.result.clone()
    }
}
