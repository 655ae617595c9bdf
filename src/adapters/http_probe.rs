//! Reqwest-based latency probe.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::traits::{LatencyProbe, ProbeError};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Times a `HEAD` request to a health endpoint.
///
/// Any HTTP response counts as reachable; only transport failures are errors.
///
/// # Example
///
/// ```ignore
/// use chatsync::adapters::HttpLatencyProbe;
///
/// let probe = HttpLatencyProbe::new("https://sync.example.com/health");
/// let rtt = probe.probe().await?;
/// ```
#[derive(Debug, Clone)]
pub struct HttpLatencyProbe {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl HttpLatencyProbe {
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), url)
    }

    /// Use a preconfigured client, e.g. one sharing a connection pool.
    pub fn with_client(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn convert_error(err: reqwest::Error) -> ProbeError {
        if err.is_timeout() {
            ProbeError::Timeout
        } else {
            ProbeError::Unreachable(err.to_string())
        }
    }
}

#[async_trait]
impl LatencyProbe for HttpLatencyProbe {
    async fn probe(&self) -> Result<Duration, ProbeError> {
        let started = Instant::now();
        self.client
            .head(&self.url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(Self::convert_error)?;
        Ok(started.elapsed())
    }
}
