//! Engine configuration.
//!
//! Every threshold the sync components use lives here with a default value.
//! Use the builder setters to customize, or [`SyncConfig::from_env`] to read
//! overrides from `CHATSYNC_*` environment variables.
//!
//! ```ignore
//! use chatsync::config::SyncConfig;
//!
//! let config = SyncConfig::from_env().with_window_size(200);
//! ```

use std::time::Duration;

use tracing::warn;

/// Thresholds for batching streamed tokens into UI updates.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamBufferConfig {
    /// Characters that must accumulate before a regular flush.
    pub min_chars: usize,
    /// Minimum time between regular flushes.
    pub min_interval: Duration,
    /// Buffered text older than this is flushed regardless of size.
    pub max_wait: Duration,
}

impl Default for StreamBufferConfig {
    fn default() -> Self {
        Self {
            min_chars: 5,
            min_interval: Duration::from_millis(50),
            max_wait: Duration::from_millis(150),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// Time after the last failure before a trial call is allowed.
    pub cool_down: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cool_down: Duration::from_secs(30),
        }
    }
}

/// Exponential backoff for pending operation retries.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Attempts after the first before an operation is marked failed.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Fraction of the delay randomized, 0.0 to 1.0.
    pub jitter_ratio: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter_ratio: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ViewportConfig {
    /// Maximum messages held in one conversation window.
    pub window_size: usize,
    /// Messages fetched per pagination request.
    pub page_size: usize,
    /// Conversation windows kept in memory at once.
    pub max_cached_threads: usize,
}

impl Default for ViewportConfig {
    fn default() -> Self {
        Self {
            window_size: 100,
            page_size: 50,
            max_cached_threads: 8,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LeaderConfig {
    pub heartbeat_interval: Duration,
    /// A heartbeat older than this is treated as a dead tab.
    pub staleness: Duration,
    /// How often the leader re-fetches the thread list.
    pub reconcile_interval: Duration,
}

impl Default for LeaderConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(1),
            staleness: Duration::from_secs(3),
            reconcile_interval: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NetworkConfig {
    /// Round-trips below this are excellent.
    pub excellent_below: Duration,
    /// Round-trips below this are good; anything slower is poor.
    pub good_below: Duration,
    pub probe_interval: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            excellent_below: Duration::from_millis(100),
            good_below: Duration::from_millis(400),
            probe_interval: Duration::from_secs(15),
        }
    }
}

/// Aggregate configuration handed to the engine and its collaborators.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncConfig {
    pub stream: StreamBufferConfig,
    pub breaker: BreakerConfig,
    pub retry: RetryPolicy,
    pub viewport: ViewportConfig,
    pub leader: LeaderConfig,
    pub network: NetworkConfig,
    /// Provider used when a conversation does not name one.
    pub default_provider: Option<String>,
}

impl SyncConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stream(mut self, stream: StreamBufferConfig) -> Self {
        self.stream = stream;
        self
    }

    pub fn with_breaker(mut self, breaker: BreakerConfig) -> Self {
        self.breaker = breaker;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_viewport(mut self, viewport: ViewportConfig) -> Self {
        self.viewport = viewport;
        self
    }

    pub fn with_leader(mut self, leader: LeaderConfig) -> Self {
        self.leader = leader;
        self
    }

    pub fn with_network(mut self, network: NetworkConfig) -> Self {
        self.network = network;
        self
    }

    pub fn with_window_size(mut self, size: usize) -> Self {
        self.viewport.window_size = size;
        self
    }

    pub fn with_page_size(mut self, size: usize) -> Self {
        self.viewport.page_size = size;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.retry.max_retries = max_retries;
        self
    }

    pub fn with_default_provider(mut self, provider: impl Into<String>) -> Self {
        self.default_provider = Some(provider.into());
        self
    }

    /// Defaults overridden by `CHATSYNC_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each known key.
    ///
    /// Unparseable values are logged and ignored.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = parse_var::<usize, _>(&lookup, "CHATSYNC_WINDOW_SIZE") {
            config.viewport.window_size = v.max(1);
        }
        if let Some(v) = parse_var::<usize, _>(&lookup, "CHATSYNC_PAGE_SIZE") {
            config.viewport.page_size = v.max(1);
        }
        if let Some(v) = parse_var::<u32, _>(&lookup, "CHATSYNC_MAX_RETRIES") {
            config.retry.max_retries = v;
        }
        if let Some(v) = parse_var::<u64, _>(&lookup, "CHATSYNC_RETRY_BASE_MS") {
            config.retry.base_delay = Duration::from_millis(v);
        }
        if let Some(v) = parse_var::<u32, _>(&lookup, "CHATSYNC_BREAKER_THRESHOLD") {
            config.breaker.failure_threshold = v.max(1);
        }
        if let Some(v) = parse_var::<u64, _>(&lookup, "CHATSYNC_BREAKER_COOLDOWN_MS") {
            config.breaker.cool_down = Duration::from_millis(v);
        }
        if let Some(v) = parse_var::<u64, _>(&lookup, "CHATSYNC_HEARTBEAT_MS") {
            config.leader.heartbeat_interval = Duration::from_millis(v);
        }
        if let Some(v) = parse_var::<u64, _>(&lookup, "CHATSYNC_STALENESS_MS") {
            config.leader.staleness = Duration::from_millis(v);
        }
        if let Some(provider) = lookup("CHATSYNC_DEFAULT_PROVIDER") {
            config.default_provider = Some(provider);
        }

        config
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring invalid value for {}: {:?}", key, raw);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.breaker.failure_threshold, 3);
        assert_eq!(config.breaker.cool_down, Duration::from_secs(30));
        assert_eq!(config.viewport.window_size, 100);
        assert_eq!(config.retry.max_retries, 5);
        assert!(config.leader.staleness > config.leader.heartbeat_interval);
    }

    #[test]
    fn test_from_lookup_overrides() {
        let vars: HashMap<&str, &str> = [
            ("CHATSYNC_WINDOW_SIZE", "40"),
            ("CHATSYNC_MAX_RETRIES", "2"),
            ("CHATSYNC_BREAKER_COOLDOWN_MS", "1500"),
            ("CHATSYNC_STALENESS_MS", " 900 "),
            ("CHATSYNC_DEFAULT_PROVIDER", "anthropic"),
        ]
        .into_iter()
        .collect();

        let config = SyncConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(config.viewport.window_size, 40);
        assert_eq!(config.retry.max_retries, 2);
        assert_eq!(config.breaker.cool_down, Duration::from_millis(1500));
        assert_eq!(config.leader.staleness, Duration::from_millis(900));
        assert_eq!(config.default_provider.as_deref(), Some("anthropic"));
        assert_eq!(config.viewport.page_size, 50);
    }

    #[test]
    fn test_invalid_values_are_ignored() {
        let config = SyncConfig::from_lookup(|k| match k {
            "CHATSYNC_WINDOW_SIZE" => Some("lots".to_string()),
            "CHATSYNC_BREAKER_THRESHOLD" => Some("0".to_string()),
            _ => None,
        });
        assert_eq!(config.viewport.window_size, 100);
        assert_eq!(config.breaker.failure_threshold, 1);
    }

    #[test]
    fn test_builder_setters() {
        let config = SyncConfig::new()
            .with_window_size(10)
            .with_page_size(5)
            .with_max_retries(1)
            .with_default_provider("openai");
        assert_eq!(config.viewport.window_size, 10);
        assert_eq!(config.viewport.page_size, 5);
        assert_eq!(config.retry.max_retries, 1);
        assert_eq!(config.default_provider.as_deref(), Some("openai"));
    }
}
