//! Remote store wrapper that routes every call through a circuit breaker.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::Instant;

use super::lock;
use crate::circuit_breaker::{CircuitBreaker, CircuitState};
use crate::error::RemoteError;
use crate::traits::{RemoteStore, UpdateStream};

/// While the breaker is open, calls fail fast with
/// [`RemoteError::CircuitOpen`] without reaching the inner store.
///
/// The breaker lock is never held across the inner call.
pub struct CircuitBreakerStore {
    inner: Arc<dyn RemoteStore>,
    breaker: Arc<Mutex<CircuitBreaker>>,
}

impl CircuitBreakerStore {
    pub fn new(inner: Arc<dyn RemoteStore>, breaker: CircuitBreaker) -> Self {
        Self::shared(inner, Arc::new(Mutex::new(breaker)))
    }

    /// Share one breaker between several wrappers.
    pub fn shared(inner: Arc<dyn RemoteStore>, breaker: Arc<Mutex<CircuitBreaker>>) -> Self {
        Self { inner, breaker }
    }

    pub fn breaker(&self) -> Arc<Mutex<CircuitBreaker>> {
        self.breaker.clone()
    }

    pub fn state(&self) -> CircuitState {
        lock(&self.breaker).state()
    }

    fn acquire(&self) -> Result<(), RemoteError> {
        lock(&self.breaker)
            .try_acquire()
            .map_err(|remaining| RemoteError::CircuitOpen {
                retry_in_ms: remaining.as_millis() as u64,
            })
    }

    fn record<T>(&self, result: &Result<T, RemoteError>) {
        lock(&self.breaker).record_result(result, Instant::now());
    }
}

#[async_trait]
impl RemoteStore for CircuitBreakerStore {
    async fn query(&self, name: &str, args: Value) -> Result<Value, RemoteError> {
        self.acquire()?;
        let result = self.inner.query(name, args).await;
        self.record(&result);
        result
    }

    async fn mutate(&self, name: &str, args: Value) -> Result<Value, RemoteError> {
        self.acquire()?;
        let result = self.inner.mutate(name, args).await;
        self.record(&result);
        result
    }

    async fn subscribe(&self, name: &str, args: Value) -> Result<UpdateStream, RemoteError> {
        self.acquire()?;
        let result = self.inner.subscribe(name, args).await;
        self.record(&result);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::mock::MockRemoteStore;
    use crate::api;
    use crate::config::BreakerConfig;
    use serde_json::json;
    use std::time::Duration;

    fn guarded(store: Arc<MockRemoteStore>, cool_down: Duration) -> CircuitBreakerStore {
        CircuitBreakerStore::new(
            store,
            CircuitBreaker::new(BreakerConfig {
                failure_threshold: 3,
                cool_down,
            }),
        )
    }

    #[tokio::test]
    async fn test_opens_after_threshold_and_fails_fast() {
        let store = Arc::new(MockRemoteStore::new());
        store.set_offline(true);
        let guarded = guarded(store.clone(), Duration::from_secs(30));

        for _ in 0..3 {
            let err = guarded.query(api::THREADS_LIST, json!({})).await.unwrap_err();
            assert!(err.is_transient());
        }
        assert_eq!(guarded.state(), CircuitState::Open);

        let err = guarded.query(api::THREADS_LIST, json!({})).await.unwrap_err();
        assert!(err.is_circuit_open());
        assert_eq!(store.query_count(), 3);
    }

    #[tokio::test]
    async fn test_half_open_trial_closes_on_success() {
        let store = Arc::new(MockRemoteStore::new());
        store.set_offline(true);
        let guarded = guarded(store.clone(), Duration::from_millis(20));
        for _ in 0..3 {
            let _ = guarded.query(api::THREADS_LIST, json!({})).await;
        }
        assert_eq!(guarded.state(), CircuitState::Open);

        store.set_offline(false);
        tokio::time::sleep(Duration::from_millis(30)).await;
        guarded.query(api::THREADS_LIST, json!({})).await.unwrap();
        assert_eq!(guarded.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_rejections_do_not_trip() {
        let store = Arc::new(MockRemoteStore::new());
        let guarded = guarded(store, Duration::from_secs(30));
        for _ in 0..5 {
            let err = guarded.mutate("nope", json!({})).await.unwrap_err();
            assert!(!err.is_transient());
        }
        assert_eq!(guarded.state(), CircuitState::Closed);
    }
}
