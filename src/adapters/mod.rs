//! Concrete implementations of the collaborator traits.
//!
//! # Adapters
//!
//! - [`InMemoryStore`] - reactive remote store held in process, idempotent by `client_id`
//! - [`CircuitBreakerStore`] - wraps any store behind a shared circuit breaker
//! - [`MemoryCache`] / [`FileCache`] - local persistent caches
//! - [`TabHub`] - channel-based tab transport plus a shared [`MemoryHeartbeatBoard`]
//! - [`HttpLatencyProbe`] - round-trip probe using reqwest
//!
//! # Mock Implementations
//!
//! The [`mock`] submodule provides test doubles:
//! - [`mock::MockRemoteStore`] - scripted failures, offline switch, call counts
//! - [`mock::ScriptedProvider`] - replays token scripts
//! - [`mock::FailingCache`] - every cache call fails
//! - [`mock::FixedLatencyProbe`] - constant probe result

pub mod file_cache;
pub mod guarded_store;
pub mod http_probe;
pub mod memory_cache;
pub mod memory_store;
pub mod mock;
pub mod tab_hub;

pub use file_cache::FileCache;
pub use guarded_store::CircuitBreakerStore;
pub use http_probe::HttpLatencyProbe;
pub use memory_cache::MemoryCache;
pub use memory_store::InMemoryStore;
pub use tab_hub::{HubTransport, MemoryHeartbeatBoard, TabHub};

use std::sync::{Mutex, MutexGuard};

/// Lock a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
