//! Trait abstractions for the engine's external collaborators.
//!
//! Every collaborator is constructed by the caller and injected into the
//! engine, so tests can swap in the doubles from [`crate::adapters::mock`].
//!
//! # Traits
//!
//! - [`RemoteStore`] - authoritative reactive store (`query`, `mutate`, `subscribe`)
//! - [`LocalCache`] - persistent per-tab cache of threads, windows, messages and the queue
//! - [`TabTransport`] - same-origin publish/subscribe between tabs
//! - [`HeartbeatBoard`] - shared location for heartbeats and the leader lease
//! - [`TokenProvider`] - LLM provider token stream
//! - [`LatencyProbe`] - round-trip measurement for the network monitor

pub mod heartbeat;
pub mod latency;
pub mod local_cache;
pub mod provider;
pub mod remote_store;
pub mod tab_transport;

pub use heartbeat::{HeartbeatBoard, Lease};
pub use latency::{LatencyProbe, ProbeError};
pub use local_cache::{CachedWindow, LocalCache};
pub use provider::{CompletionRequest, TokenEvent, TokenProvider, TokenStream};
pub use remote_store::{RemoteStore, UpdateStream};
pub use tab_transport::TabTransport;
