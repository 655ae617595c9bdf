//! chatsync - client-side sync and caching engine for multi-tab AI chat clients
//!
//! One [`SyncEngine`] runs per open tab. It applies every user action
//! optimistically, queues the remote mutation behind it, keeps a bounded
//! window of each conversation in memory and in a local cache, streams
//! assistant responses from an LLM provider, and keeps sibling tabs of the
//! same origin consistent through an in-origin broadcast channel with a
//! heartbeat-elected leader.
//!
//! All external systems are traits in [`traits`]; ready-made adapters and
//! test doubles live in [`adapters`].

pub mod adapters;
pub mod api;
pub mod broadcast;
pub mod circuit_breaker;
pub mod config;
pub mod engine;
pub mod error;
pub mod models;
pub mod network;
pub mod queue;
pub mod stream_buffer;
pub mod traits;
pub mod viewport;

pub use config::SyncConfig;
pub use engine::{Collaborators, SyncEngine};
pub use error::{SyncError, SyncResult};
