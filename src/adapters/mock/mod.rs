//! Mock implementations for testing.
//!
//! These doubles implement the collaborator traits without network or disk
//! access, and let tests script failures and inspect calls.
//!
//! # Available Mocks
//!
//! - [`MockRemoteStore`] - in-memory store with scripted failures and call counts
//! - [`ScriptedProvider`] - token provider replaying canned streams
//! - [`FailingCache`] - local cache whose every call errors
//! - [`FixedLatencyProbe`] - probe returning a fixed result

pub mod cache;
pub mod probe;
pub mod provider;
pub mod store;

pub use cache::FailingCache;
pub use probe::FixedLatencyProbe;
pub use provider::ScriptedProvider;
pub use store::{MockRemoteStore, RecordedCall};
