//! Remote store trait abstraction.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;

use crate::error::RemoteError;

/// Push updates from a live query; each item is the query's latest result.
pub type UpdateStream = BoxStream<'static, Value>;

/// The authoritative reactive database.
///
/// Function names and argument shapes are defined in [`crate::api`].
/// Every mutation carries a `client_id` idempotency token, so replaying one
/// after an ambiguous failure must not create duplicates.
///
/// # Example
///
/// ```ignore
/// use chatsync::traits::RemoteStore;
///
/// async fn titles(store: &dyn RemoteStore) -> Result<Vec<String>, RemoteError> {
///     let value = store.query("threads:list", json!({})).await?;
///     let threads: Vec<Thread> = serde_json::from_value(value)?;
///     Ok(threads.into_iter().map(|t| t.title).collect())
/// }
/// ```
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Run a read-only query.
    async fn query(&self, name: &str, args: Value) -> Result<Value, RemoteError>;

    /// Run a mutation and return its result document.
    async fn mutate(&self, name: &str, args: Value) -> Result<Value, RemoteError>;

    /// Open a live query. The stream yields the query result whenever it changes
    /// and ends when the subscription is dropped by the store.
    async fn subscribe(&self, name: &str, args: Value) -> Result<UpdateStream, RemoteError>;
}
