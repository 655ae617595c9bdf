// Failure handling of the pending queue: retries, exhaustion, discard.

mod common;

use std::time::Duration;

use chatsync::api;
use chatsync::config::BreakerConfig;
use chatsync::error::RemoteError;
use chatsync::models::{MessageRole, OperationStatus};
use common::{confirmed_conversation, test_config, TestOrigin};

fn network_down() -> RemoteError {
    RemoteError::Network("connection reset".into())
}

#[tokio::test]
async fn test_transient_failures_are_retried_until_success() {
    let origin = TestOrigin::new();
    let mut tab = origin.open_tab("tab-a").await;
    origin.store.push_failures(network_down(), 2);

    let local_id = tab.engine.create_conversation("Flaky").await.unwrap();
    tab.engine.run_until_idle().await;

    assert_eq!(origin.store.mutations_named(api::THREADS_CREATE).len(), 3);
    assert_eq!(origin.store.threads().len(), 1);
    assert!(tab.engine.failed_operations().is_empty());
    assert!(!tab.engine.state().thread(&local_id).unwrap().is_local());
}

#[tokio::test]
async fn test_exhausted_operation_stays_queryable_and_retryable() {
    let origin = TestOrigin::new();
    let mut tab = origin.open_tab("tab-a").await;
    // first attempt plus three retries
    origin.store.push_failures(network_down(), 4);

    let local_id = tab.engine.create_conversation("Stubborn").await.unwrap();
    tab.engine.run_until_idle().await;

    let failed = tab.engine.failed_operations();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].status, OperationStatus::Failed);
    assert_eq!(failed[0].retry_count, 4);
    assert!(failed[0].last_error.is_some());
    let op_id = failed[0].id.clone();
    assert!(tab.engine.state().thread(&local_id).unwrap().status.is_failed());
    assert!(!tab.engine.state().errors.is_empty());
    assert!(origin.store.threads().is_empty());

    // nothing happens on its own
    tab.engine.run_until_idle().await;
    assert_eq!(origin.store.mutations_named(api::THREADS_CREATE).len(), 4);

    tab.engine.retry_operation(&op_id).await.unwrap();
    tab.engine.run_until_idle().await;

    assert!(tab.engine.failed_operations().is_empty());
    assert_eq!(origin.store.threads().len(), 1);
    let thread = tab.engine.state().thread(&local_id).unwrap();
    assert!(thread.status.is_confirmed());
}

#[tokio::test]
async fn test_rejection_fails_without_retrying() {
    let origin = TestOrigin::new();
    let mut tab = origin.open_tab("tab-a").await;
    let thread_id = confirmed_conversation(&mut tab, "Strict").await;
    origin
        .store
        .push_failure(RemoteError::rejected("forbidden", "not your conversation"));

    let message_id = tab.engine.send_message(&thread_id, "hello").await.unwrap();
    tab.engine.run_until_idle().await;

    assert_eq!(origin.store.mutations_named(api::MESSAGES_SEND).len(), 1);
    let failed = tab.engine.failed_operations();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].retry_count, 0);
    let user = tab
        .window()
        .into_iter()
        .find(|m| m.id == message_id)
        .unwrap();
    assert!(user.status.is_failed());
}

#[tokio::test]
async fn test_discarding_failed_create_removes_conversation() {
    let origin = TestOrigin::new();
    let mut tab = origin.open_tab("tab-a").await;
    origin
        .store
        .push_failure(RemoteError::rejected("invalid", "title not allowed"));

    let local_id = tab.engine.create_conversation("Nope").await.unwrap();
    tab.engine.run_until_idle().await;
    let op_id = tab.engine.failed_operations()[0].id.clone();

    tab.engine.discard_operation(&op_id).await.unwrap();
    assert!(tab.engine.state().thread(&local_id).is_none());
    assert_eq!(tab.engine.pending_operation_count(), 0);
    assert!(tab.engine.failed_operations().is_empty());
}

#[tokio::test]
async fn test_discarding_failed_rename_restores_title() {
    let origin = TestOrigin::new();
    let mut tab = origin.open_tab("tab-a").await;
    let thread_id = confirmed_conversation(&mut tab, "Kept").await;
    origin
        .store
        .push_failure(RemoteError::rejected("invalid", "title not allowed"));

    tab.engine.rename_conversation(&thread_id, "Rejected").await.unwrap();
    tab.engine.run_until_idle().await;
    let op_id = tab.engine.failed_operations()[0].id.clone();
    tab.engine.discard_operation(&op_id).await.unwrap();

    assert_eq!(tab.engine.state().thread(&thread_id).unwrap().title, "Kept");
}

#[tokio::test]
async fn test_unknown_operation_is_a_client_error() {
    let origin = TestOrigin::new();
    let mut tab = origin.open_tab("tab-a").await;
    let err = tab.engine.retry_operation("op-missing").await.unwrap_err();
    assert_eq!(err.error_code(), "E_UNKNOWN_ENTITY");
}

#[tokio::test]
async fn test_open_circuit_defers_instead_of_failing() {
    let config = test_config().with_breaker(BreakerConfig {
        failure_threshold: 3,
        cool_down: Duration::from_secs(60),
    });
    let origin = TestOrigin::new().with_config(config);
    let mut tab = origin.open_tab("tab-a").await;
    origin.store.push_failures(network_down(), 3);

    tab.engine.create_conversation("Outage").await.unwrap();
    tab.engine.run_until_idle().await;

    // three real attempts trip the breaker; the rest never reach the store
    assert_eq!(origin.store.mutations_named(api::THREADS_CREATE).len(), 3);
    assert!(tab.engine.failed_operations().is_empty());
    assert_eq!(tab.engine.pending_operation_count(), 1);
    assert_eq!(
        tab.engine.online_status().circuit,
        chatsync::circuit_breaker::CircuitState::Open
    );
}

#[tokio::test]
async fn test_retried_message_keeps_submission_order() {
    let origin = TestOrigin::new();
    let mut tab = origin.open_tab("tab-a").await;
    let thread_id = confirmed_conversation(&mut tab, "Ordered").await;
    origin
        .store
        .push_failure(RemoteError::rejected("invalid", "try again later"));

    tab.engine.send_message(&thread_id, "first").await.unwrap();
    tab.engine.run_until_idle().await;
    tab.engine.send_message(&thread_id, "second").await.unwrap();
    tab.engine.run_until_idle().await;

    // nothing of the conversation reaches the store past the failed send
    assert_eq!(origin.store.mutations_named(api::MESSAGES_SEND).len(), 1);
    assert!(origin.store.messages(&thread_id).is_empty());

    let op_id = tab.engine.failed_operations()[0].id.clone();
    tab.engine.retry_operation(&op_id).await.unwrap();
    tab.engine.run_until_idle().await;

    let users: Vec<_> = origin
        .store
        .messages(&thread_id)
        .into_iter()
        .filter(|m| m.role == MessageRole::User)
        .map(|m| m.content)
        .collect();
    assert_eq!(users, vec!["first", "second"]);
    assert_eq!(tab.engine.pending_operation_count(), 0);
}
