//! Durable queue of not-yet-confirmed mutations.
//!
//! The queue is plain data: the engine decides when to dispatch and feeds
//! results back. Ordering rules:
//!
//! - Operations of one conversation dispatch strictly in submission order;
//!   only the oldest unfinished one is ever eligible.
//! - Different conversations proceed independently.
//! - A record is in flight at most once.
//! - Failed records stay queryable. A failed create or send holds back the
//!   rest of its conversation until it is retried or discarded, so a manual
//!   retry never lands after newer messages. Other failed records are
//!   skipped.
//!
//! Confirmed entity ids are remembered in an id map so later operations
//! that still name a local id can be redirected to the server id.

mod backoff;

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::RetryPolicy;
use crate::error::RemoteError;
use crate::models::{is_local_id, OperationError, OperationKind, OperationStatus, PendingOperation};

/// What happened to an operation after a failed attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum FailureOutcome {
    /// Scheduled for another attempt after `delay`.
    Rescheduled { attempt: u32, delay: Duration },
    /// Breaker refused the call; the attempt did not count.
    Deferred { delay: Duration },
    /// Non-retryable or out of retries.
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PendingQueue {
    operations: Vec<PendingOperation>,
    /// Local entity id to confirmed remote id.
    #[serde(default)]
    id_map: HashMap<String, String>,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, op: PendingOperation) {
        debug!("Queued {} {} for thread {}", op.kind.name(), op.id, op.thread_id);
        self.operations.push(op);
    }

    pub fn get(&self, id: &str) -> Option<&PendingOperation> {
        self.operations.iter().find(|op| op.id == id)
    }

    fn get_mut(&mut self, id: &str) -> Option<&mut PendingOperation> {
        self.operations.iter_mut().find(|op| op.id == id)
    }

    pub fn operations(&self) -> &[PendingOperation] {
        &self.operations
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Records still heading for the remote store.
    pub fn pending_count(&self) -> usize {
        self.operations.iter().filter(|op| !op.is_failed()).count()
    }

    pub fn failed(&self) -> Vec<&PendingOperation> {
        self.operations.iter().filter(|op| op.is_failed()).collect()
    }

    /// Oldest unfinished operation of each conversation, if it is due.
    pub fn ready(&self, now: DateTime<Utc>) -> Vec<PendingOperation> {
        self.heads()
            .into_iter()
            .filter(|op| op.is_ready(now))
            .cloned()
            .collect()
    }

    /// Earliest instant at which some conversation head becomes due.
    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        self.heads()
            .into_iter()
            .filter(|op| op.status == OperationStatus::Queued)
            .map(|op| op.next_attempt_at.unwrap_or(op.created_at))
            .min()
    }

    /// Oldest live record of every conversation. Failed records that create
    /// an entity hold their conversation back; other failed records are
    /// skipped.
    fn heads(&self) -> Vec<&PendingOperation> {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut heads = Vec::new();
        for op in &self.operations {
            if op.is_failed() && !op.kind.creates_entity() {
                continue;
            }
            if seen.insert(op.thread_id.as_str()) && !op.is_failed() {
                heads.push(op);
            }
        }
        heads
    }

    /// Claim an operation for dispatch. Fails if it is not queued.
    pub fn mark_in_flight(&mut self, id: &str) -> bool {
        match self.get_mut(id) {
            Some(op) if op.status == OperationStatus::Queued => {
                op.status = OperationStatus::InFlight;
                true
            }
            _ => false,
        }
    }

    /// Retire a confirmed operation and remember the id it minted.
    pub fn complete(&mut self, id: &str, remote_id: Option<String>) -> Option<PendingOperation> {
        let index = self.operations.iter().position(|op| op.id == id)?;
        let mut op = self.operations.remove(index);
        if let Some(remote) = remote_id {
            let entity = op.entity_id().to_string();
            if op.kind.creates_entity() && is_local_id(&entity) && entity != remote {
                self.id_map.insert(entity, remote.clone());
            }
            op.remote_id = Some(remote);
        }
        Some(op)
    }

    /// Record a failed attempt and decide what happens next.
    ///
    /// `jitter_unit` is in `[0, 1]`; `multiplier` stretches the delay on
    /// poor connections.
    pub fn fail(
        &mut self,
        id: &str,
        error: &RemoteError,
        policy: &RetryPolicy,
        now: DateTime<Utc>,
        jitter_unit: f64,
        multiplier: u32,
    ) -> Option<FailureOutcome> {
        let op = self.get_mut(id)?;
        op.last_error = Some(OperationError {
            code: error.error_code().to_string(),
            message: error.to_string(),
            retryable: error.is_retryable(),
        });

        let outcome = if error.is_circuit_open() {
            let delay = error
                .retry_after_ms()
                .map(Duration::from_millis)
                .unwrap_or_default()
                .max(policy.base_delay);
            op.status = OperationStatus::Queued;
            op.next_attempt_at = Some(now + to_chrono(delay));
            FailureOutcome::Deferred { delay }
        } else if error.is_transient() {
            op.retry_count += 1;
            if policy.exhausted(op.retry_count) {
                op.status = OperationStatus::Failed;
                op.next_attempt_at = None;
                FailureOutcome::Failed
            } else {
                let backoff = policy.delay(op.retry_count, jitter_unit) * multiplier.max(1);
                let delay = match error.retry_after_ms() {
                    Some(ms) => backoff.max(Duration::from_millis(ms)),
                    None => backoff,
                };
                op.status = OperationStatus::Queued;
                op.next_attempt_at = Some(now + to_chrono(delay));
                FailureOutcome::Rescheduled {
                    attempt: op.retry_count,
                    delay,
                }
            }
        } else {
            op.status = OperationStatus::Failed;
            op.next_attempt_at = None;
            FailureOutcome::Failed
        };

        if outcome == FailureOutcome::Failed {
            warn!(
                "Operation {} ({}) failed permanently: {}",
                op.id,
                op.kind.name(),
                error
            );
        }
        Some(outcome)
    }

    /// Put a failed operation back in line with a fresh retry budget.
    pub fn retry(&mut self, id: &str) -> bool {
        match self.get_mut(id) {
            Some(op) if op.status != OperationStatus::InFlight => {
                op.status = OperationStatus::Queued;
                op.retry_count = 0;
                op.next_attempt_at = None;
                op.last_error = None;
                true
            }
            _ => false,
        }
    }

    pub fn remove(&mut self, id: &str) -> Option<PendingOperation> {
        let index = self.operations.iter().position(|op| op.id == id)?;
        Some(self.operations.remove(index))
    }

    /// Drop every record of a conversation.
    pub fn remove_thread(&mut self, thread_id: &str) -> Vec<PendingOperation> {
        let (removed, kept) = std::mem::take(&mut self.operations)
            .into_iter()
            .partition(|op| op.thread_id == thread_id);
        self.operations = kept;
        removed
    }

    /// Map a possibly-local id to its confirmed remote id.
    pub fn resolve<'a>(&'a self, id: &'a str) -> &'a str {
        self.id_map.get(id).map(String::as_str).unwrap_or(id)
    }

    pub fn id_map(&self) -> &HashMap<String, String> {
        &self.id_map
    }

    pub fn record_mapping(&mut self, local_id: impl Into<String>, remote_id: impl Into<String>) {
        self.id_map.insert(local_id.into(), remote_id.into());
    }

    /// Move a conversation's records to its confirmed id.
    pub fn rekey_thread(&mut self, old_id: &str, new_id: &str) {
        for op in self.operations.iter_mut().filter(|op| op.thread_id == old_id) {
            op.thread_id = new_id.to_string();
        }
    }

    /// Queued `SendMessage` for `message_id` that has not been attempted yet.
    pub fn unsent_send(&self, message_id: &str) -> Option<&PendingOperation> {
        self.operations.iter().find(|op| {
            op.status == OperationStatus::Queued
                && op.retry_count == 0
                && matches!(&op.kind, OperationKind::SendMessage { message_id: m, .. } if m == message_id)
        })
    }

    /// Fold an edit into a send that has not been attempted yet.
    pub fn replace_send_content(&mut self, id: &str, content: &str) -> bool {
        match self.get_mut(id) {
            Some(PendingOperation {
                status: OperationStatus::Queued,
                kind: OperationKind::SendMessage { content: queued, .. },
                ..
            }) => {
                *queued = content.to_string();
                true
            }
            _ => false,
        }
    }

    /// Records touching a given entity, oldest first.
    pub fn for_entity(&self, entity_id: &str) -> Vec<&PendingOperation> {
        self.operations
            .iter()
            .filter(|op| op.entity_id() == entity_id)
            .collect()
    }

    /// Return in-flight records to the queue; used after a restart.
    pub fn restore(&mut self) -> usize {
        let mut restored = 0;
        for op in self
            .operations
            .iter_mut()
            .filter(|op| op.status == OperationStatus::InFlight)
        {
            op.status = OperationStatus::Queued;
            restored += 1;
        }
        restored
    }

    /// Make every queued record due immediately, e.g. after reconnecting.
    pub fn expedite(&mut self) {
        for op in self
            .operations
            .iter_mut()
            .filter(|op| op.status == OperationStatus::Queued)
        {
            op.next_attempt_at = None;
        }
    }
}

fn to_chrono(delay: Duration) -> chrono::Duration {
    chrono::Duration::milliseconds(delay.as_millis().min(i64::MAX as u128) as i64)
}
