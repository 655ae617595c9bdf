//! Pure state transitions.
//!
//! `reduce` never performs I/O and never fails. Anything that needs the
//! outside world is returned as an [`Effect`] for the engine to carry out.

use tracing::{debug, info};

use super::action::Action;
use super::effect::Effect;
use super::state::SyncState;
use crate::models::{
    is_local_id, ErrorInfo, OperationKind, PendingOperation, SyncStatus, TabEvent, Thread,
};
use crate::queue::FailureOutcome;

/// New state plus the effects it asks for, in execution order.
#[derive(Debug)]
pub struct Transition {
    pub state: SyncState,
    pub effects: Vec<Effect>,
}

pub fn reduce(mut state: SyncState, action: Action) -> Transition {
    let mut effects = Vec::new();

    match action {
        Action::Started { queue } => {
            if let Some(mut restored) = queue {
                let reset = restored.restore();
                if reset > 0 {
                    info!("Restored {} interrupted operations", reset);
                }
                for op in state.queue.operations() {
                    restored.push(op.clone());
                }
                state.queue = restored;
                effects.push(Effect::PersistQueue);
            }
            effects.push(presence(&state, false));
            effects.push(Effect::ProcessQueue);
        }

        Action::ThreadsLoaded {
            threads,
            authoritative,
        } => {
            if !authoritative {
                if state.threads.is_empty() {
                    state.threads = threads;
                    state.sort_threads();
                }
            } else {
                merge_thread_list(&mut state, threads);
                effects.push(Effect::PersistThreads);
            }
        }

        Action::ConversationSelected { thread_id } => {
            state.active_thread = Some(thread_id.clone());
            state.messages.clear();
            state.has_more_top = false;
            state.has_more_bottom = false;
            state.loading = true;
            effects.push(Effect::Unsubscribe);
            effects.push(Effect::LoadViewport {
                thread_id: thread_id.clone(),
            });
            effects.push(Effect::Subscribe { thread_id });
        }

        Action::WindowUpdated { viewport } => {
            if state.active_thread.as_deref() == Some(viewport.thread_id.as_str()) {
                state.messages = viewport.messages().to_vec();
                state.has_more_top = viewport.has_more_top;
                state.has_more_bottom = viewport.has_more_bottom;
                state.loading = false;
            }
        }

        Action::ThreadCreated { thread, op } => {
            state.threads.push(thread.clone());
            state.sort_threads();
            state.queue.push(op);
            effects.push(Effect::PersistThreads);
            effects.push(Effect::PersistQueue);
            effects.push(Effect::Broadcast(TabEvent::ThreadUpserted {
                thread,
                replaces: None,
            }));
            effects.push(Effect::ProcessQueue);
        }

        Action::MessageSent {
            user,
            assistant,
            op,
        } => {
            state.queue.push(op);
            state.streaming.insert(assistant.id.clone());
            if let Some(thread) = state.thread_mut(&user.thread_id) {
                thread.touch(user.created_at);
            }
            state.sort_threads();
            effects.push(Effect::PersistQueue);
            effects.push(Effect::PersistThreads);
            effects.push(upserted(user));
            effects.push(upserted(assistant.clone()));
            effects.push(Effect::ProcessQueue);
            effects.push(Effect::StartStream {
                thread_id: assistant.thread_id,
                message_id: assistant.id,
            });
        }

        Action::ThreadUpdated {
            thread_id,
            title,
            archived,
            op,
        } => {
            if let Some(thread) = state.thread_mut(&thread_id) {
                if let Some(title) = title {
                    thread.title = title;
                }
                if let Some(archived) = archived {
                    thread.archived = archived;
                }
                thread.status = SyncStatus::Pending;
                let thread = thread.clone();
                effects.push(Effect::Broadcast(TabEvent::ThreadUpserted {
                    thread,
                    replaces: None,
                }));
            }
            state.queue.push(op);
            effects.insert(0, Effect::PersistQueue);
            effects.insert(0, Effect::PersistThreads);
            effects.push(Effect::ProcessQueue);
        }

        Action::OperationQueued { op, events } => {
            state.queue.push(op);
            effects.push(Effect::PersistQueue);
            effects.extend(events.into_iter().map(Effect::Broadcast));
            effects.push(Effect::ProcessQueue);
        }

        Action::SendContentReplaced { op_id, message } => {
            if state.queue.replace_send_content(&op_id, &message.content) {
                effects.push(Effect::PersistQueue);
            }
            effects.push(upserted(message));
        }

        Action::OperationsCancelled { op_ids, events } => {
            for id in &op_ids {
                state.queue.remove(id);
            }
            effects.push(Effect::PersistQueue);
            effects.extend(events.into_iter().map(Effect::Broadcast));
        }

        Action::OperationsDispatched { op_ids } => {
            for id in &op_ids {
                if !state.queue.mark_in_flight(id) {
                    debug!("Operation {} was not queued at dispatch", id);
                }
            }
            effects.push(Effect::PersistQueue);
        }

        Action::OperationConfirmed { op_id, remote_id } => {
            if state.queue.complete(&op_id, remote_id).is_some() {
                effects.push(Effect::PersistQueue);
            }
        }

        Action::ThreadConfirmed { local_id, thread } => {
            confirm_thread(&mut state, &mut effects, local_id, thread);
        }

        Action::MessageConfirmed { message, replaces } => {
            effects.push(Effect::Broadcast(TabEvent::MessageUpserted { message, replaces }));
        }

        Action::OperationFailed {
            op_id,
            error,
            at,
            jitter_unit,
            backoff_multiplier,
            policy,
        } => {
            let outcome =
                state
                    .queue
                    .fail(&op_id, &error, &policy, at, jitter_unit, backoff_multiplier);
            let op = state.queue.get(&op_id).cloned();
            if let (Some(outcome), Some(op)) = (outcome, op) {
                effects.push(Effect::PersistQueue);
                match outcome {
                    FailureOutcome::Failed => {
                        let reason = error.user_message();
                        state.push_error(
                            ErrorInfo::new(error.error_code(), reason.clone())
                                .with_thread(op.thread_id.clone())
                                .with_operation(op.id.clone()),
                        );
                        annotate(&mut state, &mut effects, &op, SyncStatus::Failed { reason });
                    }
                    FailureOutcome::Rescheduled { attempt, delay } => {
                        debug!(
                            "Operation {} retry {} in {}ms",
                            op.id,
                            attempt,
                            delay.as_millis()
                        );
                    }
                    FailureOutcome::Deferred { delay } => {
                        debug!("Operation {} deferred {}ms by breaker", op.id, delay.as_millis());
                    }
                }
            }
        }

        Action::OperationRetried { op_id } => {
            if state.queue.retry(&op_id) {
                if let Some(op) = state.queue.get(&op_id).cloned() {
                    annotate(&mut state, &mut effects, &op, SyncStatus::Pending);
                }
                effects.push(Effect::PersistQueue);
                effects.push(Effect::ProcessQueue);
            }
        }

        Action::OperationDiscarded { op_id } => {
            if let Some(op) = state.queue.remove(&op_id) {
                discard(&mut state, &mut effects, op);
                effects.push(Effect::PersistQueue);
            }
        }

        Action::StreamProgressed { message } => {
            effects.push(upserted(message));
        }

        Action::StreamFinished {
            message_id,
            message,
            complete,
            error,
        } => {
            state.streaming.remove(&message_id);
            if let Some(message) = message {
                effects.push(upserted(message));
            }
            if let Some(error) = error {
                state.push_error(error);
            }
            if let Some(op) = complete {
                state.queue.push(op);
                effects.push(Effect::PersistQueue);
                effects.push(Effect::ProcessQueue);
            }
        }

        Action::RemoteSynced {
            thread_id,
            messages,
        } => {
            if !messages.is_empty() {
                effects.push(Effect::Broadcast(TabEvent::MessagesSynced {
                    thread_id,
                    messages,
                }));
            }
        }

        Action::TabEventReceived(event) => apply_sibling_event(&mut state, &mut effects, event),

        Action::ConnectivityChanged { online, quality } => {
            let reconnected = online && !state.online;
            state.online = online;
            state.quality = quality;
            if reconnected {
                state.queue.expedite();
                effects.push(Effect::PersistQueue);
                effects.push(Effect::ProcessQueue);
                if let Some(active) = state.active_thread.clone() {
                    effects.push(Effect::RefreshViewport {
                        thread_id: active.clone(),
                    });
                    effects.push(Effect::Subscribe { thread_id: active });
                }
            }
        }

        Action::CircuitChanged(circuit) => state.circuit = circuit,

        Action::LeadershipChanged { is_leader } => {
            state.is_leader = is_leader;
            effects.push(presence(&state, false));
        }

        Action::PeersObserved { tabs } => {
            state.peers = tabs.into_iter().filter(|t| *t != state.tab_id).collect();
        }

        Action::ErrorRaised(error) => state.push_error(error),

        Action::ErrorsCleared => state.errors.clear(),
    }

    Transition { state, effects }
}

fn upserted(message: crate::models::Message) -> Effect {
    Effect::Broadcast(TabEvent::MessageUpserted {
        message,
        replaces: None,
    })
}

fn presence(state: &SyncState, leaving: bool) -> Effect {
    Effect::Broadcast(TabEvent::Presence {
        tab_id: state.tab_id.clone(),
        is_leader: state.is_leader,
        leaving,
    })
}

/// Thread has queued title or archive changes that must not be overwritten.
fn has_pending_metadata(state: &SyncState, thread_id: &str) -> bool {
    state.queue.operations().iter().any(|op| {
        op.thread_id == thread_id
            && matches!(
                op.kind,
                OperationKind::RenameThread { .. } | OperationKind::ArchiveThread { .. }
            )
    })
}

/// Authoritative list wins, except for threads still carrying local intent.
fn merge_thread_list(state: &mut SyncState, remote: Vec<Thread>) {
    let mut merged: Vec<Thread> = Vec::with_capacity(remote.len());
    for incoming in remote {
        let existing = state.threads.iter().find(|t| t.same_entity(&incoming));
        match existing {
            Some(local) if local.is_local() || has_pending_metadata(state, &local.id) => {
                merged.push(local.clone());
            }
            _ => merged.push(incoming),
        }
    }
    for local in state.threads.iter().filter(|t| t.is_local()) {
        if !merged.iter().any(|t| t.same_entity(local)) {
            merged.push(local.clone());
        }
    }
    state.threads = merged;
    state.sort_threads();
}

fn confirm_thread(state: &mut SyncState, effects: &mut Vec<Effect>, local_id: String, thread: Thread) {
    let created = local_id != thread.id;
    if created {
        state.queue.rekey_thread(&local_id, &thread.id);
        effects.push(Effect::RekeyThread {
            old_id: local_id.clone(),
            new_id: thread.id.clone(),
        });
    }
    let keep_local = has_pending_metadata(state, &thread.id);

    // a sibling or list refresh may have inserted the server copy already
    if created {
        state.threads.retain(|t| t.id != thread.id);
    }
    let index = state.threads.iter().position(|t| t.id == local_id);
    let updated = match index {
        Some(index) => {
            let slot = &mut state.threads[index];
            if keep_local {
                slot.id = thread.id.clone();
                slot.user_id = thread.user_id.clone();
            } else {
                *slot = thread.clone();
            }
            slot.clone()
        }
        None => {
            state.threads.push(thread.clone());
            thread.clone()
        }
    };
    state.sort_threads();

    effects.push(Effect::PersistThreads);
    effects.push(Effect::PersistQueue);
    effects.push(Effect::Broadcast(TabEvent::ThreadUpserted {
        thread: updated,
        replaces: created.then(|| local_id.clone()),
    }));

    if created && state.active_thread.as_deref() == Some(local_id.as_str()) {
        state.active_thread = Some(thread.id.clone());
        effects.push(Effect::Subscribe {
            thread_id: thread.id.clone(),
        });
        effects.push(Effect::RefreshViewport {
            thread_id: thread.id.clone(),
        });
    } else if created && thread.parent_id.is_some() {
        effects.push(Effect::RefreshViewport {
            thread_id: thread.id.clone(),
        });
    }
}

/// Mark the entity an operation created or changed.
fn annotate(state: &mut SyncState, effects: &mut Vec<Effect>, op: &PendingOperation, status: SyncStatus) {
    match &op.kind {
        OperationKind::CreateThread { .. }
        | OperationKind::RenameThread { .. }
        | OperationKind::ArchiveThread { .. } => {
            if let Some(thread) = state.thread_mut(&op.thread_id) {
                thread.status = status;
                effects.push(Effect::PersistThreads);
            }
        }
        OperationKind::SendMessage { message_id, .. }
        | OperationKind::CompleteMessage { message_id, .. }
        | OperationKind::EditMessage { message_id, .. } => {
            effects.push(Effect::SetMessageStatus {
                thread_id: op.thread_id.clone(),
                message_id: message_id.clone(),
                status,
            });
        }
        OperationKind::DeleteMessage { .. } => {}
    }
}

fn discard(state: &mut SyncState, effects: &mut Vec<Effect>, op: PendingOperation) {
    info!("Discarding {} {}", op.kind.name(), op.id);
    let kind = op.kind.clone();
    match &kind {
        OperationKind::CreateThread { .. } => {
            let dropped = state.queue.remove_thread(&op.thread_id);
            if !dropped.is_empty() {
                debug!("Dropped {} dependent operations", dropped.len());
            }
            remove_thread(state, effects, &op.thread_id);
            effects.push(Effect::Broadcast(TabEvent::ThreadRemoved {
                thread_id: op.thread_id.clone(),
            }));
        }
        OperationKind::RenameThread { previous_title, .. } => {
            let rollback = state.thread_mut(&op.thread_id).map(|thread| {
                thread.title = previous_title.clone();
                thread.status = restored_status(thread);
                thread.clone()
            });
            thread_rolled_back(effects, rollback);
        }
        OperationKind::ArchiveThread { archived } => {
            let rollback = state.thread_mut(&op.thread_id).map(|thread| {
                thread.archived = !archived;
                thread.status = restored_status(thread);
                thread.clone()
            });
            thread_rolled_back(effects, rollback);
        }
        OperationKind::SendMessage { message_id, .. }
        | OperationKind::CompleteMessage { message_id, .. } => {
            let dependents: Vec<String> = state
                .queue
                .for_entity(message_id)
                .iter()
                .map(|o| o.id.clone())
                .collect();
            for id in dependents {
                state.queue.remove(&id);
            }
            effects.push(Effect::Broadcast(TabEvent::MessageDeleted {
                thread_id: op.thread_id.clone(),
                message_id: message_id.clone(),
            }));
            effects.push(Effect::RollBack(op));
        }
        OperationKind::EditMessage { .. } | OperationKind::DeleteMessage { .. } => {
            effects.push(Effect::RollBack(op));
        }
    }
}

fn restored_status(thread: &Thread) -> SyncStatus {
    if is_local_id(&thread.id) {
        SyncStatus::Pending
    } else {
        SyncStatus::Confirmed
    }
}

fn thread_rolled_back(effects: &mut Vec<Effect>, thread: Option<Thread>) {
    if let Some(thread) = thread {
        effects.push(Effect::PersistThreads);
        effects.push(Effect::Broadcast(TabEvent::ThreadUpserted {
            thread,
            replaces: None,
        }));
    }
}

fn remove_thread(state: &mut SyncState, effects: &mut Vec<Effect>, thread_id: &str) {
    state.threads.retain(|t| t.id != thread_id);
    if state.active_thread.as_deref() == Some(thread_id) {
        state.active_thread = None;
        state.messages.clear();
        state.has_more_top = false;
        state.has_more_bottom = false;
        effects.push(Effect::Unsubscribe);
    }
    effects.push(Effect::DropThread {
        thread_id: thread_id.to_string(),
    });
    effects.push(Effect::PersistThreads);
}

fn apply_sibling_event(state: &mut SyncState, effects: &mut Vec<Effect>, event: TabEvent) {
    match event {
        TabEvent::ThreadUpserted { thread, replaces } => {
            match replaces {
                Some(old_id) if old_id != thread.id => {
                    state.queue.record_mapping(old_id.clone(), thread.id.clone());
                    state.queue.rekey_thread(&old_id, &thread.id);
                    state.threads.retain(|t| t.id != thread.id);
                    match state.threads.iter_mut().find(|t| t.id == old_id) {
                        Some(slot) => *slot = thread.clone(),
                        None => state.threads.push(thread.clone()),
                    }
                    effects.push(Effect::RekeyThread {
                        old_id: old_id.clone(),
                        new_id: thread.id.clone(),
                    });
                    if state.active_thread.as_deref() == Some(old_id.as_str()) {
                        state.active_thread = Some(thread.id.clone());
                        effects.push(Effect::Subscribe {
                            thread_id: thread.id.clone(),
                        });
                    }
                }
                _ => {
                    if has_pending_metadata(state, &thread.id) {
                        return;
                    }
                    match state.threads.iter_mut().find(|t| t.same_entity(&thread)) {
                        Some(slot) => *slot = thread,
                        None => state.threads.push(thread),
                    }
                }
            }
            state.sort_threads();
            effects.push(Effect::PersistThreads);
        }
        TabEvent::ThreadRemoved { thread_id } => {
            if state.threads.iter().any(|t| t.id == thread_id) {
                state.queue.remove_thread(&thread_id);
                remove_thread(state, effects, &thread_id);
                effects.push(Effect::PersistQueue);
            }
        }
        TabEvent::Presence {
            tab_id, leaving, ..
        } => {
            if tab_id == state.tab_id {
                return;
            }
            if leaving {
                state.peers.remove(&tab_id);
            } else {
                state.peers.insert(tab_id);
            }
        }
        // message events are applied to windows by the engine
        TabEvent::MessageUpserted { .. }
        | TabEvent::MessageDeleted { .. }
        | TabEvent::MessagesSynced { .. }
        | TabEvent::Resync { .. } => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryPolicy;
    use crate::error::RemoteError;
    use crate::models::{Message, OperationStatus};
    use crate::viewport::Viewport;
    use chrono::Utc;
    use std::time::Duration;

    fn state() -> SyncState {
        SyncState::new("tab-a")
    }

    fn apply(state: SyncState, action: Action) -> (SyncState, Vec<Effect>) {
        let t = reduce(state, action);
        (t.state, t.effects)
    }

    fn create(state: SyncState, title: &str) -> (SyncState, Thread, PendingOperation) {
        let thread = Thread::optimistic(title, None, None, None);
        let op = PendingOperation::create_thread(
            thread.id.clone(),
            OperationKind::CreateThread {
                title: title.into(),
                provider: None,
                model: None,
                parent_id: None,
                branch_from: None,
            },
        );
        let (state, _) = apply(
            state,
            Action::ThreadCreated {
                thread: thread.clone(),
                op: op.clone(),
            },
        );
        (state, thread, op)
    }

    fn failed(op_id: &str, error: RemoteError) -> Action {
        Action::OperationFailed {
            op_id: op_id.into(),
            error,
            at: Utc::now(),
            jitter_unit: 0.0,
            backoff_multiplier: 1,
            policy: RetryPolicy {
                max_retries: 1,
                base_delay: Duration::from_millis(10),
                max_delay: Duration::from_secs(1),
                jitter_ratio: 0.0,
            },
        }
    }

    #[test]
    fn test_select_clears_window_and_requests_load() {
        let mut s = state();
        s.active_thread = Some("a".into());
        s.messages = vec![Message::user("a", "old")];
        let (s, effects) = apply(s, Action::ConversationSelected { thread_id: "b".into() });

        assert!(s.messages.is_empty());
        assert!(s.loading);
        assert_eq!(
            effects,
            vec![
                Effect::Unsubscribe,
                Effect::LoadViewport { thread_id: "b".into() },
                Effect::Subscribe { thread_id: "b".into() },
            ]
        );
    }

    #[test]
    fn test_window_updates_for_other_threads_are_ignored() {
        let mut s = state();
        s.active_thread = Some("b".into());
        let other = Viewport::from_parts("a", vec![Message::user("a", "leak")], false, false);
        let (s, _) = apply(s, Action::WindowUpdated { viewport: other });
        assert!(s.messages.is_empty());

        let mine = Viewport::from_parts("b", vec![Message::user("b", "mine")], true, false);
        let (s, _) = apply(s, Action::WindowUpdated { viewport: mine });
        assert_eq!(s.messages.len(), 1);
        assert!(s.has_more_top);
    }

    #[test]
    fn test_thread_created_queues_and_broadcasts() {
        let (s, thread, op) = create(state(), "Plans");
        assert_eq!(s.threads.len(), 1);
        assert_eq!(s.pending_operation_count(), 1);
        assert_eq!(s.queue.get(&op.id).map(|o| o.thread_id.clone()), Some(thread.id));
    }

    #[test]
    fn test_thread_confirmation_rekeys_everything() {
        let (mut s, thread, op) = create(state(), "Plans");
        s.active_thread = Some(thread.id.clone());
        let send = PendingOperation::new(
            thread.id.clone(),
            OperationKind::SendMessage {
                message_id: "local-m".into(),
                content: "hi".into(),
                attachments: vec![],
            },
        );
        s.queue.push(send.clone());

        let (s, _) = apply(
            s,
            Action::OperationConfirmed {
                op_id: op.id.clone(),
                remote_id: Some("thr_9".into()),
            },
        );
        let mut server = thread.clone();
        server.id = "thr_9".into();
        server.status = SyncStatus::Confirmed;
        let (s, effects) = apply(
            s,
            Action::ThreadConfirmed {
                local_id: thread.id.clone(),
                thread: server,
            },
        );

        assert_eq!(s.active_thread.as_deref(), Some("thr_9"));
        assert_eq!(s.threads[0].id, "thr_9");
        assert_eq!(s.queue.get(&send.id).unwrap().thread_id, "thr_9");
        assert!(effects.contains(&Effect::RekeyThread {
            old_id: thread.id.clone(),
            new_id: "thr_9".into(),
        }));
        assert!(effects.contains(&Effect::Subscribe { thread_id: "thr_9".into() }));
        // old id still resolves
        assert_eq!(s.thread(&thread.id).map(|t| t.id.as_str()), Some("thr_9"));
    }

    #[test]
    fn test_permanent_failure_marks_entity_and_surfaces_error() {
        let (s, thread, op) = create(state(), "Plans");
        let (s, _) = apply(s, Action::OperationsDispatched { op_ids: vec![op.id.clone()] });
        let (s, _) = apply(s, failed(&op.id, RemoteError::rejected("invalid", "bad title")));

        assert_eq!(s.pending_operation_count(), 0);
        assert_eq!(s.failed_operations().len(), 1);
        assert!(s.thread(&thread.id).unwrap().status.is_failed());
        assert_eq!(s.errors.len(), 1);
        assert_eq!(s.errors[0].operation_id.as_deref(), Some(op.id.as_str()));

        let (s, effects) = apply(s, Action::OperationRetried { op_id: op.id.clone() });
        assert_eq!(s.queue.get(&op.id).unwrap().status, OperationStatus::Queued);
        assert_eq!(s.thread(&thread.id).unwrap().status, SyncStatus::Pending);
        assert!(effects.contains(&Effect::ProcessQueue));
    }

    #[test]
    fn test_transient_failure_reschedules_quietly() {
        let (s, _, op) = create(state(), "Plans");
        let (s, _) = apply(s, Action::OperationsDispatched { op_ids: vec![op.id.clone()] });
        let (s, _) = apply(s, failed(&op.id, RemoteError::Network("reset".into())));
        let queued = s.queue.get(&op.id).unwrap();
        assert_eq!(queued.status, OperationStatus::Queued);
        assert_eq!(queued.retry_count, 1);
        assert!(s.errors.is_empty());
    }

    #[test]
    fn test_discarding_create_removes_thread_and_dependents() {
        let (mut s, thread, op) = create(state(), "Plans");
        s.active_thread = Some(thread.id.clone());
        s.queue.push(PendingOperation::new(
            thread.id.clone(),
            OperationKind::RenameThread {
                title: "New".into(),
                previous_title: "Plans".into(),
            },
        ));
        let (s, effects) = apply(s, Action::OperationDiscarded { op_id: op.id.clone() });

        assert!(s.threads.is_empty());
        assert!(s.queue.is_empty());
        assert!(s.active_thread.is_none());
        assert!(effects.contains(&Effect::Broadcast(TabEvent::ThreadRemoved {
            thread_id: thread.id.clone(),
        })));
        assert!(effects.contains(&Effect::DropThread { thread_id: thread.id }));
    }

    #[test]
    fn test_discarding_rename_restores_title() {
        let mut s = state();
        let mut thread = Thread::optimistic("Old", None, None, None);
        thread.id = "thr_1".into();
        thread.status = SyncStatus::Confirmed;
        s.threads.push(thread);
        let op = PendingOperation::new(
            "thr_1",
            OperationKind::RenameThread {
                title: "New".into(),
                previous_title: "Old".into(),
            },
        );
        let (s, _) = apply(
            s,
            Action::ThreadUpdated {
                thread_id: "thr_1".into(),
                title: Some("New".into()),
                archived: None,
                op: op.clone(),
            },
        );
        assert_eq!(s.threads[0].title, "New");

        let (s, _) = apply(s, Action::OperationDiscarded { op_id: op.id });
        assert_eq!(s.threads[0].title, "Old");
        assert_eq!(s.threads[0].status, SyncStatus::Confirmed);
    }

    #[test]
    fn test_remote_list_keeps_local_intent() {
        let (s, local, _) = create(state(), "Draft");
        let mut remote = Thread::optimistic("Remote", None, None, None);
        remote.id = "thr_2".into();
        remote.status = SyncStatus::Confirmed;
        let (s, effects) = apply(
            s,
            Action::ThreadsLoaded {
                threads: vec![remote],
                authoritative: true,
            },
        );
        assert_eq!(s.threads.len(), 2);
        assert!(s.threads.iter().any(|t| t.id == local.id));
        assert_eq!(effects, vec![Effect::PersistThreads]);
    }

    #[test]
    fn test_cached_list_only_fills_an_empty_state() {
        let (s, _, _) = create(state(), "Draft");
        let cached = vec![Thread::optimistic("Cached", None, None, None)];
        let (s, _) = apply(
            s,
            Action::ThreadsLoaded {
                threads: cached,
                authoritative: false,
            },
        );
        assert_eq!(s.threads.len(), 1);
        assert_eq!(s.threads[0].title, "Draft");
    }

    #[test]
    fn test_reconnect_expedites_queue() {
        let (mut s, _, op) = create(state(), "Plans");
        s.online = false;
        s.active_thread = Some("thr_1".into());
        let (s, _) = apply(s, Action::OperationsDispatched { op_ids: vec![op.id.clone()] });
        let (s, _) = apply(s, failed(&op.id, RemoteError::Network("down".into())));
        assert!(s.queue.get(&op.id).unwrap().next_attempt_at.is_some());

        let (s, effects) = apply(
            s,
            Action::ConnectivityChanged {
                online: true,
                quality: crate::network::ConnectionQuality::Good,
            },
        );
        assert!(s.queue.get(&op.id).unwrap().next_attempt_at.is_none());
        assert!(effects.contains(&Effect::ProcessQueue));
        assert!(effects.contains(&Effect::RefreshViewport { thread_id: "thr_1".into() }));
    }

    #[test]
    fn test_presence_tracks_peers() {
        let s = state();
        let join = TabEvent::Presence {
            tab_id: "tab-b".into(),
            is_leader: true,
            leaving: false,
        };
        let (s, _) = apply(s, Action::TabEventReceived(join));
        assert_eq!(s.live_tab_count(), 2);

        let leave = TabEvent::Presence {
            tab_id: "tab-b".into(),
            is_leader: false,
            leaving: true,
        };
        let (s, _) = apply(s, Action::TabEventReceived(leave));
        assert_eq!(s.live_tab_count(), 1);

        let (s, _) = apply(
            s,
            Action::PeersObserved {
                tabs: vec!["tab-a".into(), "tab-c".into()],
            },
        );
        assert_eq!(s.peers.iter().collect::<Vec<_>>(), vec!["tab-c"]);
    }

    #[test]
    fn test_stream_finished_queues_completion() {
        let mut s = state();
        s.streaming.insert("local-a".into());
        let complete = PendingOperation::new(
            "thr_1",
            OperationKind::CompleteMessage {
                message_id: "local-a".into(),
                content: "Hi there".into(),
                usage: None,
            },
        );
        let (s, effects) = apply(
            s,
            Action::StreamFinished {
                message_id: "local-a".into(),
                message: None,
                complete: Some(complete),
                error: None,
            },
        );
        assert!(!s.is_streaming("local-a"));
        assert_eq!(s.pending_operation_count(), 1);
        assert_eq!(effects, vec![Effect::PersistQueue, Effect::ProcessQueue]);
    }
}
