//! Ordered, bounded message window for one conversation.
//!
//! Pure data manipulation; persistence and remote loading live in
//! [`super::ViewportCache`].

use crate::models::{is_local_id, Message, OrderKey};

/// Which end of the window loses messages when it overflows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictFrom {
    /// Drop the oldest messages (new content arrived at the bottom).
    Top,
    /// Drop the newest messages (older history was paged in).
    Bottom,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Viewport {
    pub thread_id: String,
    messages: Vec<Message>,
    /// Older history exists above the window.
    pub has_more_top: bool,
    /// Newer messages were evicted below the window.
    pub has_more_bottom: bool,
}

impl Viewport {
    pub fn new(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            ..Default::default()
        }
    }

    pub fn from_parts(
        thread_id: impl Into<String>,
        mut messages: Vec<Message>,
        has_more_top: bool,
        has_more_bottom: bool,
    ) -> Self {
        messages.sort_by_key(Message::order_key);
        Self {
            thread_id: thread_id.into(),
            messages,
            has_more_top,
            has_more_bottom,
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.messages.iter().position(|m| m.id == id)
    }

    fn position_of_entity(&self, message: &Message) -> Option<usize> {
        self.messages.iter().position(|m| m.same_entity(message))
    }

    /// The window's copy of the same logical message, under any id.
    pub fn entity(&self, message: &Message) -> Option<&Message> {
        self.messages.iter().find(|m| m.same_entity(message))
    }

    /// Oldest confirmed message, used as the pagination cursor.
    pub fn oldest_confirmed(&self) -> Option<&Message> {
        self.messages.iter().find(|m| !is_local_id(&m.id))
    }

    /// Insert after every message that sorts at or before it.
    pub fn insert_ordered(&mut self, message: Message) {
        let key = message.order_key();
        let index = self.messages.partition_point(|m| m.order_key() <= key);
        self.messages.insert(index, message);
    }

    /// Overwrite the message at `index`, moving it if its order key changed.
    ///
    /// Optimistic messages that sat behind it and would now sort ahead of it
    /// are restamped to follow it, so a prompt confirmed with a later server
    /// time still precedes its pending reply.
    fn replace_at(&mut self, index: usize, message: Message) {
        let key = message.order_key();
        if self.messages[index].order_key() == key {
            self.messages[index] = message;
            return;
        }

        self.messages.remove(index);
        let mut followers = Vec::new();
        let mut i = index;
        while i < self.messages.len() {
            let candidate = &self.messages[i];
            if is_local_id(&candidate.id) && candidate.order_key() < key {
                followers.push(self.messages.remove(i));
            } else {
                i += 1;
            }
        }

        self.insert_ordered(message);
        let mut floor = key;
        for mut follower in followers {
            if follower.order_key() <= floor {
                follower.created_at = floor.at;
                follower.sequence = floor.sequence + 1;
            }
            floor = follower.order_key();
            self.insert_ordered(follower);
        }
    }

    /// Insert a new message or replace the matching one in place.
    /// Returns false when nothing changed.
    pub fn upsert(&mut self, message: Message) -> bool {
        match self.position_of_entity(&message) {
            Some(index) => {
                if self.messages[index] == message {
                    return false;
                }
                self.replace_at(index, message);
                true
            }
            None => {
                self.insert_ordered(message);
                true
            }
        }
    }

    /// Substitute the confirmed record for the optimistic one.
    ///
    /// The confirmed message keeps the local sequence and gets a version newer
    /// than anything the local copy had. It moves only when the server time
    /// reorders it. If the server's
    /// echo already landed separately, the optimistic duplicate is dropped.
    pub fn confirm(&mut self, local_id: &str, mut confirmed: Message) -> Message {
        let echo = self
            .messages
            .iter()
            .position(|m| m.id == confirmed.id && m.id != local_id);

        match self.position(local_id) {
            Some(index) => {
                let local = &self.messages[index];
                confirmed.version = confirmed.version.max(local.version + 1);
                confirmed.sequence = local.sequence;
                if confirmed.client_id.is_none() {
                    confirmed.client_id = local.client_id.clone();
                }
                match echo {
                    Some(echo_index) => {
                        self.messages.remove(index);
                        let echo_index = if echo_index > index { echo_index - 1 } else { echo_index };
                        self.replace_at(echo_index, confirmed.clone());
                    }
                    None => self.replace_at(index, confirmed.clone()),
                }
            }
            None => {
                self.upsert(confirmed.clone());
            }
        }
        confirmed
    }

    /// Mutate one message in place, bumping its version.
    pub fn update<F>(&mut self, id: &str, f: F) -> Option<&Message>
    where
        F: FnOnce(&mut Message),
    {
        let index = self.position(id)?;
        let message = &mut self.messages[index];
        let before = message.version;
        f(message);
        if message.version == before {
            message.version += 1;
        }
        Some(&self.messages[index])
    }

    pub fn remove(&mut self, id: &str) -> Option<Message> {
        let index = self.position(id)?;
        Some(self.messages.remove(index))
    }

    /// Merge an older page fetched above the window.
    pub fn prepend_page(&mut self, older: Vec<Message>) -> usize {
        let mut added = 0;
        for message in older {
            if self.position_of_entity(&message).is_none() {
                self.insert_ordered(message);
                added += 1;
            }
        }
        added
    }

    /// Merge an authoritative batch; the server wins every conflict.
    ///
    /// Confirmed messages that fall inside the batch's ordering range but are
    /// missing from it were deleted remotely and are pruned. Messages with
    /// unconfirmed local state are never pruned. Returns whether the window
    /// changed.
    pub fn merge_authoritative(&mut self, batch: Vec<Message>) -> bool {
        let (Some(low), Some(high)) = (
            batch.iter().map(Message::order_key).min(),
            batch.iter().map(Message::order_key).max(),
        ) else {
            return false;
        };

        let before = self.messages.len();
        self.messages.retain(|m| {
            m.is_protected()
                || is_local_id(&m.id)
                || !in_range(m.order_key(), low, high)
                || batch.iter().any(|b| b.same_entity(m))
        });
        let mut changed = self.messages.len() != before;

        for mut incoming in batch {
            match self.position_of_entity(&incoming) {
                Some(index) => {
                    let existing = &self.messages[index];
                    if !differs(existing, &incoming) {
                        continue;
                    }
                    incoming.version = incoming.version.max(existing.version + 1);
                    if is_local_id(&existing.id) {
                        incoming.sequence = existing.sequence;
                    }
                    self.replace_at(index, incoming);
                }
                None => self.insert_ordered(incoming),
            }
            changed = true;
        }
        changed
    }

    /// Shrink to `bound` messages, evicting from one end.
    ///
    /// Protected messages are skipped, so the window may stay above the
    /// bound while they exist. Returns the number evicted.
    pub fn trim(&mut self, bound: usize, from: EvictFrom) -> usize {
        let mut evicted = 0;
        while self.messages.len() > bound {
            let candidate = match from {
                EvictFrom::Top => self.messages.iter().position(|m| !m.is_protected()),
                EvictFrom::Bottom => self.messages.iter().rposition(|m| !m.is_protected()),
            };
            let Some(index) = candidate else {
                break;
            };
            self.messages.remove(index);
            evicted += 1;
        }
        if evicted > 0 {
            match from {
                EvictFrom::Top => self.has_more_top = true,
                EvictFrom::Bottom => self.has_more_bottom = true,
            }
        }
        evicted
    }

    /// Follow a conversation to its confirmed id.
    pub fn rekey_thread(&mut self, new_thread_id: &str) {
        self.thread_id = new_thread_id.to_string();
        for message in &mut self.messages {
            message.thread_id = new_thread_id.to_string();
        }
    }

    pub fn message_ids(&self) -> Vec<String> {
        self.messages.iter().map(|m| m.id.clone()).collect()
    }
}

fn in_range(key: OrderKey, low: OrderKey, high: OrderKey) -> bool {
    key.at >= low.at && key.at <= high.at
}

fn differs(existing: &Message, incoming: &Message) -> bool {
    existing.id != incoming.id
        || existing.content != incoming.content
        || existing.status != incoming.status
        || existing.is_streaming != incoming.is_streaming
        || existing.server_timestamp != incoming.server_timestamp
        || existing.usage != incoming.usage
        || existing.attachments != incoming.attachments
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SyncStatus;
    use chrono::{Duration, TimeZone, Utc};

    fn confirmed(id: &str, secs: i64) -> Message {
        let at = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap() + Duration::seconds(secs);
        let mut m = Message::user("t1", format!("message {}", id));
        m.id = id.to_string();
        m.client_id = None;
        m.created_at = at;
        m.server_timestamp = Some(at);
        m.status = SyncStatus::Confirmed;
        m
    }

    #[test]
    fn test_insert_ordered_is_stable() {
        let mut vp = Viewport::new("t1");
        vp.insert_ordered(confirmed("b", 2));
        vp.insert_ordered(confirmed("a", 1));
        vp.insert_ordered(confirmed("c", 3));
        vp.insert_ordered(confirmed("b2", 2));
        assert_eq!(vp.message_ids(), vec!["a", "b", "b2", "c"]);
    }

    #[test]
    fn test_confirm_replaces_in_place() {
        let mut vp = Viewport::new("t1");
        vp.insert_ordered(confirmed("a", 1));
        let local = Message::user("t1", "hello");
        let local_id = local.id.clone();
        let local_version = local.version;
        vp.insert_ordered(local.clone());

        let mut server = local.clone();
        server.id = "m_2".into();
        server.status = SyncStatus::Confirmed;
        server.version = 0;
        let stamped = vp.confirm(&local_id, server);

        assert_eq!(vp.len(), 2);
        assert_eq!(vp.messages()[1].id, "m_2");
        assert!(stamped.version > local_version);
        assert!(vp.get(&local_id).is_none());
    }

    fn assert_sorted(vp: &Viewport) {
        let keys: Vec<_> = vp.messages().iter().map(Message::order_key).collect();
        assert!(keys.windows(2).all(|pair| pair[0] <= pair[1]), "{:?}", vp.message_ids());
    }

    #[test]
    fn test_merge_moves_message_when_server_time_reorders_it() {
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let mut vp = Viewport::new("t1");
        let mut mine = Message::user("t1", "mine");
        mine.created_at = t0;
        vp.insert_ordered(mine.clone());

        let other = confirmed("m_other", 5);
        let mut echo = confirmed("m_mine", 10);
        echo.content = "mine".into();
        echo.client_id = Some(mine.id.clone());
        assert!(vp.merge_authoritative(vec![other, echo]));

        assert_eq!(vp.message_ids(), vec!["m_other", "m_mine"]);
        assert_sorted(&vp);

        // later inserts still land in order
        vp.insert_ordered(confirmed("m_between", 7));
        assert_eq!(vp.message_ids(), vec!["m_other", "m_between", "m_mine"]);
        assert_sorted(&vp);
    }

    #[test]
    fn test_confirmed_prompt_keeps_its_pending_reply_behind_it() {
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let mut vp = Viewport::new("t1");
        let mut prompt = Message::user("t1", "Hello");
        prompt.created_at = t0;
        prompt.sequence = 1;
        let mut reply = Message::assistant_placeholder("t1");
        reply.created_at = t0;
        reply.sequence = 2;
        vp.insert_ordered(prompt.clone());
        vp.insert_ordered(reply.clone());
        vp.insert_ordered(confirmed("m_late", 30));

        let mut server = confirmed("m_prompt", 20);
        server.content = "Hello".into();
        vp.confirm(&prompt.id, server);

        assert_eq!(vp.message_ids(), vec!["m_prompt".to_string(), reply.id.clone(), "m_late".into()]);
        assert_sorted(&vp);
    }

    #[test]
    fn test_confirm_after_echo_leaves_one_message() {
        let mut vp = Viewport::new("t1");
        let local = Message::user("t1", "hello");
        let local_id = local.id.clone();
        vp.insert_ordered(local.clone());

        // echo without client id arrives first as a separate record
        let mut echo = confirmed("m_1", 10);
        echo.content = "hello".into();
        vp.insert_ordered(echo.clone());
        assert_eq!(vp.len(), 2);

        let mut server = echo.clone();
        server.client_id = Some(local_id.clone());
        vp.confirm(&local_id, server);
        assert_eq!(vp.message_ids(), vec!["m_1"]);
    }

    #[test]
    fn test_merge_prunes_remote_deletes_but_keeps_protected() {
        let mut vp = Viewport::from_parts(
            "t1",
            vec![confirmed("a", 1), confirmed("b", 2), confirmed("c", 3)],
            false,
            false,
        );
        let pending = Message::user("t1", "unsent");
        vp.insert_ordered(pending.clone());

        // "b" vanished on the server
        let changed = vp.merge_authoritative(vec![confirmed("a", 1), confirmed("c", 3)]);
        assert!(changed);
        assert!(vp.get("b").is_none());
        assert!(vp.get(&pending.id).is_some());
    }

    #[test]
    fn test_merge_authoritative_wins_and_detects_noop() {
        let mut vp = Viewport::from_parts("t1", vec![confirmed("a", 1)], false, false);
        assert!(!vp.merge_authoritative(vec![confirmed("a", 1)]));
        assert!(!vp.merge_authoritative(vec![]));

        let mut newer = confirmed("a", 1);
        newer.content = "edited on server".into();
        assert!(vp.merge_authoritative(vec![newer]));
        assert_eq!(vp.get("a").unwrap().content, "edited on server");
        assert_eq!(vp.get("a").unwrap().version, 2);
    }

    #[test]
    fn test_trim_skips_protected_and_sets_flags() {
        let mut vp = Viewport::new("t1");
        let mut streaming = confirmed("s", 0);
        streaming.is_streaming = true;
        vp.insert_ordered(streaming);
        for i in 1..=5 {
            vp.insert_ordered(confirmed(&format!("m{}", i), i));
        }

        assert_eq!(vp.trim(3, EvictFrom::Top), 3);
        assert_eq!(vp.message_ids(), vec!["s", "m4", "m5"]);
        assert!(vp.has_more_top);
        assert!(!vp.has_more_bottom);

        assert_eq!(vp.trim(2, EvictFrom::Bottom), 1);
        assert_eq!(vp.message_ids(), vec!["s", "m4"]);
        assert!(vp.has_more_bottom);
    }

    #[test]
    fn test_trim_cannot_evict_only_protected() {
        let mut vp = Viewport::new("t1");
        vp.insert_ordered(Message::user("t1", "a"));
        vp.insert_ordered(Message::user("t1", "b"));
        assert_eq!(vp.trim(1, EvictFrom::Top), 0);
        assert_eq!(vp.len(), 2);
    }

    #[test]
    fn test_update_bumps_version_and_rekey() {
        let mut vp = Viewport::from_parts("local-t", vec![confirmed("a", 1)], false, false);
        let v = vp.get("a").unwrap().version;
        vp.update("a", |m| m.content = "x".into());
        assert_eq!(vp.get("a").unwrap().version, v + 1);

        vp.rekey_thread("thr_1");
        assert_eq!(vp.thread_id, "thr_1");
        assert!(vp.messages().iter().all(|m| m.thread_id == "thr_1"));
    }

    #[test]
    fn test_prepend_page_skips_known() {
        let mut vp = Viewport::from_parts("t1", vec![confirmed("c", 3)], true, false);
        let added = vp.prepend_page(vec![confirmed("a", 1), confirmed("b", 2), confirmed("c", 3)]);
        assert_eq!(added, 2);
        assert_eq!(vp.message_ids(), vec!["a", "b", "c"]);
        assert_eq!(vp.oldest_confirmed().map(|m| m.id.as_str()), Some("a"));
    }
}
