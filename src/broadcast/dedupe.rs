//! Duplicate and out-of-order filters for incoming envelopes.

use std::collections::{HashMap, HashSet, VecDeque};

/// Bounded set of `(envelope id, origin)` pairs already consumed.
#[derive(Debug)]
pub struct SeenSet {
    capacity: usize,
    order: VecDeque<(String, String)>,
    seen: HashSet<(String, String)>,
}

impl SeenSet {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: VecDeque::new(),
            seen: HashSet::new(),
        }
    }

    /// Record a pair; false if it was already present.
    pub fn insert(&mut self, id: &str, origin: &str) -> bool {
        let key = (id.to_string(), origin.to_string());
        if !self.seen.insert(key.clone()) {
            return false;
        }
        self.order.push_back(key);
        while self.order.len() > self.capacity {
            if let Some(old) = self.order.pop_front() {
                self.seen.remove(&old);
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

/// Highest message version applied per origin, plus deletion tombstones.
///
/// Versions are counted by the tab that emitted them, so comparisons are
/// only meaningful within one origin. A tombstone blocks the message from
/// every origin.
#[derive(Debug, Default)]
pub struct VersionTable {
    versions: HashMap<(String, String), u64>,
    tombstones: HashSet<String>,
}

impl VersionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// True if `version` is newer than anything seen for this message from `origin`.
    pub fn accept(&mut self, origin: &str, message_id: &str, version: u64) -> bool {
        if self.tombstones.contains(message_id) {
            return false;
        }
        let key = (origin.to_string(), message_id.to_string());
        match self.versions.get(&key) {
            Some(&seen) if version <= seen => false,
            _ => {
                self.versions.insert(key, version);
                true
            }
        }
    }

    pub fn tombstone(&mut self, message_id: &str) {
        self.tombstones.insert(message_id.to_string());
        self.versions.retain(|(_, id), _| id != message_id);
    }

    pub fn is_deleted(&self, message_id: &str) -> bool {
        self.tombstones.contains(message_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seen_set_dedupes_by_id_and_origin() {
        let mut seen = SeenSet::new(10);
        assert!(seen.insert("e1", "tab-a"));
        assert!(!seen.insert("e1", "tab-a"));
        assert!(seen.insert("e1", "tab-b"));
        assert_eq!(seen.len(), 2);
    }

    #[test]
    fn test_seen_set_is_bounded() {
        let mut seen = SeenSet::new(3);
        for i in 0..10 {
            seen.insert(&format!("e{}", i), "tab-a");
        }
        assert_eq!(seen.len(), 3);
        // evicted entries are accepted again
        assert!(seen.insert("e0", "tab-a"));
    }

    #[test]
    fn test_versions_are_per_origin() {
        let mut table = VersionTable::new();
        assert!(table.accept("tab-a", "m1", 2));
        assert!(!table.accept("tab-a", "m1", 1));
        assert!(!table.accept("tab-a", "m1", 2));
        assert!(table.accept("tab-b", "m1", 1));
        assert!(table.accept("tab-a", "m1", 5));
    }

    #[test]
    fn test_tombstone_blocks_all_origins() {
        let mut table = VersionTable::new();
        table.accept("tab-a", "m1", 1);
        table.tombstone("m1");
        assert!(table.is_deleted("m1"));
        assert!(!table.accept("tab-a", "m1", 9));
        assert!(!table.accept("tab-b", "m1", 1));
    }
}
