//! Per-conversation unread counters.
//!
//! Counts only grow through [`UnreadTracker::record`] and only drop, to zero,
//! through [`UnreadTracker::mark_read`]. They live for the whole process.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use palaver_shared::ConversationKey;

#[derive(Debug, Default)]
pub struct UnreadTracker {
    counts: HashMap<ConversationKey, u32>,
}

impl UnreadTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one more unread message for `key`. Returns the new count.
    pub fn record(&mut self, key: ConversationKey) -> u32 {
        let count = self.counts.entry(key).or_insert(0);
        *count = count.saturating_add(1);
        *count
    }

    /// Reset `key` to zero.
    pub fn mark_read(&mut self, key: &ConversationKey) {
        if let Some(previous) = self.counts.remove(key) {
            debug!(key = %key, previous, "Marked conversation read");
        }
    }

    pub fn count(&self, key: &ConversationKey) -> u32 {
        self.counts.get(key).copied().unwrap_or(0)
    }

    /// Copy of every key with a non-zero count, sorted by key.
    pub fn snapshot(&self) -> UnreadSnapshot {
        let mut entries: Vec<(ConversationKey, u32)> = self
            .counts
            .iter()
            .filter(|(_, count)| **count > 0)
            .map(|(key, count)| (key.clone(), *count))
            .collect();
        entries.sort();
        UnreadSnapshot { entries }
    }
}

/// Read-only view of the unread counters, safe to format without the lock.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnreadSnapshot {
    pub entries: Vec<(ConversationKey, u32)>,
}

impl UnreadSnapshot {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total(&self) -> u32 {
        self.entries.iter().map(|(_, c)| *c).sum()
    }

    pub fn count(&self, key: &ConversationKey) -> u32 {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map_or(0, |(_, c)| *c)
    }

    /// Unread messages across every topic of `stream`.
    pub fn stream_total(&self, stream: &str) -> u32 {
        self.entries
            .iter()
            .filter(|(k, _)| k.stream_name() == Some(stream))
            .map(|(_, c)| *c)
            .sum()
    }
}

/// Cloneable handle to the tracker, guarded by its own lock.
#[derive(Debug, Clone, Default)]
pub struct SharedUnread {
    inner: Arc<Mutex<UnreadTracker>>,
}

impl SharedUnread {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, UnreadTracker> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record(&self, key: ConversationKey) -> u32 {
        self.lock().record(key)
    }

    pub fn mark_read(&self, key: &ConversationKey) {
        self.lock().mark_read(key)
    }

    pub fn count(&self, key: &ConversationKey) -> u32 {
        self.lock().count(key)
    }

    pub fn snapshot(&self) -> UnreadSnapshot {
        self.lock().snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_counts_each_call() {
        let mut tracker = UnreadTracker::new();
        let key = ConversationKey::topic("ops", "deploys");

        for expected in 1..=5 {
            assert_eq!(tracker.record(key.clone()), expected);
        }
        assert_eq!(tracker.count(&key), 5);
    }

    #[test]
    fn test_mark_read_resets_to_zero() {
        let mut tracker = UnreadTracker::new();
        let key = ConversationKey::direct(["bob@example.com"]);
        tracker.record(key.clone());
        tracker.record(key.clone());

        tracker.mark_read(&key);
        assert_eq!(tracker.count(&key), 0);
        assert!(tracker.snapshot().is_empty());

        tracker.mark_read(&key);
        assert_eq!(tracker.count(&key), 0);
    }

    #[test]
    fn test_mark_read_leaves_other_keys() {
        let mut tracker = UnreadTracker::new();
        let deploys = ConversationKey::topic("ops", "deploys");
        let alerts = ConversationKey::topic("ops", "alerts");
        tracker.record(deploys.clone());
        tracker.record(alerts.clone());
        tracker.record(alerts.clone());

        tracker.mark_read(&deploys);

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.entries, vec![(alerts.clone(), 2)]);
        assert_eq!(snapshot.stream_total("ops"), 2);
        assert_eq!(snapshot.total(), 2);
    }

    #[test]
    fn test_snapshot_does_not_mutate() {
        let shared = SharedUnread::new();
        let key = ConversationKey::topic("dev", "ci");
        shared.record(key.clone());

        let first = shared.snapshot();
        let second = shared.snapshot();
        assert_eq!(first, second);
        assert_eq!(shared.count(&key), 1);
    }
}
