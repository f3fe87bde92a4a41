//! Ordered, deduplicated message cache for the active conversation.
//!
//! [`MessageStore`] is a plain single-owner structure; [`SharedStore`] wraps
//! it in the one mutex every worker goes through, so each mutating operation
//! is applied atomically with respect to the others.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use tracing::{debug, trace};

use palaver_shared::{Message, MessageId};

use crate::models::{Entry, EntryKey, StoreSnapshot, SystemNotice};

/// Messages of one context, kept sorted by id.
#[derive(Debug, Default)]
pub struct MessageStore {
    /// Context generation this content belongs to.
    generation: u64,
    entries: BTreeMap<EntryKey, Entry>,
    seen: HashSet<MessageId>,
    earliest: Option<MessageId>,
    latest: Option<MessageId>,
    next_notice_seq: u64,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Clear everything (notices included) and load `messages`.
    ///
    /// Returns the number of distinct messages held afterwards.
    pub fn replace_all(&mut self, messages: Vec<Message>) -> usize {
        self.entries.clear();
        self.seen.clear();
        self.earliest = None;
        self.latest = None;

        for message in messages {
            self.insert(message);
        }

        debug!(
            count = self.seen.len(),
            earliest = ?self.earliest,
            latest = ?self.latest,
            "Store replaced"
        );
        self.seen.len()
    }

    /// Insert a batch of history strictly older than [`Self::earliest_id`].
    ///
    /// Ids already present or not below the current earliest id are
    /// skipped. Returns how many messages were inserted; zero means the
    /// batch held no new history.
    pub fn prepend_older(&mut self, messages: Vec<Message>) -> usize {
        let floor = self.earliest;
        let mut inserted = 0;

        for message in messages {
            if floor.is_some_and(|floor| message.id >= floor) {
                trace!(id = %message.id, "Skipping overlapping older message");
                continue;
            }
            if self.insert(message) {
                inserted += 1;
            }
        }

        debug!(inserted, earliest = ?self.earliest, "Prepended older messages");
        inserted
    }

    /// Insert newly arrived messages and return the ones that were not
    /// already present, in id order.
    ///
    /// The returned subset is what unread counting is driven from, so each
    /// message is reported exactly once over the store's lifetime. Messages
    /// older than [`Self::earliest_id`] belong to unfetched history and are
    /// dropped; the earliest id is therefore never moved by this call once
    /// the store holds a message.
    pub fn append_new(&mut self, messages: Vec<Message>) -> Vec<Arc<Message>> {
        let mut fresh: Vec<Arc<Message>> = Vec::new();

        for message in messages {
            if self.earliest.is_some_and(|earliest| message.id < earliest) {
                trace!(id = %message.id, "Dropping message below loaded history");
                continue;
            }
            if self.seen.contains(&message.id) {
                continue;
            }
            let message = Arc::new(message);
            self.insert_arc(Arc::clone(&message));
            fresh.push(message);
        }

        fresh.sort_by_key(|m| m.id);
        if !fresh.is_empty() {
            debug!(count = fresh.len(), latest = ?self.latest, "Appended new messages");
        }
        fresh
    }

    /// Post a local status line after the newest message currently held.
    pub fn post_notice(&mut self, text: impl Into<String>) -> EntryKey {
        self.next_notice_seq += 1;
        let key = EntryKey {
            id: self.latest.unwrap_or(MessageId(0)),
            seq: self.next_notice_seq,
        };
        let notice = SystemNotice {
            text: text.into(),
            posted_at: Utc::now(),
        };
        self.entries.insert(key, Entry::Notice(Arc::new(notice)));
        key
    }

    /// Highest real message id, `None` when no history is loaded yet.
    pub fn max_real_id(&self) -> Option<MessageId> {
        self.latest
    }

    /// Lowest real message id, `None` when empty.
    pub fn earliest_id(&self) -> Option<MessageId> {
        self.earliest
    }

    pub fn contains(&self, id: MessageId) -> bool {
        self.seen.contains(&id)
    }

    /// Number of real messages held.
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Real message ids in display order.
    pub fn ids(&self) -> Vec<MessageId> {
        self.entries
            .keys()
            .filter(|k| !k.is_notice())
            .map(|k| k.id)
            .collect()
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            generation: self.generation,
            entries: self
                .entries
                .iter()
                .map(|(k, e)| (*k, e.clone()))
                .collect(),
        }
    }

    fn insert(&mut self, message: Message) -> bool {
        if self.seen.contains(&message.id) {
            return false;
        }
        self.insert_arc(Arc::new(message));
        true
    }

    fn insert_arc(&mut self, message: Arc<Message>) {
        let id = message.id;
        self.seen.insert(id);
        self.entries.insert(EntryKey::message(id), Entry::Message(message));
        self.earliest = Some(self.earliest.map_or(id, |e| e.min(id)));
        self.latest = Some(self.latest.map_or(id, |l| l.max(id)));
    }
}

// ---------------------------------------------------------------------------
// Shared handle
// ---------------------------------------------------------------------------

/// Cloneable handle to the store shared by the fetcher, the live listener
/// and the render pass.
#[derive(Debug, Clone, Default)]
pub struct SharedStore {
    inner: Arc<Mutex<MessageStore>>,
}

impl SharedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock the store. A poisoned lock is recovered: every operation leaves
    /// the store consistent before it can panic.
    pub fn lock(&self) -> MutexGuard<'_, MessageStore> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    /// Load `messages` as the content of context `generation`.
    pub fn replace(&self, generation: u64, messages: Vec<Message>) -> usize {
        let mut store = self.lock();
        store.generation = generation;
        store.replace_all(messages)
    }

    /// Drop the previous context's content while the next one loads.
    ///
    /// The generation is left alone, so the store does not count as loaded
    /// for any newer context until [`Self::replace`] runs for it.
    pub fn clear_content(&self) {
        self.lock().replace_all(Vec::new());
    }

    /// Run `f` only if the store still holds context `generation`.
    ///
    /// Used to apply fetch results that were computed without the lock held:
    /// a result for a context the user has since left is discarded.
    pub fn apply_if_current<T>(
        &self,
        generation: u64,
        f: impl FnOnce(&mut MessageStore) -> T,
    ) -> Option<T> {
        let mut store = self.lock();
        if store.generation != generation {
            debug!(
                expected = generation,
                actual = store.generation,
                "Discarding result for a stale context"
            );
            return None;
        }
        Some(f(&mut store))
    }

    pub fn post_notice(&self, text: impl Into<String>) -> EntryKey {
        self.lock().post_notice(text)
    }

    pub fn max_real_id(&self) -> Option<MessageId> {
        self.lock().max_real_id()
    }

    pub fn earliest_id(&self) -> Option<MessageId> {
        self.lock().earliest_id()
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        self.lock().snapshot()
    }
}
