//! Entries held by the in-memory message store.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use palaver_shared::{Message, MessageId};

// ---------------------------------------------------------------------------
// Entry keys
// ---------------------------------------------------------------------------

/// Ordering key of a store entry.
///
/// Real messages sort by id with `seq == 0`. A notice takes the id of the
/// newest real message present when it was posted and a non-zero `seq`, so
/// it sorts right after that message and before anything newer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryKey {
    pub id: MessageId,
    pub seq: u64,
}

impl EntryKey {
    pub fn message(id: MessageId) -> Self {
        Self { id, seq: 0 }
    }

    pub fn is_notice(&self) -> bool {
        self.seq != 0
    }
}

// ---------------------------------------------------------------------------
// Notices
// ---------------------------------------------------------------------------

/// A local status line interleaved with real messages.
///
/// Never counted as a message: it has no server id and is invisible to
/// dedup, max-id and unread computations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemNotice {
    pub text: String,
    pub posted_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Entries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    Message(Arc<Message>),
    Notice(Arc<SystemNotice>),
}

impl Entry {
    pub fn as_message(&self) -> Option<&Message> {
        match self {
            Entry::Message(m) => Some(m),
            Entry::Notice(_) => None,
        }
    }
}

/// Point-in-time copy of the store, taken under its lock and formatted after
/// the lock is released.
#[derive(Debug, Clone, Default)]
pub struct StoreSnapshot {
    /// Context generation the store was loaded for
    pub generation: u64,
    /// Entries in display order
    pub entries: Vec<(EntryKey, Entry)>,
}

impl StoreSnapshot {
    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.entries.iter().filter_map(|(_, e)| e.as_message())
    }

    pub fn real_len(&self) -> usize {
        self.messages().count()
    }
}
