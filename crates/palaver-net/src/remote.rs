//! Contracts of the remote collaborators.
//!
//! The message source and the roster are consumed through these traits so
//! the synchronization engine never depends on a particular transport.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use palaver_shared::{Message, MessageId, Narrow, PresenceStatus, RemoteError, UserProfile};

// ---------------------------------------------------------------------------
// Fetch requests
// ---------------------------------------------------------------------------

/// Reference point of a paginated fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anchor {
    Newest,
    Id(MessageId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Up to `page_size` messages before the anchor.
    Before,
    /// Up to `page_size` messages after the anchor.
    After,
}

/// One page of history. The anchor itself does not count toward
/// `page_size` but is included in the result when it matches the narrow;
/// callers strip it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub anchor: Anchor,
    pub direction: Direction,
    pub page_size: u32,
    pub narrow: Narrow,
}

impl FetchRequest {
    pub fn newest(narrow: Narrow, page_size: u32) -> Self {
        Self {
            anchor: Anchor::Newest,
            direction: Direction::Before,
            page_size,
            narrow,
        }
    }

    pub fn before(anchor: MessageId, narrow: Narrow, page_size: u32) -> Self {
        Self {
            anchor: Anchor::Id(anchor),
            direction: Direction::Before,
            page_size,
            narrow,
        }
    }

    pub fn after(anchor: MessageId, narrow: Narrow, page_size: u32) -> Self {
        Self {
            anchor: Anchor::Id(anchor),
            direction: Direction::After,
            page_size,
            narrow,
        }
    }
}

/// Destination of an outgoing message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendTarget {
    Stream { stream: String, topic: String },
    Direct { emails: Vec<String> },
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Fetch one page of messages, ordered by ascending id.
    async fn fetch(&self, request: &FetchRequest) -> Result<Vec<Message>, RemoteError>;

    async fn send(&self, target: &SendTarget, body: &str) -> Result<(), RemoteError>;

    /// Stream raw push events into `sink` until the channel drops.
    ///
    /// Returns `Ok(())` when the server closes the channel or the sink goes
    /// away, and an error when the subscription fails.
    async fn subscribe(&self, sink: mpsc::Sender<Value>) -> Result<(), RemoteError>;
}

#[async_trait]
pub trait RosterSource: Send + Sync {
    /// Profile of the authenticated user.
    async fn own_profile(&self) -> Result<UserProfile, RemoteError>;

    async fn list_users(&self) -> Result<Vec<UserProfile>, RemoteError>;

    async fn list_streams(&self) -> Result<Vec<String>, RemoteError>;

    /// The server's topic listing for `stream`. May be empty even when the
    /// stream has traffic; see [`crate::topics::list_topics`].
    async fn list_topics(&self, stream: &str) -> Result<Vec<String>, RemoteError>;

    /// Aggregated presence keyed by email.
    async fn presence(&self) -> Result<HashMap<String, PresenceStatus>, RemoteError>;
}
