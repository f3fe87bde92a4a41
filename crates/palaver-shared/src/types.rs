use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::conversation::ConversationKey;

/// Server-assigned message id. Unique and strictly increasing in arrival order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub u64);

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub u64);

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A roster entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: UserId,
    pub display_name: String,
    pub email: String,
}

impl UserProfile {
    pub fn new(id: u64, display_name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: UserId(id),
            display_name: display_name.into(),
            email: email.into(),
        }
    }
}

/// Where a message was sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    Stream { stream: String, topic: String },
    /// All participants of the thread, the local user included.
    Direct { participants: Vec<UserProfile> },
}

/// An immutable chat message as delivered by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub sender_id: UserId,
    pub sender_email: String,
    pub sender_display_name: String,
    /// Raw server markup.
    pub body: String,
    pub timestamp: DateTime<Utc>,
    pub kind: MessageKind,
}

impl Message {
    /// Whether `user` sent this message.
    pub fn is_from(&self, user: &UserProfile) -> bool {
        self.sender_id == user.id
    }

    /// The unread-tracker key of this message as seen by `own_email`.
    ///
    /// Stream messages key on `(stream, topic)`; direct messages on the
    /// sorted set of non-self participants (a note-to-self keys on the
    /// local user).
    pub fn conversation_key(&self, own_email: &str) -> ConversationKey {
        match &self.kind {
            MessageKind::Stream { stream, topic } => {
                ConversationKey::topic(stream.clone(), topic.clone())
            }
            MessageKind::Direct { participants } => {
                let others: Vec<&str> = participants
                    .iter()
                    .map(|p| p.email.as_str())
                    .filter(|email| *email != own_email)
                    .collect();
                if others.is_empty() {
                    ConversationKey::direct([own_email])
                } else {
                    ConversationKey::direct(others)
                }
            }
        }
    }
}

/// Aggregated presence of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PresenceStatus {
    Active,
    Idle,
    Offline,
}

impl PresenceStatus {
    /// Map a server status string; anything unknown counts as offline.
    pub fn from_status(status: &str) -> Self {
        match status {
            "active" => Self::Active,
            "idle" => Self::Idle,
            _ => Self::Offline,
        }
    }
}
