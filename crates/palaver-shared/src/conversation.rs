//! Conversation keys and fetch narrows.

use serde::{Deserialize, Serialize};

use crate::types::{Message, MessageKind};

/// Canonical, order-independent set of direct-message participant emails.
///
/// The only constructor sorts and deduplicates, so the same group always
/// produces the same set regardless of the order its members arrived in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParticipantSet(Vec<String>);

impl ParticipantSet {
    pub fn new<I, S>(emails: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut emails: Vec<String> = emails.into_iter().map(Into::into).collect();
        emails.sort();
        emails.dedup();
        Self(emails)
    }

    pub fn emails(&self) -> &[String] {
        &self.0
    }

    pub fn contains(&self, email: &str) -> bool {
        self.0.binary_search_by(|e| e.as_str().cmp(email)).is_ok()
    }
}

/// Identifies one conversation: a stream (optionally narrowed to a topic) or
/// a direct-message thread.
///
/// Used both as the unread-tracker key and as the fetch narrow of a context.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConversationKey {
    /// `topic == None` means every topic of the stream.
    StreamTopic {
        stream: String,
        topic: Option<String>,
    },
    DirectMessage(ParticipantSet),
}

impl ConversationKey {
    pub fn stream(stream: impl Into<String>) -> Self {
        Self::StreamTopic {
            stream: stream.into(),
            topic: None,
        }
    }

    pub fn topic(stream: impl Into<String>, topic: impl Into<String>) -> Self {
        Self::StreamTopic {
            stream: stream.into(),
            topic: Some(topic.into()),
        }
    }

    pub fn direct<I, S>(emails: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::DirectMessage(ParticipantSet::new(emails))
    }

    pub fn stream_name(&self) -> Option<&str> {
        match self {
            Self::StreamTopic { stream, .. } => Some(stream),
            Self::DirectMessage(_) => None,
        }
    }

    /// A stream key without a topic: readable, but nothing can be sent to it.
    pub fn is_stream_wide(&self) -> bool {
        matches!(self, Self::StreamTopic { topic: None, .. })
    }

    /// Whether `message` belongs to this conversation, as seen by `own_email`.
    pub fn matches(&self, message: &Message, own_email: &str) -> bool {
        match (self, &message.kind) {
            (
                Self::StreamTopic { stream, topic },
                MessageKind::Stream {
                    stream: msg_stream,
                    topic: msg_topic,
                },
            ) => stream == msg_stream && topic.as_ref().map_or(true, |t| t == msg_topic),
            (Self::DirectMessage(_), MessageKind::Direct { .. }) => {
                *self == message.conversation_key(own_email)
            }
            _ => false,
        }
    }
}

impl std::fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StreamTopic {
                stream,
                topic: Some(topic),
            } => write!(f, "#{stream} > {topic}"),
            Self::StreamTopic { stream, topic: None } => write!(f, "#{stream}"),
            Self::DirectMessage(set) => write!(f, "dm:{}", set.emails().join(",")),
        }
    }
}

/// Server-side filter of a history fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Narrow {
    Conversation(ConversationKey),
    /// Full-text search over everything visible to the user.
    Search(String),
    /// Every direct message, regardless of participants.
    AllDirect,
}

impl Narrow {
    pub fn admits(&self, message: &Message, own_email: &str) -> bool {
        match self {
            Self::Conversation(key) => key.matches(message, own_email),
            Self::Search(query) => {
                let query = query.to_lowercase();
                message.body.to_lowercase().contains(&query)
                    || matches!(&message.kind, MessageKind::Stream { topic, .. }
                        if topic.to_lowercase().contains(&query))
            }
            Self::AllDirect => matches!(message.kind, MessageKind::Direct { .. }),
        }
    }
}
