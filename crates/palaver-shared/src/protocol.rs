//! Push-event payloads as delivered by the server's event channel.
//!
//! Events arrive as loosely-typed JSON. Anything that does not decode into a
//! well-formed message is reported as a [`ProtocolError`] so the listener can
//! drop it without stopping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;
use crate::types::{Message, MessageId, MessageKind, UserId, UserProfile};

/// Every push event type the client understands.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushEvent {
    /// A new message visible to the user
    Message { message: WireMessage },

    /// Keep-alive sent by the server on an idle channel
    Heartbeat,

    /// Event types this client does not handle
    #[serde(other)]
    Other,
}

/// Message record as serialized on the event channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireMessage {
    pub id: u64,
    pub sender_id: u64,
    pub sender_email: String,
    pub sender_full_name: String,
    pub content: String,
    /// Unix seconds
    pub timestamp: i64,
    #[serde(rename = "type")]
    pub kind: WireKind,
    pub display_recipient: WireRecipient,
    #[serde(default)]
    pub subject: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireKind {
    Stream,
    Private,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireRecipient {
    /// Stream name, or a bare email on legacy one-to-one messages
    Name(String),
    Users(Vec<WireUser>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireUser {
    pub id: u64,
    pub email: String,
    pub full_name: String,
}

impl PushEvent {
    /// Decode a raw event.
    pub fn from_value(value: Value) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_value(value)?)
    }

    pub fn to_value(&self) -> Result<Value, ProtocolError> {
        Ok(serde_json::to_value(self)?)
    }

    /// Build the event announcing `message`.
    pub fn message(message: &Message) -> Self {
        Self::Message {
            message: WireMessage::from(message),
        }
    }
}

impl TryFrom<WireMessage> for Message {
    type Error = ProtocolError;

    fn try_from(wire: WireMessage) -> Result<Self, Self::Error> {
        let timestamp: DateTime<Utc> = DateTime::from_timestamp(wire.timestamp, 0)
            .ok_or(ProtocolError::Timestamp(wire.timestamp))?;

        let kind = match (wire.kind, wire.display_recipient) {
            (WireKind::Stream, WireRecipient::Name(stream)) => {
                if wire.subject.is_empty() {
                    return Err(ProtocolError::Inconsistent(format!(
                        "stream message {} has no topic",
                        wire.id
                    )));
                }
                MessageKind::Stream {
                    stream,
                    topic: wire.subject,
                }
            }
            (WireKind::Stream, WireRecipient::Users(_)) => {
                return Err(ProtocolError::Inconsistent(format!(
                    "stream message {} addressed to users",
                    wire.id
                )));
            }
            (WireKind::Private, WireRecipient::Users(users)) => MessageKind::Direct {
                participants: users
                    .into_iter()
                    .map(|u| UserProfile::new(u.id, u.full_name, u.email))
                    .collect(),
            },
            (WireKind::Private, WireRecipient::Name(email)) => MessageKind::Direct {
                participants: vec![
                    UserProfile::new(wire.sender_id, wire.sender_full_name.clone(), wire.sender_email.clone()),
                    UserProfile::new(0, email.clone(), email),
                ],
            },
        };

        Ok(Message {
            id: MessageId(wire.id),
            sender_id: UserId(wire.sender_id),
            sender_email: wire.sender_email,
            sender_display_name: wire.sender_full_name,
            body: wire.content,
            timestamp,
            kind,
        })
    }
}

impl From<&Message> for WireMessage {
    fn from(message: &Message) -> Self {
        let (kind, display_recipient, subject) = match &message.kind {
            MessageKind::Stream { stream, topic } => (
                WireKind::Stream,
                WireRecipient::Name(stream.clone()),
                topic.clone(),
            ),
            MessageKind::Direct { participants } => (
                WireKind::Private,
                WireRecipient::Users(
                    participants
                        .iter()
                        .map(|p| WireUser {
                            id: p.id.0,
                            email: p.email.clone(),
                            full_name: p.display_name.clone(),
                        })
                        .collect(),
                ),
                String::new(),
            ),
        };

        Self {
            id: message.id.0,
            sender_id: message.sender_id.0,
            sender_email: message.sender_email.clone(),
            sender_full_name: message.sender_display_name.clone(),
            content: message.body.clone(),
            timestamp: message.timestamp.timestamp(),
            kind,
            display_recipient,
            subject,
        }
    }
}

/// Decode a raw event into the message it carries, if any.
///
/// `Ok(None)` means a well-formed event that carries no message.
pub fn decode_message_event(value: Value) -> Result<Option<Message>, ProtocolError> {
    match PushEvent::from_value(value)? {
        PushEvent::Message { message } => Message::try_from(message).map(Some),
        PushEvent::Heartbeat | PushEvent::Other => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_decode_stream_message() {
        let event = json!({
            "type": "message",
            "message": {
                "id": 42,
                "sender_id": 7,
                "sender_email": "bob@example.com",
                "sender_full_name": "Bob",
                "content": "<p>hello</p>",
                "timestamp": 1_700_000_000,
                "type": "stream",
                "display_recipient": "ops",
                "subject": "deploys"
            }
        });

        let msg = decode_message_event(event).unwrap().unwrap();
        assert_eq!(msg.id, MessageId(42));
        assert_eq!(
            msg.kind,
            MessageKind::Stream {
                stream: "ops".into(),
                topic: "deploys".into()
            }
        );
    }

    #[test]
    fn test_decode_group_dm() {
        let event = json!({
            "type": "message",
            "message": {
                "id": 43,
                "sender_id": 7,
                "sender_email": "bob@example.com",
                "sender_full_name": "Bob",
                "content": "hi",
                "timestamp": 1_700_000_000,
                "type": "private",
                "display_recipient": [
                    {"id": 7, "email": "bob@example.com", "full_name": "Bob"},
                    {"id": 1, "email": "me@example.com", "full_name": "Me"}
                ]
            }
        });

        let msg = decode_message_event(event).unwrap().unwrap();
        match msg.kind {
            MessageKind::Direct { participants } => assert_eq!(participants.len(), 2),
            other => panic!("unexpected kind {other:?}"),
        }
    }

    #[test]
    fn test_missing_fields_rejected() {
        let event = json!({"type": "message", "message": {"id": 1}});
        assert!(decode_message_event(event).is_err());
    }

    #[test]
    fn test_unknown_event_ignored() {
        let event = json!({"type": "presence", "email": "bob@example.com"});
        assert!(decode_message_event(event).unwrap().is_none());
        assert!(decode_message_event(json!({"type": "heartbeat"})).unwrap().is_none());
    }

    #[test]
    fn test_encoded_event_decodes_back() {
        let msg = Message {
            id: MessageId(9),
            sender_id: UserId(2),
            sender_email: "bob@example.com".into(),
            sender_display_name: "Bob".into(),
            body: "x".into(),
            timestamp: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            kind: MessageKind::Stream {
                stream: "ops".into(),
                topic: "t".into(),
            },
        };
        let value = PushEvent::message(&msg).to_value().unwrap();
        assert_eq!(decode_message_event(value).unwrap(), Some(msg));
    }
}
