//! # palaver-shared
//!
//! Domain types shared by every palaver crate: messages, users, conversation
//! keys, fetch narrows, push-event decoding and the common error types.

pub mod constants;
pub mod conversation;
pub mod error;
pub mod protocol;
pub mod types;

pub use conversation::{ConversationKey, Narrow, ParticipantSet};
pub use error::{ProtocolError, RemoteError};
pub use types::{Message, MessageId, MessageKind, PresenceStatus, UserId, UserProfile};
