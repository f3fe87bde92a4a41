//! # palaver-store
//!
//! In-memory state shared between the palaver workers: the message cache of
//! the active conversation and the unread counters of every conversation.
//!
//! Each structure is a plain type with `&mut self` operations plus a
//! cloneable `Shared*` handle that guards it with its own mutex. The two
//! locks are independent and never held at the same time.

pub mod messages;
pub mod models;
pub mod unread;

pub use messages::{MessageStore, SharedStore};
pub use models::*;
pub use unread::{SharedUnread, UnreadSnapshot, UnreadTracker};
