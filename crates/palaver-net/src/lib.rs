//! Remote collaborator layer: the message-source and roster contracts, the
//! helpers built on top of them, and an in-memory loopback backend.

pub mod memory;
pub mod presence;
pub mod recent;
pub mod remote;
pub mod topics;

pub use memory::MemoryRemote;
pub use presence::{PresenceGroups, PresenceTracker};
pub use recent::{recent_direct_conversations, RecentConversation};
pub use remote::{Anchor, Direction, FetchRequest, MessageSource, RosterSource, SendTarget};
pub use topics::list_topics;
