//! Selection of the active conversation.
//!
//! Every switch bumps a generation number. Work started for one generation
//! carries it along, and its results are dropped if the user has moved on.

use std::sync::{PoisonError, RwLock};

use tracing::info;

use palaver_shared::{ConversationKey, Message, Narrow};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ActiveContext {
    #[default]
    Idle,
    Conversation(ConversationKey),
    Search(String),
}

impl ActiveContext {
    /// Fetch filter of this context, `None` when idle.
    pub fn narrow(&self) -> Option<Narrow> {
        match self {
            Self::Idle => None,
            Self::Conversation(key) => Some(Narrow::Conversation(key.clone())),
            Self::Search(query) => Some(Narrow::Search(query.clone())),
        }
    }

    pub fn conversation(&self) -> Option<&ConversationKey> {
        match self {
            Self::Conversation(key) => Some(key),
            _ => None,
        }
    }

    /// Whether a newly arrived message belongs in this context's store.
    /// Search results are a fixed set and never grow.
    pub fn accepts(&self, message: &Message, own_email: &str) -> bool {
        self.conversation()
            .is_some_and(|key| key.matches(message, own_email))
    }
}

/// The active context together with its generation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextTicket {
    pub generation: u64,
    pub context: ActiveContext,
}

#[derive(Debug, Default)]
pub struct ContextSelector {
    inner: RwLock<ContextTicket>,
}

impl ContextSelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `context` active and return its ticket.
    pub fn select(&self, context: ActiveContext) -> ContextTicket {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.generation += 1;
        inner.context = context;
        info!(generation = inner.generation, context = ?inner.context, "Context selected");
        inner.clone()
    }

    pub fn current(&self) -> ContextTicket {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn generation(&self) -> u64 {
        self.current().generation
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.generation() == generation
    }
}
