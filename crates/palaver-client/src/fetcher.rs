//! Paginated history loading for the active context.
//!
//! Every fetch runs without any lock held. Results are applied through
//! [`SharedStore::apply_if_current`] so a page computed for a context the
//! user has since left never reaches the store.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, info};

use palaver_net::{FetchRequest, MessageSource};
use palaver_shared::{Message, MessageId, Narrow};
use palaver_store::SharedStore;

use crate::context::{ActiveContext, ContextSelector, ContextTicket};
use crate::error::FetchError;

/// Who asked for older history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOrigin {
    /// An explicit scroll or key press
    User,
    /// Background prefetch or a scroll-triggered prefetch
    Prefetch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OlderOutcome {
    /// This many older messages were inserted.
    Loaded(usize),
    /// The server has nothing older. Reported once per boundary.
    Exhausted,
    /// Nothing older, already reported for this boundary.
    AlreadyExhausted,
    /// Another older-history load is in flight.
    Busy,
}

/// Clears the in-flight flag when the load finishes, however it finishes.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct HistoryFetcher {
    source: Arc<dyn MessageSource>,
    store: SharedStore,
    context: Arc<ContextSelector>,
    older_in_flight: AtomicBool,
    /// Generation and earliest id at which history ran out.
    exhausted_at: Mutex<Option<(u64, Option<MessageId>)>>,
}

impl HistoryFetcher {
    pub fn new(
        source: Arc<dyn MessageSource>,
        store: SharedStore,
        context: Arc<ContextSelector>,
    ) -> Self {
        Self {
            source,
            store,
            context,
            older_in_flight: AtomicBool::new(false),
            exhausted_at: Mutex::new(None),
        }
    }

    pub fn is_loading_older(&self) -> bool {
        self.older_in_flight.load(Ordering::Acquire)
    }

    /// Replace the store with the newest `page_size` messages of `ticket`'s
    /// context.
    ///
    /// On failure the store keeps its previous content.
    pub async fn load_initial(
        &self,
        ticket: &ContextTicket,
        page_size: u32,
    ) -> Result<usize, FetchError> {
        let narrow = ticket.context.narrow().ok_or(FetchError::NoContext)?;
        let messages = self
            .source
            .fetch(&FetchRequest::newest(narrow, page_size))
            .await?;

        if !self.context.is_current(ticket.generation) {
            debug!(generation = ticket.generation, "Dropping initial page of a stale context");
            return Err(FetchError::Superseded);
        }

        let count = self.store.replace(ticket.generation, messages);
        info!(generation = ticket.generation, count, "Initial history loaded");
        Ok(count)
    }

    /// Load one page of history older than the earliest message held.
    ///
    /// At most one such load runs at a time. A prefetch never asks the
    /// server again about a boundary already known to be exhausted; an
    /// explicit user request does.
    pub async fn load_older(
        &self,
        page_size: u32,
        origin: LoadOrigin,
    ) -> Result<OlderOutcome, FetchError> {
        if self.older_in_flight.swap(true, Ordering::AcqRel) {
            return Ok(OlderOutcome::Busy);
        }
        let _guard = InFlight(&self.older_in_flight);

        let ticket = self.context.current();
        let narrow = ticket.context.narrow().ok_or(FetchError::NoContext)?;
        let earliest = self
            .store
            .apply_if_current(ticket.generation, |store| store.earliest_id())
            .ok_or(FetchError::NotLoaded)?;
        let boundary = (ticket.generation, earliest);

        if origin == LoadOrigin::Prefetch && self.exhausted_boundary() == Some(boundary) {
            return Ok(OlderOutcome::AlreadyExhausted);
        }

        let Some(anchor) = earliest else {
            // Nothing loaded, so nothing can be older than it.
            return Ok(self.mark_exhausted(boundary));
        };

        let batch: Vec<Message> = self
            .source
            .fetch(&FetchRequest::before(anchor, narrow, page_size))
            .await?
            .into_iter()
            .filter(|m| m.id < anchor)
            .collect();

        let inserted = self
            .store
            .apply_if_current(ticket.generation, |store| store.prepend_older(batch))
            .ok_or(FetchError::Superseded)?;

        if inserted == 0 {
            return Ok(self.mark_exhausted(boundary));
        }
        debug!(inserted, ?origin, "Older history loaded");
        Ok(OlderOutcome::Loaded(inserted))
    }

    /// Fetch messages newer than the newest one held and append them.
    ///
    /// Returns the messages that were actually new to the store, which is
    /// what unread counting must be driven from. Search contexts are fixed
    /// result sets and are never caught up. An empty conversation is caught
    /// up from its newest page.
    pub async fn catch_up(&self, batch_size: u32) -> Result<Vec<Arc<Message>>, FetchError> {
        let ticket = self.context.current();
        let ActiveContext::Conversation(key) = &ticket.context else {
            return Ok(Vec::new());
        };
        let Some(latest) = self
            .store
            .apply_if_current(ticket.generation, |store| store.max_real_id())
        else {
            return Ok(Vec::new());
        };

        let narrow = Narrow::Conversation(key.clone());
        let request = match latest {
            Some(id) => FetchRequest::after(id, narrow, batch_size),
            None => FetchRequest::newest(narrow, batch_size),
        };
        let messages: Vec<Message> = self
            .source
            .fetch(&request)
            .await?
            .into_iter()
            .filter(|m| latest.map_or(true, |latest| m.id > latest))
            .collect();

        if messages.is_empty() {
            return Ok(Vec::new());
        }
        self.store
            .apply_if_current(ticket.generation, |store| store.append_new(messages))
            .ok_or(FetchError::Superseded)
    }

    fn exhausted_boundary(&self) -> Option<(u64, Option<MessageId>)> {
        *self
            .exhausted_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn mark_exhausted(&self, boundary: (u64, Option<MessageId>)) -> OlderOutcome {
        let mut exhausted = self
            .exhausted_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if *exhausted == Some(boundary) {
            return OlderOutcome::AlreadyExhausted;
        }
        *exhausted = Some(boundary);
        info!(generation = boundary.0, earliest = ?boundary.1, "No more history");
        OlderOutcome::Exhausted
    }
}
