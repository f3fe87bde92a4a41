use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use palaver_net::{PresenceTracker, RecentConversation};
use palaver_shared::UserProfile;
use palaver_store::{SharedStore, SharedUnread};

use crate::config::ClientConfig;
use crate::context::{ContextSelector, ContextTicket};
use crate::render::Formatter;
use crate::viewport::{Layout, Viewport};

/// Background activity that can put a message in the status line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusSource {
    Sync,
    Prefetch,
    Roster,
}

/// Roster data refreshed by the presence poller.
#[derive(Debug, Clone, Default)]
pub struct RosterView {
    pub users: Vec<UserProfile>,
    pub streams: Vec<String>,
    pub recent: Vec<RecentConversation>,
    pub presence: PresenceTracker,
}

impl RosterView {
    /// Look a user up by display name or email, ignoring case.
    pub fn find_user(&self, name: &str) -> Option<&UserProfile> {
        let name = name.trim();
        self.users.iter().find(|u| {
            u.display_name.eq_ignore_ascii_case(name) || u.email.eq_ignore_ascii_case(name)
        })
    }

    pub fn has_stream(&self, stream: &str) -> bool {
        self.streams.iter().any(|s| s == stream)
    }
}

/// Everything the workers and the render pass share.
///
/// Each field carries its own lock and no code path holds two of them at
/// once.
pub struct SessionState {
    pub me: UserProfile,
    pub config: ClientConfig,
    pub formatter: Formatter,
    pub store: SharedStore,
    pub unread: SharedUnread,
    pub context: Arc<ContextSelector>,
    viewport: Mutex<Viewport>,
    roster: Mutex<RosterView>,
    status: Mutex<Option<(StatusSource, String)>>,
    blink_on: AtomicBool,
    /// Generation whose initial load failed and should be retried.
    pending_reload: AtomicU64,
}

impl SessionState {
    pub fn new(me: UserProfile, config: ClientConfig) -> Self {
        let viewport = Viewport::new(config.window_height, config.prefetch_threshold);
        Self {
            me,
            formatter: Formatter::new(&config),
            config,
            store: SharedStore::new(),
            unread: SharedUnread::new(),
            context: Arc::new(ContextSelector::new()),
            viewport: Mutex::new(viewport),
            roster: Mutex::new(RosterView::default()),
            status: Mutex::new(None),
            blink_on: AtomicBool::new(true),
            pending_reload: AtomicU64::new(0),
        }
    }

    pub fn viewport(&self) -> MutexGuard<'_, Viewport> {
        self.viewport.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn roster(&self) -> MutexGuard<'_, RosterView> {
        self.roster.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn roster_snapshot(&self) -> RosterView {
        self.roster().clone()
    }

    /// Post a local notice into the active store.
    pub fn notice(&self, text: impl Into<String>) {
        let text = text.into();
        debug!(notice = %text, "System notice");
        self.store.post_notice(text);
    }

    // -----------------------------------------------------------------------
    // Status line
    // -----------------------------------------------------------------------

    pub fn set_status(&self, source: StatusSource, text: impl Into<String>) {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner) = Some((source, text.into()));
    }

    /// Clear the status line if `source` set it.
    pub fn clear_status(&self, source: StatusSource) {
        let mut status = self.status.lock().unwrap_or_else(PoisonError::into_inner);
        if status.as_ref().is_some_and(|(s, _)| *s == source) {
            *status = None;
        }
    }

    pub fn status(&self) -> Option<String> {
        self.status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|(_, text)| text.clone())
    }

    // -----------------------------------------------------------------------
    // Blink
    // -----------------------------------------------------------------------

    /// Flip the blink phase and return the new one.
    pub fn toggle_blink(&self) -> bool {
        !self.blink_on.fetch_xor(true, Ordering::AcqRel)
    }

    pub fn blink_on(&self) -> bool {
        self.blink_on.load(Ordering::Acquire)
    }

    // -----------------------------------------------------------------------
    // Reloads
    // -----------------------------------------------------------------------

    pub fn request_reload(&self, generation: u64) {
        self.pending_reload.store(generation, Ordering::Release);
    }

    /// Take the pending reload if it is for `generation`.
    pub fn take_reload(&self, generation: u64) -> bool {
        self.pending_reload
            .compare_exchange(generation, 0, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    // -----------------------------------------------------------------------
    // Layout
    // -----------------------------------------------------------------------

    /// Format the current store content for the active context.
    ///
    /// Messages are left out until the store has been loaded for it.
    pub fn layout(&self) -> (ContextTicket, Layout) {
        let ticket = self.context.current();
        let mut snapshot = self.store.snapshot();
        if snapshot.generation != ticket.generation {
            // Not loaded for this context yet: only notices belong to it.
            snapshot.entries.retain(|(key, _)| key.is_notice());
        }
        let users = self.roster().users.clone();
        let layout = self.formatter.layout(&ticket.context, &snapshot, &users);
        (ticket, layout)
    }

    /// Re-clamp the viewport after the store changed underneath it.
    pub fn reclamp(&self) {
        let (_, layout) = self.layout();
        self.viewport().clamp(&layout);
    }
}
