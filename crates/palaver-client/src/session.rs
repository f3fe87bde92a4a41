//! A running chat session.
//!
//! [`Session::start`] spawns the background workers:
//!
//! - the command worker, which runs user commands one at a time
//! - the sync poller, which catches the active conversation up
//! - the roster poller, which refreshes presence and recent DMs
//! - the blink ticker of the notification bar
//! - the live listener
//!
//! The presentation loop only calls [`Session::handle_input`] and
//! [`Session::render`], neither of which waits on the network.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use palaver_net::{list_topics, recent_direct_conversations, MessageSource, RosterSource, SendTarget};
use palaver_shared::{ConversationKey, UserProfile};

use crate::config::ClientConfig;
use crate::context::ActiveContext;
use crate::error::{FetchError, SessionError};
use crate::events::{UiEvent, UiNotifier};
use crate::fetcher::{HistoryFetcher, LoadOrigin, OlderOutcome};
use crate::listener::{record_fresh, LiveListener};
use crate::render::Line;
use crate::scheduler::{spawn_periodic, Shutdown};
use crate::state::{SessionState, StatusSource};
use crate::viewport::ViewMode;

const COMMAND_QUEUE: usize = 32;

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

/// Commands typed by the user, already parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserCommand {
    OpenStream(String),
    OpenTopic(String),
    /// Open a direct conversation with a user, by display name.
    OpenDirect(String),
    Search(String),
    Send(String),
    Exit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEvent {
    ScrollUp,
    ScrollDown,
    PageUp,
    PageDown,
    /// The chat window now has this many lines.
    Resize(usize),
    Command(UserCommand),
}

#[derive(Debug)]
enum WorkerCommand {
    User(UserCommand),
    LoadOlder(LoadOrigin),
}

/// Everything the presentation layer draws, computed in one pass.
#[derive(Debug, Clone)]
pub struct Frame {
    pub chat: Vec<Line>,
    pub mode: ViewMode,
    pub notification_bar: Line,
    pub conversations: Vec<Line>,
    pub presence: Vec<Line>,
    pub status: Option<Line>,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Async half of the session, shared by every worker.
struct Engine {
    state: Arc<SessionState>,
    fetcher: HistoryFetcher,
    source: Arc<dyn MessageSource>,
    roster: Arc<dyn RosterSource>,
    ui: UiNotifier,
    shutdown: Shutdown,
}

impl Engine {
    async fn run_commands(self: Arc<Self>, mut commands: mpsc::Receiver<WorkerCommand>) {
        let mut shutdown = self.shutdown.signal();
        loop {
            let command = tokio::select! {
                command = commands.recv() => command,
                _ = shutdown.wait() => None,
            };
            let Some(command) = command else { break };

            debug!(?command, "Running command");
            match command {
                WorkerCommand::User(command) => self.execute(command).await,
                WorkerCommand::LoadOlder(origin) => self.load_older(origin).await,
            }
            self.ui.notify(UiEvent::Redraw);

            if shutdown.is_set() {
                break;
            }
        }
        info!("Command worker stopped");
    }

    async fn execute(self: &Arc<Self>, command: UserCommand) {
        match command {
            UserCommand::OpenStream(stream) => self.open_stream(stream.trim()).await,
            UserCommand::OpenTopic(topic) => self.open_topic(topic.trim()).await,
            UserCommand::OpenDirect(name) => self.open_direct(name.trim()).await,
            UserCommand::Search(query) => self.search(query.trim()).await,
            UserCommand::Send(body) => self.send(&body).await,
            // Handled synchronously by the session.
            UserCommand::Exit => {}
        }
    }

    // -----------------------------------------------------------------------
    // Context selection
    // -----------------------------------------------------------------------

    async fn open_stream(self: &Arc<Self>, stream: &str) {
        if !self.state.roster().has_stream(stream) {
            self.refresh_streams().await;
        }
        if !self.state.roster().has_stream(stream) {
            self.state.notice(format!("(Invalid stream: {stream})"));
            return;
        }
        let key = ConversationKey::stream(stream);
        self.open_conversation(key, format!("(Selected stream: {stream})"))
            .await;
    }

    async fn open_topic(self: &Arc<Self>, topic: &str) {
        let stream = self
            .state
            .context
            .current()
            .context
            .conversation()
            .and_then(|key| key.stream_name().map(str::to_string));
        let Some(stream) = stream else {
            self.state.notice("(Pick a stream first!)");
            return;
        };

        let topics = list_topics(
            self.roster.as_ref(),
            self.source.as_ref(),
            &stream,
            self.state.config.topic_scan_depth,
        )
        .await;
        match topics {
            Ok(topics) if topics.iter().any(|t| t == topic) => {
                let key = ConversationKey::topic(stream, topic);
                self.open_conversation(key, format!("(Selected topic: {topic})"))
                    .await;
            }
            Ok(_) => self.state.notice(format!("(Invalid topic: {topic})")),
            Err(e) => self.state.notice(format!("(Failed to list topics: {e})")),
        }
    }

    async fn open_direct(self: &Arc<Self>, name: &str) {
        let mut user = self.state.roster().find_user(name).cloned();
        if user.is_none() {
            self.refresh_users().await;
            user = self.state.roster().find_user(name).cloned();
        }
        let Some(user) = user else {
            self.state.notice(format!("(User not found: {name})"));
            return;
        };
        let key = ConversationKey::direct([user.email.as_str()]);
        self.open_conversation(key, format!("(Switched to DM with: {})", user.display_name))
            .await;
    }

    async fn open_conversation(self: &Arc<Self>, key: ConversationKey, selected: String) {
        let ticket = self
            .state
            .context
            .select(ActiveContext::Conversation(key.clone()));
        self.state.store.clear_content();
        self.state.unread.mark_read(&key);
        self.state.viewport().follow();
        self.ui.notify(UiEvent::NotifyBar);

        match self
            .fetcher
            .load_initial(&ticket, self.state.config.page_size)
            .await
        {
            Ok(count) => {
                self.state.notice(selected);
                self.state.notice(format!("(Loaded {count} messages.)"));
                if self.state.config.prefetch_history {
                    self.spawn_prefetch(ticket.generation);
                }
            }
            Err(FetchError::Superseded) => {}
            Err(e) => {
                warn!(error = %e, "Initial load failed");
                self.state.request_reload(ticket.generation);
                self.state.notice(format!("(Failed to fetch messages: {e})"));
            }
        }
    }

    async fn search(self: &Arc<Self>, query: &str) {
        if query.is_empty() {
            self.state.notice("(Nothing to search for.)");
            return;
        }
        let ticket = self
            .state
            .context
            .select(ActiveContext::Search(query.to_string()));
        self.state.store.clear_content();
        self.state.viewport().follow();

        match self
            .fetcher
            .load_initial(&ticket, self.state.config.search_page_size)
            .await
        {
            Ok(0) => self.state.notice("(No matches found.)"),
            Ok(count) => self.state.notice(format!("(Found {count} matches for: {query})")),
            Err(FetchError::Superseded) => {}
            Err(e) => {
                self.state.request_reload(ticket.generation);
                self.state.notice(format!("(Search failed: {e})"));
            }
        }
    }

    // -----------------------------------------------------------------------
    // Sending
    // -----------------------------------------------------------------------

    async fn send(self: &Arc<Self>, body: &str) {
        if body.trim().is_empty() {
            return;
        }
        let ticket = self.state.context.current();
        let Some(key) = ticket.context.conversation().cloned() else {
            self.state.notice("(Pick a stream/topic or DM first!)");
            return;
        };
        let target = match &key {
            ConversationKey::StreamTopic {
                stream,
                topic: Some(topic),
            } => SendTarget::Stream {
                stream: stream.clone(),
                topic: topic.clone(),
            },
            ConversationKey::StreamTopic { topic: None, .. } => {
                self.state
                    .notice("(Pick a topic before sending a message to a stream!)");
                return;
            }
            ConversationKey::DirectMessage(participants) => SendTarget::Direct {
                emails: participants.emails().to_vec(),
            },
        };

        if let Err(e) = self.source.send(&target, body).await {
            warn!(error = %e, "Send failed");
            self.state.notice(format!("(Failed to send: {e})"));
            return;
        }

        self.sync().await;
        self.state.unread.mark_read(&key);
        self.state.viewport().follow();
        self.state.notice("(sent)");
        self.ui.notify(UiEvent::NotifyBar);
    }

    // -----------------------------------------------------------------------
    // History
    // -----------------------------------------------------------------------

    async fn load_older(&self, origin: LoadOrigin) {
        match self
            .fetcher
            .load_older(self.state.config.page_size, origin)
            .await
        {
            Ok(OlderOutcome::Loaded(count)) => {
                self.state.clear_status(StatusSource::Prefetch);
                self.state.reclamp();
                if origin == LoadOrigin::User {
                    self.state
                        .notice(format!("(Loaded {count} older messages.)"));
                }
            }
            Ok(OlderOutcome::Exhausted) => self.state.notice("(No more history to load.)"),
            Ok(OlderOutcome::AlreadyExhausted | OlderOutcome::Busy) => {}
            Err(FetchError::Remote(e)) if origin == LoadOrigin::User => {
                self.state
                    .notice(format!("(Failed to load older messages: {e})"));
            }
            Err(FetchError::Remote(e)) => {
                self.state
                    .set_status(StatusSource::Prefetch, format!("History prefetch failed: {e}"));
            }
            Err(e) => debug!(error = %e, "Older history not loaded"),
        }
    }

    /// Keep loading older pages of `generation` until history runs out.
    fn spawn_prefetch(self: &Arc<Self>, generation: u64) {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let mut shutdown = engine.shutdown.signal();
            loop {
                if shutdown.sleep(engine.state.config.prefetch_delay).await {
                    break;
                }
                if !engine.state.context.is_current(generation) {
                    break;
                }
                let result = engine
                    .fetcher
                    .load_older(engine.state.config.page_size, LoadOrigin::Prefetch)
                    .await;
                match result {
                    Ok(OlderOutcome::Loaded(_)) => {
                        engine.state.clear_status(StatusSource::Prefetch);
                        engine.state.reclamp();
                        engine.ui.notify(UiEvent::Redraw);
                    }
                    Ok(OlderOutcome::Busy) => {}
                    Ok(OlderOutcome::Exhausted) => {
                        engine.state.notice("(No more history to load.)");
                        engine.ui.notify(UiEvent::Redraw);
                        break;
                    }
                    Ok(OlderOutcome::AlreadyExhausted) => break,
                    Err(FetchError::Remote(e)) => {
                        engine
                            .state
                            .set_status(StatusSource::Prefetch, format!("History prefetch failed: {e}"));
                        break;
                    }
                    Err(_) => break,
                }
            }
            debug!(generation, "History prefetch finished");
        });
    }

    /// Catch the active conversation up and count what was new.
    async fn sync(&self) {
        let ticket = self.state.context.current();
        if self.state.take_reload(ticket.generation) {
            let page_size = match ticket.context {
                ActiveContext::Search(_) => self.state.config.search_page_size,
                _ => self.state.config.page_size,
            };
            match self.fetcher.load_initial(&ticket, page_size).await {
                Ok(count) => {
                    self.state.clear_status(StatusSource::Sync);
                    self.state.notice(format!("(Loaded {count} messages.)"));
                    self.ui.notify(UiEvent::Redraw);
                }
                Err(FetchError::Superseded) => {}
                Err(e) => {
                    self.state.request_reload(ticket.generation);
                    self.state
                        .set_status(StatusSource::Sync, format!("Sync failed: {e}"));
                }
            }
            return;
        }

        match self.fetcher.catch_up(self.state.config.catch_up_batch).await {
            Ok(fresh) => {
                self.state.clear_status(StatusSource::Sync);
                if fresh.is_empty() {
                    return;
                }
                if record_fresh(&self.state.unread, &self.state.me, &fresh) > 0 {
                    self.ui.notify(UiEvent::NotifyBar);
                }
                self.state.reclamp();
                self.ui.notify(UiEvent::Redraw);
            }
            Err(FetchError::Remote(e)) => {
                self.state
                    .set_status(StatusSource::Sync, format!("Sync failed: {e}"));
            }
            Err(e) => debug!(error = %e, "Catch-up skipped"),
        }
    }

    // -----------------------------------------------------------------------
    // Roster
    // -----------------------------------------------------------------------

    async fn refresh_streams(&self) {
        match self.roster.list_streams().await {
            Ok(streams) => self.state.roster().streams = streams,
            Err(e) => warn!(error = %e, "Failed to list streams"),
        }
    }

    async fn refresh_users(&self) {
        match self.roster.list_users().await {
            Ok(users) => self.state.roster().users = users,
            Err(e) => warn!(error = %e, "Failed to list users"),
        }
    }

    /// Presence and recent direct conversations.
    async fn refresh_roster(&self) {
        let presence = self.roster.presence().await;
        let recent = recent_direct_conversations(
            self.source.as_ref(),
            &self.state.me.email,
            self.state.config.recent_dm_limit,
        )
        .await;

        match (presence, recent) {
            (Ok(presence), Ok(recent)) => {
                {
                    let mut roster = self.state.roster();
                    roster.presence.update(presence);
                    roster.recent = recent;
                }
                self.state.clear_status(StatusSource::Roster);
                self.ui.notify(UiEvent::Redraw);
            }
            (Err(e), _) | (_, Err(e)) => {
                self.state
                    .set_status(StatusSource::Roster, format!("Roster refresh failed: {e}"));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

pub struct Session {
    state: Arc<SessionState>,
    engine: Arc<Engine>,
    commands: mpsc::Sender<WorkerCommand>,
    workers: Vec<JoinHandle<()>>,
}

impl Session {
    /// Identify the local user, load the roster and spawn the workers.
    ///
    /// The returned receiver yields redraw hints for the presentation loop.
    pub async fn start(
        config: ClientConfig,
        source: Arc<dyn MessageSource>,
        roster: Arc<dyn RosterSource>,
    ) -> Result<(Self, mpsc::Receiver<UiEvent>), SessionError> {
        let me: UserProfile = roster.own_profile().await.map_err(SessionError::Profile)?;
        info!(user = %me.email, "Starting session");

        let state = Arc::new(SessionState::new(me, config));
        let (ui, ui_rx) = UiNotifier::channel();
        let shutdown = Shutdown::new();
        let fetcher = HistoryFetcher::new(
            Arc::clone(&source),
            state.store.clone(),
            Arc::clone(&state.context),
        );
        let engine = Arc::new(Engine {
            state: Arc::clone(&state),
            fetcher,
            source: Arc::clone(&source),
            roster,
            ui: ui.clone(),
            shutdown: shutdown.clone(),
        });

        engine.refresh_users().await;
        engine.refresh_streams().await;
        state.notice(format!(
            "Welcome, {}! Pick a stream, topic or DM to start.",
            state.me.display_name
        ));

        let (commands, command_rx) = mpsc::channel(COMMAND_QUEUE);
        let mut workers = Vec::new();

        workers.push(tokio::spawn(Arc::clone(&engine).run_commands(command_rx)));

        let sync = Arc::clone(&engine);
        workers.push(spawn_periodic(
            "sync",
            state.config.poll_interval,
            shutdown.signal(),
            move || {
                let engine = Arc::clone(&sync);
                async move { engine.sync().await }
            },
        ));

        let presence = Arc::clone(&engine);
        workers.push(spawn_periodic(
            "roster",
            state.config.presence_interval,
            shutdown.signal(),
            move || {
                let engine = Arc::clone(&presence);
                async move { engine.refresh_roster().await }
            },
        ));

        let blink = Arc::clone(&engine);
        workers.push(spawn_periodic(
            "blink",
            state.config.blink_interval,
            shutdown.signal(),
            move || {
                let engine = Arc::clone(&blink);
                async move {
                    engine.state.toggle_blink();
                    if !engine.state.unread.snapshot().is_empty() {
                        engine.ui.notify(UiEvent::NotifyBar);
                    }
                }
            },
        ));

        let listener = LiveListener::new(
            source,
            state.store.clone(),
            state.unread.clone(),
            Arc::clone(&state.context),
            state.me.clone(),
            state.config.listener_backoff,
            ui,
        );
        // Detached: it may sit in a subscription call until the next event.
        tokio::spawn(listener.run(shutdown.signal()));

        let session = Self {
            state,
            engine,
            commands,
            workers,
        };
        Ok((session, ui_rx))
    }

    pub fn state(&self) -> &Arc<SessionState> {
        &self.state
    }

    pub fn is_shutting_down(&self) -> bool {
        self.engine.shutdown.is_set()
    }

    /// Apply one input event. Never waits on the network: commands are
    /// queued for the command worker.
    pub fn handle_input(&self, input: InputEvent) -> Result<(), SessionError> {
        if self.is_shutting_down() {
            return Err(SessionError::ShuttingDown);
        }

        let page = self.state.config.page_scroll;
        match input {
            InputEvent::ScrollUp => self.scroll_up(1),
            InputEvent::PageUp => self.scroll_up(page),
            InputEvent::ScrollDown => self.scroll_down(1),
            InputEvent::PageDown => self.scroll_down(page),
            InputEvent::Resize(height) => {
                let (_, layout) = self.state.layout();
                self.state.viewport().resize(height, &layout);
                self.engine.ui.notify(UiEvent::Redraw);
                Ok(())
            }
            InputEvent::Command(UserCommand::Exit) => {
                self.exit();
                Ok(())
            }
            InputEvent::Command(command) => self.enqueue(WorkerCommand::User(command)),
        }
    }

    fn scroll_up(&self, lines: usize) -> Result<(), SessionError> {
        let (_, layout) = self.state.layout();
        let (moved, wants_more) = {
            let mut viewport = self.state.viewport();
            let before = viewport.offset();
            let wants_more = viewport.scroll_up(lines, &layout);
            (viewport.offset() != before, wants_more)
        };
        self.engine.ui.notify(UiEvent::Redraw);

        if wants_more {
            // Pushing against the top is an explicit request for more.
            let origin = if moved {
                LoadOrigin::Prefetch
            } else {
                LoadOrigin::User
            };
            if !self.engine.fetcher.is_loading_older() {
                return self.enqueue(WorkerCommand::LoadOlder(origin));
            }
        }
        Ok(())
    }

    fn scroll_down(&self, lines: usize) -> Result<(), SessionError> {
        let (_, layout) = self.state.layout();
        self.state.viewport().scroll_down(lines, &layout);
        self.engine.ui.notify(UiEvent::Redraw);
        Ok(())
    }

    fn enqueue(&self, command: WorkerCommand) -> Result<(), SessionError> {
        self.commands.try_send(command).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SessionError::Busy,
            mpsc::error::TrySendError::Closed(_) => SessionError::ShuttingDown,
        })
    }

    fn exit(&self) {
        self.state.notice("(Exiting. Bye!)");
        self.engine.shutdown.trigger();
        self.engine.ui.notify(UiEvent::Exit);
    }

    /// Compute everything on screen. Takes each lock briefly, one at a time.
    pub fn render(&self) -> Frame {
        let (ticket, layout) = self.state.layout();
        let (chat, mode) = {
            let mut viewport = self.state.viewport();
            let chat = viewport.visible(&layout).to_vec();
            (chat, viewport.mode())
        };

        let unread = self.state.unread.snapshot();
        let roster = self.state.roster_snapshot();
        let formatter = &self.state.formatter;
        let current_stream = ticket.context.conversation().and_then(|k| k.stream_name());

        Frame {
            chat,
            mode,
            notification_bar: formatter.notification_bar(
                &unread,
                &roster.users,
                self.state.blink_on(),
            ),
            conversations: formatter.conversations_sidebar(
                &roster.recent,
                &roster.streams,
                &unread,
                current_stream,
            ),
            presence: formatter.presence_sidebar(&roster.presence.groups(&roster.users)),
            status: self.state.status().map(|s| formatter.status_line(&s)),
        }
    }

    /// Stop the workers and wait for them. A worker in the middle of a
    /// remote call finishes that call first.
    pub async fn shutdown(self) {
        if !self.engine.shutdown.is_set() {
            self.exit();
        }
        for worker in self.workers {
            if let Err(e) = worker.await {
                warn!(error = %e, "Worker ended abnormally");
            }
        }
        info!("Session stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use palaver_net::MemoryRemote;
    use palaver_shared::{MessageId, PresenceStatus};

    use super::*;

    struct Fixture {
        remote: Arc<MemoryRemote>,
        session: Session,
        ui_rx: mpsc::Receiver<UiEvent>,
        me: UserProfile,
        bob: UserProfile,
    }

    fn test_config() -> ClientConfig {
        ClientConfig {
            page_size: 5,
            poll_interval: Duration::from_millis(20),
            presence_interval: Duration::from_millis(20),
            blink_interval: Duration::from_millis(20),
            listener_backoff: Duration::from_millis(10),
            prefetch_history: false,
            prefetch_delay: Duration::from_millis(5),
            window_height: 6,
            ..ClientConfig::default()
        }
    }

    /// `ops > deploys` holds Bob's messages 10..=14.
    async fn fixture(config: ClientConfig) -> Fixture {
        let me = UserProfile::new(1, "Me", "me@example.com");
        let bob = UserProfile::new(2, "Bob", "bob@example.com");
        let remote = Arc::new(MemoryRemote::new(me.clone()));
        remote.add_user(bob.clone());
        remote.add_stream("ops", &["deploys", "alerts"]);
        remote.set_next_id(10);
        for i in 10..=14 {
            remote.seed_stream_message(&bob, "ops", "deploys", &format!("message {i}"));
        }

        let (session, ui_rx) = Session::start(config, remote.clone(), remote.clone())
            .await
            .unwrap();
        Fixture {
            remote,
            session,
            ui_rx,
            me,
            bob,
        }
    }

    async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
        for _ in 0..400 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("timed out waiting for {what}");
    }

    fn ids(session: &Session) -> Vec<u64> {
        session.state().store.lock().ids().iter().map(|id| id.0).collect()
    }

    fn notices(session: &Session) -> Vec<String> {
        session
            .state()
            .store
            .snapshot()
            .entries
            .iter()
            .filter_map(|(_, entry)| match entry {
                palaver_store::Entry::Notice(notice) => Some(notice.text.clone()),
                palaver_store::Entry::Message(_) => None,
            })
            .collect()
    }

    fn chat_text(session: &Session) -> Vec<String> {
        session.render().chat.iter().map(Line::text).collect()
    }

    fn command(f: &Fixture, command: UserCommand) {
        f.session.handle_input(InputEvent::Command(command)).unwrap();
    }

    async fn open_deploys(f: &Fixture) {
        command(f, UserCommand::OpenStream("ops".into()));
        eventually("stream selected", || {
            notices(&f.session).contains(&"(Selected stream: ops)".to_string())
        })
        .await;
        command(f, UserCommand::OpenTopic("deploys".into()));
        eventually("topic loaded", || {
            notices(&f.session).contains(&"(Selected topic: deploys)".to_string())
        })
        .await;
    }

    #[tokio::test]
    async fn test_open_topic_loads_newest_page() {
        let f = fixture(test_config()).await;
        open_deploys(&f).await;

        assert_eq!(ids(&f.session), vec![10, 11, 12, 13, 14]);
        let store = f.session.state().store.lock();
        assert_eq!(store.earliest_id(), Some(MessageId(10)));
        assert_eq!(store.max_real_id(), Some(MessageId(14)));
    }

    #[tokio::test]
    async fn test_live_message_in_active_topic() {
        let f = fixture(test_config()).await;
        open_deploys(&f).await;
        eventually("subscription", || f.remote.subscriber_count() > 0).await;

        let live = f
            .remote
            .deliver_stream_message(&f.bob, "ops", "deploys", "message 15");
        assert_eq!(live.id, MessageId(15));

        eventually("live message stored", || {
            ids(&f.session).contains(&15)
        })
        .await;
        let deploys = ConversationKey::topic("ops", "deploys");
        assert_eq!(f.session.state().unread.count(&deploys), 1);

        let frame = f.session.render();
        assert_eq!(frame.mode, ViewMode::Following);
        let text: Vec<String> = frame.chat.iter().map(Line::text).collect();
        assert!(text.contains(&"[Bob]: message 15".to_string()));
    }

    #[tokio::test]
    async fn test_scrolled_view_is_stable_when_messages_arrive() {
        let f = fixture(test_config()).await;
        open_deploys(&f).await;

        f.session.handle_input(InputEvent::ScrollUp).unwrap();
        f.session.handle_input(InputEvent::ScrollUp).unwrap();
        let seen = chat_text(&f.session);
        assert_eq!(f.session.render().mode, ViewMode::Scrolled);

        f.remote
            .deliver_stream_message(&f.bob, "ops", "deploys", "message 15");
        eventually("message 15 stored", || {
            ids(&f.session).contains(&15)
        })
        .await;

        assert_eq!(chat_text(&f.session), seen);
        assert_eq!(f.session.render().mode, ViewMode::Scrolled);
    }

    #[tokio::test]
    async fn test_inactive_conversation_counts_unread() {
        let f = fixture(test_config()).await;
        open_deploys(&f).await;
        eventually("subscription", || f.remote.subscriber_count() > 0).await;

        f.remote
            .deliver_stream_message(&f.bob, "ops", "alerts", "disk full");
        f.remote.deliver_direct_message(&f.bob, &[&f.me], "ping");

        let alerts = ConversationKey::topic("ops", "alerts");
        let dm = ConversationKey::direct(["bob@example.com"]);
        eventually("unread counted", || {
            f.session.state().unread.count(&dm) == 1
                && f.session.state().unread.count(&alerts) == 1
        })
        .await;
        assert_eq!(ids(&f.session), vec![10, 11, 12, 13, 14]);

        let bar = f.session.render().notification_bar.text();
        assert!(bar.contains("ops:alerts (1)"));
        assert!(bar.contains("Bob (1)"));

        command(&f, UserCommand::OpenDirect("bob".into()));
        eventually("dm opened", || {
            f.session.state().unread.count(&dm) == 0
        })
        .await;
        assert_eq!(f.session.state().unread.count(&alerts), 1);
    }

    #[tokio::test]
    async fn test_send_marks_read_and_follows() {
        let f = fixture(test_config()).await;
        open_deploys(&f).await;
        let deploys = ConversationKey::topic("ops", "deploys");

        f.remote
            .deliver_stream_message(&f.bob, "ops", "deploys", "are you there?");
        eventually("unread", || {
            f.session.state().unread.count(&deploys) == 1
        })
        .await;
        f.session.handle_input(InputEvent::PageUp).unwrap();

        command(&f, UserCommand::Send("yes".into()));
        eventually("sent", || {
            notices(&f.session).contains(&"(sent)".to_string())
        })
        .await;

        assert_eq!(f.session.state().unread.count(&deploys), 0);
        assert_eq!(f.session.render().mode, ViewMode::Following);
        let store = f.session.state().store.lock();
        let newest = store.max_real_id().unwrap();
        assert_eq!(newest, MessageId(16));
    }

    #[tokio::test]
    async fn test_send_failure_and_invalid_targets() {
        let f = fixture(test_config()).await;

        command(&f, UserCommand::Send("hello?".into()));
        command(&f, UserCommand::OpenStream("nowhere".into()));
        command(&f, UserCommand::OpenTopic("deploys".into()));
        eventually("notices", || notices(&f.session).len() >= 4).await;
        let posted = notices(&f.session);
        assert!(posted.contains(&"(Pick a stream/topic or DM first!)".to_string()));
        assert!(posted.contains(&"(Invalid stream: nowhere)".to_string()));
        assert!(posted.contains(&"(Pick a stream first!)".to_string()));

        command(&f, UserCommand::OpenStream("ops".into()));
        command(&f, UserCommand::Send("to everyone".into()));
        eventually("stream-wide send refused", || {
            notices(&f.session)
                .contains(&"(Pick a topic before sending a message to a stream!)".to_string())
        })
        .await;

        command(&f, UserCommand::OpenTopic("deploys".into()));
        f.remote.fail_next_sends(1);
        command(&f, UserCommand::Send("lost".into()));
        eventually("send failure", || {
            notices(&f.session)
                .iter()
                .any(|n| n.starts_with("(Failed to send:"))
        })
        .await;
    }

    #[tokio::test]
    async fn test_failed_open_is_retried_by_poller() {
        let f = fixture(test_config()).await;
        command(&f, UserCommand::OpenStream("ops".into()));
        eventually("stream selected", || {
            notices(&f.session).contains(&"(Selected stream: ops)".to_string())
        })
        .await;

        f.remote.fail_next_fetches(1);
        command(&f, UserCommand::OpenTopic("deploys".into()));
        eventually("topic loaded after retry", || {
            f.session.state().store.generation() == f.session.state().context.generation()
                && ids(&f.session) == vec![10, 11, 12, 13, 14]
        })
        .await;
    }

    #[tokio::test]
    async fn test_failed_switch_never_shows_previous_conversation() {
        let f = fixture(test_config()).await;
        open_deploys(&f).await;
        assert_eq!(ids(&f.session), vec![10, 11, 12, 13, 14]);

        f.remote.fail_next_fetches(1000);
        command(&f, UserCommand::OpenTopic("alerts".into()));
        eventually("load failure reported", || {
            notices(&f.session)
                .iter()
                .any(|n| n.starts_with("(Failed to fetch messages:"))
        })
        .await;

        let chat = chat_text(&f.session);
        assert_eq!(chat[0], "#ops > alerts");
        assert!(chat.contains(&crate::render::EMPTY_PLACEHOLDER.to_string()));
        assert!(!chat.iter().any(|line| line.starts_with("[Bob]")));
        assert!(!notices(&f.session).contains(&"(Selected topic: deploys)".to_string()));

        f.remote.fail_next_fetches(0);
        eventually("alerts loaded after retry", || {
            f.session.state().store.generation() == f.session.state().context.generation()
        })
        .await;
        assert!(ids(&f.session).is_empty());
        assert_eq!(chat_text(&f.session)[0], "#ops > alerts");
    }

    #[tokio::test]
    async fn test_scrolling_to_top_loads_older_history() {
        let f = fixture(test_config()).await;
        f.remote.set_next_id(1);
        for i in 1..=5 {
            f.remote
                .seed_stream_message(&f.bob, "ops", "deploys", &format!("old {i}"));
        }
        open_deploys(&f).await;

        for _ in 0..20 {
            let _ = f.session.handle_input(InputEvent::PageUp);
        }
        eventually("older page", || ids(&f.session).len() == 10).await;
        assert_eq!(f.session.state().store.earliest_id(), Some(MessageId(1)));

        eventually("exhausted", || {
            let _ = f.session.handle_input(InputEvent::PageUp);
            notices(&f.session).contains(&"(No more history to load.)".to_string())
        })
        .await;
    }

    #[tokio::test]
    async fn test_background_prefetch_loads_everything_once() {
        let config = ClientConfig {
            prefetch_history: true,
            ..test_config()
        };
        let f = fixture(config).await;
        f.remote.set_next_id(1);
        for i in 1..=9 {
            f.remote
                .seed_stream_message(&f.bob, "ops", "deploys", &format!("old {i}"));
        }
        open_deploys(&f).await;

        eventually("full history", || {
            notices(&f.session).contains(&"(No more history to load.)".to_string())
        })
        .await;
        assert_eq!(ids(&f.session), (1..=14).collect::<Vec<_>>());
        let reported = notices(&f.session)
            .iter()
            .filter(|n| n.as_str() == "(No more history to load.)")
            .count();
        assert_eq!(reported, 1);
    }

    #[tokio::test]
    async fn test_search_results_do_not_grow() {
        let f = fixture(test_config()).await;
        command(&f, UserCommand::Search("message 1".into()));
        eventually("search loaded", || {
            notices(&f.session)
                .iter()
                .any(|n| n.starts_with("(Found"))
        })
        .await;
        assert_eq!(ids(&f.session), vec![10, 11, 12, 13, 14]);

        f.remote
            .deliver_stream_message(&f.bob, "ops", "deploys", "message 15");
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(ids(&f.session), vec![10, 11, 12, 13, 14]);

        command(&f, UserCommand::Search("zebra".into()));
        eventually("no matches", || {
            notices(&f.session).contains(&"(No matches found.)".to_string())
        })
        .await;
    }

    #[tokio::test]
    async fn test_roster_poller_fills_sidebars() {
        let f = fixture(test_config()).await;
        f.remote.set_presence("bob@example.com", PresenceStatus::Active);
        f.remote.seed_direct_message(&f.bob, &[&f.me], "hi");

        eventually("sidebars", || {
            let frame = f.session.render();
            let presence: Vec<String> = frame.presence.iter().map(Line::text).collect();
            let conversations: Vec<String> =
                frame.conversations.iter().map(Line::text).collect();
            presence.contains(&"● Bob".to_string())
                && conversations.contains(&"Bob".to_string())
                && conversations.contains(&"#ops".to_string())
        })
        .await;
    }

    #[tokio::test]
    async fn test_exit_stops_workers() {
        let mut f = fixture(test_config()).await;
        while f.ui_rx.try_recv().is_ok() {}
        f.session
            .handle_input(InputEvent::Command(UserCommand::Exit))
            .unwrap();

        eventually("exit event", || {
            std::iter::from_fn(|| f.ui_rx.try_recv().ok()).any(|e| e == UiEvent::Exit)
        })
        .await;
        assert!(matches!(
            f.session.handle_input(InputEvent::ScrollUp),
            Err(SessionError::ShuttingDown)
        ));

        tokio::time::timeout(Duration::from_secs(2), f.session.shutdown())
            .await
            .unwrap();
    }
}
