//! In-memory loopback server.
//!
//! Implements both collaborator traits over a local message log so the
//! engine can be exercised without a network: tests seed history, inject
//! push events, force disconnects and make the next calls fail.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use palaver_shared::protocol::PushEvent;
use palaver_shared::{Message, MessageId, MessageKind, PresenceStatus, RemoteError, UserProfile};

use crate::remote::{Anchor, Direction, FetchRequest, MessageSource, RosterSource, SendTarget};

const EVENT_BUFFER: usize = 1024;

struct MemoryState {
    me: UserProfile,
    users: Vec<UserProfile>,
    streams: Vec<String>,
    topics: HashMap<String, Vec<String>>,
    /// Sorted by id.
    messages: Vec<Message>,
    next_id: u64,
    presence: HashMap<String, PresenceStatus>,
    failing_fetches: u32,
    failing_sends: u32,
    fetches: Vec<FetchRequest>,
}

pub struct MemoryRemote {
    state: Mutex<MemoryState>,
    events: broadcast::Sender<Value>,
    disconnect: broadcast::Sender<()>,
}

impl MemoryRemote {
    pub fn new(me: UserProfile) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let (disconnect, _) = broadcast::channel(4);
        Self {
            state: Mutex::new(MemoryState {
                users: vec![me.clone()],
                me,
                streams: Vec::new(),
                topics: HashMap::new(),
                messages: Vec::new(),
                next_id: 1,
                presence: HashMap::new(),
                failing_fetches: 0,
                failing_sends: 0,
                fetches: Vec::new(),
            }),
            events,
            disconnect,
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // -----------------------------------------------------------------------
    // Seeding
    // -----------------------------------------------------------------------

    pub fn add_user(&self, user: UserProfile) {
        let mut state = self.lock();
        if !state.users.iter().any(|u| u.email == user.email) {
            state.users.push(user);
        }
    }

    /// Register a stream with its topic listing (possibly empty).
    pub fn add_stream(&self, stream: &str, topics: &[&str]) {
        let mut state = self.lock();
        if !state.streams.iter().any(|s| s == stream) {
            state.streams.push(stream.to_string());
        }
        state.topics.insert(
            stream.to_string(),
            topics.iter().map(|t| t.to_string()).collect(),
        );
    }

    /// Id assigned to the next stored message.
    pub fn set_next_id(&self, id: u64) {
        self.lock().next_id = id;
    }

    pub fn set_presence(&self, email: &str, status: PresenceStatus) {
        self.lock().presence.insert(email.to_string(), status);
    }

    /// Store a stream message in history without announcing it.
    pub fn seed_stream_message(
        &self,
        sender: &UserProfile,
        stream: &str,
        topic: &str,
        body: &str,
    ) -> Message {
        let kind = MessageKind::Stream {
            stream: stream.to_string(),
            topic: topic.to_string(),
        };
        self.store(sender, kind, body)
    }

    /// Store a direct message in history without announcing it.
    pub fn seed_direct_message(
        &self,
        sender: &UserProfile,
        recipients: &[&UserProfile],
        body: &str,
    ) -> Message {
        let mut participants = vec![sender.clone()];
        for recipient in recipients {
            if !participants.iter().any(|p| p.email == recipient.email) {
                participants.push((*recipient).clone());
            }
        }
        self.store(sender, MessageKind::Direct { participants }, body)
    }

    /// Store a stream message and push it to subscribers.
    pub fn deliver_stream_message(
        &self,
        sender: &UserProfile,
        stream: &str,
        topic: &str,
        body: &str,
    ) -> Message {
        let message = self.seed_stream_message(sender, stream, topic, body);
        self.announce(&message);
        message
    }

    /// Store a direct message and push it to subscribers.
    pub fn deliver_direct_message(
        &self,
        sender: &UserProfile,
        recipients: &[&UserProfile],
        body: &str,
    ) -> Message {
        let message = self.seed_direct_message(sender, recipients, body);
        self.announce(&message);
        message
    }

    /// Push an arbitrary event, well-formed or not.
    pub fn push_raw_event(&self, event: Value) {
        let _ = self.events.send(event);
    }

    // -----------------------------------------------------------------------
    // Fault injection
    // -----------------------------------------------------------------------

    pub fn fail_next_fetches(&self, count: u32) {
        self.lock().failing_fetches = count;
    }

    pub fn fail_next_sends(&self, count: u32) {
        self.lock().failing_sends = count;
    }

    /// Drop every open subscription with [`RemoteError::Disconnected`].
    pub fn disconnect_subscribers(&self) {
        let _ = self.disconnect.send(());
    }

    // -----------------------------------------------------------------------
    // Inspection
    // -----------------------------------------------------------------------

    pub fn subscriber_count(&self) -> usize {
        self.events.receiver_count()
    }

    pub fn fetch_log(&self) -> Vec<FetchRequest> {
        self.lock().fetches.clone()
    }

    pub fn message_count(&self) -> usize {
        self.lock().messages.len()
    }

    fn store(&self, sender: &UserProfile, kind: MessageKind, body: &str) -> Message {
        let mut state = self.lock();
        let id = state.next_id;
        state.next_id += 1;

        let message = Message {
            id: MessageId(id),
            sender_id: sender.id,
            sender_email: sender.email.clone(),
            sender_display_name: sender.display_name.clone(),
            body: body.to_string(),
            timestamp: Utc::now(),
            kind,
        };
        state.messages.push(message.clone());
        state.messages.sort_by_key(|m| m.id);
        message
    }

    fn announce(&self, message: &Message) {
        match PushEvent::message(message).to_value() {
            Ok(event) => {
                let _ = self.events.send(event);
            }
            Err(e) => warn!(error = %e, "Failed to encode loopback event"),
        }
    }
}

#[async_trait]
impl MessageSource for MemoryRemote {
    async fn fetch(&self, request: &FetchRequest) -> Result<Vec<Message>, RemoteError> {
        let mut state = self.lock();
        state.fetches.push(request.clone());
        if state.failing_fetches > 0 {
            state.failing_fetches -= 1;
            return Err(RemoteError::Transport("loopback fetch failure".into()));
        }

        let own_email = state.me.email.clone();
        let admitted = state
            .messages
            .iter()
            .filter(|m| request.narrow.admits(m, &own_email));
        let page = request.page_size as usize;

        let page: Vec<Message> = match (request.direction, request.anchor) {
            (Direction::Before, Anchor::Newest) => {
                let matching: Vec<&Message> = admitted.collect();
                let skip = matching.len().saturating_sub(page);
                matching.into_iter().skip(skip).cloned().collect()
            }
            (Direction::Before, Anchor::Id(id)) => {
                let (older, rest): (Vec<&Message>, Vec<&Message>) =
                    admitted.filter(|m| m.id <= id).partition(|m| m.id < id);
                let skip = older.len().saturating_sub(page);
                older
                    .into_iter()
                    .skip(skip)
                    .chain(rest)
                    .cloned()
                    .collect()
            }
            (Direction::After, Anchor::Newest) => Vec::new(),
            (Direction::After, Anchor::Id(id)) => {
                let (at, newer): (Vec<&Message>, Vec<&Message>) =
                    admitted.filter(|m| m.id >= id).partition(|m| m.id == id);
                at.into_iter()
                    .chain(newer.into_iter().take(page))
                    .cloned()
                    .collect()
            }
        };

        debug!(
            anchor = ?request.anchor,
            direction = ?request.direction,
            returned = page.len(),
            "Loopback fetch"
        );
        Ok(page)
    }

    async fn send(&self, target: &SendTarget, body: &str) -> Result<(), RemoteError> {
        let me = {
            let mut state = self.lock();
            if state.failing_sends > 0 {
                state.failing_sends -= 1;
                return Err(RemoteError::Api("loopback send failure".into()));
            }
            state.me.clone()
        };

        let message = match target {
            SendTarget::Stream { stream, topic } => {
                self.seed_stream_message(&me, stream, topic, body)
            }
            SendTarget::Direct { emails } => {
                let recipients: Vec<UserProfile> = {
                    let state = self.lock();
                    emails
                        .iter()
                        .map(|email| {
                            state
                                .users
                                .iter()
                                .find(|u| &u.email == email)
                                .cloned()
                                .unwrap_or_else(|| {
                                    UserProfile::new(0, email.clone(), email.clone())
                                })
                        })
                        .collect()
                };
                let refs: Vec<&UserProfile> = recipients.iter().collect();
                self.seed_direct_message(&me, &refs, body)
            }
        };
        self.announce(&message);
        Ok(())
    }

    async fn subscribe(&self, sink: mpsc::Sender<Value>) -> Result<(), RemoteError> {
        let mut events = self.events.subscribe();
        let mut disconnect = self.disconnect.subscribe();

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(event) => {
                        if sink.send(event).await.is_err() {
                            return Ok(());
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Loopback subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return Ok(()),
                },
                _ = disconnect.recv() => return Err(RemoteError::Disconnected),
            }
        }
    }
}

#[async_trait]
impl RosterSource for MemoryRemote {
    async fn own_profile(&self) -> Result<UserProfile, RemoteError> {
        Ok(self.lock().me.clone())
    }

    async fn list_users(&self) -> Result<Vec<UserProfile>, RemoteError> {
        Ok(self.lock().users.clone())
    }

    async fn list_streams(&self) -> Result<Vec<String>, RemoteError> {
        Ok(self.lock().streams.clone())
    }

    async fn list_topics(&self, stream: &str) -> Result<Vec<String>, RemoteError> {
        Ok(self.lock().topics.get(stream).cloned().unwrap_or_default())
    }

    async fn presence(&self) -> Result<HashMap<String, PresenceStatus>, RemoteError> {
        Ok(self.lock().presence.clone())
    }
}
