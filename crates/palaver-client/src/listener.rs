//! Live event subscription.
//!
//! Keeps one long-lived subscription open and resubscribes after a fixed
//! backoff whenever it ends. Decoded messages either join the active store
//! or bump the unread counter of their own conversation.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use palaver_net::MessageSource;
use palaver_shared::protocol::decode_message_event;
use palaver_shared::{Message, UserProfile};
use palaver_store::{SharedStore, SharedUnread};

use crate::context::ContextSelector;
use crate::events::{UiEvent, UiNotifier};
use crate::scheduler::ShutdownSignal;

const EVENT_QUEUE: usize = 256;

/// Count every message in `fresh` not sent by `me` as unread.
pub(crate) fn record_fresh(unread: &SharedUnread, me: &UserProfile, fresh: &[Arc<Message>]) -> usize {
    let mut recorded = 0;
    for message in fresh.iter().filter(|m| !m.is_from(me)) {
        unread.record(message.conversation_key(&me.email));
        recorded += 1;
    }
    recorded
}

pub struct LiveListener {
    source: Arc<dyn MessageSource>,
    store: SharedStore,
    unread: SharedUnread,
    context: Arc<ContextSelector>,
    me: UserProfile,
    backoff: Duration,
    ui: UiNotifier,
}

impl LiveListener {
    pub fn new(
        source: Arc<dyn MessageSource>,
        store: SharedStore,
        unread: SharedUnread,
        context: Arc<ContextSelector>,
        me: UserProfile,
        backoff: Duration,
        ui: UiNotifier,
    ) -> Self {
        Self {
            source,
            store,
            unread,
            context,
            me,
            backoff,
            ui,
        }
    }

    /// Subscribe, dispatch events until the subscription ends, back off,
    /// repeat. Shutdown is noticed between events and during the backoff.
    pub async fn run(self, mut shutdown: ShutdownSignal) {
        let mut attempt: u64 = 0;

        while !shutdown.is_set() {
            attempt += 1;
            let (tx, mut rx) = mpsc::channel::<Value>(EVENT_QUEUE);
            let subscription = self.source.subscribe(tx);
            tokio::pin!(subscription);
            debug!(attempt, "Subscribed to live events");

            let outcome = loop {
                tokio::select! {
                    result = &mut subscription => break Some(result),
                    Some(event) = rx.recv() => {
                        self.dispatch(event);
                        if shutdown.is_set() {
                            break None;
                        }
                    }
                }
            };
            while let Ok(event) = rx.try_recv() {
                self.dispatch(event);
            }

            match outcome {
                None => break,
                Some(Ok(())) => info!(attempt, "Live subscription closed"),
                Some(Err(e)) => warn!(attempt, error = %e, "Live subscription failed"),
            }

            if shutdown.sleep(self.backoff).await {
                break;
            }
        }

        info!("Live listener stopped");
    }

    /// Handle one raw event. Malformed events are dropped.
    pub fn dispatch(&self, event: Value) {
        match decode_message_event(event) {
            Ok(Some(message)) => self.on_message(message),
            Ok(None) => trace!("Ignoring non-message event"),
            Err(e) => debug!(error = %e, "Dropping malformed event"),
        }
    }

    fn on_message(&self, message: Message) {
        let ticket = self.context.current();

        if ticket.context.accepts(&message, &self.me.email) {
            let fresh = self
                .store
                .apply_if_current(ticket.generation, |store| store.append_new(vec![message]));
            match fresh {
                Some(fresh) if !fresh.is_empty() => {
                    if record_fresh(&self.unread, &self.me, &fresh) > 0 {
                        self.ui.notify(UiEvent::NotifyBar);
                    }
                    self.ui.notify(UiEvent::Redraw);
                }
                Some(_) => trace!("Live message already present"),
                // The pending initial load of this context will include it.
                None => trace!("Active context still loading, skipping live message"),
            }
            return;
        }

        if message.is_from(&self.me) {
            return;
        }
        let key = message.conversation_key(&self.me.email);
        let count = self.unread.record(key.clone());
        debug!(conversation = %key, count, "Unread message in another conversation");
        self.ui.notify(UiEvent::NotifyBar);
    }
}

#[cfg(test)]
mod tests {
    use palaver_net::MemoryRemote;
    use palaver_shared::ConversationKey;
    use serde_json::json;
    use tokio::sync::mpsc::Receiver;

    use super::*;
    use crate::context::ActiveContext;
    use crate::scheduler::Shutdown;

    struct Fixture {
        remote: Arc<MemoryRemote>,
        store: SharedStore,
        unread: SharedUnread,
        context: Arc<ContextSelector>,
        me: UserProfile,
        bob: UserProfile,
        ui_rx: Receiver<UiEvent>,
        listener: LiveListener,
    }

    fn fixture() -> Fixture {
        let me = UserProfile::new(1, "Me", "me@example.com");
        let bob = UserProfile::new(2, "Bob", "bob@example.com");
        let remote = Arc::new(MemoryRemote::new(me.clone()));
        remote.add_user(bob.clone());
        let store = SharedStore::new();
        let unread = SharedUnread::new();
        let context = Arc::new(ContextSelector::new());
        let (ui, ui_rx) = UiNotifier::channel();
        let listener = LiveListener::new(
            remote.clone(),
            store.clone(),
            unread.clone(),
            context.clone(),
            me.clone(),
            Duration::from_millis(10),
            ui,
        );
        Fixture {
            remote,
            store,
            unread,
            context,
            me,
            bob,
            ui_rx,
            listener,
        }
    }

    fn open(f: &Fixture, key: ConversationKey) {
        let ticket = f.context.select(ActiveContext::Conversation(key));
        f.store.replace(ticket.generation, Vec::new());
    }

    fn event_for(message: &Message) -> Value {
        palaver_shared::protocol::PushEvent::message(message)
            .to_value()
            .unwrap()
    }

    #[test]
    fn test_active_conversation_message_is_stored_and_counted() {
        let mut f = fixture();
        let deploys = ConversationKey::topic("ops", "deploys");
        open(&f, deploys.clone());

        let message = f.remote.seed_stream_message(&f.bob, "ops", "deploys", "hi");
        f.listener.dispatch(event_for(&message));
        f.listener.dispatch(event_for(&message));

        assert_eq!(f.store.lock().ids(), vec![message.id]);
        assert_eq!(f.unread.count(&deploys), 1);
        assert_eq!(f.ui_rx.try_recv(), Ok(UiEvent::NotifyBar));
        assert_eq!(f.ui_rx.try_recv(), Ok(UiEvent::Redraw));
    }

    #[test]
    fn test_inactive_conversation_only_counts() {
        let f = fixture();
        open(&f, ConversationKey::topic("ops", "deploys"));

        let message = f.remote.seed_direct_message(&f.bob, &[&f.me], "psst");
        f.listener.dispatch(event_for(&message));

        assert!(f.store.lock().is_empty());
        assert_eq!(f.unread.count(&ConversationKey::direct(["bob@example.com"])), 1);
    }

    #[test]
    fn test_own_messages_are_never_unread() {
        let f = fixture();
        let deploys = ConversationKey::topic("ops", "deploys");
        open(&f, deploys.clone());

        let here = f.remote.seed_stream_message(&f.me, "ops", "deploys", "mine");
        let elsewhere = f.remote.seed_stream_message(&f.me, "ops", "alerts", "mine too");
        f.listener.dispatch(event_for(&here));
        f.listener.dispatch(event_for(&elsewhere));

        assert_eq!(f.store.lock().ids(), vec![here.id]);
        assert!(f.unread.snapshot().is_empty());
    }

    #[test]
    fn test_message_for_loading_context_is_left_to_the_load() {
        let f = fixture();
        f.context
            .select(ActiveContext::Conversation(ConversationKey::topic("ops", "deploys")));

        let message = f.remote.seed_stream_message(&f.bob, "ops", "deploys", "early");
        f.listener.dispatch(event_for(&message));

        assert!(f.store.lock().is_empty());
        assert!(f.unread.snapshot().is_empty());
    }

    #[test]
    fn test_malformed_and_unknown_events_are_dropped() {
        let f = fixture();
        open(&f, ConversationKey::topic("ops", "deploys"));

        f.listener.dispatch(json!({"type": "message", "message": {"id": "nope"}}));
        f.listener.dispatch(json!({"type": "presence", "email": "bob@example.com"}));
        f.listener.dispatch(json!("garbage"));

        assert!(f.store.lock().is_empty());
        assert!(f.unread.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_resubscribes_after_disconnect() {
        let f = fixture();
        let deploys = ConversationKey::topic("ops", "deploys");
        open(&f, deploys.clone());

        let shutdown = Shutdown::new();
        let remote = f.remote.clone();
        let handle = tokio::spawn(f.listener.run(shutdown.signal()));

        while remote.subscriber_count() == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        remote.disconnect_subscribers();
        while remote.subscriber_count() > 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        while remote.subscriber_count() == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        let live = remote.deliver_stream_message(&f.bob, "ops", "deploys", "after reconnect");
        while !f.store.lock().contains(live.id) {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert_eq!(f.unread.count(&deploys), 1);
        assert_eq!(f.store.max_real_id(), Some(live.id));

        shutdown.trigger();
        remote.deliver_stream_message(&f.bob, "ops", "deploys", "wake up");
        handle.await.unwrap();
    }
}
