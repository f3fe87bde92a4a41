use tokio::sync::mpsc;
use tracing::trace;

/// Capacity of the UI event queue. Events are coalescing hints, so a full
/// queue simply drops the newest one.
pub const UI_EVENT_BUFFER: usize = 64;

/// Hints sent from background workers to the presentation loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UiEvent {
    /// Chat window content changed
    Redraw,
    /// Unread counters or the blink phase changed
    NotifyBar,
    /// The session is shutting down
    Exit,
}

/// Non-blocking sender of [`UiEvent`]s.
#[derive(Debug, Clone)]
pub struct UiNotifier {
    tx: mpsc::Sender<UiEvent>,
}

impl UiNotifier {
    pub fn channel() -> (Self, mpsc::Receiver<UiEvent>) {
        let (tx, rx) = mpsc::channel(UI_EVENT_BUFFER);
        (Self { tx }, rx)
    }

    /// Never blocks a worker: a full or closed queue drops the event.
    pub fn notify(&self, event: UiEvent) {
        if let Err(e) = self.tx.try_send(event) {
            trace!(?event, error = %e, "UI event dropped");
        }
    }
}
