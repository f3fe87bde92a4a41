pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod fetcher;
pub mod listener;
pub mod render;
pub mod scheduler;
pub mod session;
pub mod state;
pub mod viewport;

use tracing_subscriber::{fmt, EnvFilter};

pub use config::ClientConfig;
pub use context::{ActiveContext, ContextSelector, ContextTicket};
pub use error::{FetchError, SessionError};
pub use events::{UiEvent, UiNotifier};
pub use fetcher::{HistoryFetcher, LoadOrigin, OlderOutcome};
pub use listener::LiveListener;
pub use render::{Formatter, Line, Span, Style};
pub use session::{Frame, InputEvent, Session, UserCommand};
pub use state::{RosterView, SessionState, StatusSource};
pub use viewport::{Layout, ViewMode, Viewport};

/// Install the global tracing subscriber. `RUST_LOG` overrides the default
/// filter. Calling it twice is harmless.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("palaver_client=debug,palaver_net=info,palaver_store=info,warn")
    });

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init();
}
