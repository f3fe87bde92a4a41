use thiserror::Error;

use palaver_shared::RemoteError;

/// Why a history operation did not change the store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("{0}")]
    Remote(#[from] RemoteError),

    #[error("No conversation selected")]
    NoContext,

    /// The user switched conversations while the page was in flight.
    #[error("Conversation changed during fetch")]
    Superseded,

    /// The active conversation has not finished its initial load.
    #[error("History not loaded yet")]
    NotLoaded,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Could not identify the local user: {0}")]
    Profile(#[source] RemoteError),

    #[error("Session is shutting down")]
    ShuttingDown,

    #[error("Too many pending commands")]
    Busy,
}
