use thiserror::Error;

/// Failures reported by a remote collaborator (message source or roster).
///
/// None of these are fatal: callers surface them as status notices and retry
/// on the next scheduled tick.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Server rejected request: {0}")]
    Api(String),

    #[error("Event subscription disconnected")]
    Disconnected,
}

/// A push event that could not be turned into a [`crate::Message`].
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed event: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Inconsistent message: {0}")]
    Inconsistent(String),

    #[error("Timestamp out of range: {0}")]
    Timestamp(i64),
}
