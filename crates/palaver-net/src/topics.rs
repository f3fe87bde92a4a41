//! Topic listing with a history-scan fallback.
//!
//! Some servers return an empty topic listing for streams the user joined
//! after the topics were created. In that case the newest messages of the
//! stream are scanned and their distinct topics collected.

use std::collections::HashSet;

use tracing::debug;

use palaver_shared::{ConversationKey, MessageKind, Narrow, RemoteError};

use crate::remote::{FetchRequest, MessageSource, RosterSource};

/// Topics of `stream`, falling back to a scan of the newest `scan_depth`
/// messages (most recently active topic first) when the listing is empty.
pub async fn list_topics(
    roster: &dyn RosterSource,
    source: &dyn MessageSource,
    stream: &str,
    scan_depth: u32,
) -> Result<Vec<String>, RemoteError> {
    let listed = roster.list_topics(stream).await?;
    if !listed.is_empty() {
        return Ok(listed);
    }

    let request = FetchRequest::newest(
        Narrow::Conversation(ConversationKey::stream(stream)),
        scan_depth,
    );
    let messages = source.fetch(&request).await?;

    let mut seen = HashSet::new();
    let topics: Vec<String> = messages
        .iter()
        .rev()
        .filter_map(|m| match &m.kind {
            MessageKind::Stream { topic, .. } => Some(topic.clone()),
            MessageKind::Direct { .. } => None,
        })
        .filter(|topic| seen.insert(topic.clone()))
        .collect();

    debug!(
        stream,
        scanned = messages.len(),
        found = topics.len(),
        "Topic listing empty, scanned history instead"
    );
    Ok(topics)
}
