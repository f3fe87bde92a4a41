//! Recently active direct-message conversations, read or not.

use std::collections::HashMap;

use palaver_shared::{ConversationKey, MessageId, MessageKind, Narrow, RemoteError};

use crate::remote::{FetchRequest, MessageSource};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecentConversation {
    pub key: ConversationKey,
    /// Display names of the other participants, ordered by email.
    pub label: String,
    pub last_id: MessageId,
}

/// Group the newest `limit` direct messages by participant set, most recent
/// conversation first.
pub async fn recent_direct_conversations(
    source: &dyn MessageSource,
    own_email: &str,
    limit: u32,
) -> Result<Vec<RecentConversation>, RemoteError> {
    let messages = source
        .fetch(&FetchRequest::newest(Narrow::AllDirect, limit))
        .await?;

    let mut latest: HashMap<ConversationKey, RecentConversation> = HashMap::new();
    for message in &messages {
        let MessageKind::Direct { participants } = &message.kind else {
            continue;
        };
        let mut others: Vec<_> = participants
            .iter()
            .filter(|p| p.email != own_email)
            .collect();
        if others.is_empty() {
            continue;
        }
        others.sort_by(|a, b| a.email.cmp(&b.email));
        let label = others
            .iter()
            .map(|p| p.display_name.as_str())
            .collect::<Vec<_>>()
            .join(",");

        let key = message.conversation_key(own_email);
        let entry = latest.entry(key.clone()).or_insert(RecentConversation {
            key,
            label,
            last_id: message.id,
        });
        entry.last_id = entry.last_id.max(message.id);
    }

    let mut recent: Vec<RecentConversation> = latest.into_values().collect();
    recent.sort_by(|a, b| b.last_id.cmp(&a.last_id));
    Ok(recent)
}

#[cfg(test)]
mod tests {
    use palaver_shared::UserProfile;

    use super::*;
    use crate::memory::MemoryRemote;

    #[tokio::test]
    async fn test_groups_by_participants_newest_first() {
        let me = UserProfile::new(1, "Me", "me@example.com");
        let bob = UserProfile::new(2, "Bob", "bob@example.com");
        let amy = UserProfile::new(3, "Amy", "amy@example.com");
        let remote = MemoryRemote::new(me.clone());

        remote.seed_direct_message(&bob, &[&me], "hi");
        remote.seed_direct_message(&amy, &[&me, &bob], "group");
        remote.seed_direct_message(&me, &[&bob], "reply");
        remote.seed_stream_message(&bob, "ops", "deploys", "not a dm");

        let recent = recent_direct_conversations(&remote, &me.email, 20)
            .await
            .unwrap();

        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].label, "Bob");
        assert_eq!(recent[0].last_id, MessageId(3));
        assert_eq!(recent[1].label, "Amy,Bob");
        assert_eq!(
            recent[1].key,
            ConversationKey::direct(["amy@example.com", "bob@example.com"])
        );
    }
}
