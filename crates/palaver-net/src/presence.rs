//! Presence tracking.
//!
//! Keeps the latest aggregated status of every known user and groups them
//! for the presence sidebar.

use std::collections::HashMap;

use tracing::debug;

use palaver_shared::{PresenceStatus, UserProfile};

/// Display names grouped by status, each group sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresenceGroups {
    pub online: Vec<String>,
    pub away: Vec<String>,
    pub offline: Vec<String>,
}

/// Tracks the last reported status of every user, keyed by email.
#[derive(Debug, Clone, Default)]
pub struct PresenceTracker {
    statuses: HashMap<String, PresenceStatus>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the tracked statuses with a fresh server report.
    pub fn update(&mut self, report: HashMap<String, PresenceStatus>) {
        debug!(users = report.len(), "Presence updated");
        self.statuses = report;
    }

    pub fn status(&self, email: &str) -> PresenceStatus {
        self.statuses
            .get(email)
            .copied()
            .unwrap_or(PresenceStatus::Offline)
    }

    pub fn online_count(&self) -> usize {
        self.statuses
            .values()
            .filter(|s| **s == PresenceStatus::Active)
            .count()
    }

    /// Group reported users by status. Users missing from `roster` are
    /// shown by email.
    pub fn groups(&self, roster: &[UserProfile]) -> PresenceGroups {
        let names: HashMap<&str, &str> = roster
            .iter()
            .map(|u| (u.email.as_str(), u.display_name.as_str()))
            .collect();

        let mut groups = PresenceGroups::default();
        for (email, status) in &self.statuses {
            let name = names
                .get(email.as_str())
                .copied()
                .unwrap_or(email.as_str())
                .to_string();
            match status {
                PresenceStatus::Active => groups.online.push(name),
                PresenceStatus::Idle => groups.away.push(name),
                PresenceStatus::Offline => groups.offline.push(name),
            }
        }
        groups.online.sort();
        groups.away.sort();
        groups.offline.sort();
        groups
    }
}
