//! Watch entries and the in-memory registry that holds them.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::link::RepoRef;
use crate::status::CiStatus;

/// Newtype for a chat message identifier (the Slack message `ts`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Newtype for a chat channel identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelId(pub String);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ChannelId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ChannelId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Newtype for a git commit SHA.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommitSha(pub String);

impl CommitSha {
    /// Returns a truncated SHA for display (first 7 characters).
    pub fn short(&self) -> &str {
        let end = self
            .0
            .char_indices()
            .nth(7)
            .map(|(i, _)| i)
            .unwrap_or(self.0.len());
        &self.0[..end]
    }
}

impl fmt::Display for CommitSha {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CommitSha {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for CommitSha {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// One pull request tracked on behalf of one chat message.
///
/// `commit_sha` is captured at registration and never changes: CI status is
/// always reconciled against that commit, even if the pull request later gets
/// new commits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchEntry {
    pub message_id: MessageId,
    pub channel_id: ChannelId,
    pub repo: RepoRef,
    pub pr_number: u64,
    pub commit_sha: CommitSha,
    /// Last observed CI status. `None` when the commit had no combined status.
    pub last_ci_status: Option<CiStatus>,
}

/// Point-in-time copy of the registry contents.
///
/// Entries registered after the snapshot was taken are not part of it, so one
/// reconciliation pass works on a fixed set. The snapshot can be iterated any
/// number of times.
#[derive(Debug, Clone, Default)]
pub struct WatchSnapshot {
    entries: Vec<WatchEntry>,
}

impl WatchSnapshot {
    pub fn iter(&self) -> std::slice::Iter<'_, WatchEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl IntoIterator for WatchSnapshot {
    type Item = WatchEntry;
    type IntoIter = std::vec::IntoIter<WatchEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<'a> IntoIterator for &'a WatchSnapshot {
    type Item = &'a WatchEntry;
    type IntoIter = std::slice::Iter<'a, WatchEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Authoritative map of message → watch entry.
///
/// Shared between the intake path (inserts) and the reconciliation loop
/// (updates and removals). All access goes through one lock.
pub struct WatchRegistry {
    entries: RwLock<HashMap<MessageId, WatchEntry>>,
}

impl WatchRegistry {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Insert or replace the entry for `entry.message_id`.
    ///
    /// Returns the entry that was replaced, if any.
    pub async fn put(&self, entry: WatchEntry) -> Option<WatchEntry> {
        let mut entries = self.entries.write().await;
        entries.insert(entry.message_id.clone(), entry)
    }

    pub async fn get(&self, message_id: &MessageId) -> Option<WatchEntry> {
        let entries = self.entries.read().await;
        entries.get(message_id).cloned()
    }

    /// Copy of all current entries, ordered by message id.
    pub async fn snapshot(&self) -> WatchSnapshot {
        let entries = self.entries.read().await;
        let mut entries: Vec<WatchEntry> = entries.values().cloned().collect();
        entries.sort_by(|a, b| a.message_id.cmp(&b.message_id));
        WatchSnapshot { entries }
    }

    /// Record a newly observed CI status for a watch.
    ///
    /// The update only lands if the entry still exists and still tracks
    /// `commit_sha`: a concurrent removal wins, and so does a re-registration
    /// of the same message for a different commit. Returns whether the entry
    /// was updated.
    pub async fn update_ci_status(
        &self,
        message_id: &MessageId,
        commit_sha: &CommitSha,
        status: Option<CiStatus>,
    ) -> bool {
        let mut entries = self.entries.write().await;
        match entries.get_mut(message_id) {
            Some(entry) if &entry.commit_sha == commit_sha => {
                entry.last_ci_status = status;
                true
            }
            _ => false,
        }
    }

    /// Delete the entry for `message_id`. No-op if absent.
    pub async fn remove(&self, message_id: &MessageId) -> Option<WatchEntry> {
        let mut entries = self.entries.write().await;
        entries.remove(message_id)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl Default for WatchRegistry {
    fn default() -> Self {
        Self::new()
    }
}
