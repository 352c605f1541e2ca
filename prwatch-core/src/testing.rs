//! In-memory collaborators for tests.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::audit::{AuditError, AuditLog};
use crate::link::RepoRef;
use crate::provider::{PullRequestSummary, StatusProvider};
use crate::sink::{MessageMetadata, NotificationSink, ReactionOutcome, SinkError};
use crate::status::PullRequestReview;
use crate::watch::{ChannelId, CommitSha, MessageId, WatchEntry};

#[derive(Debug, Clone)]
pub struct FakePullRequest {
    pub title: String,
    pub head_sha: CommitSha,
    pub merged: bool,
    pub reviews: Vec<PullRequestReview>,
}

#[derive(Default)]
struct ProviderState {
    pulls: HashMap<(RepoRef, u64), FakePullRequest>,
    ci: HashMap<CommitSha, String>,
    failing: HashSet<u64>,
    calls: usize,
}

/// Scriptable repository host.
#[derive(Default)]
pub struct FakeProvider {
    state: Mutex<ProviderState>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pull(self, repo: &RepoRef, pr_number: u64, title: &str, head_sha: &str) -> Self {
        self.state.lock().unwrap().pulls.insert(
            (repo.clone(), pr_number),
            FakePullRequest {
                title: title.to_string(),
                head_sha: CommitSha::from(head_sha),
                merged: false,
                reviews: Vec::new(),
            },
        );
        self
    }

    pub fn set_ci(&self, sha: &str, state: Option<&str>) {
        let mut guard = self.state.lock().unwrap();
        match state {
            Some(state) => guard.ci.insert(CommitSha::from(sha), state.to_string()),
            None => guard.ci.remove(&CommitSha::from(sha)),
        };
    }

    pub fn set_merged(&self, repo: &RepoRef, pr_number: u64, merged: bool) {
        let mut guard = self.state.lock().unwrap();
        if let Some(pull) = guard.pulls.get_mut(&(repo.clone(), pr_number)) {
            pull.merged = merged;
        }
    }

    pub fn push_review(&self, repo: &RepoRef, pr_number: u64, state: &str) {
        let mut guard = self.state.lock().unwrap();
        if let Some(pull) = guard.pulls.get_mut(&(repo.clone(), pr_number)) {
            pull.reviews.push(PullRequestReview::new(state));
        }
    }

    pub fn set_head(&self, repo: &RepoRef, pr_number: u64, sha: &str) {
        let mut guard = self.state.lock().unwrap();
        if let Some(pull) = guard.pulls.get_mut(&(repo.clone(), pr_number)) {
            pull.head_sha = CommitSha::from(sha);
        }
    }

    /// Make every call about `pr_number` (and its commits) fail.
    pub fn fail_pull(&self, pr_number: u64, failing: bool) {
        let mut guard = self.state.lock().unwrap();
        if failing {
            guard.failing.insert(pr_number);
        } else {
            guard.failing.remove(&pr_number);
        }
    }

    pub fn calls(&self) -> usize {
        self.state.lock().unwrap().calls
    }

    fn pull(&self, repo: &RepoRef, pr_number: u64) -> Result<FakePullRequest> {
        let mut guard = self.state.lock().unwrap();
        guard.calls += 1;
        if guard.failing.contains(&pr_number) {
            return Err(anyhow!("simulated provider failure for PR #{}", pr_number));
        }
        guard
            .pulls
            .get(&(repo.clone(), pr_number))
            .cloned()
            .ok_or_else(|| anyhow!("unknown pull request {}#{}", repo, pr_number))
    }
}

#[async_trait]
impl StatusProvider for FakeProvider {
    async fn head_commit(&self, repo: &RepoRef, pr_number: u64) -> Result<CommitSha> {
        Ok(self.pull(repo, pr_number)?.head_sha)
    }

    async fn combined_ci_status(
        &self,
        _repo: &RepoRef,
        commit: &CommitSha,
    ) -> Result<Option<String>> {
        let mut guard = self.state.lock().unwrap();
        guard.calls += 1;
        let failing = guard
            .pulls
            .iter()
            .any(|((_, n), p)| &p.head_sha == commit && guard.failing.contains(n));
        if failing {
            return Err(anyhow!("simulated provider failure for commit {}", commit));
        }
        Ok(guard.ci.get(commit).cloned())
    }

    async fn is_merged(&self, repo: &RepoRef, pr_number: u64) -> Result<bool> {
        Ok(self.pull(repo, pr_number)?.merged)
    }

    async fn reviews(&self, repo: &RepoRef, pr_number: u64) -> Result<Vec<PullRequestReview>> {
        Ok(self.pull(repo, pr_number)?.reviews)
    }

    async fn title(&self, repo: &RepoRef, pr_number: u64) -> Result<String> {
        Ok(self.pull(repo, pr_number)?.title)
    }

    async fn pull_request(&self, repo: &RepoRef, pr_number: u64) -> Result<PullRequestSummary> {
        let pull = self.pull(repo, pr_number)?;
        Ok(PullRequestSummary {
            head: pull.head_sha,
            title: pull.title,
        })
    }
}

/// A call observed by [`FakeSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkCall {
    Post {
        channel: String,
        thread: String,
        text: String,
    },
    Add {
        message: String,
        name: String,
    },
    Remove {
        message: String,
        name: String,
    },
    Metadata {
        message: String,
    },
}

#[derive(Default)]
struct SinkState {
    reactions: HashMap<MessageId, BTreeSet<String>>,
    reply_counts: HashMap<MessageId, u64>,
    failing: HashSet<MessageId>,
    calls: Vec<SinkCall>,
}

/// Chat platform that keeps reactions in memory and honours the idempotent
/// reaction contract.
#[derive(Default)]
pub struct FakeSink {
    state: Mutex<SinkState>,
}

impl FakeSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reactions(&self, message: &str) -> BTreeSet<String> {
        self.state
            .lock()
            .unwrap()
            .reactions
            .get(&MessageId::from(message))
            .cloned()
            .unwrap_or_default()
    }

    pub fn calls(&self) -> Vec<SinkCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    /// Calls that changed or probed reactions (excludes metadata lookups).
    pub fn reaction_calls(&self) -> Vec<SinkCall> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, SinkCall::Add { .. } | SinkCall::Remove { .. }))
            .collect()
    }

    pub fn posts(&self) -> Vec<SinkCall> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, SinkCall::Post { .. }))
            .collect()
    }

    pub fn set_reply_count(&self, message: &str, count: u64) {
        self.state
            .lock()
            .unwrap()
            .reply_counts
            .insert(MessageId::from(message), count);
    }

    pub fn fail_message(&self, message: &str, failing: bool) {
        let mut guard = self.state.lock().unwrap();
        if failing {
            guard.failing.insert(MessageId::from(message));
        } else {
            guard.failing.remove(&MessageId::from(message));
        }
    }
}

#[async_trait]
impl NotificationSink for FakeSink {
    async fn post_message(
        &self,
        channel: &ChannelId,
        thread: &MessageId,
        text: &str,
    ) -> Result<(), SinkError> {
        let mut guard = self.state.lock().unwrap();
        guard.calls.push(SinkCall::Post {
            channel: channel.0.clone(),
            thread: thread.0.clone(),
            text: text.to_string(),
        });
        if guard.failing.contains(thread) {
            return Err(SinkError::api("chat.postMessage", "ratelimited"));
        }
        *guard.reply_counts.entry(thread.clone()).or_insert(0) += 1;
        Ok(())
    }

    async fn add_reaction(
        &self,
        _channel: &ChannelId,
        message: &MessageId,
        name: &str,
    ) -> Result<ReactionOutcome, SinkError> {
        let mut guard = self.state.lock().unwrap();
        guard.calls.push(SinkCall::Add {
            message: message.0.clone(),
            name: name.to_string(),
        });
        if guard.failing.contains(message) {
            return Err(SinkError::api("reactions.add", "ratelimited"));
        }
        let inserted = guard
            .reactions
            .entry(message.clone())
            .or_default()
            .insert(name.to_string());
        Ok(if inserted {
            ReactionOutcome::Applied
        } else {
            ReactionOutcome::AlreadyInPlace
        })
    }

    async fn remove_reaction(
        &self,
        _channel: &ChannelId,
        message: &MessageId,
        name: &str,
    ) -> Result<ReactionOutcome, SinkError> {
        let mut guard = self.state.lock().unwrap();
        guard.calls.push(SinkCall::Remove {
            message: message.0.clone(),
            name: name.to_string(),
        });
        if guard.failing.contains(message) {
            return Err(SinkError::api("reactions.remove", "ratelimited"));
        }
        let removed = guard
            .reactions
            .get_mut(message)
            .is_some_and(|set| set.remove(name));
        Ok(if removed {
            ReactionOutcome::Applied
        } else {
            ReactionOutcome::AlreadyInPlace
        })
    }

    async fn message_metadata(
        &self,
        _channel: &ChannelId,
        message: &MessageId,
    ) -> Result<MessageMetadata, SinkError> {
        let mut guard = self.state.lock().unwrap();
        guard.calls.push(SinkCall::Metadata {
            message: message.0.clone(),
        });
        Ok(MessageMetadata {
            reactions: guard
                .reactions
                .get(message)
                .map(|set| set.iter().cloned().collect())
                .unwrap_or_default(),
            reply_count: guard.reply_counts.get(message).copied(),
        })
    }
}

/// Audit log that keeps registrations in memory.
#[derive(Default)]
pub struct MemoryAudit {
    entries: Mutex<Vec<WatchEntry>>,
}

impl MemoryAudit {
    pub fn entries(&self) -> Vec<WatchEntry> {
        self.entries.lock().unwrap().clone()
    }
}

#[async_trait]
impl AuditLog for MemoryAudit {
    async fn record_registration(&self, entry: &WatchEntry) -> Result<(), AuditError> {
        self.entries.lock().unwrap().push(entry.clone());
        Ok(())
    }
}
