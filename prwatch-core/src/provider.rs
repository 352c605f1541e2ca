//! Read-side collaborator: the repository host.

use anyhow::Result;
use async_trait::async_trait;

use crate::link::RepoRef;
use crate::status::PullRequestReview;
use crate::watch::CommitSha;

/// Head commit and title of a pull request, read together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequestSummary {
    pub head: CommitSha,
    pub title: String,
}

/// Source of pull-request and commit status.
///
/// Implementations talk to the repository host; every method is a bounded
/// network call and may fail transiently.
#[async_trait]
pub trait StatusProvider: Send + Sync {
    /// Current head commit of the pull request.
    async fn head_commit(&self, repo: &RepoRef, pr_number: u64) -> Result<CommitSha>;

    /// Raw combined CI state of a commit (`failure`, `error`, `pending`,
    /// `success`), or `None` when the host reports no state.
    async fn combined_ci_status(&self, repo: &RepoRef, commit: &CommitSha)
        -> Result<Option<String>>;

    async fn is_merged(&self, repo: &RepoRef, pr_number: u64) -> Result<bool>;

    /// Reviews in the order the host reports them (oldest first).
    async fn reviews(&self, repo: &RepoRef, pr_number: u64) -> Result<Vec<PullRequestReview>>;

    async fn title(&self, repo: &RepoRef, pr_number: u64) -> Result<String>;

    /// Head commit and title in one lookup. Hosts that return both from the
    /// same endpoint should override this.
    async fn pull_request(&self, repo: &RepoRef, pr_number: u64) -> Result<PullRequestSummary> {
        Ok(PullRequestSummary {
            head: self.head_commit(repo, pr_number).await?,
            title: self.title(repo, pr_number).await?,
        })
    }
}
