//! Types for the `/status` endpoint.

use serde::Serialize;

use prwatch_core::{CiStatus, WatchSnapshot};

/// Watch counts by last observed CI status.
#[derive(Debug, Default, Serialize, PartialEq, Eq)]
pub struct StatusSummary {
    pub total_watches: usize,
    pub pass: usize,
    pub fail: usize,
    pub pending: usize,
    pub no_status: usize,
}

/// One watched pull request.
#[derive(Debug, Serialize)]
pub struct WatchStatusEntry {
    pub message_id: String,
    pub channel_id: String,
    pub repo: String,
    pub pr_number: u64,
    pub commit_sha: String,
    pub ci_status: Option<CiStatus>,
}

#[derive(Debug, Serialize)]
pub struct StatusData {
    pub version: String,
    pub summary: StatusSummary,
    pub watches: Vec<WatchStatusEntry>,
}

impl StatusData {
    pub fn from_snapshot(snapshot: WatchSnapshot, version: String) -> Self {
        let mut summary = StatusSummary {
            total_watches: snapshot.len(),
            ..Default::default()
        };

        let watches = snapshot
            .into_iter()
            .map(|entry| {
                match entry.last_ci_status {
                    Some(CiStatus::Pass) => summary.pass += 1,
                    Some(CiStatus::Fail) => summary.fail += 1,
                    Some(CiStatus::Pending) => summary.pending += 1,
                    None => summary.no_status += 1,
                }
                WatchStatusEntry {
                    message_id: entry.message_id.0,
                    channel_id: entry.channel_id.0,
                    repo: entry.repo.to_string(),
                    pr_number: entry.pr_number,
                    commit_sha: entry.commit_sha.0,
                    ci_status: entry.last_ci_status,
                }
            })
            .collect();

        Self {
            version,
            summary,
            watches,
        }
    }
}
