//! Symbolic pull-request status and the classifier that produces it.
//!
//! A pull request is observed along two independent axes: the combined CI
//! state of a commit, and the merge/review state of the pull request itself.
//! Each axis is classified on its own and the results are never folded into a
//! single value.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Classified combined CI state of a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CiStatus {
    Pass,
    Fail,
    Pending,
}

/// Classified merge/review state of a pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Merged,
    Approved,
    ChangesRequested,
    /// Neither merged nor reviewed. The classifier never returns this; the
    /// intake handler substitutes it when the review axis is undecided.
    Open,
}

/// Any symbolic status code, from either axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusCode {
    Pass,
    Fail,
    Pending,
    Merged,
    Approved,
    ChangesRequested,
    Open,
}

impl From<CiStatus> for StatusCode {
    fn from(status: CiStatus) -> Self {
        match status {
            CiStatus::Pass => StatusCode::Pass,
            CiStatus::Fail => StatusCode::Fail,
            CiStatus::Pending => StatusCode::Pending,
        }
    }
}

impl From<ReviewStatus> for StatusCode {
    fn from(status: ReviewStatus) -> Self {
        match status {
            ReviewStatus::Merged => StatusCode::Merged,
            ReviewStatus::Approved => StatusCode::Approved,
            ReviewStatus::ChangesRequested => StatusCode::ChangesRequested,
            ReviewStatus::Open => StatusCode::Open,
        }
    }
}

impl StatusCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusCode::Pass => "pass",
            StatusCode::Fail => "fail",
            StatusCode::Pending => "pending",
            StatusCode::Merged => "merged",
            StatusCode::Approved => "approved",
            StatusCode::ChangesRequested => "changes_requested",
            StatusCode::Open => "open",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for CiStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        StatusCode::from(*self).fmt(f)
    }
}

impl fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        StatusCode::from(*self).fmt(f)
    }
}

/// One review on a pull request, as reported by the repository host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestReview {
    /// Raw review state, e.g. `APPROVED`, `CHANGES_REQUESTED`, `COMMENTED`.
    pub state: String,
    pub reviewer: Option<String>,
}

impl PullRequestReview {
    pub fn new(state: impl Into<String>) -> Self {
        Self {
            state: state.into(),
            reviewer: None,
        }
    }
}

/// Classify a raw combined CI state.
///
/// `failure` and `error` both map to [`CiStatus::Fail`]. An absent or
/// unrecognized state is left undecided.
pub fn classify_ci(raw_state: Option<&str>) -> Option<CiStatus> {
    match raw_state? {
        "failure" | "error" => Some(CiStatus::Fail),
        "pending" => Some(CiStatus::Pending),
        "success" => Some(CiStatus::Pass),
        _ => None,
    }
}

/// Classify the merge/review axis of a pull request.
///
/// A merged pull request is [`ReviewStatus::Merged`] regardless of reviews.
/// Otherwise every review is scanned in order and the last `APPROVED` or
/// `CHANGES_REQUESTED` review decides; other review states are skipped.
pub fn classify_review(merged: bool, reviews: &[PullRequestReview]) -> Option<ReviewStatus> {
    if merged {
        return Some(ReviewStatus::Merged);
    }

    let mut status = None;
    for review in reviews {
        match review.state.as_str() {
            "APPROVED" => status = Some(ReviewStatus::Approved),
            "CHANGES_REQUESTED" => status = Some(ReviewStatus::ChangesRequested),
            _ => {}
        }
    }
    status
}
