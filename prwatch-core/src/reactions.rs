use serde::{Deserialize, Serialize};

use crate::status::StatusCode;

/// Literal reaction (emoji) names used for each symbolic status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionNames {
    pub pass: String,
    pub fail: String,
    pub pending: String,
    pub merged: String,
    pub approved: String,
    pub open: String,
    pub changes_requested: String,
}

impl Default for ReactionNames {
    fn default() -> Self {
        Self {
            pass: "pass".to_string(),
            fail: "fail".to_string(),
            pending: "pending".to_string(),
            merged: "merge".to_string(),
            approved: "shipit".to_string(),
            open: "open".to_string(),
            changes_requested: "change_requested".to_string(),
        }
    }
}

impl ReactionNames {
    pub fn name_for(&self, status: impl Into<StatusCode>) -> &str {
        match status.into() {
            StatusCode::Pass => &self.pass,
            StatusCode::Fail => &self.fail,
            StatusCode::Pending => &self.pending,
            StatusCode::Merged => &self.merged,
            StatusCode::Approved => &self.approved,
            StatusCode::Open => &self.open,
            StatusCode::ChangesRequested => &self.changes_requested,
        }
    }
}
