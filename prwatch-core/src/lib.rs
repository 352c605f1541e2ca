pub mod audit;
pub mod intake;
pub mod link;
pub mod provider;
pub mod reactions;
pub mod reconcile;
pub mod sink;
pub mod status;
pub mod watch;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use audit::{AuditError, AuditLog};
pub use intake::{InboundMessage, IntakeHandler, IntakeOutcome, DEFAULT_WEB_HOST};
pub use link::{find_pull_request_link, PullRequestLink, RepoRef};
pub use provider::{PullRequestSummary, StatusProvider};
pub use reactions::ReactionNames;
pub use reconcile::{EntryOutcome, Reconciler, TickReport};
pub use sink::{MessageMetadata, NotificationSink, ReactionOutcome, SinkError};
pub use status::{
    classify_ci, classify_review, CiStatus, PullRequestReview, ReviewStatus, StatusCode,
};
pub use watch::{ChannelId, CommitSha, MessageId, WatchEntry, WatchRegistry, WatchSnapshot};
