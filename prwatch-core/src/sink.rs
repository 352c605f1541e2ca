//! Write-side collaborator: the chat platform.
//!
//! Reaction calls follow an idempotent contract. Adding a reaction that is
//! already present, or removing one that is absent, reports
//! [`ReactionOutcome::AlreadyInPlace`] instead of an error, so callers only
//! ever see failures that left the requested end state unreached.

use async_trait::async_trait;
use thiserror::Error;

use crate::watch::{ChannelId, MessageId};

/// Result of a successful reaction add/remove.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactionOutcome {
    /// The call changed the message's reactions.
    Applied,
    /// The message was already in the requested state.
    AlreadyInPlace,
}

/// What the chat platform knows about a message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageMetadata {
    pub reactions: Vec<String>,
    /// Number of threaded replies; `None` when the message has no thread.
    pub reply_count: Option<u64>,
}

impl MessageMetadata {
    pub fn has_thread(&self) -> bool {
        self.reply_count.is_some()
    }
}

#[derive(Debug, Error)]
pub enum SinkError {
    /// The platform rejected the call (auth, rate limit, unknown message, ...).
    #[error("{method} failed: {code}")]
    Api { method: String, code: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl SinkError {
    pub fn api(method: impl Into<String>, code: impl Into<String>) -> Self {
        Self::Api {
            method: method.into(),
            code: code.into(),
        }
    }
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Post `text` as a threaded reply under `thread`.
    async fn post_message(
        &self,
        channel: &ChannelId,
        thread: &MessageId,
        text: &str,
    ) -> Result<(), SinkError>;

    async fn add_reaction(
        &self,
        channel: &ChannelId,
        message: &MessageId,
        name: &str,
    ) -> Result<ReactionOutcome, SinkError>;

    async fn remove_reaction(
        &self,
        channel: &ChannelId,
        message: &MessageId,
        name: &str,
    ) -> Result<ReactionOutcome, SinkError>;

    async fn message_metadata(
        &self,
        channel: &ChannelId,
        message: &MessageId,
    ) -> Result<MessageMetadata, SinkError>;
}
