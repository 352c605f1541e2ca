//! Turns an inbound chat message into at most one watch registration.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::audit::AuditLog;
use crate::link::{find_pull_request_link, PullRequestLink};
use crate::provider::StatusProvider;
use crate::reactions::ReactionNames;
use crate::sink::NotificationSink;
use crate::status::{classify_ci, classify_review, ReviewStatus, StatusCode};
use crate::watch::{ChannelId, MessageId, WatchEntry, WatchRegistry};

/// A chat message as delivered by the event source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub channel_id: ChannelId,
    pub message_id: MessageId,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntakeOutcome {
    /// The message contained no pull-request link.
    NoLink,
    /// The pull request was already merged; reactions were applied but no
    /// watch was created.
    AlreadyMerged(PullRequestLink),
    /// A watch was registered for the message.
    Watching(WatchEntry),
}

/// Web host whose pull-request links are tracked unless configured otherwise.
pub const DEFAULT_WEB_HOST: &str = "github.com";

pub struct IntakeHandler {
    provider: Arc<dyn StatusProvider>,
    sink: Arc<dyn NotificationSink>,
    registry: Arc<WatchRegistry>,
    reactions: ReactionNames,
    web_host: String,
    audit: Option<Arc<dyn AuditLog>>,
}

impl IntakeHandler {
    pub fn new(
        provider: Arc<dyn StatusProvider>,
        sink: Arc<dyn NotificationSink>,
        registry: Arc<WatchRegistry>,
        reactions: ReactionNames,
    ) -> Self {
        Self {
            provider,
            sink,
            registry,
            reactions,
            web_host: DEFAULT_WEB_HOST.to_string(),
            audit: None,
        }
    }

    /// Only links on `host` are looked up; links to any other host are
    /// treated as if the message had none.
    pub fn with_web_host(mut self, host: impl Into<String>) -> Self {
        self.web_host = host.into();
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditLog>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn registry(&self) -> &Arc<WatchRegistry> {
        &self.registry
    }

    /// Handle one chat message.
    ///
    /// Provider failures abort the intake and are returned; nothing has been
    /// registered at that point. Sink failures while announcing or reacting
    /// are logged and do not undo the registration.
    pub async fn handle_message(&self, message: &InboundMessage) -> Result<IntakeOutcome> {
        let Some(link) = find_pull_request_link(&message.text) else {
            return Ok(IntakeOutcome::NoLink);
        };
        if !link.host.eq_ignore_ascii_case(&self.web_host) {
            debug!(
                "Message {} links to {}, not {}; ignoring",
                message.message_id, link.host, self.web_host
            );
            return Ok(IntakeOutcome::NoLink);
        }

        info!(
            "Message {} in {} references PR #{} in {}",
            message.message_id, message.channel_id, link.pr_number, link.repo
        );

        let (repo, pr_number) = (&link.repo, link.pr_number);
        let provider = &self.provider;
        let pull = provider
            .pull_request(repo, pr_number)
            .await
            .with_context(|| format!("Failed to fetch {}#{}", repo, pr_number))?;
        let merged = provider
            .is_merged(repo, pr_number)
            .await
            .with_context(|| format!("Failed to fetch merge state of {}#{}", repo, pr_number))?;
        let reviews = if merged {
            Vec::new()
        } else {
            provider
                .reviews(repo, pr_number)
                .await
                .with_context(|| format!("Failed to fetch reviews of {}#{}", repo, pr_number))?
        };
        let raw_ci = provider
            .combined_ci_status(repo, &pull.head)
            .await
            .with_context(|| {
                format!("Failed to fetch CI status of {} at {}", repo, pull.head.short())
            })?;

        let review_status = classify_review(merged, &reviews).unwrap_or(ReviewStatus::Open);
        let ci_status = classify_ci(raw_ci.as_deref());

        self.announce(message, &pull.title).await;

        let mut statuses: Vec<StatusCode> = Vec::with_capacity(2);
        if let Some(ci) = ci_status {
            statuses.push(ci.into());
        }
        statuses.push(review_status.into());

        let outcome = if review_status == ReviewStatus::Merged {
            info!(
                "PR #{} in {} is already merged, not watching",
                link.pr_number, link.repo
            );
            IntakeOutcome::AlreadyMerged(link)
        } else {
            let entry = WatchEntry {
                message_id: message.message_id.clone(),
                channel_id: message.channel_id.clone(),
                repo: link.repo,
                pr_number: link.pr_number,
                commit_sha: pull.head,
                last_ci_status: ci_status,
            };
            if self.registry.put(entry.clone()).await.is_some() {
                info!("Replaced existing watch for message {}", entry.message_id);
            }
            info!(
                "Watching PR #{} in {} at {} for message {}",
                entry.pr_number,
                entry.repo,
                entry.commit_sha.short(),
                entry.message_id
            );
            if let Some(audit) = &self.audit {
                if let Err(e) = audit.record_registration(&entry).await {
                    warn!("Failed to record watch registration: {}", e);
                }
            }
            IntakeOutcome::Watching(entry)
        };

        for status in statuses {
            let name = self.reactions.name_for(status);
            if let Err(e) = self
                .sink
                .add_reaction(&message.channel_id, &message.message_id, name)
                .await
            {
                warn!(
                    "Failed to add {} reaction to message {}: {}",
                    name, message.message_id, e
                );
            }
        }

        Ok(outcome)
    }

    /// Post the pull-request title as a threaded reply, unless the message
    /// already has a thread.
    async fn announce(&self, message: &InboundMessage, title: &str) {
        let metadata = match self
            .sink
            .message_metadata(&message.channel_id, &message.message_id)
            .await
        {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!(
                    "Failed to look up message {} before announcing: {}",
                    message.message_id, e
                );
                return;
            }
        };

        if metadata.has_thread() {
            return;
        }

        if let Err(e) = self
            .sink
            .post_message(&message.channel_id, &message.message_id, title)
            .await
        {
            warn!(
                "Failed to post title reply for message {}: {}",
                message.message_id, e
            );
        }
    }
}
