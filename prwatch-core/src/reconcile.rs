//! Periodic poll-and-diff of every watched pull request.
//!
//! Each tick takes a snapshot of the registry and reconciles the entries one
//! after another. Per entry, the CI transition is applied before the merge
//! check, so an entry whose CI changed in the same tick it merged gets both
//! reactions before it is dropped. A failing entry is logged and retried on the
//! next tick without affecting the others.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::provider::StatusProvider;
use crate::reactions::ReactionNames;
use crate::sink::NotificationSink;
use crate::status::{classify_ci, CiStatus, ReviewStatus};
use crate::watch::{WatchEntry, WatchRegistry};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_ENTRY_TIMEOUT: Duration = Duration::from_secs(60);

/// What reconciling one entry changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EntryOutcome {
    /// `(previous, observed)` when the CI status changed this tick.
    pub ci_transition: Option<(Option<CiStatus>, Option<CiStatus>)>,
    /// The pull request was observed merged and the watch was removed.
    pub merged: bool,
}

/// Counts for one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TickReport {
    pub checked: usize,
    pub transitioned: usize,
    pub merged: usize,
    pub failed: usize,
}

pub struct Reconciler {
    provider: Arc<dyn StatusProvider>,
    sink: Arc<dyn NotificationSink>,
    registry: Arc<WatchRegistry>,
    reactions: ReactionNames,
    entry_timeout: Duration,
}

impl Reconciler {
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
            entry_timeout: DEFAULT_ENTRY_TIMEOUT,
        }
    }

    /// Upper bound on the time spent reconciling a single entry.
    pub fn with_entry_timeout(mut self, timeout: Duration) -> Self {
        self.entry_timeout = timeout;
        self
    }

    /// Run one reconciliation pass over a snapshot of the registry.
    pub async fn tick(&self) -> TickReport {
        let snapshot = self.registry.snapshot().await;
        let mut report = TickReport {
            checked: snapshot.len(),
            ..Default::default()
        };

        if snapshot.is_empty() {
            return report;
        }

        info!("Reconciling {} watched pull request(s)", snapshot.len());

        for entry in &snapshot {
            let result = tokio::time::timeout(self.entry_timeout, self.reconcile_entry(entry))
                .await
                .unwrap_or_else(|_| {
                    Err(anyhow!(
                        "timed out after {}s",
                        self.entry_timeout.as_secs_f64()
                    ))
                });

            match result {
                Ok(outcome) => {
                    if outcome.ci_transition.is_some() {
                        report.transitioned += 1;
                    }
                    if outcome.merged {
                        report.merged += 1;
                    }
                }
                Err(e) => {
                    report.failed += 1;
                    error!(
                        "Failed to reconcile PR #{} in {} (message {}): {:#}",
                        entry.pr_number, entry.repo, entry.message_id, e
                    );
                }
            }
        }

        info!(
            "Reconciliation tick done: {} checked, {} transitioned, {} merged, {} failed",
            report.checked, report.transitioned, report.merged, report.failed
        );

        report
    }

    /// Reconcile a single watch against the provider's current state.
    ///
    /// Entries whose CI status is unchanged and that are not merged cause no
    /// sink calls. A failed CI transition does not stop the merge check: a
    /// merged pull request is always dropped from the registry, and the first
    /// error of the pass is returned afterwards.
    pub async fn reconcile_entry(&self, entry: &WatchEntry) -> Result<EntryOutcome> {
        let mut outcome = EntryOutcome::default();

        let raw = self
            .provider
            .combined_ci_status(&entry.repo, &entry.commit_sha)
            .await
            .with_context(|| format!("fetching CI status at {}", entry.commit_sha.short()))?;
        let observed = classify_ci(raw.as_deref());

        let mut transition_error = None;
        if observed != entry.last_ci_status {
            match self.apply_ci_transition(entry, observed).await {
                Ok(()) => outcome.ci_transition = Some((entry.last_ci_status, observed)),
                Err(e) => transition_error = Some(e),
            }
        }

        let merged = match self
            .provider
            .is_merged(&entry.repo, entry.pr_number)
            .await
            .context("fetching merge state")
        {
            Ok(merged) => merged,
            Err(e) => return Err(transition_error.unwrap_or(e)),
        };

        let mut merge_error = None;
        if merged {
            let reacted = self
                .sink
                .add_reaction(
                    &entry.channel_id,
                    &entry.message_id,
                    self.reactions.name_for(ReviewStatus::Merged),
                )
                .await;

            // The watch ends once the merge is seen, even if a reaction
            // could not be changed.
            self.registry.remove(&entry.message_id).await;
            outcome.merged = true;
            info!(
                "PR #{} in {} merged, stopped watching message {}",
                entry.pr_number, entry.repo, entry.message_id
            );

            merge_error = reacted.context("adding merged reaction").err();
        }

        match transition_error.or(merge_error) {
            Some(e) => Err(e),
            None => Ok(outcome),
        }
    }

    /// Swap the CI reaction from `entry.last_ci_status` to `observed` and
    /// record the new status. The registry is left untouched on failure so
    /// the next tick retries.
    async fn apply_ci_transition(
        &self,
        entry: &WatchEntry,
        observed: Option<CiStatus>,
    ) -> Result<()> {
        if let Some(previous) = entry.last_ci_status {
            self.sink
                .remove_reaction(
                    &entry.channel_id,
                    &entry.message_id,
                    self.reactions.name_for(previous),
                )
                .await
                .context("removing previous CI reaction")?;
        }
        if let Some(current) = observed {
            self.sink
                .add_reaction(
                    &entry.channel_id,
                    &entry.message_id,
                    self.reactions.name_for(current),
                )
                .await
                .context("adding CI reaction")?;
        }

        if !self
            .registry
            .update_ci_status(&entry.message_id, &entry.commit_sha, observed)
            .await
        {
            warn!(
                "Watch for message {} changed during reconciliation, dropping CI update",
                entry.message_id
            );
        }

        info!(
            "PR #{} in {}: CI {} -> {}",
            entry.pr_number,
            entry.repo,
            describe(entry.last_ci_status),
            describe(observed)
        );
        Ok(())
    }

    /// Tick every `period` until `shutdown` flips to `true` (or its sender is
    /// dropped). A tick that is in flight when shutdown is requested runs to
    /// completion.
    pub async fn run(self: Arc<Self>, period: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "Reconciliation loop started (interval: {}s)",
            period.as_secs_f64()
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Reconciliation loop stopped");
    }
}

fn describe(status: Option<CiStatus>) -> String {
    status
        .map(|s| s.to_string())
        .unwrap_or_else(|| "none".to_string())
}
