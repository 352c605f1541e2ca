use anyhow::{bail, Context, Result};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use prwatch_core::reconcile::DEFAULT_POLL_INTERVAL;
use prwatch_core::{ReactionNames, DEFAULT_WEB_HOST};

use crate::github::DEFAULT_GITHUB_API_URL;
use crate::slack::DEFAULT_SLACK_API_URL;

#[derive(Clone)]
pub struct Config {
    pub github_token: String,
    pub github_api_url: String,
    /// Host of pull-request links to track (`github.com`, or the Enterprise host).
    pub github_web_host: String,
    pub slack_token: String,
    pub slack_signing_secret: String,
    pub slack_api_url: String,
    pub port: u16,
    /// Time between reconciliation ticks.
    pub poll_interval: Duration,
    /// Per-request timeout for both API clients.
    pub request_timeout: Duration,
    /// Directory for the audit database. Defaults to the current directory.
    pub state_dir: PathBuf,
    pub audit_enabled: bool,
    pub recording_enabled: bool,
    pub recording_log_path: String,
    /// Bearer token for `/status`. When unset the endpoint answers 403.
    pub status_auth_token: Option<String>,
    pub reactions: ReactionNames,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let optional = |key: &str| non_blank(lookup(key));
        let required = |key: &str| {
            optional(key).with_context(|| format!("{} environment variable is required", key))
        };

        let github_token = required("GITHUB_TOKEN")?;
        let slack_token = required("SLACK_TOKEN")?;
        let slack_signing_secret = required("SLACK_SIGNING_SECRET")?;

        let github_api_url =
            optional("GITHUB_API_URL").unwrap_or_else(|| DEFAULT_GITHUB_API_URL.to_string());
        let github_web_host =
            optional("GITHUB_WEB_HOST").unwrap_or_else(|| DEFAULT_WEB_HOST.to_string());
        let slack_api_url =
            optional("SLACK_API_URL").unwrap_or_else(|| DEFAULT_SLACK_API_URL.to_string());

        let port = optional("PORT")
            .unwrap_or_else(|| "5000".to_string())
            .parse::<u16>()
            .context("PORT must be a valid number")?;

        let poll_interval = parse_seconds(
            "POLL_INTERVAL_SECS",
            optional("POLL_INTERVAL_SECS"),
            DEFAULT_POLL_INTERVAL.as_secs(),
        )?;
        let request_timeout =
            parse_seconds("REQUEST_TIMEOUT_SECS", optional("REQUEST_TIMEOUT_SECS"), 10)?;

        let state_dir = optional("STATE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        let audit_enabled = parse_flag(optional("AUDIT_ENABLED"));
        let recording_enabled = parse_flag(optional("RECORDING_ENABLED"));
        let recording_log_path =
            optional("RECORDING_LOG_PATH").unwrap_or_else(|| "recordings.jsonl".to_string());

        let status_auth_token = parse_status_auth_token(lookup("STATUS_AUTH_TOKEN"));

        let defaults = ReactionNames::default();
        let reaction = |key: &str, default: String| optional(key).unwrap_or(default);
        let reactions = ReactionNames {
            pass: reaction("REACTION_PASS", defaults.pass),
            fail: reaction("REACTION_FAIL", defaults.fail),
            pending: reaction("REACTION_PENDING", defaults.pending),
            merged: reaction("REACTION_MERGED", defaults.merged),
            approved: reaction("REACTION_APPROVED", defaults.approved),
            open: reaction("REACTION_OPEN", defaults.open),
            changes_requested: reaction("REACTION_CHANGES_REQUESTED", defaults.changes_requested),
        };

        Ok(Config {
            github_token,
            github_api_url,
            github_web_host,
            slack_token,
            slack_signing_secret,
            slack_api_url,
            port,
            poll_interval,
            request_timeout,
            state_dir,
            audit_enabled,
            recording_enabled,
            recording_log_path,
            status_auth_token,
            reactions,
        })
    }

    pub fn audit_db_path(&self) -> PathBuf {
        self.state_dir.join("prwatch-audit.db")
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

fn parse_flag(value: Option<String>) -> bool {
    value
        .map(|v| v.trim().eq_ignore_ascii_case("true") || v.trim() == "1")
        .unwrap_or(false)
}

fn parse_seconds(key: &str, value: Option<String>, default: u64) -> Result<Duration> {
    let secs = match value {
        Some(v) => v
            .trim()
            .parse::<u64>()
            .with_context(|| format!("{} must be a whole number of seconds", key))?,
        None => default,
    };
    if secs == 0 {
        bail!("{} must be greater than zero", key);
    }
    Ok(Duration::from_secs(secs))
}

/// Parse STATUS_AUTH_TOKEN from an optional string value.
///
/// Returns None if the value is missing, empty, or contains only whitespace.
/// This prevents an empty token from allowing unauthenticated access.
pub fn parse_status_auth_token(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}
