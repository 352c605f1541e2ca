//! Slack Web API client used as the notification sink.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, error};

use prwatch_core::{
    ChannelId, MessageId, MessageMetadata, NotificationSink, ReactionOutcome, SinkError,
};

use crate::recording::{RecordingLogger, RecordingMiddleware, ServiceType};

pub const DEFAULT_SLACK_API_URL: &str = "https://slack.com/api";

/// Error code Slack returns when adding a reaction that is already present.
const ALREADY_REACTED: &str = "already_reacted";
/// Error code Slack returns when removing a reaction that is not present.
const NO_REACTION: &str = "no_reaction";

#[derive(Clone)]
pub struct SlackClient {
    client: ClientWithMiddleware,
    api_base: String,
    bot_token: String,
}

#[derive(Debug, Deserialize)]
struct SlackResponse {
    ok: bool,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReactionsGetResponse {
    ok: bool,
    error: Option<String>,
    message: Option<ReactedMessage>,
}

#[derive(Debug, Deserialize)]
struct ReactedMessage {
    #[serde(default)]
    reactions: Vec<Reaction>,
    reply_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct Reaction {
    name: String,
}

impl SlackClient {
    pub fn new(
        api_base: &str,
        bot_token: String,
        request_timeout: Duration,
        recording_logger: Option<RecordingLogger>,
    ) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("prwatch/", env!("CARGO_PKG_VERSION")))
            .timeout(request_timeout)
            .build()
            .context("Failed to create Slack HTTP client")?;

        let mut builder = ClientBuilder::new(client);
        if let Some(logger) = recording_logger {
            builder = builder.with(RecordingMiddleware::new(logger, ServiceType::Slack));
        }

        Ok(Self {
            client: builder.build(),
            api_base: api_base.trim_end_matches('/').to_string(),
            bot_token: bot_token.trim().to_string(),
        })
    }

    fn post(&self, method: &str, payload: serde_json::Value) -> RequestBuilder {
        self.client
            .post(format!("{}/{}", self.api_base, method))
            .bearer_auth(&self.bot_token)
            .json(&payload)
    }

    async fn send<T: DeserializeOwned>(
        &self,
        method: &str,
        request: RequestBuilder,
    ) -> Result<T, SinkError> {
        let response = request
            .send()
            .await
            .map_err(|e| SinkError::Transport(format!("{}: {}", method, e)))?;

        let status = response.status();
        if !status.is_success() {
            error!("Slack API error calling {}: HTTP {}", method, status);
            return Err(SinkError::api(method, format!("http_{}", status.as_u16())));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| SinkError::InvalidResponse(format!("{}: {}", method, e)))
    }

    async fn change_reaction(
        &self,
        method: &str,
        idempotent_code: &str,
        channel: &ChannelId,
        message: &MessageId,
        name: &str,
    ) -> Result<ReactionOutcome, SinkError> {
        let request = self.post(
            method,
            json!({
                "channel": channel.0,
                "timestamp": message.0,
                "name": name,
            }),
        );
        let response: SlackResponse = self.send(method, request).await?;
        reaction_outcome(method, idempotent_code, response)
    }
}

/// Map a reaction call's response onto the idempotent contract.
fn reaction_outcome(
    method: &str,
    idempotent_code: &str,
    response: SlackResponse,
) -> Result<ReactionOutcome, SinkError> {
    if response.ok {
        return Ok(ReactionOutcome::Applied);
    }
    match response.error.as_deref() {
        Some(code) if code == idempotent_code => {
            debug!("{} was a no-op ({})", method, code);
            Ok(ReactionOutcome::AlreadyInPlace)
        }
        Some(code) => Err(SinkError::api(method, code)),
        None => Err(SinkError::api(method, "unknown_error")),
    }
}

#[async_trait]
impl NotificationSink for SlackClient {
    async fn post_message(
        &self,
        channel: &ChannelId,
        thread: &MessageId,
        text: &str,
    ) -> Result<(), SinkError> {
        let method = "chat.postMessage";
        let request = self.post(
            method,
            json!({
                "channel": channel.0,
                "thread_ts": thread.0,
                "text": text,
            }),
        );
        let response: SlackResponse = self.send(method, request).await?;
        if response.ok {
            Ok(())
        } else {
            Err(SinkError::api(
                method,
                response.error.unwrap_or_else(|| "unknown_error".to_string()),
            ))
        }
    }

    async fn add_reaction(
        &self,
        channel: &ChannelId,
        message: &MessageId,
        name: &str,
    ) -> Result<ReactionOutcome, SinkError> {
        self.change_reaction("reactions.add", ALREADY_REACTED, channel, message, name)
            .await
    }

    async fn remove_reaction(
        &self,
        channel: &ChannelId,
        message: &MessageId,
        name: &str,
    ) -> Result<ReactionOutcome, SinkError> {
        self.change_reaction("reactions.remove", NO_REACTION, channel, message, name)
            .await
    }

    async fn message_metadata(
        &self,
        channel: &ChannelId,
        message: &MessageId,
    ) -> Result<MessageMetadata, SinkError> {
        let method = "reactions.get";
        let request = self
            .client
            .get(format!("{}/{}", self.api_base, method))
            .bearer_auth(&self.bot_token)
            .query(&[
                ("channel", channel.0.as_str()),
                ("timestamp", message.0.as_str()),
                ("full", "true"),
            ]);
        let response: ReactionsGetResponse = self.send(method, request).await?;

        if !response.ok {
            return Err(SinkError::api(
                method,
                response.error.unwrap_or_else(|| "unknown_error".to_string()),
            ));
        }

        let message = response
            .message
            .ok_or_else(|| SinkError::InvalidResponse(format!("{}: missing message", method)))?;

        Ok(MessageMetadata {
            reactions: message.reactions.into_iter().map(|r| r.name).collect(),
            reply_count: message.reply_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn client(server: &MockServer) -> SlackClient {
        SlackClient::new(
            &server.base_url(),
            "xoxb-test".to_string(),
            Duration::from_secs(5),
            None,
        )
        .unwrap()
    }

    fn channel() -> ChannelId {
        ChannelId::from("C1")
    }

    fn ts() -> MessageId {
        MessageId::from("1700000000.000100")
    }

    #[tokio::test]
    async fn test_add_reaction_applied() {
        let server = MockServer::start();
        let add = server.mock(|when, then| {
            when.method(POST)
                .path("/reactions.add")
                .header("authorization", "Bearer xoxb-test")
                .json_body(json!({
                    "channel": "C1",
                    "timestamp": "1700000000.000100",
                    "name": "pass"
                }));
            then.status(200).json_body(json!({"ok": true}));
        });
        let slack = client(&server);

        let outcome = slack.add_reaction(&channel(), &ts(), "pass").await.unwrap();

        assert_eq!(outcome, ReactionOutcome::Applied);
        add.assert();
    }

    #[tokio::test]
    async fn test_add_existing_reaction_is_not_an_error() {
        let server = MockServer::start();
        let add = server.mock(|when, then| {
            when.method(POST).path("/reactions.add");
            then.status(200)
                .json_body(json!({"ok": false, "error": "already_reacted"}));
        });
        let slack = client(&server);

        let first = slack.add_reaction(&channel(), &ts(), "pass").await.unwrap();
        let second = slack.add_reaction(&channel(), &ts(), "pass").await.unwrap();

        assert_eq!(first, ReactionOutcome::AlreadyInPlace);
        assert_eq!(second, ReactionOutcome::AlreadyInPlace);
        add.assert_hits(2);
    }

    #[tokio::test]
    async fn test_remove_missing_reaction_is_not_an_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/reactions.remove");
            then.status(200)
                .json_body(json!({"ok": false, "error": "no_reaction"}));
        });
        let slack = client(&server);

        let outcome = slack
            .remove_reaction(&channel(), &ts(), "pending")
            .await
            .unwrap();

        assert_eq!(outcome, ReactionOutcome::AlreadyInPlace);
    }

    #[tokio::test]
    async fn test_other_errors_propagate() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/reactions.add");
            then.status(200)
                .json_body(json!({"ok": false, "error": "message_not_found"}));
        });
        server.mock(|when, then| {
            when.method(POST).path("/reactions.remove");
            then.status(200)
                .json_body(json!({"ok": false, "error": "already_reacted"}));
        });
        let slack = client(&server);

        let err = slack
            .add_reaction(&channel(), &ts(), "pass")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SinkError::Api { ref method, ref code }
                if method == "reactions.add" && code == "message_not_found"
        ));

        // Only the code matching the requested end state is tolerated.
        assert!(slack
            .remove_reaction(&channel(), &ts(), "pass")
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_rate_limit_is_an_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/reactions.add");
            then.status(429).header("retry-after", "1");
        });
        let slack = client(&server);

        let err = slack
            .add_reaction(&channel(), &ts(), "pass")
            .await
            .unwrap_err();
        assert!(matches!(err, SinkError::Api { ref code, .. } if code == "http_429"));
    }

    #[tokio::test]
    async fn test_post_message_in_thread() {
        let server = MockServer::start();
        let post = server.mock(|when, then| {
            when.method(POST).path("/chat.postMessage").json_body(json!({
                "channel": "C1",
                "thread_ts": "1700000000.000100",
                "text": "Add widgets"
            }));
            then.status(200)
                .json_body(json!({"ok": true, "ts": "1700000001.000200"}));
        });
        let slack = client(&server);

        slack
            .post_message(&channel(), &ts(), "Add widgets")
            .await
            .unwrap();
        post.assert();
    }

    #[tokio::test]
    async fn test_message_metadata() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET)
                .path("/reactions.get")
                .query_param("channel", "C1")
                .query_param("timestamp", "1700000000.000100")
                .query_param("full", "true");
            then.status(200).json_body(json!({
                "ok": true,
                "type": "message",
                "message": {
                    "text": "https://github.com/acme/widgets/pull/42",
                    "reply_count": 1,
                    "reactions": [
                        {"name": "pending", "count": 1, "users": ["U1"]},
                        {"name": "open", "count": 1, "users": ["U1"]}
                    ]
                }
            }));
        });
        let slack = client(&server);

        let metadata = slack.message_metadata(&channel(), &ts()).await.unwrap();

        assert_eq!(metadata.reactions, vec!["pending", "open"]);
        assert_eq!(metadata.reply_count, Some(1));
        assert!(metadata.has_thread());
    }

    #[tokio::test]
    async fn test_message_metadata_without_thread() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/reactions.get");
            then.status(200).json_body(json!({
                "ok": true,
                "type": "message",
                "message": {"text": "hello"}
            }));
        });
        let slack = client(&server);

        let metadata = slack.message_metadata(&channel(), &ts()).await.unwrap();

        assert!(metadata.reactions.is_empty());
        assert!(!metadata.has_thread());
    }
}
