//! Slack Events API endpoint: the inbound surface that feeds the intake handler.

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::post,
    Router,
};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use prwatch_core::{ChannelId, InboundMessage, IntakeOutcome, MessageId};

use crate::recording::middleware::headers_to_map;
use crate::recording::{CorrelationId, Direction, EventType, RecordedEvent, Sanitizer};
use crate::AppState;

/// Requests whose timestamp is further than this from now are rejected.
const MAX_TIMESTAMP_SKEW_SECS: i64 = 300;
/// Slack event payloads are small; anything larger is refused.
const MAX_BODY_BYTES: usize = 1024 * 1024;
/// How long a delivered `event_id` is remembered to drop Slack retries.
const EVENT_ID_TTL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SlackEnvelope {
    UrlVerification {
        challenge: String,
    },
    EventCallback {
        event_id: Option<String>,
        event: SlackEvent,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SlackEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub subtype: Option<String>,
    pub channel: Option<String>,
    pub ts: Option<String>,
    pub text: Option<String>,
}

impl SlackEvent {
    /// The chat message carried by this event, if it is a message with text.
    pub fn inbound_message(&self) -> Option<InboundMessage> {
        if self.kind != "message" {
            return None;
        }
        if matches!(
            self.subtype.as_deref(),
            Some("message_changed") | Some("message_deleted")
        ) {
            return None;
        }
        let text = self.text.as_deref().filter(|t| !t.is_empty())?;
        Some(InboundMessage {
            channel_id: ChannelId::from(self.channel.clone()?),
            message_id: MessageId::from(self.ts.clone()?),
            text: text.to_string(),
        })
    }
}

/// Remembers recently delivered event ids so Slack retries are processed once.
#[derive(Default)]
pub struct SeenEvents {
    seen: Mutex<HashMap<String, Instant>>,
}

impl SeenEvents {
    /// Returns `true` the first time `event_id` is seen within the TTL.
    pub fn try_claim(&self, event_id: &str) -> bool {
        let now = Instant::now();
        let Ok(mut seen) = self.seen.lock() else {
            // A poisoned map only costs deduplication.
            return true;
        };
        seen.retain(|_, at| now.duration_since(*at) < EVENT_ID_TTL);
        if seen.contains_key(event_id) {
            return false;
        }
        seen.insert(event_id.to_string(), now);
        true
    }
}

type HmacSha256 = Hmac<Sha256>;

/// Check a Slack request signature (`v0=` + hex HMAC-SHA256 over
/// `v0:{timestamp}:{body}`) and the freshness of its timestamp.
pub fn verify_slack_signature(
    secret: &str,
    timestamp: &str,
    body: &[u8],
    signature: &str,
    now_secs: i64,
) -> bool {
    let Some(signature_hex) = signature.strip_prefix("v0=") else {
        return false;
    };

    let Ok(request_secs) = timestamp.parse::<i64>() else {
        return false;
    };
    if (now_secs - request_secs).abs() > MAX_TIMESTAMP_SKEW_SECS {
        return false;
    }

    let signature_bytes = match hex::decode(signature_hex) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };

    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };

    mac.update(b"v0:");
    mac.update(timestamp.as_bytes());
    mac.update(b":");
    mac.update(body);

    // Constant-time comparison.
    mac.verify_slice(&signature_bytes).is_ok()
}

async fn verify_request_signature(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let correlation_id = CorrelationId(Uuid::new_v4().to_string());

    let (parts, body) = request.into_parts();
    let bytes = axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|_| StatusCode::BAD_REQUEST)?;

    let header = |name: &str| parts.headers.get(name).and_then(|h| h.to_str().ok());
    let timestamp = header("x-slack-request-timestamp").ok_or(StatusCode::UNAUTHORIZED)?;
    let signature = header("x-slack-signature").ok_or(StatusCode::UNAUTHORIZED)?;

    if !verify_slack_signature(
        &state.signing_secret,
        timestamp,
        &bytes,
        signature,
        chrono::Utc::now().timestamp(),
    ) {
        error!("Invalid Slack request signature");
        return Err(StatusCode::UNAUTHORIZED);
    }

    if let Some(ref logger) = state.recording_logger {
        let body = serde_json::from_slice::<serde_json::Value>(&bytes)
            .map(|v| Sanitizer::sanitize_json(&v))
            .unwrap_or(serde_json::Value::Null);
        logger.record(RecordedEvent {
            timestamp: chrono::Utc::now().to_rfc3339(),
            correlation_id: correlation_id.0.clone(),
            event_type: EventType::SlackEventReceived,
            direction: Direction::Request,
            operation: "slack_event".to_string(),
            data: json!({
                "headers": Sanitizer::sanitize_headers(&headers_to_map(&parts.headers)),
                "body": body,
            }),
            metadata: HashMap::new(),
        });
    }

    let mut request = Request::from_parts(parts, axum::body::Body::from(bytes));
    request.extensions_mut().insert(correlation_id);

    Ok(next.run(request).await)
}

pub async fn slack_events_handler(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<Response, StatusCode> {
    let (_parts, body) = request.into_parts();
    let bytes = axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|_| StatusCode::BAD_REQUEST)?;

    let envelope: SlackEnvelope = serde_json::from_slice(&bytes).map_err(|e| {
        warn!("Unparseable Slack event payload: {}", e);
        StatusCode::BAD_REQUEST
    })?;

    match envelope {
        SlackEnvelope::UrlVerification { challenge } => {
            info!("Answering Slack URL verification");
            Ok(Json(json!({ "challenge": challenge })).into_response())
        }
        SlackEnvelope::EventCallback { event_id, event } => {
            if let Some(id) = event_id.as_deref() {
                if !state.seen_events.try_claim(id) {
                    info!("Ignoring redelivered Slack event {}", id);
                    return Ok(Json(json!({ "ok": true })).into_response());
                }
            }

            match event.inbound_message() {
                Some(message) => {
                    let intake = state.intake.clone();
                    tokio::spawn(async move {
                        match intake.handle_message(&message).await {
                            Ok(IntakeOutcome::NoLink) => {
                                debug!("Message {} has no pull request link", message.message_id)
                            }
                            Ok(_) => {}
                            Err(e) => error!(
                                "Failed to handle message {} in {}: {:#}",
                                message.message_id, message.channel_id, e
                            ),
                        }
                    });
                }
                None => debug!("Ignoring Slack {} event", event.kind),
            }

            Ok(Json(json!({ "ok": true })).into_response())
        }
        SlackEnvelope::Other => {
            debug!("Ignoring unsupported Slack envelope");
            Ok(Json(json!({ "ok": true })).into_response())
        }
    }
}

pub fn events_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/slack/events", post(slack_events_handler))
        .layer(middleware::from_fn_with_state(
            state,
            verify_request_signature,
        ))
}
