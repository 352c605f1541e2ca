pub mod audit;
pub mod config;
pub mod events;
pub mod github;
pub mod recording;
pub mod slack;
pub mod status;

use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde_json::json;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::warn;

use prwatch_core::{IntakeHandler, WatchRegistry};

pub use events::{events_router, SeenEvents};
pub use github::GitHubClient;
pub use recording::RecordingLogger;
pub use slack::SlackClient;

mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

fn short_hash(hash: &str) -> String {
    hash.chars().take(8).collect()
}

pub fn get_bot_version() -> String {
    // Hash injected by a packaging build wins over the one detected by `built`.
    if let Some(git_hash) = option_env!("PRWATCH_GIT_HASH") {
        short_hash(git_hash)
    } else if let Some(git_hash) = built_info::GIT_COMMIT_HASH {
        short_hash(git_hash)
    } else {
        "unknown".to_string()
    }
}

pub struct AppState {
    pub intake: Arc<IntakeHandler>,
    pub registry: Arc<WatchRegistry>,
    pub signing_secret: String,
    pub status_auth_token: Option<String>,
    pub recording_logger: Option<RecordingLogger>,
    pub seen_events: SeenEvents,
}

async fn health_check() -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "service": "prwatch",
        "version": get_bot_version(),
    }))
}

/// Check `Authorization: Bearer <token>` against the configured token.
///
/// With no token configured the endpoint is disabled rather than open.
fn check_status_auth(headers: &HeaderMap, expected: Option<&str>) -> Result<(), StatusCode> {
    let Some(expected) = expected else {
        return Err(StatusCode::FORBIDDEN);
    };

    let provided = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match provided {
        Some(token) if token == expected => Ok(()),
        _ => {
            warn!("Rejected /status request with missing or wrong token");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}

async fn status_handler(headers: HeaderMap, State(state): State<Arc<AppState>>) -> Response {
    if let Err(code) = check_status_auth(&headers, state.status_auth_token.as_deref()) {
        return code.into_response();
    }

    let snapshot = state.registry.snapshot().await;
    Json(status::StatusData::from_snapshot(snapshot, get_bot_version())).into_response()
}

/// The full HTTP surface of the service.
pub fn app_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/status", get(status_handler))
        .merge(events_router(state.clone()))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}


#[cfg(test)]
mod tests {
    use super::test_support::{test_state, STATUS_TOKEN};
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use prwatch_core::testing::FakeProvider;
    use prwatch_core::{ChannelId, CiStatus, CommitSha, MessageId, RepoRef, WatchEntry};
    use tower::ServiceExt;

    fn get_request(uri: &str, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method("GET").uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {}", token));
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (state, _, _) = test_state(FakeProvider::new());
        let response = app_router(state)
            .oneshot(get_request("/health", None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["service"], "prwatch");
    }

    #[tokio::test]
    async fn test_status_requires_token() {
        let (state, _, _) = test_state(FakeProvider::new());
        let app = app_router(state);

        let missing = app
            .clone()
            .oneshot(get_request("/status", None))
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

        let wrong = app
            .oneshot(get_request("/status", Some("nope")))
            .await
            .unwrap();
        assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_status_disabled_without_configured_token() {
        let (state, _, _) = test_state(FakeProvider::new());
        let state = Arc::new(AppState {
            intake: state.intake.clone(),
            registry: state.registry.clone(),
            signing_secret: state.signing_secret.clone(),
            status_auth_token: None,
            recording_logger: None,
            seen_events: SeenEvents::default(),
        });

        let response = app_router(state)
            .oneshot(get_request("/status", Some(STATUS_TOKEN)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_status_lists_watches() {
        let (state, _, _) = test_state(FakeProvider::new());
        state
            .registry
            .put(WatchEntry {
                message_id: MessageId::from("1.0"),
                channel_id: ChannelId::from("C1"),
                repo: RepoRef::new("acme", "widgets"),
                pr_number: 42,
                commit_sha: CommitSha::from("abc1234"),
                last_ci_status: Some(CiStatus::Fail),
            })
            .await;

        let response = app_router(state)
            .oneshot(get_request("/status", Some(STATUS_TOKEN)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["summary"]["total_watches"], 1);
        assert_eq!(json["summary"]["fail"], 1);
        assert_eq!(json["watches"][0]["pr_number"], 42);
        assert_eq!(json["watches"][0]["repo"], "acme/widgets");
    }

    #[test]
    fn test_short_hash() {
        assert_eq!(short_hash("0123456789abcdef"), "01234567");
        assert_eq!(short_hash("abc"), "abc");
    }
}
