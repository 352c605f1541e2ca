use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use prwatch_core::{AuditLog, IntakeHandler, Reconciler, WatchRegistry};
use prwatch_server::audit::SqliteAuditLog;
use prwatch_server::config::Config;
use prwatch_server::{app_router, AppState, GitHubClient, RecordingLogger, SeenEvents, SlackClient};

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting prwatch {}", prwatch_server::get_bot_version());

    let config =
        Config::from_env().context("Failed to load configuration from environment variables")?;

    let recording_logger = if config.recording_enabled {
        match RecordingLogger::new(PathBuf::from(&config.recording_log_path)) {
            Ok(logger) => {
                info!(
                    "Recording enabled, logging to: {}",
                    config.recording_log_path
                );
                Some(logger)
            }
            Err(e) => {
                error!("Failed to initialize recording logger: {}", e);
                None
            }
        }
    } else {
        None
    };

    let github_client = Arc::new(GitHubClient::new(
        &config.github_api_url,
        config.github_token.clone(),
        config.request_timeout,
        recording_logger.clone(),
    )?);
    let slack_client = Arc::new(SlackClient::new(
        &config.slack_api_url,
        config.slack_token.clone(),
        config.request_timeout,
        recording_logger.clone(),
    )?);

    let registry = Arc::new(WatchRegistry::new());

    let mut intake = IntakeHandler::new(
        github_client.clone(),
        slack_client.clone(),
        registry.clone(),
        config.reactions.clone(),
    )
    .with_web_host(config.github_web_host.clone());
    if config.audit_enabled {
        let db_path = config.audit_db_path();
        info!("Recording watch registrations in {}", db_path.display());
        let audit: Arc<dyn AuditLog> = Arc::new(
            SqliteAuditLog::new(&db_path).context("Failed to initialize audit database")?,
        );
        intake = intake.with_audit(audit);
    }

    let reconciler = Arc::new(Reconciler::new(
        github_client,
        slack_client,
        registry.clone(),
        config.reactions.clone(),
    ));

    let app_state = Arc::new(AppState {
        intake: Arc::new(intake),
        registry,
        signing_secret: config.slack_signing_secret.clone(),
        status_auth_token: config.status_auth_token.clone(),
        recording_logger,
        seen_events: SeenEvents::default(),
    });

    if app_state.status_auth_token.is_none() {
        warn!("STATUS_AUTH_TOKEN is not set; /status is disabled");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let reconcile_loop = tokio::spawn(reconciler.run(config.poll_interval, shutdown_rx));

    let app = app_router(app_state);

    let listener = TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    info!("Server listening on port {}", config.port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Let an in-flight tick finish before exiting.
    let _ = shutdown_tx.send(true);
    if let Err(e) = reconcile_loop.await {
        error!("Reconciliation loop panicked: {}", e);
    }

    info!("prwatch stopped");
    Ok(())
}
