//! SQLite record of watch registrations.
//!
//! Each registration is appended as one row. The table is write-only from the
//! service's point of view: the registry is never rebuilt from it.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection};
use tracing::info;

use prwatch_core::{AuditError, AuditLog, WatchEntry};

/// A row of the `watch_registrations` table.
#[cfg(test)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationRecord {
    pub message_id: String,
    pub repo: String,
    pub pr_number: u64,
    pub channel_id: String,
    pub ci_status: Option<String>,
    pub commit_sha: String,
    pub registered_at: String,
}

pub struct SqliteAuditLog {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteAuditLog {
    /// Open (creating if needed) the audit database at `path`.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, AuditError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    AuditError::storage(
                        "create database directory",
                        format!("{}: {}", parent.display(), e),
                    )
                })?;
            }
        }

        let conn = Connection::open(path)
            .map_err(|e| AuditError::storage("open database", e.to_string()))?;

        conn.execute_batch("PRAGMA busy_timeout = 5000;")
            .map_err(|e| AuditError::storage("configure database", e.to_string()))?;

        Self::from_connection(conn)
    }

    pub fn new_in_memory() -> Result<Self, AuditError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| AuditError::storage("open database", e.to_string()))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, AuditError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS watch_registrations (
                id INTEGER PRIMARY KEY,
                message_id TEXT NOT NULL,
                repo TEXT NOT NULL,
                pr_number INTEGER NOT NULL,
                channel_id TEXT NOT NULL,
                ci_status TEXT,
                commit_sha TEXT NOT NULL,
                registered_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_watch_registrations_message
                ON watch_registrations(message_id);
            "#,
        )
        .map_err(|e| AuditError::storage("create schema", e.to_string()))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

#[cfg(test)]
impl SqliteAuditLog {
    /// Most recent registrations first.
    pub async fn recent_registrations(
        &self,
        limit: usize,
    ) -> Result<Vec<RegistrationRecord>, AuditError> {
        let conn = self.conn.clone();

        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|_| AuditError::storage("recent_registrations", "lock poisoned"))?;

            let mut stmt = conn
                .prepare(
                    "SELECT message_id, repo, pr_number, channel_id, ci_status, commit_sha,
                            registered_at
                     FROM watch_registrations ORDER BY id DESC LIMIT ?1",
                )
                .map_err(|e| AuditError::storage("recent_registrations", e.to_string()))?;

            let rows = stmt
                .query_map(params![limit as i64], |row| {
                    Ok(RegistrationRecord {
                        message_id: row.get(0)?,
                        repo: row.get(1)?,
                        pr_number: row.get::<_, i64>(2)? as u64,
                        channel_id: row.get(3)?,
                        ci_status: row.get(4)?,
                        commit_sha: row.get(5)?,
                        registered_at: row.get(6)?,
                    })
                })
                .map_err(|e| AuditError::storage("recent_registrations", e.to_string()))?;

            rows.collect::<Result<Vec<_>, _>>()
                .map_err(|e| AuditError::storage("recent_registrations row", e.to_string()))
        })
        .await
        .map_err(|e| AuditError::storage("recent_registrations", format!("task failed: {}", e)))?
    }
}

#[async_trait]
impl AuditLog for SqliteAuditLog {
    async fn record_registration(&self, entry: &WatchEntry) -> Result<(), AuditError> {
        let conn = self.conn.clone();
        let message_id = entry.message_id.0.clone();
        let repo = entry.repo.to_string();
        let pr_number = entry.pr_number as i64;
        let channel_id = entry.channel_id.0.clone();
        let ci_status = entry.last_ci_status.map(|s| s.to_string());
        let commit_sha = entry.commit_sha.0.clone();
        let registered_at = chrono::Utc::now().to_rfc3339();

        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|_| AuditError::storage("record_registration", "lock poisoned"))?;

            conn.execute(
                "INSERT INTO watch_registrations
                    (message_id, repo, pr_number, channel_id, ci_status, commit_sha, registered_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    message_id,
                    repo,
                    pr_number,
                    channel_id,
                    ci_status,
                    commit_sha,
                    registered_at
                ],
            )
            .map_err(|e| AuditError::storage("record_registration", e.to_string()))?;

            info!("Recorded registration of {}#{} for message {}", repo, pr_number, message_id);
            Ok(())
        })
        .await
        .map_err(|e| AuditError::storage("record_registration", format!("task failed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prwatch_core::{ChannelId, CiStatus, CommitSha, MessageId, RepoRef};

    fn entry(message_id: &str, status: Option<CiStatus>) -> WatchEntry {
        WatchEntry {
            message_id: MessageId::from(message_id),
            channel_id: ChannelId::from("C1"),
            repo: RepoRef::new("acme", "widgets"),
            pr_number: 42,
            commit_sha: CommitSha::from("abc1234"),
            last_ci_status: status,
        }
    }

    #[tokio::test]
    async fn test_record_and_list() {
        let audit = SqliteAuditLog::new_in_memory().unwrap();

        audit
            .record_registration(&entry("1.0", Some(CiStatus::Pending)))
            .await
            .unwrap();
        audit.record_registration(&entry("2.0", None)).await.unwrap();

        let rows = audit.recent_registrations(10).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].message_id, "2.0");
        assert_eq!(rows[0].ci_status, None);
        assert_eq!(rows[1].message_id, "1.0");
        assert_eq!(rows[1].repo, "acme/widgets");
        assert_eq!(rows[1].pr_number, 42);
        assert_eq!(rows[1].ci_status.as_deref(), Some("pending"));
        assert_eq!(rows[1].commit_sha, "abc1234");
    }

    #[tokio::test]
    async fn test_reregistration_appends_rows() {
        let audit = SqliteAuditLog::new_in_memory().unwrap();

        audit.record_registration(&entry("1.0", None)).await.unwrap();
        audit.record_registration(&entry("1.0", None)).await.unwrap();

        assert_eq!(audit.recent_registrations(10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_file_database_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("prwatch-audit.db");

        {
            let audit = SqliteAuditLog::new(&path).unwrap();
            audit
                .record_registration(&entry("1.0", Some(CiStatus::Pass)))
                .await
                .unwrap();
        }

        let reopened = SqliteAuditLog::new(&path).unwrap();
        let rows = reopened.recent_registrations(1).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].ci_status.as_deref(), Some("pass"));
    }
}
