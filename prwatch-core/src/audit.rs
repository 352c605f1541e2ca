//! Optional record of watch registrations.
//!
//! Rows are written for later inspection only; nothing reads them back to
//! rebuild the registry.

use async_trait::async_trait;
use thiserror::Error;

use crate::watch::WatchEntry;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("audit storage error during {operation}: {message}")]
    Storage { operation: String, message: String },
}

impl AuditError {
    pub fn storage(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Storage {
            operation: operation.into(),
            message: message.into(),
        }
    }
}

#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn record_registration(&self, entry: &WatchEntry) -> Result<(), AuditError>;
}
