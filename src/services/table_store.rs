//! Trait and errors for the hosted table that stores scored records.

use async_trait::async_trait;

use crate::record::StoredRecord;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("table store returned status {status}: {body}")]
    Http { status: u16, body: String },

    #[error("table store request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("table store payload error: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("cannot build table URL from '{0}'")]
    BadUrl(String),
}

/// Abstraction over the remote table (e.g., Supabase).
#[async_trait]
pub trait TableStore: Send + Sync {
    /// Inserts `rows` in one request. Plain insert: existing rows are never updated.
    async fn insert(&self, table: &str, rows: &[StoredRecord]) -> Result<(), StoreError>;

    /// Returns every row in `table`.
    async fn select_all(&self, table: &str) -> Result<Vec<StoredRecord>, StoreError>;
}
