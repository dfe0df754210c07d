pub mod sqlite;

pub use sqlite::SqliteStore;

use async_trait::async_trait;
use thiserror::Error;

use crate::pr::types::{PrId, PullRequestRecord};
use crate::report::types::ReportRecord;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Failed to (de)serialize stored files for PR #{pr_number}: {source}")]
    Files {
        pr_number: u64,
        #[source]
        source: serde_json::Error,
    },
}

/// Result of [`PrStore::upsert_pr`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrUpsert {
    pub id: PrId,
    /// False when an existing row was updated in place
    pub inserted: bool,
}

/// Read/write access to PR metadata and PR report rows.
///
/// Upserts are last-write-wins; there is no optimistic concurrency check.
#[async_trait]
pub trait PrStore: Send + Sync {
    /// Create tables and indexes if they do not exist.
    async fn init_schema(&self) -> Result<(), StoreError>;

    /// Insert or update by (repo, pr_number).
    async fn upsert_pr(&self, record: &PullRequestRecord) -> Result<PrUpsert, StoreError>;

    /// Every stored PR, ordered by id.
    async fn list_all_prs(&self) -> Result<Vec<PullRequestRecord>, StoreError>;

    /// Insert or update by report id.
    #[allow(dead_code)] // Pipeline persists through upsert_reports
    async fn upsert_report(&self, record: &ReportRecord) -> Result<(), StoreError>;

    /// Upsert all records in one transaction.
    async fn upsert_reports(&self, records: &[ReportRecord]) -> Result<(), StoreError>;

    async fn get_report(&self, id: &str) -> Result<Option<ReportRecord>, StoreError>;

    async fn list_reports(&self) -> Result<Vec<ReportRecord>, StoreError>;
}
