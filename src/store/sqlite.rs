use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::str::FromStr;
use tracing::{debug, instrument};

use super::{PrStore, PrUpsert, StoreError};
use crate::pr::types::{FileChange, PrId, PullRequestRecord};
use crate::report::types::ReportRecord;

/// Open a pool for `url` (e.g. `sqlite:pr-reporter.db`), creating the file if missing.
pub async fn connect(url: &str) -> Result<SqlitePool, StoreError> {
    if let Some(path) = url.strip_prefix("sqlite:") {
        let path = std::path::Path::new(path.trim_start_matches("//"));
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Database(sqlx::Error::Io(e)))?;
        }
    }

    let options = SqliteConnectOptions::from_str(url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;
    Ok(pool)
}

#[cfg(test)]
/// Single-connection in-memory pool; every connection would otherwise see its own database.
pub async fn connect_in_memory() -> Result<SqlitePool, StoreError> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    Ok(pool)
}

/// SQLite implementation of [`PrStore`]. Also owns the `code_chunks` schema used by the index.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn encode_files(record: &PullRequestRecord) -> Result<String, StoreError> {
    serde_json::to_string(&record.files).map_err(|source| StoreError::Files {
        pr_number: record.pr_number,
        source,
    })
}

fn pr_from_row(row: &SqliteRow) -> Result<PullRequestRecord, StoreError> {
    let pr_number = row.try_get::<i64, _>("pr_number")? as u64;
    let files_json: String = row.try_get("files")?;
    let files: Vec<FileChange> =
        serde_json::from_str(&files_json).map_err(|source| StoreError::Files { pr_number, source })?;
    let created_at = row
        .try_get::<Option<String>, _>("created_at")?
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc));

    Ok(PullRequestRecord {
        id: Some(PrId(row.try_get("id")?)),
        repo: row.try_get("repo")?,
        pr_number,
        title: row.try_get("title")?,
        author: row.try_get("author")?,
        url: row.try_get("url")?,
        created_at,
        files,
    })
}

fn report_from_row(row: &SqliteRow) -> Result<ReportRecord, StoreError> {
    Ok(ReportRecord {
        id: row.try_get("id")?,
        pr_id: PrId(row.try_get("pr_id")?),
        report_markdown: row.try_get("report_markdown")?,
        file_path: row.try_get("file_path")?,
    })
}

const UPSERT_REPORT_SQL: &str = r#"
    INSERT INTO pr_reports (id, pr_id, report_markdown, file_path)
    VALUES (?, ?, ?, ?)
    ON CONFLICT(id) DO UPDATE SET
        pr_id = excluded.pr_id,
        report_markdown = excluded.report_markdown,
        file_path = excluded.file_path
"#;

#[async_trait]
impl PrStore for SqliteStore {
    async fn init_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS pull_requests (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                pr_number INTEGER NOT NULL,
                repo TEXT NOT NULL,
                title TEXT NOT NULL,
                author TEXT NOT NULL,
                url TEXT NOT NULL,
                created_at TEXT,
                files TEXT NOT NULL DEFAULT '[]',
                UNIQUE(repo, pr_number)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS pr_reports (
                id TEXT PRIMARY KEY,
                pr_id INTEGER NOT NULL,
                report_markdown TEXT NOT NULL,
                file_path TEXT NOT NULL,
                FOREIGN KEY (pr_id) REFERENCES pull_requests(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS code_chunks (
                id TEXT PRIMARY KEY,
                repo TEXT NOT NULL,
                file_path TEXT NOT NULL,
                language TEXT NOT NULL,
                chunk_index INTEGER NOT NULL,
                text TEXT NOT NULL,
                embedding BLOB NOT NULL,
                UNIQUE(repo, file_path, chunk_index)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_pull_requests_repo ON pull_requests(repo)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_pr_reports_pr_id ON pr_reports(pr_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_code_chunks_file ON code_chunks(file_path)")
            .execute(&self.pool)
            .await?;

        debug!("schema ready");
        Ok(())
    }

    #[instrument(skip(self, record), fields(repo = %record.repo, pr = record.pr_number))]
    async fn upsert_pr(&self, record: &PullRequestRecord) -> Result<PrUpsert, StoreError> {
        let files = encode_files(record)?;
        let created_at = record.created_at.map(|dt| dt.to_rfc3339());
        let mut tx = self.pool.begin().await?;

        let existing: Option<i64> =
            sqlx::query_scalar("SELECT id FROM pull_requests WHERE repo = ? AND pr_number = ?")
                .bind(&record.repo)
                .bind(record.pr_number as i64)
                .fetch_optional(&mut *tx)
                .await?;

        let upsert = match existing {
            Some(id) => {
                sqlx::query(
                    r#"
                    UPDATE pull_requests
                    SET title = ?, author = ?, url = ?, created_at = ?, files = ?
                    WHERE id = ?
                    "#,
                )
                .bind(&record.title)
                .bind(&record.author)
                .bind(&record.url)
                .bind(&created_at)
                .bind(&files)
                .bind(id)
                .execute(&mut *tx)
                .await?;
                PrUpsert { id: PrId(id), inserted: false }
            }
            None => {
                let id: i64 = sqlx::query_scalar(
                    r#"
                    INSERT INTO pull_requests (pr_number, repo, title, author, url, created_at, files)
                    VALUES (?, ?, ?, ?, ?, ?, ?)
                    RETURNING id
                    "#,
                )
                .bind(record.pr_number as i64)
                .bind(&record.repo)
                .bind(&record.title)
                .bind(&record.author)
                .bind(&record.url)
                .bind(&created_at)
                .bind(&files)
                .fetch_one(&mut *tx)
                .await?;
                PrUpsert { id: PrId(id), inserted: true }
            }
        };

        tx.commit().await?;
        debug!(id = %upsert.id, inserted = upsert.inserted, "upserted PR");
        Ok(upsert)
    }

    async fn list_all_prs(&self) -> Result<Vec<PullRequestRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, pr_number, repo, title, author, url, created_at, files FROM pull_requests ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(pr_from_row).collect()
    }

    #[instrument(skip(self, record), fields(report = %record.id))]
    async fn upsert_report(&self, record: &ReportRecord) -> Result<(), StoreError> {
        sqlx::query(UPSERT_REPORT_SQL)
            .bind(&record.id)
            .bind(record.pr_id.0)
            .bind(&record.report_markdown)
            .bind(&record.file_path)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn upsert_reports(&self, records: &[ReportRecord]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for record in records {
            sqlx::query(UPSERT_REPORT_SQL)
                .bind(&record.id)
                .bind(record.pr_id.0)
                .bind(&record.report_markdown)
                .bind(&record.file_path)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        debug!(count = records.len(), "committed reports");
        Ok(())
    }

    async fn get_report(&self, id: &str) -> Result<Option<ReportRecord>, StoreError> {
        let row = sqlx::query("SELECT id, pr_id, report_markdown, file_path FROM pr_reports WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(report_from_row).transpose()
    }

    async fn list_reports(&self) -> Result<Vec<ReportRecord>, StoreError> {
        let rows = sqlx::query("SELECT id, pr_id, report_markdown, file_path FROM pr_reports ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(report_from_row).collect()
    }
}

#[cfg(test)]
pub(crate) async fn test_store() -> SqliteStore {
    let pool = connect_in_memory().await.unwrap();
    let store = SqliteStore::new(pool);
    store.init_schema().await.unwrap();
    store
}
