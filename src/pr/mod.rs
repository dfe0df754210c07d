pub mod types;

use types::{FileChange, FileStatus, PullRequestRecord};

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::github::{CodeHost, HostError, PullFile, PullSummary};
use crate::store::{PrStore, StoreError};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Code host error: {0}")]
    Host(#[from] HostError),

    #[error("Failed to store PR #{pr_number}: {source}")]
    Store {
        pr_number: u64,
        #[source]
        source: StoreError,
    },
}

/// Outcome of one PR ingestion run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub repo: String,
    pub inserted: Vec<u64>,
    pub updated: Vec<u64>,
}

impl IngestSummary {
    pub fn total(&self) -> usize {
        self.inserted.len() + self.updated.len()
    }
}

/// Pull open PRs of `repo` (at most `limit`) with their changed files and
/// upsert them into `store`.
///
/// Removed files are dropped. A file whose full content cannot be fetched is
/// kept with its patch only.
#[instrument(skip(host, store), fields(repo = %repo))]
pub async fn ingest_prs(
    host: &dyn CodeHost,
    store: &dyn PrStore,
    repo: &str,
    limit: usize,
) -> Result<IngestSummary, IngestError> {
    let pulls = host.list_pull_requests(repo, limit).await?;
    info!(count = pulls.len(), "fetched open pull requests");

    let mut summary = IngestSummary {
        repo: repo.to_string(),
        ..Default::default()
    };

    for pull in pulls {
        let files = host.list_pr_files(repo, pull.number).await?;
        let record = build_record(host, repo, pull, files).await;
        let pr_number = record.pr_number;

        let upsert = store
            .upsert_pr(&record)
            .await
            .map_err(|source| IngestError::Store { pr_number, source })?;
        debug!(pr = pr_number, id = %upsert.id, inserted = upsert.inserted, files = record.files.len(), "stored PR");

        if upsert.inserted {
            summary.inserted.push(pr_number);
        } else {
            summary.updated.push(pr_number);
        }
    }

    info!(
        inserted = summary.inserted.len(),
        updated = summary.updated.len(),
        "PR ingestion complete"
    );
    Ok(summary)
}

async fn build_record(host: &dyn CodeHost, repo: &str, pull: PullSummary, files: Vec<PullFile>) -> PullRequestRecord {
    let mut changes = Vec::with_capacity(files.len());
    for file in files {
        if file.status == FileStatus::Removed {
            debug!(file = %file.filename, "skipping removed file");
            continue;
        }

        let content = match file.raw_url.as_deref() {
            Some(url) => match host.fetch_raw_file(url).await {
                Ok(text) => Some(text),
                Err(e) => {
                    warn!(pr = pull.number, file = %file.filename, error = %e, "could not fetch file content");
                    None
                }
            },
            None => None,
        };

        changes.push(FileChange {
            filename: file.filename,
            status: file.status,
            additions: file.additions,
            deletions: file.deletions,
            patch: file.patch,
            content,
        });
    }

    PullRequestRecord {
        id: None,
        repo: repo.to_string(),
        pr_number: pull.number,
        title: pull.title,
        author: pull.user.login,
        url: pull.html_url,
        created_at: pull.created_at,
        files: changes,
    }
}
