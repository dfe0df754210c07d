use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Store-assigned identifier of a pull request row.
///
/// Stable across runs because rows are upserted by (repo, pr_number).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrId(pub i64);

impl fmt::Display for PrId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// GitHub file status within a PR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Added,
    Modified,
    Removed,
    Renamed,
    #[serde(other)]
    Other,
}

/// A single file touched by a pull request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileChange {
    pub filename: String,
    pub status: FileStatus,
    #[serde(default)]
    pub additions: u64,
    #[serde(default)]
    pub deletions: u64,
    /// Unified diff hunk text as GitHub returns it (absent for binary files)
    #[serde(default)]
    pub patch: Option<String>,
    /// Full post-change file content, when it could be fetched
    #[serde(default)]
    pub content: Option<String>,
}

/// Pull request as ingested and stored.
#[derive(Debug, Clone, PartialEq)]
pub struct PullRequestRecord {
    /// None until the store assigns one
    pub id: Option<PrId>,
    pub repo: String,
    pub pr_number: u64,
    pub title: String,
    pub author: String,
    pub url: String,
    pub created_at: Option<DateTime<Utc>>,
    pub files: Vec<FileChange>,
}

impl PullRequestRecord {
    pub fn total_additions(&self) -> u64 {
        self.files.iter().map(|f| f.additions).sum()
    }

    pub fn total_deletions(&self) -> u64 {
        self.files.iter().map(|f| f.deletions).sum()
    }

    /// Header stat string, e.g. `+12 / -3`.
    pub fn stats(&self) -> String {
        format!("+{} / -{}", self.total_additions(), self.total_deletions())
    }
}

/// Read-only view of a stored PR used by the report pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct PrProjection {
    pub pr_id: PrId,
    pub pr_number: u64,
    pub title: String,
    pub author: String,
    pub url: String,
    pub stats: String,
    pub files: Vec<FileChange>,
}

impl PrProjection {
    /// Returns None for records that were never stored.
    pub fn from_record(record: &PullRequestRecord) -> Option<Self> {
        Some(Self {
            pr_id: record.id?,
            pr_number: record.pr_number,
            title: record.title.clone(),
            author: record.author.clone(),
            url: record.url.clone(),
            stats: record.stats(),
            files: record.files.clone(),
        })
    }

    pub fn filenames(&self) -> Vec<&str> {
        self.files.iter().map(|f| f.filename.as_str()).collect()
    }
}

#[cfg(test)]
pub(crate) fn test_file(filename: &str, additions: u64, deletions: u64) -> FileChange {
    FileChange {
        filename: filename.to_string(),
        status: FileStatus::Modified,
        additions,
        deletions,
        patch: Some(format!("@@ -1 +1 @@\n-old {filename}\n+new {filename}")),
        content: None,
    }
}
